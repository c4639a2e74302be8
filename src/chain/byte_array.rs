//! Cairo `ByteArray` calldata: `[data_len, chunk_0 .. chunk_n, pending_word, pending_word_len]`
//! with each chunk holding 31 big-endian bytes.

use starknet::core::types::Felt;

const CHUNK: usize = 31;

pub fn encode(value: &str) -> Vec<Felt> {
    let bytes = value.as_bytes();
    let full = bytes.len() / CHUNK;
    let mut felts = Vec::with_capacity(full + 3);

    felts.push(Felt::from(full as u64));
    for chunk in bytes.chunks_exact(CHUNK) {
        felts.push(Felt::from_bytes_be_slice(chunk));
    }

    let pending = &bytes[full * CHUNK..];
    felts.push(Felt::from_bytes_be_slice(pending));
    felts.push(Felt::from(pending.len() as u64));
    felts
}

/// Inverse of [`encode`]. `None` if the layout or the bytes are invalid.
pub fn decode(felts: &[Felt]) -> Option<String> {
    let data_len = usize::try_from(u64::try_from(*felts.first()?).ok()?).ok()?;
    if felts.len() != data_len + 3 {
        return None;
    }

    let mut bytes = Vec::with_capacity(data_len * CHUNK + CHUNK);
    for felt in &felts[1..=data_len] {
        bytes.extend_from_slice(&felt.to_bytes_be()[32 - CHUNK..]);
    }

    let pending_len = usize::try_from(u64::try_from(felts[data_len + 2]).ok()?).ok()?;
    if pending_len >= CHUNK {
        return None;
    }
    if pending_len > 0 {
        bytes.extend_from_slice(&felts[data_len + 1].to_bytes_be()[32 - pending_len..]);
    }

    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_short_string() {
        // "ETH" = 0x455448
        assert_eq!(
            encode("ETH"),
            vec![Felt::ZERO, Felt::from(0x455448u64), Felt::from(3u64)]
        );
    }

    #[test]
    fn test_encode_empty() {
        assert_eq!(encode(""), vec![Felt::ZERO, Felt::ZERO, Felt::ZERO]);
        assert_eq!(decode(&encode("")), Some(String::new()));
    }

    #[test]
    fn test_ipfs_uri_spans_chunks() {
        let uri = "ipfs://bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi/";
        let felts = encode(uri);
        assert_eq!(felts[0], Felt::from((uri.len() / 31) as u64));
        assert_eq!(felts.len(), uri.len() / 31 + 3);
        assert_eq!(decode(&felts).as_deref(), Some(uri));
    }

    #[test]
    fn test_exact_chunk_multiple_has_empty_pending_word() {
        let value = "a".repeat(31);
        let felts = encode(&value);
        assert_eq!(felts.len(), 4);
        assert_eq!(felts[2], Felt::ZERO);
        assert_eq!(felts[3], Felt::ZERO);
        assert_eq!(decode(&felts), Some(value));
    }

    #[test]
    fn test_decode_rejects_bad_layout() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[Felt::from(2u64), Felt::ZERO, Felt::ZERO]), None);
        assert_eq!(
            decode(&[Felt::ZERO, Felt::from(0x41u64), Felt::from(31u64)]),
            None
        );
    }
}
