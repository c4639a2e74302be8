//! Producers of the content address that a hatch batch points the contract at.

pub mod ipfs;

use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;

pub use ipfs::{IpfsPublisher, IpfsPublisherConfig, MetadataCatalog};

/// Publishes revealed metadata for a contiguous id range.
///
/// Calls may overlap earlier ranges; republishing must be harmless.
#[async_trait]
pub trait MetadataPublisher: Send + Sync {
    /// Publishes `(from_exclusive, to_inclusive]` and returns the base URI
    /// under which `{base_uri}{token_id}` resolves.
    async fn publish_range(&self, from_exclusive: u64, to_inclusive: u64) -> Result<String>;
}

#[async_trait]
impl<F, Fut> MetadataPublisher for F
where
    F: Fn(u64, u64) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    async fn publish_range(&self, from_exclusive: u64, to_inclusive: u64) -> Result<String> {
        self(from_exclusive, to_inclusive).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closure_is_a_publisher() {
        let publisher = |from: u64, to: u64| async move {
            Ok::<_, anyhow::Error>(format!("ipfs://range-{from}-{to}/"))
        };
        let base = publisher.publish_range(2, 5).await.unwrap();
        assert_eq!(base, "ipfs://range-2-5/");
    }
}
