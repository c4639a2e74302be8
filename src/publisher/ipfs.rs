//! Metadata publishing through a Kubo-compatible IPFS HTTP API.
//!
//! Each token's revealed metadata already lives under its own CID (listed in a
//! [`MetadataCatalog`]). Publishing a range copies those documents into an MFS
//! directory as `{base_path}/{token_id}` and returns the directory's new CID.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use url::Url;

use super::MetadataPublisher;
use crate::retry::RetryPolicy;

const TARGET: &str = "hatchery::publisher";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-token metadata CIDs.
///
/// Accepts either a JSON array indexed by token id or an object keyed by the
/// decimal token id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataCatalog {
    cids: BTreeMap<u64, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl MetadataCatalog {
    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: CatalogFile =
            serde_json::from_str(raw).context("Metadata catalog must be a JSON array or object")?;
        let cids = match parsed {
            CatalogFile::List(list) => list
                .into_iter()
                .enumerate()
                .map(|(i, cid)| (i as u64, cid))
                .collect(),
            CatalogFile::Map(map) => map
                .into_iter()
                .map(|(key, cid)| {
                    let token_id = key
                        .trim()
                        .parse::<u64>()
                        .with_context(|| format!("Metadata catalog key {key:?} is not a token id"))?;
                    Ok((token_id, cid))
                })
                .collect::<Result<_>>()?,
        };
        Ok(Self { cids })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read metadata catalog {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn get(&self, token_id: u64) -> Option<&str> {
        self.cids.get(&token_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct IpfsPublisherConfig {
    /// Root of the HTTP API, e.g. `http://127.0.0.1:5001`.
    pub api_url: Url,
    /// MFS directory holding revealed metadata.
    pub base_path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FilesStat {
    hash: String,
}

pub struct IpfsPublisher {
    client: reqwest::Client,
    config: IpfsPublisherConfig,
    catalog: MetadataCatalog,
    retry: RetryPolicy,
}

impl IpfsPublisher {
    pub fn new(config: IpfsPublisherConfig, catalog: MetadataCatalog) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build IPFS HTTP client")?;

        Ok(Self {
            client,
            config,
            catalog,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, command: &str, args: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .config
            .api_url
            .join(&format!("api/v0/{command}"))
            .with_context(|| format!("Invalid IPFS API url for {command}"))?;
        url.query_pairs_mut().extend_pairs(args);
        Ok(url)
    }

    fn token_path(&self, token_id: u64) -> String {
        format!("{}/{token_id}", self.config.base_path.trim_end_matches('/'))
    }

    async fn cat(&self, cid: &str) -> Result<Vec<u8>> {
        let url = self.endpoint("cat", &[("arg", cid)])?;
        self.retry
            .execute("ipfs_cat", || async {
                let response = self
                    .client
                    .post(url.clone())
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(response.bytes().await?.to_vec())
            })
            .await
            .with_context(|| format!("Failed to read metadata {cid}"))
    }

    async fn files_write(&self, path: &str, content: &[u8]) -> Result<()> {
        let url = self.endpoint(
            "files/write",
            &[
                ("arg", path),
                ("create", "true"),
                ("parents", "true"),
                ("truncate", "true"),
            ],
        )?;
        self.retry
            .execute("ipfs_files_write", || async {
                let form = Form::new().part("file", Part::bytes(content.to_vec()));
                self.client
                    .post(url.clone())
                    .multipart(form)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(())
            })
            .await
            .with_context(|| format!("Failed to write {path}"))
    }

    async fn files_stat(&self, path: &str) -> Result<String> {
        let url = self.endpoint("files/stat", &[("arg", path)])?;
        let stat: FilesStat = self
            .retry
            .execute("ipfs_files_stat", || async {
                Ok(self
                    .client
                    .post(url.clone())
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<FilesStat>()
                    .await?)
            })
            .await
            .with_context(|| format!("Failed to stat {path}"))?;
        Ok(stat.hash)
    }
}

#[async_trait]
impl MetadataPublisher for IpfsPublisher {
    async fn publish_range(&self, from_exclusive: u64, to_inclusive: u64) -> Result<String> {
        for token_id in from_exclusive.saturating_add(1)..=to_inclusive {
            let cid = self
                .catalog
                .get(token_id)
                .ok_or_else(|| anyhow::anyhow!("No metadata CID for token {token_id}"))?;
            let content = self.cat(cid).await?;
            let path = self.token_path(token_id);

            tracing::debug!(
                target: TARGET,
                token_id,
                path = %path,
                bytes = content.len(),
                "Writing revealed metadata"
            );
            self.files_write(&path, &content).await?;
        }

        let root = self.files_stat(&self.config.base_path).await?;
        let base_uri = format!("ipfs://{root}/");

        tracing::info!(
            target: TARGET,
            from_exclusive,
            to_inclusive,
            base_uri = %base_uri,
            "Published metadata range"
        );
        Ok(base_uri)
    }
}
