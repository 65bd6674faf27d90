//! # CA Trust Chain
//!
//! Fetches the root CA handed to devices with their certificate. The fetch
//! tries the preferred source, then the backup source once; if neither
//! answers with a success status the registration proceeds without it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use shared::{error::TrustFetchError, types::TrustChain};

use crate::configuration::RootCaSources;

/// Source of CA documents
#[async_trait]
pub trait TrustSource: Send + Sync {
    /// Download the document at `url`
    async fn fetch(&self, url: &str) -> Result<String, TrustFetchError>;
}

/// HTTP(S) trust source
pub struct HttpTrustSource {
    client: reqwest::Client,
}

impl HttpTrustSource {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for HttpTrustSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl TrustSource for HttpTrustSource {
    async fn fetch(&self, url: &str) -> Result<String, TrustFetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TrustFetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrustFetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| TrustFetchError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Fetch the trust chain with a single fallback
pub async fn fetch_trust_chain(source: &dyn TrustSource, sources: &RootCaSources) -> TrustChain {
    match source.fetch(&sources.preferred).await {
        Ok(pem) => return TrustChain::Present(pem),
        Err(e) => warn!(error = %e, "Preferred root CA source failed, using backup"),
    }

    match source.fetch(&sources.backup).await {
        Ok(pem) => TrustChain::Present(pem),
        Err(e) => {
            info!(error = %e, "Root CA unavailable, registration continues without it");
            TrustChain::Absent
        }
    }
}

/// Fixed set of documents keyed by URL; unknown URLs answer 404
#[derive(Debug, Default, Clone)]
pub struct StaticTrustSource {
    documents: HashMap<String, String>,
}

impl StaticTrustSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, url: impl Into<String>, pem: impl Into<String>) -> Self {
        self.documents.insert(url.into(), pem.into());
        self
    }
}

#[async_trait]
impl TrustSource for StaticTrustSource {
    async fn fetch(&self, url: &str) -> Result<String, TrustFetchError> {
        self.documents.get(url).cloned().ok_or_else(|| TrustFetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FakeSource {
        documents: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn new(documents: &[(&str, &str)]) -> Self {
            Self {
                documents: documents
                    .iter()
                    .map(|(u, d)| (u.to_string(), d.to_string()))
                    .collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TrustSource for FakeSource {
        async fn fetch(&self, url: &str) -> Result<String, TrustFetchError> {
            self.requested.lock().push(url.to_string());
            self.documents.get(url).cloned().ok_or(TrustFetchError::Status {
                url: url.to_string(),
                status: 503,
            })
        }
    }

    fn sources() -> RootCaSources {
        RootCaSources {
            preferred: "https://preferred/ca.pem".into(),
            backup: "https://backup/ca.pem".into(),
        }
    }

    #[tokio::test]
    async fn test_preferred_source_wins() {
        let source = FakeSource::new(&[("https://preferred/ca.pem", "PREFERRED"), ("https://backup/ca.pem", "BACKUP")]);
        let chain = fetch_trust_chain(&source, &sources()).await;
        assert_eq!(chain, TrustChain::Present("PREFERRED".into()));
        assert_eq!(source.requested.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_backup() {
        let source = FakeSource::new(&[("https://backup/ca.pem", "BACKUP")]);
        let chain = fetch_trust_chain(&source, &sources()).await;
        assert_eq!(chain, TrustChain::Present("BACKUP".into()));
    }

    #[tokio::test]
    async fn test_both_sources_fail_is_absent() {
        let source = FakeSource::new(&[]);
        let chain = fetch_trust_chain(&source, &sources()).await;
        assert_eq!(chain, TrustChain::Absent);
        assert_eq!(source.requested.lock().len(), 2);
    }
}
