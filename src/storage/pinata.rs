//! Pinata IPFS Pinning Client
//!
//! Uploads evidence through Pinata's `pinFileToIPFS` endpoint and fetches it
//! back from the configured gateway.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::IpfsConfig;
use crate::error::EvidenceError;
use crate::storage::{ContentReference, ObjectStore};

pub const IPFS_STORE: &str = "ipfs";

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

pub struct PinataStore {
    api_url: String,
    gateway_url: String,
    api_key: String,
    api_secret: String,
    http_client: Client,
}

impl PinataStore {
    pub fn new(
        api_url: &str,
        gateway_url: &str,
        api_key: &str,
        api_secret: &str,
        timeout: Duration,
    ) -> Result<Self, EvidenceError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EvidenceError::Storage(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            http_client,
        })
    }

    /// Build a client from configuration; `None` when IPFS is disabled or
    /// credentials are missing.
    pub fn from_config(config: &IpfsConfig, timeout: Duration) -> Result<Option<Self>, EvidenceError> {
        if !config.enabled {
            debug!("IPFS upload disabled");
            return Ok(None);
        }

        match (&config.api_key, &config.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => Ok(Some(
                Self::new(&config.api_url, &config.gateway_url, key, secret, timeout)?,
            )),
            _ => {
                warn!("IPFS enabled but Pinata credentials are missing; evidence will be stored locally");
                Ok(None)
            }
        }
    }

    pub fn gateway_url(&self, cid: &str) -> String {
        format!("{}/{}", self.gateway_url, cid)
    }
}

#[async_trait]
impl ObjectStore for PinataStore {
    fn name(&self) -> &str {
        IPFS_STORE
    }

    async fn upload(&self, bytes: &[u8], name: &str) -> Result<ContentReference, EvidenceError> {
        info!("Uploading {} ({} bytes) to IPFS", name, bytes.len());

        let part = Part::bytes(bytes.to_vec())
            .file_name(name.to_string())
            .mime_str("application/json")
            .map_err(|e| EvidenceError::Storage(format!("Invalid upload part: {}", e)))?;
        let form = Form::new().part("file", part);

        let response = self
            .http_client
            .post(format!("{}/pinning/pinFileToIPFS", self.api_url))
            .header("pinata_api_key", &self.api_key)
            .header("pinata_secret_api_key", &self.api_secret)
            .multipart(form)
            .send()
            .await
            .map_err(|e| EvidenceError::Storage(format!("IPFS upload failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EvidenceError::Storage(format!(
                "IPFS upload rejected with {}: {}",
                status, body
            )));
        }

        let pinned: PinResponse = response
            .json()
            .await
            .map_err(|e| EvidenceError::Storage(format!("Unexpected IPFS response: {}", e)))?;

        info!("Pinned {} as {}", name, pinned.ipfs_hash);
        Ok(ContentReference {
            store: IPFS_STORE.to_string(),
            url: Some(self.gateway_url(&pinned.ipfs_hash)),
            id: pinned.ipfs_hash,
        })
    }

    async fn download(&self, reference: &ContentReference) -> Result<Vec<u8>, EvidenceError> {
        if reference.store != IPFS_STORE {
            return Err(EvidenceError::Storage(format!(
                "Not an IPFS content reference: {}",
                reference
            )));
        }

        let url = self.gateway_url(&reference.id);
        debug!("Fetching {}", url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| EvidenceError::Storage(format!("IPFS download failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(EvidenceError::EvidenceNotFound(reference.to_string()));
        }
        if !status.is_success() {
            return Err(EvidenceError::Storage(format!(
                "IPFS gateway returned {} for {}",
                status, reference.id
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| EvidenceError::Storage(format!("IPFS download failed: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> PinataStore {
        PinataStore::new(
            &server.uri(),
            &format!("{}/ipfs", server.uri()),
            "key",
            "secret",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_upload_reads_cid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pinning/pinFileToIPFS"))
            .and(header("pinata_api_key", "key"))
            .and(header("pinata_secret_api_key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "IpfsHash": "QmTestCid",
                "PinSize": 42,
                "Timestamp": "2025-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reference = store(&server).upload(b"{}", "LAND_001.json").await.unwrap();
        assert_eq!(reference.store, IPFS_STORE);
        assert_eq!(reference.id, "QmTestCid");
        assert_eq!(reference.url, Some(format!("{}/ipfs/QmTestCid", server.uri())));
    }

    #[tokio::test]
    async fn test_upload_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pinning/pinFileToIPFS"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
            .mount(&server)
            .await;

        let err = store(&server).upload(b"{}", "x.json").await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_download_from_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ipfs/QmTestCid"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{\"a\":1}".to_vec()))
            .mount(&server)
            .await;

        let reference = ContentReference {
            store: IPFS_STORE.to_string(),
            id: "QmTestCid".to_string(),
            url: None,
        };
        let bytes = store(&server).download(&reference).await.unwrap();
        assert_eq!(bytes, b"{\"a\":1}".to_vec());
    }

    #[tokio::test]
    async fn test_download_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let reference = ContentReference {
            store: IPFS_STORE.to_string(),
            id: "QmGone".to_string(),
            url: None,
        };
        assert!(matches!(
            store(&server).download(&reference).await,
            Err(EvidenceError::EvidenceNotFound(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let mut config = IpfsConfig::default();
        assert!(PinataStore::from_config(&config, Duration::from_secs(1)).unwrap().is_none());

        config.enabled = true;
        assert!(PinataStore::from_config(&config, Duration::from_secs(1)).unwrap().is_none());

        config.api_key = Some("k".to_string());
        config.api_secret = Some("s".to_string());
        assert!(PinataStore::from_config(&config, Duration::from_secs(1)).unwrap().is_some());
    }
}
