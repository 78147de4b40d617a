//! Extraction worker client.
//!
//! The extraction step is an external concern: a worker service fetches
//! the page and turns it into structured records. The trait keeps the
//! scheduler decoupled from transport so tests can substitute a fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::Record;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extraction request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("extraction worker returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("extraction response unreadable: {0}")]
    Decode(#[from] serde_json::Error),
}

/// What one extraction asks for.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRequest {
    pub org_id: String,
    pub url: String,
    pub schema_type: String,
    pub extraction_rules: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    #[serde(default)]
    records: Vec<Record>,
}

/// Produces the current set of records for a watch's page.
#[async_trait]
pub trait ExtractionWorker: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<Vec<Record>, ExtractError>;
}

/// HTTP client for the extraction worker service.
pub struct HttpExtractionWorker {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpExtractionWorker {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl ExtractionWorker for HttpExtractionWorker {
    async fn extract(&self, request: &ExtractionRequest) -> Result<Vec<Record>, ExtractError> {
        let endpoint = format!("{}/extract", self.base_url);
        debug!(url = %request.url, schema_type = %request.schema_type, "requesting extraction");

        let mut req = self.client.post(&endpoint).json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Status { status, body });
        }

        let body = response.text().await?;
        let parsed: ExtractionResponse = serde_json::from_str(&body)?;
        debug!(records = parsed.records.len(), "extraction complete");
        Ok(parsed.records)
    }
}
