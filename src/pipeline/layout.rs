//! Layout extraction: send the raw upload to a managed document-parsing
//! service and hand its structured description to the model.
//!
//! The service is Google Document AI, called over its REST API:
//!
//! ```text
//! POST https://{location}-documentai.googleapis.com/v1/{processor}:process
//! { "rawDocument": { "content": "<base64>", "mimeType": "image/png" } }
//! → { "document": { "text": …, "pages": [ … ] } }
//! ```
//!
//! Only the `document` object is kept; it is passed to the model verbatim as
//! JSON text. Authentication is a bearer token (`DOCAI_ACCESS_TOKEN`), for
//! example the output of `gcloud auth print-access-token`.

use crate::config::ServiceConfig;
use crate::error::Img2DocxError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// External service returning a structured layout description of a page.
#[async_trait]
pub trait LayoutExtractor: Send + Sync {
    /// Returns the layout description as JSON text.
    async fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, Img2DocxError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest<'a> {
    raw_document: RawDocument<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument<'a> {
    content: String,
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct ProcessResponse {
    document: Option<serde_json::Value>,
}

/// REST client for a Document AI layout-parser processor.
#[derive(Debug, Clone)]
pub struct DocumentAiClient {
    http: reqwest::Client,
    endpoint: String,
    processor_name: String,
    access_token: Option<String>,
}

impl DocumentAiClient {
    /// Build a client from the service configuration.
    ///
    /// Returns `Ok(None)` when no processor is configured; the layout-parser
    /// pipeline then fails per request with
    /// [`Img2DocxError::ProcessorNotConfigured`].
    pub fn from_config(config: &ServiceConfig) -> Result<Option<Self>, Img2DocxError> {
        let Some(processor_name) = config.processor_name.clone() else {
            return Ok(None);
        };
        let endpoint = format!("https://{}-documentai.googleapis.com", config.layout_location());
        let client = Self::new(
            endpoint,
            processor_name,
            config.access_token.clone(),
            config.layout_timeout_secs,
        )?;
        Ok(Some(client))
    }

    /// Build a client against an explicit base URL.
    pub fn new(
        endpoint: impl Into<String>,
        processor_name: impl Into<String>,
        access_token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, Img2DocxError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Img2DocxError::InvalidConfig(format!("layout HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            processor_name: processor_name.into(),
            access_token,
        })
    }

    pub fn processor_name(&self) -> &str {
        &self.processor_name
    }

    fn process_url(&self) -> String {
        format!("{}/v1/{}:process", self.endpoint, self.processor_name)
    }
}

#[async_trait]
impl LayoutExtractor for DocumentAiClient {
    async fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, Img2DocxError> {
        let start = Instant::now();
        let url = self.process_url();
        info!("Layout extraction via {} ({} bytes, {})", self.processor_name, bytes.len(), mime_type);

        let body = ProcessRequest {
            raw_document: RawDocument {
                content: STANDARD.encode(bytes),
                mime_type,
            },
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            warn!("Layout extraction request failed: {}", e);
            Img2DocxError::LayoutExtractionFailed {
                message: if e.is_timeout() {
                    format!("timed out calling {url}")
                } else {
                    e.to_string()
                },
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(500).collect();
            warn!("Layout extraction returned HTTP {}", status);
            return Err(Img2DocxError::LayoutExtractionFailed {
                message: format!("HTTP {status}: {detail}"),
            });
        }

        let parsed: ProcessResponse =
            response
                .json()
                .await
                .map_err(|e| Img2DocxError::LayoutExtractionFailed {
                    message: format!("unreadable response: {e}"),
                })?;
        let document = parsed
            .document
            .ok_or_else(|| Img2DocxError::LayoutExtractionFailed {
                message: "response has no document".to_string(),
            })?;

        let json = serde_json::to_string(&document)
            .map_err(|e| Img2DocxError::Internal(format!("layout JSON: {e}")))?;
        debug!(
            "Layout extraction: {} bytes of JSON in {:?}",
            json.len(),
            start.elapsed()
        );
        Ok(json)
    }
}
