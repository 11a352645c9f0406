//! Rendering backends
//!
//! The pixel-rendering capability is opaque to the engine. Each rendering
//! method is served by a `RenderBackend` registered under that method; the
//! orchestrator drives it through the parse and render stages.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

use super::types::RenderedPage;
use crate::methods::RenderMethod;

/// How far into the body the PDF header may appear
const PDF_HEADER_WINDOW: usize = 1024;

/// Failure reported by a backend
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The drawing surface failed or is unavailable
    #[error("Rendering surface error: {0}")]
    Surface(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// The document is corrupt or not a document this engine can open
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

/// Document bytes handed to a backend
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub locator: String,
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Result of the parse stage
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    /// Zero when the backend cannot tell before rendering
    pub page_count: usize,
}

/// One rendering strategy
#[async_trait]
pub trait RenderBackend: Send + Sync {
    fn method(&self) -> RenderMethod;

    /// Whether the document bytes must be fetched before parsing
    fn requires_fetch(&self) -> bool {
        true
    }

    async fn parse(&self, document: &FetchedDocument) -> Result<ParsedDocument, BackendError>;

    async fn render(
        &self,
        document: &FetchedDocument,
        parsed: &ParsedDocument,
    ) -> Result<Vec<RenderedPage>, BackendError>;
}

/// Reject bytes without a `%PDF-` header near the start
pub fn sniff_pdf(bytes: &[u8]) -> Result<(), BackendError> {
    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    if window.windows(5).any(|w| w == b"%PDF-") {
        Ok(())
    } else {
        Err(BackendError::InvalidDocument(
            "missing %PDF- header".to_string(),
        ))
    }
}

/// Backends keyed by the method they implement
#[derive(Clone)]
pub struct BackendRegistry {
    backends: HashMap<RenderMethod, Arc<dyn RenderBackend>>,
}

impl Default for BackendRegistry {
    /// Registry holding only the download fallback
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(DownloadFallbackBackend));
        registry
    }
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Register `backend` under its method, replacing any previous one
    pub fn register(&mut self, backend: Arc<dyn RenderBackend>) -> &mut Self {
        self.backends.insert(backend.method(), backend);
        self
    }

    pub fn get(&self, method: RenderMethod) -> Option<Arc<dyn RenderBackend>> {
        self.backends.get(&method).cloned()
    }

    pub fn contains(&self, method: RenderMethod) -> bool {
        self.backends.contains_key(&method)
    }

    pub fn methods(&self) -> Vec<RenderMethod> {
        RenderMethod::CHAIN
            .iter()
            .copied()
            .filter(|m| self.backends.contains_key(m))
            .collect()
    }
}

/// Terminal method: hands the document to the user as a download
///
/// Produces no pages and never fails.
pub struct DownloadFallbackBackend;

#[async_trait]
impl RenderBackend for DownloadFallbackBackend {
    fn method(&self) -> RenderMethod {
        RenderMethod::DownloadFallback
    }

    fn requires_fetch(&self) -> bool {
        false
    }

    async fn parse(&self, _document: &FetchedDocument) -> Result<ParsedDocument, BackendError> {
        Ok(ParsedDocument::default())
    }

    async fn render(
        &self,
        document: &FetchedDocument,
        _parsed: &ParsedDocument,
    ) -> Result<Vec<RenderedPage>, BackendError> {
        tracing::info!(locator = %document.locator, "Offering document as download");
        Ok(Vec::new())
    }
}

/// Server-side conversion through a remote rasterization service
///
/// The document is POSTed as `application/pdf`; the service answers with
/// JSON pages whose image data is base64-encoded.
pub struct RemoteConversionBackend {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ConversionResponse {
    pages: Vec<ConvertedPage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertedPage {
    index: usize,
    width: u32,
    height: u32,
    #[serde(default = "default_content_type")]
    content_type: String,
    data: String,
}

fn default_content_type() -> String {
    "image/png".to_string()
}

impl RemoteConversionBackend {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RenderBackend for RemoteConversionBackend {
    fn method(&self) -> RenderMethod {
        RenderMethod::ServerSideConversion
    }

    async fn parse(&self, document: &FetchedDocument) -> Result<ParsedDocument, BackendError> {
        sniff_pdf(&document.bytes)?;
        Ok(ParsedDocument::default())
    }

    async fn render(
        &self,
        document: &FetchedDocument,
        _parsed: &ParsedDocument,
    ) -> Result<Vec<RenderedPage>, BackendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(document.bytes.clone())
            .send()
            .await
            .map_err(|e| BackendError::Other(format!("Failed to call conversion service: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                413 | 507 => BackendError::OutOfMemory(format!(
                    "Conversion service returned {}: {}",
                    status, body
                )),
                422 => BackendError::InvalidDocument(format!(
                    "Conversion service rejected document: {}",
                    body
                )),
                _ => BackendError::Other(format!(
                    "Conversion service returned {}: {}",
                    status, body
                )),
            });
        }

        let converted: ConversionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Other(format!("Failed to parse conversion response: {}", e)))?;

        converted
            .pages
            .into_iter()
            .map(|page| {
                let data = BASE64.decode(page.data.as_bytes()).map_err(|e| {
                    BackendError::Other(format!("Invalid page {} data: {}", page.index, e))
                })?;
                Ok(RenderedPage {
                    index: page.index,
                    width: page.width,
                    height: page.height,
                    content_type: page.content_type,
                    data: Bytes::from(data),
                })
            })
            .collect()
    }
}
