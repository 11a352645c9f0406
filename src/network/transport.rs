//! Byte transport
//!
//! Defines the transport trait and the reqwest-backed implementation.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;

use super::types::NetworkError;

/// Response head plus a streaming body
pub struct TransportResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub body: BoxStream<'static, Result<Bytes, NetworkError>>,
}

/// Fetch-equivalent capability with streaming bodies
///
/// Dropping the returned future or body stream aborts the request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, url: &str) -> Result<TransportResponse, NetworkError>;
}

/// HTTP transport over reqwest
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, url: &str) -> Result<TransportResponse, NetworkError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NetworkError::Transport(e.to_string()))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(TransportResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            content_type,
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| NetworkError::Body(e.to_string())))
                .boxed(),
        })
    }
}
