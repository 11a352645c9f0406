//! Rendering error taxonomy
//!
//! Every failure inside a method attempt is classified into a `RenderError`.
//! The `recoverable` flag decides whether the orchestrator moves on to the
//! next method or aborts the whole request.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;

use super::backend::BackendError;
use super::types::RenderStage;
use crate::methods::RenderMethod;
use crate::network::{is_retryable_status, NetworkError};

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderErrorKind {
    Network,
    Timeout,
    RenderingSurface,
    Memory,
    InvalidDocument,
    Http { status: u16 },
    Unknown,
    Cancelled,
}

impl RenderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network-error",
            Self::Timeout => "timeout-error",
            Self::RenderingSurface => "rendering-surface-error",
            Self::Memory => "memory-error",
            Self::InvalidDocument => "invalid-document-error",
            Self::Http { .. } => "http-error",
            Self::Unknown => "unknown-error",
            Self::Cancelled => "cancelled-error",
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status } => Some(*status),
            _ => None,
        }
    }

    /// Whether a different rendering method may still succeed
    pub fn default_recoverable(&self) -> bool {
        match self {
            Self::InvalidDocument | Self::Cancelled => false,
            Self::Http { status } => is_retryable_status(*status),
            _ => true,
        }
    }
}

impl fmt::Display for RenderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { status } => write!(f, "http-error ({})", status),
            other => f.write_str(other.as_str()),
        }
    }
}

impl Serialize for RenderErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A classified failure of one method attempt
#[derive(Debug, Clone, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct RenderError {
    #[serde(rename = "type")]
    pub kind: RenderErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub message: String,
    pub stage: RenderStage,
    pub method: RenderMethod,
    pub timestamp: DateTime<Utc>,
    pub context: BTreeMap<String, String>,
    pub recoverable: bool,
}

impl RenderError {
    pub fn new(
        kind: RenderErrorKind,
        message: impl Into<String>,
        stage: RenderStage,
        method: RenderMethod,
    ) -> Self {
        Self {
            kind,
            status_code: kind.status_code(),
            message: message.into(),
            stage,
            method,
            timestamp: Utc::now(),
            context: BTreeMap::new(),
            recoverable: kind.default_recoverable(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn timeout(limit: Duration, stage: RenderStage, method: RenderMethod) -> Self {
        Self::new(
            RenderErrorKind::Timeout,
            format!("Attempt timed out after {} ms", limit.as_millis()),
            stage,
            method,
        )
        .with_context("timeoutMs", limit.as_millis())
    }

    pub fn cancelled(stage: RenderStage, method: RenderMethod) -> Self {
        Self::new(RenderErrorKind::Cancelled, "Rendering cancelled", stage, method)
    }

    pub fn from_network(err: &NetworkError, stage: RenderStage, method: RenderMethod) -> Self {
        let kind = match err {
            NetworkError::Transport(_) | NetworkError::Body(_) => RenderErrorKind::Network,
            NetworkError::Timeout(_) => RenderErrorKind::Timeout,
            NetworkError::Http { status, .. } => RenderErrorKind::Http { status: *status },
            NetworkError::Cancelled => RenderErrorKind::Cancelled,
        };
        let error = Self::new(kind, err.to_string(), stage, method).with_context("origin", "network");
        match err {
            NetworkError::Http { url, .. } => error.with_context("url", url),
            _ => error,
        }
    }

    pub fn from_backend(err: &BackendError, stage: RenderStage, method: RenderMethod) -> Self {
        let kind = match err {
            BackendError::Surface(_) => RenderErrorKind::RenderingSurface,
            BackendError::OutOfMemory(_) => RenderErrorKind::Memory,
            BackendError::InvalidDocument(_) => RenderErrorKind::InvalidDocument,
            BackendError::Unsupported(_) | BackendError::Other(_) => RenderErrorKind::Unknown,
        };
        Self::new(kind, err.to_string(), stage, method).with_context("origin", "backend")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == RenderErrorKind::Cancelled
    }
}
