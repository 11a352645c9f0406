//! Amnesia Render Engine
//!
//! Rendering reliability layer for PDF documents: a fallback chain of
//! rendering methods with per-attempt timeouts, adaptive method selection,
//! diagnostics collection and a deduplicating, caching network client.
//!
//! # Modules
//!
//! - `render`: Orchestrator state machine, error taxonomy and backends
//! - `methods`: Fallback order and learned per-bucket preferences
//! - `diagnostics`: Per-request telemetry and bottleneck reports
//! - `network`: Cache-aside fetching with retry and in-flight dedup
//! - `routes`: HTTP surface served by the binary

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod methods;
pub mod network;
pub mod render;
pub mod routes;
pub mod state;
