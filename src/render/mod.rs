//! Rendering orchestration
//!
//! Runs a document through the rendering method chain with per-attempt
//! timeouts, advisory stuck detection, cancellation and force-retry.
//! Progress is pushed to listeners registered per rendering id.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let orchestrator = RenderOrchestrator::new(engine, network_config, client, backends);
//! let _subscription = orchestrator.on_progress_update("r-1", |state| {
//!     println!("{} {:.0}%", state.stage, state.percentage);
//! });
//! let options = RenderOptions { rendering_id: Some("r-1".into()), ..Default::default() };
//! let result = orchestrator.render_pdf(RenderSource::url(url), options).await;
//! ```

mod backend;
mod context;
mod error;
mod orchestrator;
mod progress;
mod types;

pub use backend::{
    sniff_pdf, BackendError, BackendRegistry, DownloadFallbackBackend, FetchedDocument,
    ParsedDocument, RemoteConversionBackend, RenderBackend,
};
pub use context::{RenderContext, RenderSettings};
pub use error::{RenderError, RenderErrorKind};
pub use orchestrator::{ForceRetry, RenderOrchestrator};
pub use progress::{ProgressHub, ProgressListener, ProgressSubscription};
pub use types::{
    ProgressState, RenderOptions, RenderResult, RenderSource, RenderStage, RenderedPage,
    FETCH_PROGRESS_END, FETCH_PROGRESS_START,
};

#[cfg(test)]
pub(crate) use backend::mock;
