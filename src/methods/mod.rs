//! Rendering method chain
//!
//! The fixed fallback order of rendering strategies, together with a
//! statistics store that learns which strategy works best per document
//! size bucket.
//!
//! ```text
//! primary-canvas-render → native-fallback-render → server-side-conversion
//!                       → image-based-render → download-fallback
//! ```

mod chain;
mod types;

pub use chain::MethodChain;
pub use types::{
    DocumentBucket, MethodStatistics, RenderMethod, StatsKey, MEDIUM_DOCUMENT_BYTES,
    SMALL_DOCUMENT_BYTES,
};
