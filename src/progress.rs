//! Progress-callback trait for per-edition batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as a backlog run processes each edition. The callback travels
//! from the config through [`Ingestor::with_rasterizer`](crate::Ingestor::with_rasterizer)
//! (or [`BacklogScanner::from_config`](crate::BacklogScanner::from_config))
//! into the scanner. The trait is `Send + Sync` because editions are
//! processed concurrently.
//!
//! # Example
//!
//! ```rust
//! use edition_pages::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counting {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for Counting {
//!     fn on_edition_complete(&self, edition_id: i64, pages: usize) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("edition {edition_id}: {pages} pages");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Counting { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by batch operations as they work through editions.
///
/// All methods default to no-ops. `on_edition_*` may be called concurrently
/// from different tasks.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first edition starts.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when conversion of an edition begins.
    fn on_edition_start(&self, edition_id: i64) {
        let _ = edition_id;
    }

    /// Called when an edition's pages are stored.
    fn on_edition_complete(&self, edition_id: i64, pages: usize) {
        let _ = (edition_id, pages);
    }

    /// Called when an edition fails.
    fn on_edition_error(&self, edition_id: i64, error: &str) {
        let _ = (edition_id, error);
    }

    /// Called once after every edition has been attempted.
    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        let _ = (total, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
