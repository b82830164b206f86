//! # edition-pages
//!
//! Turn uploaded PDF editions into per-page images for a web viewer, and
//! keep the images, their database records and the paths the viewer uses
//! consistent with each other.
//!
//! ## Pipeline Overview
//!
//! ```text
//! edition (db)
//!  │
//!  ├─ 1. Source    resolve the stored document path against the web root
//!  ├─ 2. Convert   Ghostscript down a quality ladder, timeout per tier
//!  ├─ 3. Store     replace the edition's page rows in one transaction
//!  │
//!  ├─ Backlog     editions with a document but no pages → step 1
//!  └─ Audit       canonical paths, missing files, page counts, readiness
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edition_pages::{
//!     create_pool, AuditOptions, Auditor, BacklogScanner, EditionLocks, Ingestor,
//!     PipelineConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .database_url("sqlite:/var/www/editions.db")
//!         .web_root("/var/www/html")
//!         .build()?;
//!     let pool = create_pool(&config.database_url).await?;
//!     let ingestor = Ingestor::from_config(pool, &config, EditionLocks::new())?;
//!
//!     let scanner = BacklogScanner::from_config(ingestor, &config);
//!     let report = scanner.run_backlog().await?;
//!     eprintln!("{} processed, {} failed", report.succeeded, report.failed);
//!
//!     let audit = Auditor::new(scanner, AuditOptions::default()).run_audit().await?;
//!     eprintln!("{} paths rewritten", audit.paths_rewritten);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `edition-pages` binary (clap + anyhow + tracing-subscriber + indicatif + serde_json) |
//!
//! Disable `cli` when embedding the library:
//! ```toml
//! edition-pages = { version = "0.1", default-features = false }
//! ```
//!
//! ## Rasteriser
//!
//! Conversion shells out to Ghostscript. The executable is found through
//! `EDITION_RASTERIZER_PATH`, then `PATH`, then the usual install
//! directories (see the `raster-locate` crate). Tests and embedders can
//! plug in any [`Rasterizer`] instead.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod audit;
pub mod backlog;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod lock;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use audit::{AuditOptions, Auditor};
pub use backlog::BacklogScanner;
pub use config::{AntiAlias, PageFormat, PipelineConfig, PipelineConfigBuilder, QualityProfile};
pub use db::{
    create_pool, ClaimRepository, Edition, EditionRepository, EditionStatus, NewEdition, Page,
    PageRepository,
};
pub use error::{IntegrityDefect, PipelineError, TierFailure};
pub use ingest::{Ingestor, ProcessedEdition};
pub use lock::{EditionGuard, EditionLocks};
pub use output::{AuditError, AuditReport, BacklogReport, EditionOutcome, NotReadyReason, Readiness};
pub use pipeline::normalize::{normalize, NormalizedPath};
pub use pipeline::rasterize::{GhostscriptRasterizer, RasterError, RasterRequest, Rasterizer};
pub use pipeline::tiers::{ConvertedPages, TieredConverter};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
