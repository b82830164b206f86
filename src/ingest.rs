//! Ingestion: turn one edition's source document into stored page records.
//!
//! [`Ingestor::process_edition`] is the single unit of work every trigger
//! shares (manual run, backlog scan, auditor repair). It does not know why
//! it was called and is safe to repeat: a second run over an unchanged
//! source yields the same page count and the same canonical paths.
//!
//! Every run holds the edition through [`EditionLocks::acquire`], so two
//! tasks or two worker processes never convert the same edition at once.

use crate::config::PipelineConfig;
use crate::db::{EditionRepository, Page, PageRepository};
use crate::error::PipelineError;
use crate::lock::{EditionGuard, EditionLocks};
use crate::pipeline::rasterize::{GhostscriptRasterizer, Rasterizer};
use crate::pipeline::source::{output_dir_for, resolve_source};
use crate::pipeline::tiers::TieredConverter;
use crate::progress::ProgressCallback;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Slack on top of the converter's worst case before a claim counts as
/// abandoned.
const CLAIM_SLACK: Duration = Duration::from_secs(120);

/// Result of a successful [`Ingestor::process_edition`].
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedEdition {
    pub edition_id: i64,
    /// Quality profile that produced the pages.
    pub profile: String,
    pub pages: Vec<Page>,
    pub duration_ms: u64,
}

/// Drives source resolution, tiered conversion and the page store for one
/// edition at a time.
#[derive(Clone)]
pub struct Ingestor {
    pool: SqlitePool,
    converter: TieredConverter,
    web_root: PathBuf,
    pages_dir: String,
    locks: EditionLocks,
    claim_ttl: Duration,
    progress: Option<ProgressCallback>,
}

impl Ingestor {
    pub fn new(
        pool: SqlitePool,
        converter: TieredConverter,
        web_root: impl Into<PathBuf>,
        pages_dir: impl Into<String>,
        locks: EditionLocks,
    ) -> Self {
        let claim_ttl = converter.worst_case().saturating_add(CLAIM_SLACK);
        Self {
            pool,
            converter,
            web_root: web_root.into(),
            pages_dir: pages_dir.into(),
            locks,
            claim_ttl,
            progress: None,
        }
    }

    /// Build an ingestor backed by Ghostscript from `config`.
    ///
    /// Fails with [`PipelineError::RasterizerUnavailable`] when no
    /// executable can be found.
    pub fn from_config(
        pool: SqlitePool,
        config: &PipelineConfig,
        locks: EditionLocks,
    ) -> Result<Self, PipelineError> {
        let rasterizer = GhostscriptRasterizer::new(config.rasterizer_path.clone())?;
        Ok(Self::with_rasterizer(pool, config, Arc::new(rasterizer), locks))
    }

    /// Build an ingestor around any [`Rasterizer`].
    ///
    /// The config's progress callback is carried along and picked up by
    /// [`BacklogScanner::new`](crate::backlog::BacklogScanner::new).
    pub fn with_rasterizer(
        pool: SqlitePool,
        config: &PipelineConfig,
        rasterizer: Arc<dyn Rasterizer>,
        locks: EditionLocks,
    ) -> Self {
        let converter = TieredConverter::new(
            rasterizer,
            config.profiles.clone(),
            Duration::from_secs(config.tier_timeout_secs),
        );
        Self::new(
            pool,
            converter,
            config.web_root.clone(),
            config.pages_dir.clone(),
            locks,
        )
        .with_progress(config.progress_callback.clone())
    }

    /// Batch progress events for scanners built on this ingestor.
    pub fn with_progress(mut self, callback: Option<ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn locks(&self) -> &EditionLocks {
        &self.locks
    }

    pub fn web_root(&self) -> &Path {
        &self.web_root
    }

    pub fn progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_ref()
    }

    /// Hold `edition_id` against other tasks and other worker processes.
    ///
    /// # Errors
    /// [`PipelineError::Busy`] if another process is writing the edition.
    pub async fn claim(&self, edition_id: i64) -> Result<EditionGuard, PipelineError> {
        self.locks
            .acquire(&self.pool, edition_id, self.claim_ttl)
            .await
    }

    /// Convert and store the pages of `edition_id`.
    ///
    /// # Errors
    /// - [`PipelineError::NotFound`] if the edition does not exist
    /// - [`PipelineError::MissingSource`] if its document is unset or gone
    /// - [`PipelineError::Processing`] if every quality tier failed; stored
    ///   pages are left untouched
    /// - [`PipelineError::Busy`] if another process holds the edition
    pub async fn process_edition(&self, edition_id: i64) -> Result<ProcessedEdition, PipelineError> {
        let guard = self.claim(edition_id).await?;
        let result = self.process_locked(edition_id).await;
        guard.release().await;
        result
    }

    async fn process_locked(&self, edition_id: i64) -> Result<ProcessedEdition, PipelineError> {
        let start = Instant::now();
        info!("Processing edition {}", edition_id);

        // ── Step 1: Look up the edition ─────────────────────────────────────
        let edition = EditionRepository::new(&self.pool)
            .get(edition_id)
            .await?
            .ok_or(PipelineError::NotFound { edition_id })?;

        // ── Step 2: Resolve the source document ─────────────────────────────
        let source =
            resolve_source(&self.web_root, edition_id, edition.source_path.as_deref()).await?;
        let output_dir = output_dir_for(&source, &self.pages_dir);
        debug!("Edition {} output dir: {}", edition_id, output_dir.display());

        // ── Step 3: Convert ─────────────────────────────────────────────────
        let converted = self
            .converter
            .convert(&source, &output_dir)
            .await
            .map_err(|e| match e {
                PipelineError::MissingSource { path, .. } => PipelineError::MissingSource {
                    edition_id: Some(edition_id),
                    path,
                },
                other => other,
            })?;

        // ── Step 4: Replace the page set ────────────────────────────────────
        let pages = PageRepository::new(&self.pool).with_web_root(&self.web_root);
        pages.replace_pages(edition_id, &converted.files).await?;
        let pages = pages.list_for_edition(edition_id).await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Edition {}: {} pages via '{}' in {}ms",
            edition_id,
            pages.len(),
            converted.profile,
            duration_ms
        );

        Ok(ProcessedEdition {
            edition_id,
            profile: converted.profile,
            pages,
            duration_ms,
        })
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("web_root", &self.web_root)
            .field("pages_dir", &self.pages_dir)
            .field("profiles", &self.converter.profiles().len())
            .field("claim_ttl", &self.claim_ttl)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
