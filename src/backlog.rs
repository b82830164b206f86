//! Backlog scanning: find editions that have a source document but no pages
//! yet, and ingest them.
//!
//! Each edition runs through [`Ingestor::process_edition`] on its own; one
//! failure is recorded in the report and the loop carries on. Editions are
//! converted concurrently up to the configured limit. Every edition id
//! appears at most once per run, and the per-edition claim keeps a backlog
//! conversion from overlapping a manual one for the same id, even when the
//! manual run is a separate process.

use crate::config::PipelineConfig;
use crate::db::EditionRepository;
use crate::error::PipelineError;
use crate::ingest::Ingestor;
use crate::output::{BacklogReport, EditionOutcome};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

/// Feeds unprocessed editions to an [`Ingestor`].
#[derive(Clone)]
pub struct BacklogScanner {
    ingestor: Ingestor,
    concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl BacklogScanner {
    /// The scanner reports to the ingestor's progress callback, if any.
    pub fn new(ingestor: Ingestor, concurrency: usize) -> Self {
        let progress = ingestor.progress().cloned();
        Self {
            ingestor,
            concurrency: concurrency.max(1),
            progress,
        }
    }

    /// Scanner with the concurrency limit and progress callback of `config`.
    pub fn from_config(ingestor: Ingestor, config: &PipelineConfig) -> Self {
        let scanner = Self::new(ingestor, config.concurrency);
        match config.progress_callback {
            Some(ref cb) => scanner.with_progress(Some(cb.clone())),
            None => scanner,
        }
    }

    /// Replace the progress callback used by [`run_backlog`](Self::run_backlog).
    pub fn with_progress(mut self, callback: Option<ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// Draft or published editions with a non-blank source and no page rows,
    /// ordered by id.
    pub async fn find_unprocessed(&self) -> Result<Vec<i64>, PipelineError> {
        EditionRepository::new(self.ingestor.pool())
            .find_unprocessed()
            .await
    }

    /// Ingest every unprocessed edition.
    ///
    /// Only a failure to list the backlog aborts the run; per-edition errors
    /// end up in the report.
    pub async fn run_backlog(&self) -> Result<BacklogReport, PipelineError> {
        let ids = self.find_unprocessed().await?;
        Ok(self.run_editions(&ids).await)
    }

    /// Ingest the given editions with the same isolation as a backlog run.
    pub async fn run_editions(&self, ids: &[i64]) -> BacklogReport {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let total = ids.len();
        info!("Backlog: {} editions to process", total);
        if let Some(ref cb) = self.progress {
            cb.on_batch_start(total);
        }

        let outcomes: Vec<EditionOutcome> = stream::iter(ids.into_iter().map(|id| {
            let ingestor = self.ingestor.clone();
            let progress = self.progress.clone();
            async move {
                if let Some(ref cb) = progress {
                    cb.on_edition_start(id);
                }
                match ingestor.process_edition(id).await {
                    Ok(done) => {
                        if let Some(ref cb) = progress {
                            cb.on_edition_complete(id, done.pages.len());
                        }
                        EditionOutcome::success(id, done.pages.len(), done.profile)
                    }
                    Err(e) => {
                        warn!("Edition {} failed: {}", id, e);
                        if let Some(ref cb) = progress {
                            cb.on_edition_error(id, &e.to_string());
                        }
                        EditionOutcome::failure(id, &e)
                    }
                }
            }
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        let report = BacklogReport::from_outcomes(outcomes);
        info!(
            "Backlog finished: {} succeeded, {} failed",
            report.succeeded, report.failed
        );
        if let Some(ref cb) = self.progress {
            cb.on_batch_complete(total, report.succeeded);
        }
        report
    }
}

impl std::fmt::Debug for BacklogScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacklogScanner")
            .field("ingestor", &self.ingestor)
            .field("concurrency", &self.concurrency)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
