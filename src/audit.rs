//! Consistency audit and repair.
//!
//! ## Checks
//!
//! For each edition, in id order and under the edition's lock (the
//! database claim too, unless this is a dry run):
//!
//! 1. **Paths**: every stored page path is re-normalised. Anchored paths
//!    that differ are rewritten in place; unanchored ones are flagged and
//!    left alone.
//! 2. **Files**: every page's file must exist under the web root. Missing
//!    files are reported, never deleted.
//! 3. **Count**: the declared page count is set to the number of page rows.
//! 4. **Readiness**: an edition is ready with at least one page and no
//!    missing files.
//!
//! An edition is merged into the report only once all four checks have
//! finished for it, so a database error halfway through one edition leaves
//! the results of earlier editions intact.

use crate::backlog::BacklogScanner;
use crate::db::{Edition, EditionRepository, EditionStatus, PageRepository};
use crate::error::{IntegrityDefect, PipelineError};
use crate::output::{AuditError, AuditReport, Readiness};
use crate::pipeline::normalize::{normalize_under, resolve_on_disk};
use std::path::Path;
use tracing::{debug, info, warn};

/// What the auditor may change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditOptions {
    /// Report only; write nothing.
    pub dry_run: bool,
    /// Re-run ingestion for editions with missing files or no pages.
    pub reprocess_broken: bool,
}

/// Per-edition findings, merged into the report on success.
#[derive(Debug, Default)]
struct EditionAudit {
    paths_rewritten: usize,
    unanchored: usize,
    missing_files: usize,
    count_corrected: bool,
    defects: Vec<IntegrityDefect>,
    readiness: Option<Readiness>,
}

/// Detects and repairs drift between stored pages, files on disk and the
/// canonical path form.
#[derive(Debug, Clone)]
pub struct Auditor {
    scanner: BacklogScanner,
    options: AuditOptions,
}

impl Auditor {
    pub fn new(scanner: BacklogScanner, options: AuditOptions) -> Self {
        Self { scanner, options }
    }

    pub fn options(&self) -> AuditOptions {
        self.options
    }

    /// Audit every edition.
    ///
    /// Fails only if the edition list cannot be read. Per-edition failures
    /// are collected in [`AuditReport::errors`].
    pub async fn run_audit(&self) -> Result<AuditReport, PipelineError> {
        let ingestor = self.scanner.ingestor();
        let editions = EditionRepository::new(ingestor.pool()).list().await?;
        info!(
            "Auditing {} editions{}",
            editions.len(),
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        let mut report = AuditReport {
            dry_run: self.options.dry_run,
            ..AuditReport::default()
        };

        for edition in &editions {
            match self.audit_edition(edition.id, self.options.dry_run).await {
                Ok(found) => merge(&mut report, found),
                Err(e) => {
                    warn!("Audit of edition {} failed: {}", edition.id, e);
                    report.errors.push(AuditError {
                        edition_id: edition.id,
                        error_kind: e.kind(),
                        error: e.to_string(),
                    });
                }
            }
            report.editions_checked += 1;
        }

        if self.options.reprocess_broken && !self.options.dry_run {
            let broken = broken_editions(&editions, &report.readiness);
            if !broken.is_empty() {
                info!("Reprocessing {} broken editions", broken.len());
                report.reprocessed = self.scanner.run_editions(&broken).await.outcomes;
            }
        }

        info!(
            "Audit finished: {} rewritten, {} unanchored, {} missing, {} counts corrected, {}/{} ready",
            report.paths_rewritten,
            report.unanchored,
            report.missing_files,
            report.counts_corrected,
            report.ready_count(),
            report.readiness.len()
        );
        Ok(report)
    }

    /// Readiness of every non-archived edition, without writing anything.
    pub async fn ready_editions(&self) -> Result<Vec<Readiness>, PipelineError> {
        let ingestor = self.scanner.ingestor();
        let editions = EditionRepository::new(ingestor.pool()).list().await?;

        let mut out = Vec::new();
        for edition in editions
            .iter()
            .filter(|e| e.status != EditionStatus::Archived)
        {
            if let Some(readiness) = self.audit_edition(edition.id, true).await?.readiness {
                out.push(readiness);
            }
        }
        Ok(out)
    }

    async fn audit_edition(
        &self,
        edition_id: i64,
        dry_run: bool,
    ) -> Result<EditionAudit, PipelineError> {
        let ingestor = self.scanner.ingestor();
        if dry_run {
            let _guard = ingestor.locks().lock(edition_id).await;
            return self.audit_locked(edition_id, true).await;
        }
        let guard = ingestor.claim(edition_id).await?;
        let result = self.audit_locked(edition_id, false).await;
        guard.release().await;
        result
    }

    async fn audit_locked(
        &self,
        edition_id: i64,
        dry_run: bool,
    ) -> Result<EditionAudit, PipelineError> {
        let ingestor = self.scanner.ingestor();
        // Re-read under the lock; an ingestion may have finished since the
        // edition list was taken.
        let edition = EditionRepository::new(ingestor.pool())
            .get(edition_id)
            .await?
            .ok_or(PipelineError::NotFound { edition_id })?;
        let pages_repo = PageRepository::new(ingestor.pool());
        let pages = pages_repo.list_for_edition(edition.id).await?;

        let mut found = EditionAudit::default();

        for page in &pages {
            // ── Path audit ──────────────────────────────────────────────────
            let normalized = normalize_under(ingestor.web_root(), &page.image_path);
            let current = if !normalized.anchored {
                found.unanchored += 1;
                found.defects.push(IntegrityDefect::UnanchoredPath {
                    edition_id: edition.id,
                    page_number: page.page_number,
                    path: page.image_path.clone(),
                });
                page.image_path.as_str()
            } else if normalized.path != page.image_path {
                if !dry_run {
                    pages_repo
                        .update_image_path(page.id, &normalized.path)
                        .await?;
                }
                debug!(
                    "Edition {} page {}: '{}' -> '{}'",
                    edition.id, page.page_number, page.image_path, normalized.path
                );
                found.paths_rewritten += 1;
                found.defects.push(IntegrityDefect::NonCanonicalPath {
                    edition_id: edition.id,
                    page_number: page.page_number,
                    found: page.image_path.clone(),
                    canonical: normalized.path.clone(),
                });
                normalized.path.as_str()
            } else {
                page.image_path.as_str()
            };

            // ── Existence audit ─────────────────────────────────────────────
            if !file_exists(ingestor.web_root(), current).await {
                found.missing_files += 1;
                found.defects.push(IntegrityDefect::MissingFile {
                    edition_id: edition.id,
                    page_number: page.page_number,
                    path: current.to_string(),
                });
            }
        }

        // ── Count audit ─────────────────────────────────────────────────────
        let actual = pages.len() as i64;
        if edition.page_count != actual {
            if !dry_run {
                EditionRepository::new(ingestor.pool())
                    .set_page_count(edition.id, actual)
                    .await?;
            }
            found.count_corrected = true;
            found.defects.push(IntegrityDefect::CountMismatch {
                edition_id: edition.id,
                declared: edition.page_count,
                actual,
            });
        }

        // ── Readiness audit ─────────────────────────────────────────────────
        found.readiness = Some(Readiness::evaluate(
            edition.id,
            pages.len(),
            found.missing_files,
        ));

        Ok(found)
    }
}

fn merge(report: &mut AuditReport, found: EditionAudit) {
    report.paths_rewritten += found.paths_rewritten;
    report.unanchored += found.unanchored;
    report.missing_files += found.missing_files;
    if found.count_corrected {
        report.counts_corrected += 1;
    }
    report.defects.extend(found.defects);
    report.readiness.extend(found.readiness);
}

/// Draft or published editions with a source document that are not ready.
fn broken_editions(editions: &[Edition], readiness: &[Readiness]) -> Vec<i64> {
    readiness
        .iter()
        .filter(|r| !r.ready)
        .filter_map(|r| editions.iter().find(|e| e.id == r.edition_id))
        .filter(|e| e.status != EditionStatus::Archived)
        .filter(|e| {
            e.source_path
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty())
        })
        .map(|e| e.id)
        .collect()
}

async fn file_exists(web_root: &Path, stored: &str) -> bool {
    tokio::fs::metadata(resolve_on_disk(web_root, stored))
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
