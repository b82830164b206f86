//! Structured results of batch runs.
//!
//! Batch operations never fail on the first bad edition. They return one of
//! these tallies instead, and the CLI prints it as text or JSON.

use crate::error::{IntegrityDefect, PipelineError};
use serde::Serialize;

/// Outcome of one edition inside a batch.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EditionOutcome {
    pub edition_id: i64,
    /// Pages stored. Zero on failure.
    pub pages: usize,
    /// Winning quality profile, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// [`PipelineError::kind`] of the failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EditionOutcome {
    pub fn success(edition_id: i64, pages: usize, profile: impl Into<String>) -> Self {
        Self {
            edition_id,
            pages,
            profile: Some(profile.into()),
            error_kind: None,
            error: None,
        }
    }

    pub fn failure(edition_id: i64, err: &PipelineError) -> Self {
        Self {
            edition_id,
            pages: 0,
            profile: None,
            error_kind: Some(err.kind()),
            error: Some(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Tally of a backlog run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BacklogReport {
    pub succeeded: usize,
    pub failed: usize,
    /// One entry per edition, ordered by id.
    pub outcomes: Vec<EditionOutcome>,
}

impl BacklogReport {
    pub fn from_outcomes(mut outcomes: Vec<EditionOutcome>) -> Self {
        outcomes.sort_by_key(|o| o.edition_id);
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        Self {
            succeeded,
            failed: outcomes.len() - succeeded,
            outcomes,
        }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}

/// Why an edition is not homepage-ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotReadyReason {
    NoPages,
    MissingFiles { count: usize },
}

impl std::fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotReadyReason::NoPages => f.write_str("no pages"),
            NotReadyReason::MissingFiles { count } => write!(f, "{count} missing files"),
        }
    }
}

/// Readiness of one edition after an audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub edition_id: i64,
    pub ready: bool,
    pub pages: usize,
    #[serde(flatten)]
    pub reason: Option<NotReadyReason>,
}

impl Readiness {
    pub fn evaluate(edition_id: i64, pages: usize, missing: usize) -> Self {
        let reason = if pages == 0 {
            Some(NotReadyReason::NoPages)
        } else if missing > 0 {
            Some(NotReadyReason::MissingFiles { count: missing })
        } else {
            None
        };
        Self {
            edition_id,
            ready: reason.is_none(),
            pages,
            reason,
        }
    }
}

/// An edition the audit could not finish.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuditError {
    pub edition_id: i64,
    pub error_kind: &'static str,
    pub error: String,
}

/// Tally of an audit run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub editions_checked: usize,
    /// Paths rewritten to canonical form (or that would be, in a dry run).
    pub paths_rewritten: usize,
    /// Stored paths with no `uploads/` anchor. Flagged, never rewritten.
    pub unanchored: usize,
    pub missing_files: usize,
    pub counts_corrected: usize,
    pub dry_run: bool,
    pub defects: Vec<IntegrityDefect>,
    pub readiness: Vec<Readiness>,
    pub errors: Vec<AuditError>,
    /// Reprocessing attempts for broken editions, if requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reprocessed: Vec<EditionOutcome>,
}

impl AuditReport {
    pub fn ready_count(&self) -> usize {
        self.readiness.iter().filter(|r| r.ready).count()
    }

    /// `true` when nothing needed fixing or flagging.
    pub fn is_clean(&self) -> bool {
        self.defects.is_empty() && self.errors.is_empty() && self.ready_count() == self.readiness.len()
    }

    /// `true` when nothing is left for an operator after this run.
    ///
    /// Path rewrites and count corrections the run applied are settled; in a
    /// dry run they are still pending. Failed editions, unanchored paths and
    /// not-ready editions are not, unless a reprocess in the same run made
    /// the edition whole again.
    pub fn is_settled(&self) -> bool {
        let pending_repairs =
            self.dry_run && (self.paths_rewritten > 0 || self.counts_corrected > 0);
        let still_broken = self.readiness.iter().filter(|r| !r.ready).any(|r| {
            !self
                .reprocessed
                .iter()
                .any(|o| o.edition_id == r.edition_id && o.is_success())
        });
        self.errors.is_empty()
            && self.unanchored == 0
            && !pending_repairs
            && !still_broken
            && self.reprocessed.iter().all(EditionOutcome::is_success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlog_report_tallies_and_orders() {
        let err = PipelineError::NotFound { edition_id: 2 };
        let report = BacklogReport::from_outcomes(vec![
            EditionOutcome::success(3, 4, "high"),
            EditionOutcome::failure(2, &err),
            EditionOutcome::success(1, 8, "premium"),
        ]);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        let ids: Vec<_> = report.outcomes.iter().map(|o| o.edition_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(report.outcomes[1].error_kind, Some("not_found"));
    }

    fn audited(ready: &[(i64, usize, usize)]) -> AuditReport {
        AuditReport {
            editions_checked: ready.len(),
            readiness: ready
                .iter()
                .map(|&(id, pages, missing)| Readiness::evaluate(id, pages, missing))
                .collect(),
            ..AuditReport::default()
        }
    }

    #[test]
    fn applied_repairs_are_settled_but_pending_ones_are_not() {
        let mut report = audited(&[(1, 3, 0)]);
        report.paths_rewritten = 2;
        report.counts_corrected = 1;
        assert!(!report.is_clean());
        assert!(report.is_settled());

        report.dry_run = true;
        assert!(!report.is_settled());
    }

    #[test]
    fn unready_unanchored_and_failed_editions_are_not_settled() {
        let not_ready = audited(&[(1, 3, 0), (2, 0, 0)]);
        assert!(!not_ready.is_settled());

        let mut unanchored = audited(&[(1, 3, 0)]);
        unanchored.unanchored = 1;
        assert!(!unanchored.is_settled());

        let mut failed = audited(&[(1, 3, 0)]);
        failed.errors.push(AuditError {
            edition_id: 2,
            error_kind: "database",
            error: "locked".into(),
        });
        assert!(!failed.is_settled());
    }

    #[test]
    fn successful_reprocess_settles_a_broken_edition() {
        let mut report = audited(&[(1, 3, 1), (2, 0, 0)]);
        report.missing_files = 1;
        report.reprocessed = vec![
            EditionOutcome::success(1, 3, "premium"),
            EditionOutcome::success(2, 4, "high"),
        ];
        assert!(report.is_settled());

        report.reprocessed[1] =
            EditionOutcome::failure(2, &PipelineError::NotFound { edition_id: 2 });
        assert!(!report.is_settled());
    }

    #[test]
    fn readiness_reasons() {
        assert_eq!(
            Readiness::evaluate(1, 0, 0).reason,
            Some(NotReadyReason::NoPages)
        );
        let r = Readiness::evaluate(2, 5, 2);
        assert!(!r.ready);
        assert_eq!(r.reason.unwrap().to_string(), "2 missing files");
        assert!(Readiness::evaluate(3, 5, 0).ready);
    }

    #[test]
    fn readiness_serializes_flat() {
        let json = serde_json::to_value(Readiness::evaluate(4, 3, 1)).unwrap();
        assert_eq!(json["reason"], "missing_files");
        assert_eq!(json["count"], 1);
        assert_eq!(json["ready"], false);

        let json = serde_json::to_value(Readiness::evaluate(5, 3, 0)).unwrap();
        assert!(json.get("reason").is_none());
    }
}
