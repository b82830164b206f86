//! Error types for the edition-pages library.
//!
//! Three distinct types reflect three distinct failure modes:
//!
//! * [`PipelineError`] is **fatal** for the operation that returned it
//!   (edition missing, source gone, every quality tier failed, database
//!   unreachable). Per-edition callers such as the backlog loop catch it and
//!   move on; only a global failure aborts a whole run.
//!
//! * [`TierFailure`] is **non-fatal**. One quality tier failed and the
//!   converter moved down the ladder. Only the last one surfaces, inside
//!   [`PipelineError::Processing`].
//!
//! * [`IntegrityDefect`] is **reported, never thrown**. It is a drift the auditor
//!   found between the filesystem, the database and the canonical path form.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edition-pages library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Edition errors ────────────────────────────────────────────────────
    /// No edition with this id exists.
    #[error("Edition {edition_id} not found")]
    NotFound { edition_id: i64 },

    /// The edition's source document is not set or not on disk.
    ///
    /// `edition_id` is `None` when the converter is called directly.
    #[error("Source document missing for {}: '{path}'", edition_label(.edition_id))]
    MissingSource {
        edition_id: Option<i64>,
        path: PathBuf,
    },

    /// Every quality tier failed. Prior page records are left untouched.
    #[error("All {tiers} quality tiers failed for '{source_path}'\nLast error: {last_error}")]
    Processing {
        source_path: PathBuf,
        tiers: usize,
        last_error: String,
    },

    /// Another process holds the edition's claim.
    #[error("Edition {edition_id} is being written by another worker ({owner})")]
    Busy { edition_id: i64, owner: String },

    // ── Path errors ───────────────────────────────────────────────────────
    /// A stored path has no `uploads/` segment; it cannot be made canonical.
    #[error("Path '{path}' has no 'uploads/' anchor and cannot be made web-resolvable")]
    UnanchoredPath { path: String },

    // ── Environment errors ────────────────────────────────────────────────
    /// The rasteriser executable could not be found.
    #[error("Rasteriser unavailable: {0}")]
    RasterizerUnavailable(String),

    /// Database failure (connection, query, transaction).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem failure on a specific path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn edition_label(id: &Option<i64>) -> String {
    match id {
        Some(id) => format!("edition {id}"),
        None => "document".to_string(),
    }
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable kind, used in JSON reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::NotFound { .. } => "not_found",
            PipelineError::MissingSource { .. } => "missing_source",
            PipelineError::Processing { .. } => "processing",
            PipelineError::Busy { .. } => "busy",
            PipelineError::UnanchoredPath { .. } => "unanchored_path",
            PipelineError::RasterizerUnavailable(_) => "rasterizer_unavailable",
            PipelineError::Database(_) => "database",
            PipelineError::Io { .. } => "io",
            PipelineError::InvalidConfig(_) => "invalid_config",
            PipelineError::Internal(_) => "internal",
        }
    }
}

/// One quality tier that did not produce pages.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum TierFailure {
    /// The rasteriser could not be started.
    #[error("tier '{profile}': failed to start rasteriser: {detail}")]
    Spawn { profile: String, detail: String },

    /// The rasteriser exited unsuccessfully.
    #[error("tier '{profile}': rasteriser exited with {}: {diagnostic}", exit_label(.code))]
    Exited {
        profile: String,
        code: Option<i32>,
        diagnostic: String,
    },

    /// The rasteriser ran past the hard timeout and was killed.
    #[error("tier '{profile}': timed out after {secs}s")]
    Timeout { profile: String, secs: u64 },

    /// The rasteriser reported success but wrote no page files.
    #[error("tier '{profile}': no page images produced")]
    NoOutput { profile: String },

    /// Work-directory I/O failed.
    #[error("tier '{profile}': {detail}")]
    Io { profile: String, detail: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "a signal".to_string(),
    }
}

/// A drift between disk, database and canonical form found by the auditor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityDefect {
    /// A stored path was not canonical; it has been rewritten.
    NonCanonicalPath {
        edition_id: i64,
        page_number: i64,
        found: String,
        canonical: String,
    },
    /// A stored path has no anchor; left as-is for an operator.
    UnanchoredPath {
        edition_id: i64,
        page_number: i64,
        path: String,
    },
    /// The page's image file does not exist.
    MissingFile {
        edition_id: i64,
        page_number: i64,
        path: String,
    },
    /// Declared page count differed from actual rows; it has been corrected.
    CountMismatch {
        edition_id: i64,
        declared: i64,
        actual: i64,
    },
}

impl IntegrityDefect {
    pub fn edition_id(&self) -> i64 {
        match self {
            IntegrityDefect::NonCanonicalPath { edition_id, .. }
            | IntegrityDefect::UnanchoredPath { edition_id, .. }
            | IntegrityDefect::MissingFile { edition_id, .. }
            | IntegrityDefect::CountMismatch { edition_id, .. } => *edition_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_source_display_with_edition() {
        let e = PipelineError::MissingSource {
            edition_id: Some(7),
            path: PathBuf::from("/srv/uploads/e7/edition.pdf"),
        };
        let msg = e.to_string();
        assert!(msg.contains("edition 7"), "got: {msg}");
        assert!(msg.contains("e7/edition.pdf"), "got: {msg}");
    }

    #[test]
    fn missing_source_display_without_edition() {
        let e = PipelineError::MissingSource {
            edition_id: None,
            path: PathBuf::from("a.pdf"),
        };
        assert!(e.to_string().contains("document"));
    }

    #[test]
    fn processing_display_carries_last_error() {
        let e = PipelineError::Processing {
            source_path: PathBuf::from("x.pdf"),
            tiers: 3,
            last_error: "gs: Unrecoverable error".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("All 3"));
        assert!(msg.contains("Unrecoverable"));
        assert_eq!(e.kind(), "processing");
    }

    #[test]
    fn tier_exit_display_signal() {
        let e = TierFailure::Exited {
            profile: "premium".into(),
            code: None,
            diagnostic: "killed".into(),
        };
        assert!(e.to_string().contains("a signal"));
    }

    #[test]
    fn defect_serializes_with_kind_tag() {
        let d = IntegrityDefect::CountMismatch {
            edition_id: 4,
            declared: 10,
            actual: 7,
        };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["kind"], "count_mismatch");
        assert_eq!(json["actual"], 7);
        assert_eq!(d.edition_id(), 4);
    }
}
