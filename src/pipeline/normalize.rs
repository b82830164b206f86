//! Path normalisation: map any stored or computed image path to the single
//! canonical form the viewer resolves from the public web root.
//!
//! Paths reach the database from many places: absolute paths produced by the
//! rasteriser, `../uploads/...` paths written by older admin scripts that ran
//! one directory down, Windows separators from an editor's upload tool. The
//! viewer only understands `uploads/<...>`, so every write goes through
//! [`normalize`] and the auditor re-applies it to everything already stored.
//!
//! Everything here is pure string work: no I/O, no allocation beyond the
//! returned value.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};

/// The segment every canonical path starts with.
pub const ANCHOR: &str = "uploads/";

/// Result of normalising one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPath {
    /// The cleaned path. Canonical when `anchored` is true.
    pub path: String,
    /// `false` when no `uploads/` segment was found; `path` is best effort.
    pub anchored: bool,
}

/// Normalise `path` to its canonical form.
///
/// Unanchored input comes back cleaned but otherwise unchanged; use
/// [`normalize_path`] or [`canonicalize`] when that case must be told apart.
///
/// ```
/// use edition_pages::pipeline::normalize::normalize;
///
/// assert_eq!(
///     normalize("../uploads/2025-01-01/pages/page_001.png"),
///     "uploads/2025-01-01/pages/page_001.png"
/// );
/// ```
pub fn normalize(path: &str) -> String {
    normalize_path(path).path
}

/// Normalise `path`, reporting whether the anchor was found.
pub fn normalize_path(path: &str) -> NormalizedPath {
    let unified = path.replace('\\', "/");
    let cleaned = strip_relative_prefixes(&unified);

    if cleaned.starts_with(ANCHOR) {
        return NormalizedPath {
            path: cleaned.to_string(),
            anchored: true,
        };
    }

    match find_anchor(cleaned) {
        Some(idx) => NormalizedPath {
            path: cleaned[idx..].to_string(),
            anchored: true,
        },
        None => NormalizedPath {
            path: cleaned.to_string(),
            anchored: false,
        },
    }
}

/// Normalise `path`, failing with [`PipelineError::UnanchoredPath`] when it
/// cannot be made web-resolvable.
pub fn canonicalize(path: &str) -> Result<String, PipelineError> {
    let n = normalize_path(path);
    if n.anchored {
        Ok(n.path)
    } else {
        Err(PipelineError::UnanchoredPath { path: n.path })
    }
}

/// Drop a leading `web_root` from `path`, leaving anything else untouched.
///
/// Must run before [`normalize`] on paths that may be absolute: the web root
/// itself can contain an `uploads` segment, which would otherwise be taken
/// as the anchor.
pub fn strip_web_root(web_root: &Path, path: &str) -> String {
    match Path::new(path).strip_prefix(web_root) {
        Ok(rel) if !web_root.as_os_str().is_empty() => rel.to_string_lossy().into_owned(),
        _ => path.to_string(),
    }
}

/// [`normalize_path`] for a path that may be absolute under `web_root`.
pub fn normalize_under(web_root: &Path, path: &str) -> NormalizedPath {
    normalize_path(&strip_web_root(web_root, path))
}

/// Resolve a stored path to the file it names on disk.
///
/// Relative forms are joined onto `web_root` after normalisation; absolute
/// unanchored paths are used verbatim.
pub fn resolve_on_disk(web_root: &Path, stored: &str) -> PathBuf {
    let n = normalize_under(web_root, stored).path;
    let p = Path::new(&n);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        web_root.join(p)
    }
}

fn strip_relative_prefixes(mut s: &str) -> &str {
    loop {
        if let Some(rest) = s.strip_prefix("./") {
            s = rest;
        } else if let Some(rest) = s.strip_prefix("../") {
            s = rest;
        } else {
            return s;
        }
    }
}

/// Byte offset of the first `uploads/` that starts a path segment.
fn find_anchor(s: &str) -> Option<usize> {
    s.match_indices(ANCHOR)
        .map(|(idx, _)| idx)
        .find(|&idx| idx == 0 || s.as_bytes()[idx - 1] == b'/')
}
