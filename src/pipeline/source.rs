//! Source resolution: map an edition's stored document location to a file
//! on disk and to the directory its pages are written into.
//!
//! Stored locations come in every shape the normaliser understands
//! (`../uploads/...`, `uploads\...`, absolute paths), so they go through the
//! same normalisation as page paths before being joined onto the web root.

use crate::error::PipelineError;
use crate::pipeline::normalize::resolve_on_disk;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Resolve the source document of `edition_id`, checking it exists.
///
/// An unset or blank location counts as missing.
pub async fn resolve_source(
    web_root: &Path,
    edition_id: i64,
    stored: Option<&str>,
) -> Result<PathBuf, PipelineError> {
    let stored = stored.map(str::trim).unwrap_or_default();
    if stored.is_empty() {
        return Err(PipelineError::MissingSource {
            edition_id: Some(edition_id),
            path: PathBuf::new(),
        });
    }

    let path = resolve_on_disk(web_root, stored);
    let is_file = tokio::fs::metadata(&path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(PipelineError::MissingSource {
            edition_id: Some(edition_id),
            path,
        });
    }

    if !has_pdf_magic(&path).await {
        // Ghostscript also reads PostScript and EPS, so keep going.
        warn!(
            "Edition {}: '{}' does not start with %PDF",
            edition_id,
            path.display()
        );
    }

    debug!("Edition {} source: {}", edition_id, path.display());
    Ok(path)
}

/// `<source dir>/<pages_dir>`, e.g. `uploads/2025-01-01/pages`.
pub fn output_dir_for(source: &Path, pages_dir: &str) -> PathBuf {
    source
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(pages_dir)
}

async fn has_pdf_magic(path: &Path) -> bool {
    use tokio::io::AsyncReadExt;

    let Ok(mut f) = tokio::fs::File::open(path).await else {
        return false;
    };
    let mut magic = [0u8; 4];
    f.read_exact(&mut magic).await.is_ok() && &magic == b"%PDF"
}
