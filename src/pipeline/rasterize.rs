//! Rasterisation backend: turn a whole PDF into one image file per page.
//!
//! The converter talks to a [`Rasterizer`] and never to a process directly,
//! so tests can substitute a stub and deployments can swap the backend.
//! [`GhostscriptRasterizer`] is the production implementation; executable
//! discovery happens once, when it is constructed.
//!
//! ## Why one invocation per document?
//!
//! Ghostscript parses the PDF (fonts, xref, shared resources) once per run.
//! Calling it per page would repeat that work N times, and per-page calls
//! would also need the page count up front, which means another parse.

use crate::config::{PageFormat, QualityProfile};
use crate::error::PipelineError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// File-name stem shared by every page image: `page_001.png`, `page_002.png`, …
pub const PAGE_PREFIX: &str = "page_";

/// What one rasteriser call should do.
#[derive(Debug, Clone, Copy)]
pub struct RasterRequest<'a> {
    pub source: &'a Path,
    pub profile: &'a QualityProfile,
    /// Tier-private directory; empty when the call starts.
    pub output_dir: &'a Path,
}

impl RasterRequest<'_> {
    /// printf-style output pattern, e.g. `page_%03d.png`.
    pub fn file_pattern(&self) -> String {
        format!("{PAGE_PREFIX}%03d.{}", self.profile.format.extension())
    }
}

/// Why a single rasteriser call failed.
#[derive(Debug)]
pub enum RasterError {
    /// The tool could not be started at all.
    Spawn(std::io::Error),
    /// The tool ran and exited unsuccessfully.
    Exited { code: Option<i32>, diagnostic: String },
    /// Reading back the produced files failed.
    Io(std::io::Error),
}

/// Rasterises a document into page images.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Short name for logs, e.g. `"ghostscript"`.
    fn name(&self) -> &str;

    /// Write one file per page into `req.output_dir` and return them.
    ///
    /// Order of the returned paths does not matter; the converter sorts by
    /// embedded page number.
    async fn rasterize(&self, req: RasterRequest<'_>) -> Result<Vec<PathBuf>, RasterError>;
}

/// Ghostscript (`gs` / `gswin64c`) backend.
#[derive(Debug, Clone)]
pub struct GhostscriptRasterizer {
    executable: PathBuf,
}

impl GhostscriptRasterizer {
    /// Use an explicit executable, or discover one via `raster-locate`.
    pub fn new(executable: Option<PathBuf>) -> Result<Self, PipelineError> {
        let executable = match executable {
            Some(p) => p,
            None => raster_locate::locate_rasterizer()
                .map_err(|e| PipelineError::RasterizerUnavailable(e.to_string()))?,
        };
        debug!("Using Ghostscript at {}", executable.display());
        Ok(Self { executable })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Command-line arguments for one request.
    pub fn args(req: &RasterRequest<'_>) -> Vec<String> {
        let p = req.profile;
        let (text_bits, graphics_bits) = p.anti_alias.alpha_bits();
        let mut args = vec![
            "-dSAFER".to_string(),
            "-dBATCH".to_string(),
            "-dNOPAUSE".to_string(),
            "-dQUIET".to_string(),
        ];

        match p.format {
            PageFormat::Png => args.push("-sDEVICE=png16m".into()),
            PageFormat::Jpeg { quality } => {
                args.push("-sDEVICE=jpeg".into());
                args.push(format!("-dJPEGQ={}", quality.clamp(1, 100)));
            }
        }

        args.push(format!("-r{}", p.dpi));
        args.push(format!("-dTextAlphaBits={text_bits}"));
        args.push(format!("-dGraphicsAlphaBits={graphics_bits}"));
        if p.interpolate {
            args.push("-dInterpolateControl=-1".into());
        }

        let out = req.output_dir.join(req.file_pattern());
        args.push(format!("-sOutputFile={}", out.display()));
        args.push(req.source.display().to_string());
        args
    }
}

#[async_trait]
impl Rasterizer for GhostscriptRasterizer {
    fn name(&self) -> &str {
        "ghostscript"
    }

    async fn rasterize(&self, req: RasterRequest<'_>) -> Result<Vec<PathBuf>, RasterError> {
        let args = Self::args(&req);
        debug!("{} {}", self.executable.display(), args.join(" "));

        // Dropping the future on timeout kills the child.
        let output = Command::new(&self.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(RasterError::Spawn)?;

        if !output.status.success() {
            // Ghostscript reports most errors on stdout, not stderr.
            let mut diagnostic = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout);
            if !stdout.trim().is_empty() {
                if !diagnostic.is_empty() {
                    diagnostic.push('\n');
                }
                diagnostic.push_str(stdout.trim());
            }
            return Err(RasterError::Exited {
                code: output.status.code(),
                diagnostic,
            });
        }

        collect_page_files(req.output_dir).map_err(RasterError::Io)
    }
}

static RE_PAGE_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^page_(\d+)\.(?i:png|jpe?g)$").unwrap());

/// Embedded page number of a `page_NNN.ext` file, if the name matches.
pub fn page_number(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    RE_PAGE_FILE.captures(name)?.get(1)?.as_str().parse().ok()
}

/// Every `page_NNN.ext` file directly inside `dir`, sorted numerically.
pub fn collect_page_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && page_number(&path).is_some() {
            files.push(path);
        }
    }
    sort_by_page_number(&mut files);
    Ok(files)
}

/// Numeric, not lexical: `page_2` before `page_10`.
pub fn sort_by_page_number(files: &mut [PathBuf]) {
    files.sort_by_key(|p| (page_number(p).unwrap_or(u64::MAX), p.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityProfile;

    #[test]
    fn page_number_parses_padded_and_unpadded() {
        assert_eq!(page_number(Path::new("/x/page_001.png")), Some(1));
        assert_eq!(page_number(Path::new("page_12.jpg")), Some(12));
        assert_eq!(page_number(Path::new("page_0100.JPEG")), Some(100));
        assert_eq!(page_number(Path::new("cover.png")), None);
        assert_eq!(page_number(Path::new("page_001.png.tmp")), None);
    }

    #[test]
    fn sort_is_numeric() {
        let mut files = vec![
            PathBuf::from("page_10.png"),
            PathBuf::from("page_2.png"),
            PathBuf::from("page_1.png"),
        ];
        sort_by_page_number(&mut files);
        assert_eq!(
            files,
            vec![
                PathBuf::from("page_1.png"),
                PathBuf::from("page_2.png"),
                PathBuf::from("page_10.png"),
            ]
        );
    }

    #[test]
    fn collect_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page_002.png", "page_001.png", "notes.txt", "page_x.png"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("page_003.png")).unwrap();

        let files = collect_page_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["page_001.png", "page_002.png"]);
    }

    #[test]
    fn ghostscript_args_premium() {
        let ladder = QualityProfile::default_ladder();
        let req = RasterRequest {
            source: Path::new("/srv/uploads/e/edition.pdf"),
            profile: &ladder[0],
            output_dir: Path::new("/srv/uploads/e/pages/.tier-premium"),
        };
        let args = GhostscriptRasterizer::args(&req);
        assert!(args.contains(&"-sDEVICE=png16m".to_string()));
        assert!(args.contains(&"-r300".to_string()));
        assert!(args.contains(&"-dTextAlphaBits=4".to_string()));
        assert!(args.contains(&"-dGraphicsAlphaBits=4".to_string()));
        assert!(args.iter().any(|a| a.ends_with("page_%03d.png")));
        assert_eq!(args.last().unwrap(), "/srv/uploads/e/edition.pdf");
    }

    #[test]
    fn ghostscript_args_standard_is_jpeg() {
        let ladder = QualityProfile::default_ladder();
        let req = RasterRequest {
            source: Path::new("a.pdf"),
            profile: &ladder[2],
            output_dir: Path::new("out"),
        };
        let args = GhostscriptRasterizer::args(&req);
        assert!(args.contains(&"-sDEVICE=jpeg".to_string()));
        assert!(args.contains(&"-dJPEGQ=85".to_string()));
        assert!(args.contains(&"-dTextAlphaBits=1".to_string()));
        assert_eq!(req.file_pattern(), "page_%03d.jpg");
    }

    #[test]
    fn explicit_executable_skips_discovery() {
        let gs = GhostscriptRasterizer::new(Some(PathBuf::from("/opt/gs/bin/gs"))).unwrap();
        assert_eq!(gs.executable(), Path::new("/opt/gs/bin/gs"));
        assert_eq!(gs.name(), "ghostscript");
    }
}
