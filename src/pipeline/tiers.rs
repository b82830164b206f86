//! Tiered conversion: walk the quality ladder until one profile yields pages.
//!
//! ## Ladder Strategy
//!
//! Large or malformed editions regularly break the premium profile (memory
//! exhaustion at 300 dpi, interpolation crashes on broken image streams)
//! while rendering fine one rung down. Each tier therefore gets:
//!
//! 1. a fresh private work directory inside the output directory, so partial
//!    output from a failed or killed tier can never mix with a later tier's;
//! 2. a hard timeout, after which the rasteriser is killed;
//! 3. an early return on the first tier that writes at least one page.
//!
//! Only a winning tier touches the output directory itself: stale page files
//! are cleared and the new ones moved in. A fully failed conversion leaves
//! whatever was there before exactly as it was.

use crate::config::QualityProfile;
use crate::error::{PipelineError, TierFailure};
use crate::pipeline::rasterize::{
    page_number, sort_by_page_number, RasterError, RasterRequest, Rasterizer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pages produced by the winning tier, in page order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedPages {
    /// Name of the profile that succeeded.
    pub profile: String,
    /// Final paths inside the output directory, page 1 first.
    pub files: Vec<PathBuf>,
}

/// Runs a [`Rasterizer`] down a descending ladder of [`QualityProfile`]s.
#[derive(Clone)]
pub struct TieredConverter {
    rasterizer: Arc<dyn Rasterizer>,
    profiles: Vec<QualityProfile>,
    timeout: Duration,
}

impl TieredConverter {
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        profiles: Vec<QualityProfile>,
        timeout: Duration,
    ) -> Self {
        Self {
            rasterizer,
            profiles,
            timeout,
        }
    }

    pub fn profiles(&self) -> &[QualityProfile] {
        &self.profiles
    }

    /// Longest a [`convert`](Self::convert) call can spend rasterising.
    pub fn worst_case(&self) -> Duration {
        self.timeout
            .saturating_mul(u32::try_from(self.profiles.len()).unwrap_or(u32::MAX))
    }

    /// Convert `source` into page images inside `output_dir`.
    ///
    /// # Errors
    /// - [`PipelineError::MissingSource`] if `source` does not exist
    /// - [`PipelineError::Io`] if `output_dir` cannot be created or the
    ///   winning files cannot be moved into it
    /// - [`PipelineError::Processing`] if every tier failed
    pub async fn convert(
        &self,
        source: &Path,
        output_dir: &Path,
    ) -> Result<ConvertedPages, PipelineError> {
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(PipelineError::MissingSource {
                edition_id: None,
                path: source.to_path_buf(),
            });
        }
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| PipelineError::io(output_dir, e))?;

        let mut last_failure: Option<TierFailure> = None;

        for (attempt, profile) in self.profiles.iter().enumerate() {
            if attempt > 0 {
                info!(
                    "Falling back to tier '{}' ({}/{}) for {}",
                    profile.name,
                    attempt + 1,
                    self.profiles.len(),
                    source.display()
                );
            }

            let start = Instant::now();
            match self.run_tier(source, output_dir, profile).await {
                Ok(files) => {
                    info!(
                        "Tier '{}' produced {} pages in {}ms",
                        profile.name,
                        files.len(),
                        start.elapsed().as_millis()
                    );
                    return Ok(ConvertedPages {
                        profile: profile.name.clone(),
                        files,
                    });
                }
                Err(failure) => {
                    warn!("{}", failure);
                    last_failure = Some(failure);
                }
            }
        }

        Err(PipelineError::Processing {
            source_path: source.to_path_buf(),
            tiers: self.profiles.len(),
            last_error: last_failure
                .map(|f| f.to_string())
                .unwrap_or_else(|| "no quality profiles configured".to_string()),
        })
    }

    /// One rung: rasterise into a private work dir, then promote on success.
    async fn run_tier(
        &self,
        source: &Path,
        output_dir: &Path,
        profile: &QualityProfile,
    ) -> Result<Vec<PathBuf>, TierFailure> {
        let io_failure = |e: std::io::Error| TierFailure::Io {
            profile: profile.name.clone(),
            detail: e.to_string(),
        };

        // Removed on drop, whichever way this function exits.
        let work = tempfile::Builder::new()
            .prefix(&format!(".tier-{}-", profile.name))
            .tempdir_in(output_dir)
            .map_err(io_failure)?;

        let req = RasterRequest {
            source,
            profile,
            output_dir: work.path(),
        };
        debug!(
            "Tier '{}' via {} → {}",
            profile.name,
            self.rasterizer.name(),
            work.path().display()
        );

        let produced = match tokio::time::timeout(self.timeout, self.rasterizer.rasterize(req)).await
        {
            Err(_) => {
                return Err(TierFailure::Timeout {
                    profile: profile.name.clone(),
                    secs: self.timeout.as_secs(),
                })
            }
            Ok(Err(RasterError::Spawn(e))) => {
                return Err(TierFailure::Spawn {
                    profile: profile.name.clone(),
                    detail: e.to_string(),
                })
            }
            Ok(Err(RasterError::Exited { code, diagnostic })) => {
                return Err(TierFailure::Exited {
                    profile: profile.name.clone(),
                    code,
                    diagnostic,
                })
            }
            Ok(Err(RasterError::Io(e))) => return Err(io_failure(e)),
            Ok(Ok(files)) => files,
        };

        let mut files: Vec<PathBuf> = produced
            .into_iter()
            .filter(|p| page_number(p).is_some() && p.is_file())
            .collect();
        if files.is_empty() {
            return Err(TierFailure::NoOutput {
                profile: profile.name.clone(),
            });
        }
        sort_by_page_number(&mut files);

        let dest = output_dir.to_path_buf();
        tokio::task::spawn_blocking(move || promote(&files, &dest))
            .await
            .map_err(|e| TierFailure::Io {
                profile: profile.name.clone(),
                detail: format!("promote task failed: {e}"),
            })?
            .map_err(io_failure)
    }
}

/// Replace the page files in `output_dir` with `files`, preserving order.
///
/// Blocking; runs on the blocking pool.
fn promote(files: &[PathBuf], output_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    for entry in std::fs::read_dir(output_dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && page_number(&path).is_some() {
            std::fs::remove_file(&path)?;
        }
    }

    let mut promoted = Vec::with_capacity(files.len());
    for file in files {
        let Some(name) = file.file_name() else {
            continue;
        };
        let dest = output_dir.join(name);
        std::fs::rename(file, &dest)?;
        promoted.push(dest);
    }
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Stub that fails for listed tiers and writes `pages` files otherwise.
    struct Scripted {
        failing: Vec<&'static str>,
        pages: usize,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(failing: Vec<&'static str>, pages: usize) -> Self {
            Self {
                failing,
                pages,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Rasterizer for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn rasterize(&self, req: RasterRequest<'_>) -> Result<Vec<PathBuf>, RasterError> {
            self.calls.lock().push(req.profile.name.clone());
            // Partial output before failing must not leak into later tiers.
            std::fs::write(req.output_dir.join("page_001.png"), b"partial").unwrap();
            if self.failing.contains(&req.profile.name.as_str()) {
                return Err(RasterError::Exited {
                    code: Some(1),
                    diagnostic: format!("{} exploded", req.profile.name),
                });
            }
            let ext = req.profile.format.extension();
            let mut out = Vec::new();
            // Written in reverse to prove the converter sorts.
            for n in (1..=self.pages).rev() {
                let p = req.output_dir.join(format!("page_{n:03}.{ext}"));
                std::fs::write(&p, format!("{} {n}", req.profile.name)).unwrap();
                out.push(p);
            }
            Ok(out)
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Rasterizer for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn rasterize(&self, req: RasterRequest<'_>) -> Result<Vec<PathBuf>, RasterError> {
            std::fs::write(req.output_dir.join("page_001.png"), b"half").unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![])
        }
    }

    fn converter(r: Arc<dyn Rasterizer>, timeout: Duration) -> TieredConverter {
        TieredConverter::new(r, QualityProfile::default_ladder(), timeout)
    }

    fn source_in(dir: &Path) -> PathBuf {
        let p = dir.join("edition.pdf");
        std::fs::write(&p, b"%PDF-1.7\n").unwrap();
        p
    }

    fn leftover_tier_dirs(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tier-"))
            .count()
    }

    #[tokio::test]
    async fn falls_back_to_second_tier_and_stops() {
        let tmp = tempfile::tempdir().unwrap();
        let source = source_in(tmp.path());
        let out = tmp.path().join("pages");
        let stub = Arc::new(Scripted::new(vec!["premium"], 5));

        let result = converter(stub.clone(), Duration::from_secs(5))
            .convert(&source, &out)
            .await
            .unwrap();

        assert_eq!(result.profile, "high");
        assert_eq!(result.files.len(), 5);
        for (i, f) in result.files.iter().enumerate() {
            assert_eq!(f, &out.join(format!("page_{:03}.png", i + 1)));
            assert_eq!(std::fs::read_to_string(f).unwrap(), format!("high {}", i + 1));
        }
        assert_eq!(*stub.calls.lock(), vec!["premium", "high"]);
        assert_eq!(leftover_tier_dirs(&out), 0);
    }

    #[tokio::test]
    async fn all_tiers_failing_reports_last_diagnostic() {
        let tmp = tempfile::tempdir().unwrap();
        let source = source_in(tmp.path());
        let out = tmp.path().join("pages");
        let stub = Arc::new(Scripted::new(vec!["premium", "high", "standard"], 3));

        let err = converter(stub.clone(), Duration::from_secs(5))
            .convert(&source, &out)
            .await
            .unwrap_err();

        match err {
            PipelineError::Processing {
                tiers, last_error, ..
            } => {
                assert_eq!(tiers, 3);
                assert!(last_error.contains("standard exploded"), "got: {last_error}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(stub.calls.lock().len(), 3);
        assert!(collect_pages(&out).is_empty());
    }

    #[tokio::test]
    async fn failed_reconversion_keeps_previous_pages() {
        let tmp = tempfile::tempdir().unwrap();
        let source = source_in(tmp.path());
        let out = tmp.path().join("pages");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("page_001.png"), b"old").unwrap();

        let stub = Arc::new(Scripted::new(vec!["premium", "high", "standard"], 1));
        let _ = converter(stub, Duration::from_secs(5))
            .convert(&source, &out)
            .await;

        assert_eq!(std::fs::read(out.join("page_001.png")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn success_clears_stale_pages() {
        let tmp = tempfile::tempdir().unwrap();
        let source = source_in(tmp.path());
        let out = tmp.path().join("pages");
        std::fs::create_dir_all(&out).unwrap();
        for n in 1..=4 {
            std::fs::write(out.join(format!("page_{n:03}.png")), b"old").unwrap();
        }
        std::fs::write(out.join("README"), b"keep").unwrap();

        let stub = Arc::new(Scripted::new(vec![], 2));
        let result = converter(stub, Duration::from_secs(5))
            .convert(&source, &out)
            .await
            .unwrap();

        assert_eq!(result.profile, "premium");
        assert_eq!(collect_pages(&out).len(), 2);
        assert!(out.join("README").exists());
    }

    #[tokio::test]
    async fn timeout_discards_partial_output() {
        let tmp = tempfile::tempdir().unwrap();
        let source = source_in(tmp.path());
        let out = tmp.path().join("pages");

        let err = converter(Arc::new(Sleepy), Duration::from_millis(50))
            .convert(&source, &out)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"), "got: {err}");
        assert_eq!(leftover_tier_dirs(&out), 0);
        assert!(collect_pages(&out).is_empty());
    }

    #[tokio::test]
    async fn missing_source_is_reported_before_any_tier() {
        let tmp = tempfile::tempdir().unwrap();
        let stub = Arc::new(Scripted::new(vec![], 1));
        let err = converter(stub.clone(), Duration::from_secs(5))
            .convert(&tmp.path().join("absent.pdf"), &tmp.path().join("pages"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::MissingSource { .. }));
        assert!(stub.calls.lock().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn promotion_keeps_page_order_on_single_thread_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let source = source_in(tmp.path());
        let out = tmp.path().join("pages");

        let stub = Arc::new(Scripted::new(vec![], 12));
        let result = converter(stub, Duration::from_secs(5))
            .convert(&source, &out)
            .await
            .unwrap();

        let names: Vec<_> = result
            .files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        let expected: Vec<_> = (1..=12).map(|n| format!("page_{n:03}.png")).collect();
        assert_eq!(names, expected);
        assert!(result.files.iter().all(|f| f.parent() == Some(out.as_path())));
        assert_eq!(leftover_tier_dirs(&out), 0);
    }

    #[test]
    fn worst_case_covers_every_tier() {
        let c = converter(Arc::new(Sleepy), Duration::from_secs(10));
        assert_eq!(c.worst_case(), Duration::from_secs(30));
    }

    fn collect_pages(dir: &Path) -> Vec<PathBuf> {
        crate::pipeline::rasterize::collect_page_files(dir).unwrap_or_default()
    }
}
