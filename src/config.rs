//! Configuration types for edition ingestion and auditing.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Components receive the pieces they need
//! explicitly; nothing reads configuration from globals.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for the ingestion pipeline.
///
/// # Example
/// ```rust
/// use edition_pages::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .web_root("/var/www/html")
///     .concurrency(4)
///     .tier_timeout_secs(120)
///     .build()
///     .unwrap();
/// assert_eq!(config.profiles.len(), 3);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// sqlx connection string. Default: `sqlite:./editions.db`.
    pub database_url: String,

    /// Public web root. Canonical `uploads/...` paths are resolved against it.
    /// Default: current directory.
    pub web_root: PathBuf,

    /// Name of the per-edition output directory created beside the source
    /// document. Default: `pages`.
    pub pages_dir: String,

    /// Quality ladder, best first. Default: [`QualityProfile::default_ladder`].
    pub profiles: Vec<QualityProfile>,

    /// Hard timeout for one rasteriser invocation, in seconds. Default: 180.
    ///
    /// A 200-page edition at 300 dpi takes around a minute on a small VM;
    /// anything past three minutes is a stuck Ghostscript, and the ladder
    /// moves on to a cheaper profile.
    pub tier_timeout_secs: u64,

    /// Editions converted at once during a backlog run. Default: 2.
    ///
    /// Rasterisation is CPU-bound and Ghostscript is single-threaded per
    /// document, so this should not exceed the number of cores.
    pub concurrency: usize,

    /// Explicit rasteriser executable. `None` uses `raster-locate` discovery.
    pub rasterizer_path: Option<PathBuf>,

    /// Optional per-edition progress events for batch runs.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./editions.db".to_string(),
            web_root: PathBuf::from("."),
            pages_dir: "pages".to_string(),
            profiles: QualityProfile::default_ladder(),
            tier_timeout_secs: 180,
            concurrency: 2,
            rasterizer_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("database_url", &self.database_url)
            .field("web_root", &self.web_root)
            .field("pages_dir", &self.pages_dir)
            .field("profiles", &self.profiles)
            .field("tier_timeout_secs", &self.tier_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("rasterizer_path", &self.rasterizer_path)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    pub fn web_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.web_root = root.into();
        self
    }

    pub fn pages_dir(mut self, name: impl Into<String>) -> Self {
        self.config.pages_dir = name.into();
        self
    }

    pub fn profiles(mut self, profiles: Vec<QualityProfile>) -> Self {
        self.config.profiles = profiles;
        self
    }

    pub fn tier_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tier_timeout_secs = secs.max(1);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn rasterizer_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.rasterizer_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.profiles.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "At least one quality profile is required".into(),
            ));
        }
        if let Some(p) = c.profiles.iter().find(|p| !(36..=1200).contains(&p.dpi)) {
            return Err(PipelineError::InvalidConfig(format!(
                "Profile '{}' DPI must be 36–1200, got {}",
                p.name, p.dpi
            )));
        }
        if c.pages_dir.is_empty() || c.pages_dir.contains(['/', '\\']) || c.pages_dir == ".." {
            return Err(PipelineError::InvalidConfig(format!(
                "pages_dir must be a single directory name, got '{}'",
                c.pages_dir
            )));
        }
        if c.database_url.is_empty() {
            return Err(PipelineError::InvalidConfig("database_url is empty".into()));
        }
        Ok(self.config)
    }
}

// ── Quality profiles ─────────────────────────────────────────────────────

/// Anti-aliasing strength passed to the rasteriser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AntiAlias {
    /// No smoothing. Fastest; jagged glyph edges.
    None,
    /// Smooth text only.
    Text,
    /// Smooth text and vector graphics.
    Full,
}

impl AntiAlias {
    /// Ghostscript alpha bits (1 = off, 4 = maximum).
    pub fn alpha_bits(self) -> (u8, u8) {
        match self {
            AntiAlias::None => (1, 1),
            AntiAlias::Text => (4, 1),
            AntiAlias::Full => (4, 4),
        }
    }
}

/// Output file format of a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFormat {
    /// Lossless; large files.
    Png,
    /// Lossy at the given quality (1–100).
    Jpeg { quality: u8 },
}

impl PageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            PageFormat::Png => "png",
            PageFormat::Jpeg { .. } => "jpg",
        }
    }
}

/// One rung of the quality ladder.
///
/// Not persisted: the tier that won is visible afterwards in the image
/// dimensions and in the `profile` field of the processing result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityProfile {
    pub name: String,
    pub dpi: u32,
    pub anti_alias: AntiAlias,
    pub format: PageFormat,
    /// Ask the rasteriser to interpolate images (smoother, slower).
    pub interpolate: bool,
}

impl QualityProfile {
    /// premium → high → standard.
    ///
    /// | Tier     | DPI | Anti-aliasing | Format   |
    /// |----------|-----|---------------|----------|
    /// | premium  | 300 | full          | PNG      |
    /// | high     | 250 | full          | PNG      |
    /// | standard | 200 | none          | JPEG 85  |
    pub fn default_ladder() -> Vec<QualityProfile> {
        vec![
            QualityProfile {
                name: "premium".into(),
                dpi: 300,
                anti_alias: AntiAlias::Full,
                format: PageFormat::Png,
                interpolate: true,
            },
            QualityProfile {
                name: "high".into(),
                dpi: 250,
                anti_alias: AntiAlias::Full,
                format: PageFormat::Png,
                interpolate: false,
            },
            QualityProfile {
                name: "standard".into(),
                dpi: 200,
                anti_alias: AntiAlias::None,
                format: PageFormat::Jpeg { quality: 85 },
                interpolate: false,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ladder_descends() {
        let ladder = QualityProfile::default_ladder();
        let dpis: Vec<u32> = ladder.iter().map(|p| p.dpi).collect();
        assert_eq!(dpis, vec![300, 250, 200]);
        assert_eq!(ladder[0].name, "premium");
        assert_eq!(ladder[2].format.extension(), "jpg");
    }

    #[test]
    fn builder_clamps() {
        let c = PipelineConfig::builder()
            .concurrency(0)
            .tier_timeout_secs(0)
            .build()
            .unwrap();
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.tier_timeout_secs, 1);
    }

    #[test]
    fn empty_ladder_rejected() {
        let err = PipelineConfig::builder().profiles(vec![]).build().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn nested_pages_dir_rejected() {
        assert!(PipelineConfig::builder().pages_dir("a/b").build().is_err());
        assert!(PipelineConfig::builder().pages_dir("").build().is_err());
        assert!(PipelineConfig::builder().pages_dir("renders").build().is_ok());
    }

    #[test]
    fn out_of_range_dpi_rejected() {
        let mut ladder = QualityProfile::default_ladder();
        ladder[1].dpi = 5000;
        let err = PipelineConfig::builder().profiles(ladder).build().unwrap_err();
        assert!(err.to_string().contains("high"));
    }

    #[test]
    fn anti_alias_bits() {
        assert_eq!(AntiAlias::Full.alpha_bits(), (4, 4));
        assert_eq!(AntiAlias::None.alpha_bits(), (1, 1));
    }
}
