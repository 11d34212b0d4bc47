//! # Benchmark configuration
//!
//! [`BenchConfig`] is the single description of a benchmark batch. The
//! CLI builds one from defaults plus flags, or loads it from a JSON file
//! and applies flags on top.
//!
//! | Field | Default | Description |
//! |-------|---------|-------------|
//! | `layout` | `images` | Device storage layout |
//! | `methods` | reference batch of nine | Dispatch strategies to time |
//! | `sigma_sizes` | `[1, 2, 3, 4]` | Derivative kernel families |
//! | `iterations` | `20` | Timed runs per method and size |
//! | `border` | `reflect101` | Border extrapolation |
//! | `image` | none | Source image; synthetic when absent |
//! | `width` × `height` | `640 × 480` | Synthetic source size |
//!
//! ```rust
//! use pyrcl::config::BenchConfig;
//!
//! let config = BenchConfig::default();
//! assert!(config.validate().is_ok());
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::controller::Layout;
use crate::derivative::MAX_SIGMA_SIZE;
use crate::filter::BorderMode;
use crate::method::Method;
use crate::{PyrError, PyrResult};

/// How batch results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Aligned table of min/mean/max.
    #[default]
    Table,
    /// `{{method, sigma, {t1, t2, ...}}, ...}`
    Mathematica,
    /// One JavaScript array of mean times per method.
    Javascript,
    /// Full report as JSON.
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = PyrError;

    fn from_str(s: &str) -> PyrResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "mathematica" => Ok(Self::Mathematica),
            "javascript" | "js" => Ok(Self::Javascript),
            "json" => Ok(Self::Json),
            other => Err(PyrError::Config(format!("unknown report format '{other}'"))),
        }
    }
}

/// One benchmark batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub layout: Layout,
    pub methods: Vec<Method>,
    pub sigma_sizes: Vec<usize>,
    pub iterations: usize,
    pub border: BorderMode,
    /// Source image; a synthetic pattern of `width × height` when `None`.
    pub image: Option<PathBuf>,
    pub width: usize,
    pub height: usize,
    /// Select a GPU over CPU devices when both exist.
    pub prefer_gpu: bool,
    /// Enable queue profiling and log per-launch device time.
    pub profiling: bool,
    /// Compile kernels with warnings-as-errors and debug info.
    pub debug_build: bool,
    pub format: ReportFormat,
    /// Compare the last derivative results against the CPU reference.
    pub verify: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            layout: Layout::Images,
            methods: vec![
                Method::Single,
                Method::SingleLocal,
                Method::SingleSeparation,
                Method::Double,
                Method::SinglePredefined,
                Method::SinglePredefinedLocal,
                Method::DoublePredefined,
                Method::DoublePredefinedLocal,
                Method::DoubleLocal,
            ],
            sigma_sizes: vec![1, 2, 3, 4],
            iterations: 20,
            border: BorderMode::Reflect101,
            image: None,
            width: 640,
            height: 480,
            prefer_gpu: true,
            profiling: false,
            debug_build: false,
            format: ReportFormat::Table,
            verify: false,
        }
    }
}

impl BenchConfig {
    /// Read a (possibly partial) configuration from a JSON file; missing
    /// fields take their defaults.
    pub fn from_json_file(path: &Path) -> PyrResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PyrError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| PyrError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> PyrResult<()> {
        if self.methods.is_empty() {
            return Err(PyrError::Config("no methods selected".into()));
        }
        if self.sigma_sizes.is_empty() {
            return Err(PyrError::Config("no sigma sizes selected".into()));
        }
        if let Some(&bad) = self
            .sigma_sizes
            .iter()
            .find(|&&s| s == 0 || s > MAX_SIGMA_SIZE)
        {
            return Err(PyrError::Config(format!(
                "sigma size {bad} outside 1..={MAX_SIGMA_SIZE}"
            )));
        }
        if self.iterations == 0 {
            return Err(PyrError::Config("iterations must be at least 1".into()));
        }
        if self.image.is_none() && (self.width == 0 || self.height == 0) {
            return Err(PyrError::Config("synthetic image size must be non-zero".into()));
        }
        Ok(())
    }
}
