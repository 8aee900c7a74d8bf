use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_GRADIENT_TOLERANCE, DEFAULT_HISTOGRAM_BINS, DEFAULT_LEARNING_RATE,
    DEFAULT_MASK_THRESHOLD, DEFAULT_MAX_ITERATIONS, DEFAULT_MIN_STEP_LENGTH,
    DEFAULT_RELAXATION_FACTOR, DEFAULT_SAMPLING_FRACTION, DEFAULT_SAMPLING_SEED, NATIVE_SCALE,
};
use crate::error::{MvregError, Result};

/// Similarity metric driving the optimizer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    /// Histogram-binned mutual information.
    #[serde(rename = "mattes")]
    MutualInformation,
    /// Normalized cross-correlation.
    #[serde(rename = "correlation")]
    Correlation,
    /// Mean squared intensity difference.
    #[default]
    #[serde(rename = "mean-squared-difference")]
    MeanSquares,
}

impl MetricKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MutualInformation => "mattes",
            Self::Correlation => "correlation",
            Self::MeanSquares => "mean-squared-difference",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MutualInformation => write!(f, "Mutual Information"),
            Self::Correlation => write!(f, "Correlation"),
            Self::MeanSquares => write!(f, "Mean Squares"),
        }
    }
}

impl FromStr for MetricKind {
    type Err = MvregError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mattes" | "mutual-information" => Ok(Self::MutualInformation),
            "correlation" => Ok(Self::Correlation),
            "mean-squared-difference" | "mean-squares" => Ok(Self::MeanSquares),
            other => Err(MvregError::UnknownMetric(other.to_string())),
        }
    }
}

/// Metric selection as configured by the user. Unknown names are kept so
/// that the failure surfaces when a job runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricName(pub String);

impl MetricName {
    pub fn resolve(&self) -> Result<MetricKind> {
        self.0.parse()
    }
}

impl Default for MetricName {
    fn default() -> Self {
        Self(MetricKind::default().name().to_string())
    }
}

impl From<MetricKind> for MetricName {
    fn from(kind: MetricKind) -> Self {
        Self(kind.name().to_string())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Initial step length, in physical displacement units.
    pub learning_rate: f64,
    pub min_step_length: f64,
    pub max_iterations: usize,
    /// Factor applied to the step length whenever the gradient reverses.
    pub relaxation_factor: f64,
    pub gradient_tolerance: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LEARNING_RATE,
            min_step_length: DEFAULT_MIN_STEP_LENGTH,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            relaxation_factor: DEFAULT_RELAXATION_FACTOR,
            gradient_tolerance: DEFAULT_GRADIENT_TOLERANCE,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Fraction of masked fixed voxels evaluated by the metric (0, 1].
    pub fraction: f64,
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            fraction: DEFAULT_SAMPLING_FRACTION,
            seed: DEFAULT_SAMPLING_SEED,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub channel: u32,
    pub scale: u32,
    /// Array axis (0, 1 or 2) the acquisition rotation is applied about.
    pub rot_axis: usize,
    /// Manual translation of the coarse alignment, in physical units.
    pub offset: [f64; 3],
    pub metric: MetricName,
    pub histogram_bins: usize,
    /// Voxels with intensity in `[0, mask_threshold]` count as background.
    pub mask_threshold: f32,
    /// Seed the affine initializer with principal axes as well as centers
    /// of mass.
    pub use_principal_axes: bool,
    /// Leave views that already have a registered result untouched.
    pub skip_existing: bool,
    /// Store the resampled registered view and its transform in the archive.
    /// When false the result is only available from the pipeline handle.
    pub write_results: bool,
    pub sampling: SamplingConfig,
    pub optimizer: OptimizerConfig,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            scale: NATIVE_SCALE,
            rot_axis: 0,
            offset: [0.0; 3],
            metric: MetricName::default(),
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            mask_threshold: DEFAULT_MASK_THRESHOLD,
            use_principal_axes: true,
            skip_existing: true,
            write_results: true,
            sampling: SamplingConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl RegistrationConfig {
    /// Check numeric ranges. The metric name is resolved separately so an
    /// unknown metric reports as such.
    pub fn validate(&self) -> Result<()> {
        if self.rot_axis > 2 {
            return Err(MvregError::InvalidConfig(format!(
                "rot_axis must be 0, 1 or 2, got {}",
                self.rot_axis
            )));
        }
        if !(self.sampling.fraction > 0.0 && self.sampling.fraction <= 1.0) {
            return Err(MvregError::InvalidConfig(format!(
                "sampling fraction must be in (0, 1], got {}",
                self.sampling.fraction
            )));
        }
        if self.histogram_bins < 2 {
            return Err(MvregError::InvalidConfig(
                "histogram_bins must be at least 2".into(),
            ));
        }
        let opt = &self.optimizer;
        if !(opt.learning_rate > 0.0 && opt.min_step_length > 0.0) {
            return Err(MvregError::InvalidConfig(
                "learning_rate and min_step_length must be positive".into(),
            ));
        }
        if opt.max_iterations == 0 {
            return Err(MvregError::InvalidConfig(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !(opt.relaxation_factor > 0.0 && opt.relaxation_factor < 1.0) {
            return Err(MvregError::InvalidConfig(format!(
                "relaxation_factor must be in (0, 1), got {}",
                opt.relaxation_factor
            )));
        }
        if self.offset.iter().any(|v| !v.is_finite()) {
            return Err(MvregError::InvalidConfig("offset must be finite".into()));
        }
        Ok(())
    }
}
