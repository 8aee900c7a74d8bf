use std::fmt;

use crate::transform::AffineTransform;

/// Stage of a single registration job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Idle,
    CoarseAlign,
    Masked,
    Optimizing,
    Converged,
    Failed,
    Combined,
    Done,
    /// A registered result already existed and the job was not run.
    Skipped,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::CoarseAlign => write!(f, "Coarse alignment"),
            Self::Masked => write!(f, "Masking"),
            Self::Optimizing => write!(f, "Optimizing"),
            Self::Converged => write!(f, "Converged"),
            Self::Failed => write!(f, "Failed"),
            Self::Combined => write!(f, "Combining transforms"),
            Self::Done => write!(f, "Done"),
            Self::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Why the optimizer stopped without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopCondition {
    GradientTolerance,
    MaxIterations,
    MinStepLength,
}

impl fmt::Display for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GradientTolerance => write!(f, "gradient magnitude below tolerance"),
            Self::MaxIterations => write!(f, "maximum number of iterations reached"),
            Self::MinStepLength => write!(f, "step length below minimum"),
        }
    }
}

/// Pair of views a job registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobInfo {
    pub fixed_index: u32,
    pub moving_index: u32,
    pub channel: u32,
    pub scale: u32,
}

/// Per-iteration optimizer progress.
#[derive(Clone, Copy, Debug)]
pub struct IterationReport {
    pub iteration: usize,
    pub max_iterations: usize,
    pub metric_value: f64,
    pub step_length: f64,
}

/// Observer of registration progress. Called synchronously on the thread
/// running `execute()`, so implementations must return quickly.
/// All methods have default no-op implementations.
pub trait RegistrationObserver: Send + Sync {
    /// Optimization of a job is about to start.
    fn on_start(&self, _job: &JobInfo) {}

    /// One optimizer iteration has completed.
    fn on_iteration(&self, _report: &IterationReport) {}
}

/// Result of a completed optimization.
#[derive(Clone, Debug)]
pub struct RegistrationSummary {
    pub job: JobInfo,
    pub final_metric_value: f64,
    pub iterations: usize,
    pub stop_condition: StopCondition,
    pub transform: AffineTransform,
}

/// What `execute()` did.
#[derive(Clone, Debug)]
pub enum RegistrationOutcome {
    Registered(RegistrationSummary),
    /// A registered view already existed and `skip_existing` was set.
    Skipped,
}
