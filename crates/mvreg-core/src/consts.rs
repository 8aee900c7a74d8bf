/// Minimum voxel count to use slice-level Rayon parallelism.
pub const PARALLEL_VOXEL_THRESHOLD: usize = 65_536;

/// Scale (percent of native resolution) that rescaled sets are derived from.
pub const NATIVE_SCALE: u32 = 100;

/// Index of the reference view all other views are registered against.
pub const REFERENCE_INDEX: u32 = 0;

/// Upper bound of the intensity band treated as background when masking.
/// Voxels with intensity in `[0, DEFAULT_MASK_THRESHOLD]` are background.
pub const DEFAULT_MASK_THRESHOLD: f32 = 30.0;

/// Default number of histogram bins for the mutual-information metric.
pub const DEFAULT_HISTOGRAM_BINS: usize = 50;

/// Default fraction of masked fixed voxels sampled for metric evaluation.
pub const DEFAULT_SAMPLING_FRACTION: f64 = 0.1;

/// Default seed for the metric sampler, so repeated runs pick the same voxels.
pub const DEFAULT_SAMPLING_SEED: u64 = 121_212;

/// Default initial step length of the gradient descent optimizer, in
/// physical units of voxel displacement.
pub const DEFAULT_LEARNING_RATE: f64 = 1.0;

/// Default step length below which the optimizer stops.
pub const DEFAULT_MIN_STEP_LENGTH: f64 = 1e-3;

/// Default iteration limit of the optimizer.
pub const DEFAULT_MAX_ITERATIONS: usize = 200;

/// Default factor applied to the step length when the gradient direction flips.
pub const DEFAULT_RELAXATION_FACTOR: f64 = 0.5;

/// Default gradient magnitude below which the optimizer stops.
pub const DEFAULT_GRADIENT_TOLERANCE: f64 = 1e-6;

/// Minimum number of valid overlapping samples for a metric evaluation.
pub const MIN_OVERLAP_SAMPLES: usize = 16;

/// Ratio between the largest and smallest second moment below which the
/// principal axes of a volume are considered degenerate.
pub const PRINCIPAL_AXES_MIN_SEPARATION: f64 = 1.05;

/// Relative voxel-size tolerance inside which a PSF is not rescaled.
pub const PSF_VOXEL_RTOL: f64 = 0.01;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-12;
