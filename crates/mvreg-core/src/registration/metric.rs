//! Similarity metrics.
//!
//! Every metric is expressed as a cost to minimize and reports, alongside the
//! value, the derivative of that cost with respect to each sampled moving
//! intensity. The optimizer chains the latter through the moving image
//! gradient and the transform Jacobian.

use crate::consts::EPSILON;
use crate::error::{MvregError, Result};

use super::config::MetricKind;

/// Cost value and its derivative with respect to each moving sample.
#[derive(Clone, Debug)]
pub struct MetricEvaluation {
    pub value: f64,
    pub derivative: Vec<f64>,
}

pub trait SimilarityMetric: Send + Sync {
    fn kind(&self) -> MetricKind;

    /// Evaluate the cost over paired fixed/moving samples of equal length.
    fn evaluate(&self, fixed: &[f64], moving: &[f64]) -> Result<MetricEvaluation>;
}

/// Intensity range of one image, used to lay out histogram bins.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntensityRange {
    pub min: f64,
    pub max: f64,
}

impl IntensityRange {
    pub fn of<'a>(values: impl IntoIterator<Item = &'a f32>) -> Self {
        let (min, max) = values
            .into_iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v as f64), hi.max(v as f64))
            });
        if min.is_finite() && max.is_finite() {
            Self { min, max }
        } else {
            Self { min: 0.0, max: 0.0 }
        }
    }

    fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// Build the configured metric. Histogram ranges are only used by mutual
/// information.
pub fn build_metric(
    kind: MetricKind,
    histogram_bins: usize,
    fixed_range: IntensityRange,
    moving_range: IntensityRange,
) -> Box<dyn SimilarityMetric> {
    match kind {
        MetricKind::MeanSquares => Box::new(MeanSquares),
        MetricKind::Correlation => Box::new(NormalizedCorrelation),
        MetricKind::MutualInformation => Box::new(MutualInformation::new(
            histogram_bins,
            fixed_range,
            moving_range,
        )),
    }
}

fn check_lengths(fixed: &[f64], moving: &[f64]) -> Result<usize> {
    if fixed.len() != moving.len() {
        return Err(MvregError::Convergence(format!(
            "sample count mismatch: {} fixed vs {} moving",
            fixed.len(),
            moving.len()
        )));
    }
    if fixed.is_empty() {
        return Err(MvregError::Convergence(
            "no overlapping samples between fixed and moving images".into(),
        ));
    }
    Ok(fixed.len())
}

/// Mean squared intensity difference.
#[derive(Clone, Copy, Debug, Default)]
pub struct MeanSquares;

impl SimilarityMetric for MeanSquares {
    fn kind(&self) -> MetricKind {
        MetricKind::MeanSquares
    }

    fn evaluate(&self, fixed: &[f64], moving: &[f64]) -> Result<MetricEvaluation> {
        let n = check_lengths(fixed, moving)? as f64;
        let mut value = 0.0;
        let derivative = fixed
            .iter()
            .zip(moving)
            .map(|(&f, &m)| {
                let diff = f - m;
                value += diff * diff;
                -2.0 * diff / n
            })
            .collect();
        Ok(MetricEvaluation {
            value: value / n,
            derivative,
        })
    }
}

/// Negated squared normalized cross-correlation, `-(Sfm^2) / (Sff * Smm)`
/// over mean-subtracted samples. Perfect (anti-)correlation scores -1.
#[derive(Clone, Copy, Debug, Default)]
pub struct NormalizedCorrelation;

impl SimilarityMetric for NormalizedCorrelation {
    fn kind(&self) -> MetricKind {
        MetricKind::Correlation
    }

    fn evaluate(&self, fixed: &[f64], moving: &[f64]) -> Result<MetricEvaluation> {
        let n = check_lengths(fixed, moving)? as f64;
        let mean_f = fixed.iter().sum::<f64>() / n;
        let mean_m = moving.iter().sum::<f64>() / n;

        let (mut sfm, mut sff, mut smm) = (0.0, 0.0, 0.0);
        for (&f, &m) in fixed.iter().zip(moving) {
            let (fc, mc) = (f - mean_f, m - mean_m);
            sfm += fc * mc;
            sff += fc * fc;
            smm += mc * mc;
        }
        if sff <= EPSILON || smm <= EPSILON {
            return Err(MvregError::Convergence(
                "correlation undefined for constant intensities".into(),
            ));
        }

        let denom = sff * smm;
        let value = -(sfm * sfm) / denom;
        let factor = -2.0 * sfm / denom;
        let derivative = fixed
            .iter()
            .zip(moving)
            .map(|(&f, &m)| factor * ((f - mean_f) - sfm * (m - mean_m) / smm))
            .collect();

        Ok(MetricEvaluation { value, derivative })
    }
}

/// Negated mutual information from a joint histogram. Fixed intensities are
/// binned directly; moving intensities spread over the two nearest bins with
/// a linear Parzen window so the cost is differentiable.
#[derive(Clone, Debug)]
pub struct MutualInformation {
    bins: usize,
    fixed_range: IntensityRange,
    moving_range: IntensityRange,
}

impl MutualInformation {
    pub fn new(bins: usize, fixed_range: IntensityRange, moving_range: IntensityRange) -> Self {
        Self {
            bins: bins.max(2),
            fixed_range,
            moving_range,
        }
    }

    fn fixed_bin(&self, f: f64) -> usize {
        let width = self.fixed_range.width();
        if width <= EPSILON {
            return 0;
        }
        let b = ((f - self.fixed_range.min) / width * self.bins as f64).floor();
        (b.max(0.0) as usize).min(self.bins - 1)
    }

    /// Lower bin, fractional position and d(position)/d(intensity).
    fn moving_position(&self, m: f64) -> (usize, f64, f64) {
        let width = self.moving_range.width();
        if width <= EPSILON {
            return (0, 0.0, 0.0);
        }
        let scale = (self.bins - 1) as f64 / width;
        let xi = (m - self.moving_range.min) * scale;
        let max = (self.bins - 1) as f64;
        let (xi, dxi) = if xi <= 0.0 {
            (0.0, 0.0)
        } else if xi >= max {
            (max, 0.0)
        } else {
            (xi, scale)
        };
        let lower = (xi.floor() as usize).min(self.bins - 2);
        (lower, xi - lower as f64, dxi)
    }
}

impl SimilarityMetric for MutualInformation {
    fn kind(&self) -> MetricKind {
        MetricKind::MutualInformation
    }

    fn evaluate(&self, fixed: &[f64], moving: &[f64]) -> Result<MetricEvaluation> {
        let n = check_lengths(fixed, moving)? as f64;
        let bins = self.bins;
        let mut joint = vec![0f64; bins * bins];

        let placements: Vec<(usize, usize, f64, f64)> = fixed
            .iter()
            .zip(moving)
            .map(|(&f, &m)| {
                let i = self.fixed_bin(f);
                let (j, frac, dxi) = self.moving_position(m);
                joint[i * bins + j] += 1.0 - frac;
                joint[i * bins + j + 1] += frac;
                (i, j, frac, dxi)
            })
            .collect();

        for p in joint.iter_mut() {
            *p /= n;
        }
        let mut fixed_marginal = vec![0f64; bins];
        let mut moving_marginal = vec![0f64; bins];
        for i in 0..bins {
            for j in 0..bins {
                let p = joint[i * bins + j];
                fixed_marginal[i] += p;
                moving_marginal[j] += p;
            }
        }

        let mut mi = 0.0;
        for i in 0..bins {
            for j in 0..bins {
                let p = joint[i * bins + j];
                if p > EPSILON {
                    mi += p * (p / (fixed_marginal[i] * moving_marginal[j])).ln();
                }
            }
        }

        // dMI/dp(i, j) = ln(p(i, j) / p_moving(j))
        let log_ratio = |i: usize, j: usize| -> f64 {
            let p = joint[i * bins + j].max(EPSILON);
            let pm = moving_marginal[j].max(EPSILON);
            (p / pm).ln()
        };
        let derivative = placements
            .iter()
            .map(|&(i, j, _frac, dxi)| {
                let d_mi = (log_ratio(i, j + 1) - log_ratio(i, j)) * dxi / n;
                -d_mi
            })
            .collect();

        Ok(MetricEvaluation {
            value: -mi,
            derivative,
        })
    }
}
