//! Regular-step gradient descent.
//!
//! The optimizer moves in a scaled parameter space `q_i = p_i * sqrt(s_i)`
//! where `s_i` is the mean squared displacement a unit change of parameter
//! `i` causes (see [`jacobian_scales`]). A step of length `L` therefore
//! displaces sample points by roughly `L` physical units whatever mix of
//! rotation, shear and translation it contains. The step length shrinks by
//! the relaxation factor every time the gradient direction reverses.

use nalgebra::Vector3;

use crate::consts::EPSILON;
use crate::error::{MvregError, Result};
use crate::transform::AFFINE_PARAMETER_COUNT;

use super::config::OptimizerConfig;
use super::types::{IterationReport, StopCondition};

/// Final state of an optimization run.
#[derive(Clone, Debug)]
pub struct OptimizationResult {
    pub parameters: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub stop_condition: StopCondition,
}

/// Mean squared norm of each column of the affine Jacobian over the sample
/// points. Parameters are ordered as row-major matrix entries followed by
/// translation, so `dT_r/dA_rc = (x - c)_c` and `dT_r/dt_r = 1`.
pub fn jacobian_scales(points: &[Vector3<f64>], center: &Vector3<f64>) -> Vec<f64> {
    let mut scales = vec![0.0; AFFINE_PARAMETER_COUNT];
    if points.is_empty() {
        return scales;
    }
    let mut second = [0.0f64; 3];
    for p in points {
        let d = p - center;
        for c in 0..3 {
            second[c] += d[c] * d[c];
        }
    }
    let n = points.len() as f64;
    for r in 0..3 {
        for c in 0..3 {
            scales[r * 3 + c] = second[c] / n;
        }
    }
    for s in scales.iter_mut().skip(9) {
        *s = 1.0;
    }
    scales
}

pub struct RegularStepGradientDescent {
    config: OptimizerConfig,
    /// Square roots of the parameter scales. Zero freezes a parameter.
    root_scales: Vec<f64>,
}

impl RegularStepGradientDescent {
    pub fn new(config: OptimizerConfig, scales: &[f64]) -> Self {
        let root_scales = scales
            .iter()
            .map(|&s| if s > EPSILON { s.sqrt() } else { 0.0 })
            .collect();
        Self {
            config,
            root_scales,
        }
    }

    /// Minimize `cost`, which returns the value and gradient at a parameter
    /// vector. `on_iteration` is called after every evaluation.
    pub fn minimize<C, R>(
        &self,
        initial: Vec<f64>,
        mut cost: C,
        mut on_iteration: R,
    ) -> Result<OptimizationResult>
    where
        C: FnMut(&[f64]) -> Result<(f64, Vec<f64>)>,
        R: FnMut(&IterationReport),
    {
        if initial.len() != self.root_scales.len() {
            return Err(MvregError::InvalidConfig(format!(
                "{} parameters but {} scales",
                initial.len(),
                self.root_scales.len()
            )));
        }

        let cfg = &self.config;
        let mut params = initial;
        let mut step = cfg.learning_rate;
        let mut previous: Option<Vec<f64>> = None;
        let mut value = f64::NAN;

        for iteration in 1..=cfg.max_iterations {
            let (current, gradient) = cost(&params)?;
            if !current.is_finite() || gradient.iter().any(|g| !g.is_finite()) {
                return Err(MvregError::Convergence(format!(
                    "non-finite metric at iteration {iteration}"
                )));
            }
            value = current;

            let scaled: Vec<f64> = gradient
                .iter()
                .zip(&self.root_scales)
                .map(|(&g, &r)| if r > 0.0 { g / r } else { 0.0 })
                .collect();
            let norm = scaled.iter().map(|g| g * g).sum::<f64>().sqrt();

            on_iteration(&IterationReport {
                iteration,
                max_iterations: cfg.max_iterations,
                metric_value: value,
                step_length: step,
            });

            if norm < cfg.gradient_tolerance {
                return Ok(OptimizationResult {
                    parameters: params,
                    value,
                    iterations: iteration,
                    stop_condition: StopCondition::GradientTolerance,
                });
            }

            if let Some(prev) = &previous {
                let dot: f64 = prev.iter().zip(&scaled).map(|(a, b)| a * b).sum();
                if dot < 0.0 {
                    step *= cfg.relaxation_factor;
                }
            }
            if step < cfg.min_step_length {
                return Ok(OptimizationResult {
                    parameters: params,
                    value,
                    iterations: iteration,
                    stop_condition: StopCondition::MinStepLength,
                });
            }

            for ((p, &g), &r) in params.iter_mut().zip(&scaled).zip(&self.root_scales) {
                if r > 0.0 {
                    *p -= step * (g / norm) / r;
                }
            }
            previous = Some(scaled);
        }

        Ok(OptimizationResult {
            parameters: params,
            value,
            iterations: cfg.max_iterations,
            stop_condition: StopCondition::MaxIterations,
        })
    }
}
