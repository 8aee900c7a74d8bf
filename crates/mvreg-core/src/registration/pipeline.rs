//! Registration of one moving view onto the reference view.
//!
//! A job walks `Idle -> CoarseAlign -> Masked -> Optimizing ->
//! {Converged | Failed} -> Combined -> Done`. The coarse step rotates the
//! moving view by its known acquisition angle; the optimizer then refines an
//! affine transform against the coarse-aligned image, and the two are
//! collapsed into the single transform written to the archive.

use std::sync::Arc;

use nalgebra::Vector3;
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::archive::Archive;
use crate::consts::{MIN_OVERLAP_SAMPLES, PARALLEL_VOXEL_THRESHOLD, REFERENCE_INDEX};
use crate::error::{MvregError, Result};
use crate::resample::{resample, trilinear_with_gradient};
use crate::transform::{compose, AffineTransform, Transform};
use crate::view::{Grid, ImageType, View, ViewKey};

use super::config::{MetricKind, RegistrationConfig};
use super::mask::{count_foreground, foreground_mask};
use super::metric::{build_metric, IntensityRange, SimilarityMetric};
use super::moments::moments_initializer;
use super::optimizer::{jacobian_scales, RegularStepGradientDescent};
use super::types::{
    JobInfo, JobState, RegistrationObserver, RegistrationOutcome, RegistrationSummary,
};

/// A fixed-image sample used by the metric.
struct FixedSample {
    value: f64,
    point: Vector3<f64>,
}

/// A fixed sample mapped into the moving image.
struct MappedSample {
    fixed: f64,
    moving: f64,
    /// Moving image gradient at the mapped point, per physical unit.
    gradient: Vector3<f64>,
    /// Fixed point relative to the transform center.
    offset: Vector3<f64>,
}

/// Everything the cost function needs for one job.
struct CostContext<'a> {
    samples: &'a [FixedSample],
    moving: &'a Array3<f32>,
    moving_mask: &'a Array3<bool>,
    moving_grid: Grid,
    center: Vector3<f64>,
    metric: &'a dyn SimilarityMetric,
}

impl CostContext<'_> {
    fn map_sample(&self, transform: &AffineTransform, sample: &FixedSample) -> Option<MappedSample> {
        let mapped = transform.apply(&sample.point);
        let idx = self.moving_grid.physical_to_index(&mapped);

        let nearest = idx.map(|i| i.round());
        let (n0, n1, n2) = self.moving_mask.dim();
        if nearest.iter().any(|&i| i < 0.0)
            || nearest[0] as usize >= n0
            || nearest[1] as usize >= n1
            || nearest[2] as usize >= n2
            || !self.moving_mask[[nearest[0] as usize, nearest[1] as usize, nearest[2] as usize]]
        {
            return None;
        }

        let (value, index_gradient) = trilinear_with_gradient(self.moving, idx)?;
        let spacing = &self.moving_grid.voxel_size.0;
        let gradient = Vector3::new(
            index_gradient[0] / spacing[0],
            index_gradient[1] / spacing[1],
            index_gradient[2] / spacing[2],
        );
        Some(MappedSample {
            fixed: sample.value,
            moving: value as f64,
            gradient,
            offset: sample.point - self.center,
        })
    }

    /// Metric value and its gradient with respect to the affine parameters.
    fn evaluate(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        let transform = AffineTransform::from_parameters(params, self.center)?;

        let mapped: Vec<MappedSample> = if self.samples.len() >= PARALLEL_VOXEL_THRESHOLD {
            self.samples
                .par_iter()
                .filter_map(|s| self.map_sample(&transform, s))
                .collect()
        } else {
            self.samples
                .iter()
                .filter_map(|s| self.map_sample(&transform, s))
                .collect()
        };

        if mapped.len() < MIN_OVERLAP_SAMPLES {
            return Err(MvregError::Convergence(format!(
                "only {} of {} samples overlap the moving image",
                mapped.len(),
                self.samples.len()
            )));
        }

        let fixed: Vec<f64> = mapped.iter().map(|s| s.fixed).collect();
        let moving: Vec<f64> = mapped.iter().map(|s| s.moving).collect();
        let eval = self.metric.evaluate(&fixed, &moving)?;

        let mut gradient = vec![0.0; params.len()];
        for (sample, &d) in mapped.iter().zip(&eval.derivative) {
            for r in 0..3 {
                let g = d * sample.gradient[r];
                for c in 0..3 {
                    gradient[r * 3 + c] += g * sample.offset[c];
                }
                gradient[9 + r] += g;
            }
        }

        Ok((eval.value, gradient))
    }
}

/// Multi-view registration against one archive.
///
/// Configure a pair with [`set_fixed`](Self::set_fixed) and
/// [`set_moving`](Self::set_moving), then call [`execute`](Self::execute).
/// Nothing is kept between pairs apart from the configuration and observers.
pub struct MultiViewRegistration<'a> {
    archive: &'a mut Archive,
    config: RegistrationConfig,
    fixed_index: u32,
    moving_index: u32,
    state: JobState,
    final_transform: Option<AffineTransform>,
    observers: Vec<Arc<dyn RegistrationObserver>>,
}

impl<'a> MultiViewRegistration<'a> {
    pub fn new(archive: &'a mut Archive, config: RegistrationConfig) -> Self {
        Self {
            archive,
            config,
            fixed_index: REFERENCE_INDEX,
            moving_index: REFERENCE_INDEX + 1,
            state: JobState::Idle,
            final_transform: None,
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn set_fixed(&mut self, index: u32) {
        self.fixed_index = index;
        self.reset();
    }

    pub fn set_moving(&mut self, index: u32) {
        self.moving_index = index;
        self.reset();
    }

    pub fn add_observer(&mut self, observer: Arc<dyn RegistrationObserver>) {
        self.observers.push(observer);
    }

    fn reset(&mut self) {
        self.state = JobState::Idle;
        self.final_transform = None;
    }

    fn job_info(&self) -> JobInfo {
        JobInfo {
            fixed_index: self.fixed_index,
            moving_index: self.moving_index,
            channel: self.config.channel,
            scale: self.config.scale,
        }
    }

    fn original_key(&self, index: u32) -> ViewKey {
        ViewKey::new(ImageType::Original, self.config.scale, index, self.config.channel)
    }

    /// Run the configured job once.
    ///
    /// Fails with `UnknownMetric` for an unsupported metric name and with
    /// `Convergence` when the optimizer fails; a failed job writes nothing.
    pub fn execute(&mut self) -> Result<RegistrationOutcome> {
        self.reset();
        let outcome = self.try_execute();
        if let Err(e) = &outcome {
            self.state = JobState::Failed;
            warn!(
                fixed = self.fixed_index,
                moving = self.moving_index,
                error = %e,
                "Registration failed"
            );
        }
        outcome
    }

    fn try_execute(&mut self) -> Result<RegistrationOutcome> {
        let metric_kind = self.config.metric.resolve()?;
        self.config.validate()?;
        let job = self.job_info();

        let registered_key = self
            .original_key(job.moving_index)
            .with_type(ImageType::Registered);
        if self.config.skip_existing && self.archive.exists(&registered_key)? {
            info!(
                moving = job.moving_index,
                "Registered result already exists, skipping view"
            );
            if self.archive.has_transform(job.scale, job.moving_index, job.channel)? {
                let stored = self
                    .archive
                    .get_transform(job.scale, job.moving_index, job.channel)?;
                self.final_transform = Some(stored.to_affine()?);
            }
            self.state = JobState::Skipped;
            return Ok(RegistrationOutcome::Skipped);
        }

        let summary = self.run_job(job, metric_kind)?;
        Ok(RegistrationOutcome::Registered(summary))
    }

    fn run_job(&mut self, job: JobInfo, metric_kind: MetricKind) -> Result<RegistrationSummary> {
        let cfg = self.config.clone();
        let fixed = self.archive.get_view(&self.original_key(job.fixed_index))?;
        let moving = self.archive.get_view(&self.original_key(job.moving_index))?;

        // Coarse alignment from the known acquisition angle.
        self.state = JobState::CoarseAlign;
        let manual = AffineTransform::rotation_about_axis(
            cfg.rot_axis,
            moving.angle_radians(),
            moving.physical_center(),
            Vector3::from(cfg.offset),
        )?;
        let moving_grid = moving.grid();
        let coarse = resample(&moving.data, &moving_grid, &manual, &moving_grid);
        debug!(
            moving = job.moving_index,
            angle = moving.angle,
            axis = cfg.rot_axis,
            "Coarse alignment applied"
        );

        self.state = JobState::Masked;
        let fixed_grid = fixed.grid();
        let fixed_mask = foreground_mask(&fixed.data, cfg.mask_threshold);
        let moving_mask = foreground_mask(&coarse, cfg.mask_threshold);
        debug!(
            fixed_foreground = count_foreground(&fixed_mask),
            moving_foreground = count_foreground(&moving_mask),
            "Foreground masks computed"
        );

        self.state = JobState::Optimizing;
        let initial = moments_initializer(
            &fixed.data,
            &fixed_mask,
            &fixed_grid,
            &coarse,
            &moving_mask,
            &moving_grid,
            cfg.use_principal_axes,
        )?;

        let samples = sample_fixed(&fixed.data, &fixed_mask, &fixed_grid, cfg.sampling.fraction, cfg.sampling.seed);
        if samples.len() < MIN_OVERLAP_SAMPLES {
            return Err(MvregError::Convergence(format!(
                "only {} fixed samples in the foreground",
                samples.len()
            )));
        }

        let points: Vec<Vector3<f64>> = samples.iter().map(|s| s.point).collect();
        let scales = jacobian_scales(&points, &initial.center);
        let metric = build_metric(
            metric_kind,
            cfg.histogram_bins,
            IntensityRange::of(fixed.data.iter()),
            IntensityRange::of(coarse.iter()),
        );
        let context = CostContext {
            samples: &samples,
            moving: &coarse,
            moving_mask: &moving_mask,
            moving_grid,
            center: initial.center,
            metric: metric.as_ref(),
        };

        info!(
            fixed = job.fixed_index,
            moving = job.moving_index,
            metric = %metric_kind,
            samples = samples.len(),
            "Starting registration"
        );
        for observer in &self.observers {
            observer.on_start(&job);
        }

        let optimizer = RegularStepGradientDescent::new(cfg.optimizer.clone(), &scales);
        let observers = &self.observers;
        let result = optimizer.minimize(
            initial.parameters(),
            |params| context.evaluate(params),
            |report| {
                debug!(
                    iteration = report.iteration,
                    value = report.metric_value,
                    step = report.step_length,
                    "Optimizer iteration"
                );
                for observer in observers {
                    observer.on_iteration(report);
                }
            },
        )?;

        let estimated = AffineTransform::from_parameters(&result.parameters, initial.center)?;
        if !estimated.is_finite() {
            return Err(MvregError::Convergence(
                "optimizer produced a non-finite transform".into(),
            ));
        }
        self.state = JobState::Converged;
        info!(
            value = result.value,
            iterations = result.iterations,
            stop = %result.stop_condition,
            "Optimizer finished"
        );

        self.state = JobState::Combined;
        let combined = compose(&manual, &estimated);

        if cfg.write_results {
            let registered = View::new(
                self.original_key(job.moving_index)
                    .with_type(ImageType::Registered),
                resample(&moving.data, &moving_grid, &combined, &fixed_grid),
                moving.angle,
                fixed.voxel_size,
            );
            self.archive.add_view(&registered, true)?;
            self.archive.add_transform(
                job.scale,
                job.moving_index,
                job.channel,
                &combined.to_record(),
                true,
            )?;
            info!(moving = job.moving_index, "Stored registered view and transform");
        }

        self.final_transform = Some(combined.clone());
        self.state = JobState::Done;

        Ok(RegistrationSummary {
            job,
            final_metric_value: result.value,
            iterations: result.iterations,
            stop_condition: result.stop_condition,
            transform: combined,
        })
    }

    /// The combined transform of the last job, in stored form.
    pub fn get_final_transform(&self) -> Result<Transform> {
        self.final_affine().map(|t| t.to_record())
    }

    pub fn final_affine(&self) -> Result<&AffineTransform> {
        self.final_transform.as_ref().ok_or(MvregError::NotReady)
    }

    /// The moving view resampled through the final transform onto the fixed
    /// view's grid. Reads the current archive contents.
    pub fn get_resampled_result(&self) -> Result<View> {
        let transform = self.final_affine()?;
        let fixed = self.archive.get_view(&self.original_key(self.fixed_index))?;
        let moving = self.archive.get_view(&self.original_key(self.moving_index))?;
        let data = resample(&moving.data, &moving.grid(), transform, &fixed.grid());
        Ok(View::new(
            moving.key.with_type(ImageType::Registered),
            data,
            moving.angle,
            fixed.voxel_size,
        ))
    }
}

/// Randomly pick foreground voxels of the fixed image. The same seed picks
/// the same voxels.
fn sample_fixed(
    data: &Array3<f32>,
    mask: &Array3<bool>,
    grid: &Grid,
    fraction: f64,
    seed: u64,
) -> Vec<FixedSample> {
    let mut rng = StdRng::seed_from_u64(seed);
    data.indexed_iter()
        .filter(|((i, j, k), _)| mask[[*i, *j, *k]])
        .filter(|_| fraction >= 1.0 || rng.random_bool(fraction))
        .map(|((i, j, k), &v)| FixedSample {
            value: v as f64,
            point: grid.index_to_physical([i as f64, j as f64, k as f64]),
        })
        .collect()
}

/// Outcome of one view in a batch run.
#[derive(Debug)]
pub enum BatchResult {
    Registered(RegistrationSummary),
    Skipped,
    Failed(String),
}

/// Register every original view at the configured scale and channel against
/// the reference view. A view whose optimization fails is reported and the
/// batch continues; any other error aborts the batch.
pub fn register_all(
    archive: &mut Archive,
    config: &RegistrationConfig,
    observers: &[Arc<dyn RegistrationObserver>],
) -> Result<Vec<(u32, BatchResult)>> {
    let moving_indices: Vec<u32> = archive
        .keys(ImageType::Original)?
        .into_iter()
        .filter(|k| {
            k.scale == config.scale && k.channel == config.channel && k.index != REFERENCE_INDEX
        })
        .map(|k| k.index)
        .collect();

    let mut registration = MultiViewRegistration::new(archive, config.clone());
    for observer in observers {
        registration.add_observer(Arc::clone(observer));
    }
    registration.set_fixed(REFERENCE_INDEX);

    let mut results = Vec::with_capacity(moving_indices.len());
    for index in moving_indices {
        registration.set_moving(index);
        let entry = match registration.execute() {
            Ok(RegistrationOutcome::Registered(summary)) => BatchResult::Registered(summary),
            Ok(RegistrationOutcome::Skipped) => BatchResult::Skipped,
            Err(MvregError::Convergence(reason)) => BatchResult::Failed(reason),
            Err(e) => return Err(e),
        };
        results.push((index, entry));
    }
    Ok(results)
}
