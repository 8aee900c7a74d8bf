#[allow(dead_code)]
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::{Rotation3, Vector3};
use ndarray::Array3;

use mvreg_core::consts::NATIVE_SCALE;
use mvreg_core::registration::config::{MetricKind, MetricName, RegistrationConfig};
use mvreg_core::registration::{
    register_all, BatchResult, IterationReport, JobInfo, JobState, MultiViewRegistration,
    RegistrationObserver, RegistrationOutcome,
};
use mvreg_core::{Archive, ImageType, MvregError};

use common::{acquire, original_key, reference_volume, temp_archive, unit_view};

const SIZE: usize = 32;
const ANGLE: f64 = 15.0;
const OFFSET: [f64; 3] = [0.0, 1.0, -1.0];

fn config() -> RegistrationConfig {
    let mut cfg = RegistrationConfig {
        rot_axis: 0,
        offset: OFFSET,
        metric: MetricKind::MeanSquares.into(),
        use_principal_axes: false,
        ..Default::default()
    };
    cfg.sampling.fraction = 1.0;
    cfg
}

/// Archive holding the reference view at index 0 and a view acquired at
/// `ANGLE` degrees with `OFFSET` at index 1.
fn two_view_archive() -> (tempfile::TempDir, Archive, Array3<f32>) {
    let (dir, mut archive) = temp_archive();
    let reference = reference_volume(SIZE);
    let moving = acquire(&reference, ANGLE, OFFSET);
    archive
        .add_view(&unit_view(original_key(0), reference.clone(), 0.0), false)
        .unwrap();
    archive
        .add_view(&unit_view(original_key(1), moving, ANGLE), false)
        .unwrap();
    (dir, archive, reference)
}

#[derive(Default)]
struct CountingObserver {
    starts: AtomicUsize,
    iterations: AtomicUsize,
}

impl RegistrationObserver for CountingObserver {
    fn on_start(&self, _job: &JobInfo) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_iteration(&self, _report: &IterationReport) {
        self.iterations.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_recovers_acquisition_rotation() {
    let (_dir, mut archive, reference) = two_view_archive();
    let observer = Arc::new(CountingObserver::default());

    let mut registration = MultiViewRegistration::new(&mut archive, config());
    registration.add_observer(observer.clone());
    registration.set_fixed(0);
    registration.set_moving(1);

    let outcome = registration.execute().unwrap();
    let RegistrationOutcome::Registered(summary) = outcome else {
        panic!("expected the view to be registered");
    };
    assert_eq!(registration.state(), JobState::Done);
    assert!(summary.iterations >= 1);
    assert_eq!(observer.starts.load(Ordering::SeqCst), 1);
    assert_eq!(observer.iterations.load(Ordering::SeqCst), summary.iterations);

    let combined = registration.final_affine().unwrap().clone();
    let expected = Rotation3::from_axis_angle(&Vector3::x_axis(), ANGLE.to_radians());
    assert_relative_eq!(combined.matrix, *expected.matrix(), epsilon = 0.05);

    // The combined map sends the grid center where the acquisition did.
    let c = Vector3::repeat((SIZE as f64 - 1.0) / 2.0);
    assert_relative_eq!(combined.apply(&c), c + Vector3::from(OFFSET), epsilon = 0.5);

    let result = registration.get_resampled_result().unwrap();
    let mean_error = result
        .data
        .iter()
        .zip(reference.iter())
        .map(|(a, b)| (a - b).abs() as f64)
        .sum::<f64>()
        / reference.len() as f64;
    assert!(mean_error < 2.0, "mean error {mean_error}");

    drop(registration);
    let registered_key = original_key(1).with_type(ImageType::Registered);
    assert!(archive.exists(&registered_key).unwrap());
    let stored = archive.get_transform(NATIVE_SCALE, 1, 0).unwrap();
    assert_eq!(stored, combined.to_record());
    assert_eq!(archive.get_view(&registered_key).unwrap().angle, ANGLE);
}

/// Run the 0 -> 1 job and check the combined matrix against the acquisition
/// rotation.
fn assert_recovers_rotation(cfg: RegistrationConfig, matrix_tolerance: f64) {
    let (_dir, mut archive, _) = two_view_archive();
    let mut registration = MultiViewRegistration::new(&mut archive, cfg);
    registration.set_fixed(0);
    registration.set_moving(1);

    let outcome = registration.execute().unwrap();
    assert!(matches!(outcome, RegistrationOutcome::Registered(_)));
    assert_eq!(registration.state(), JobState::Done);

    let combined = registration.final_affine().unwrap();
    let expected = Rotation3::from_axis_angle(&Vector3::x_axis(), ANGLE.to_radians());
    assert_relative_eq!(combined.matrix, *expected.matrix(), epsilon = matrix_tolerance);

    let c = Vector3::repeat((SIZE as f64 - 1.0) / 2.0);
    assert_relative_eq!(combined.apply(&c), c + Vector3::from(OFFSET), epsilon = 0.75);
}

#[test]
fn test_recovers_rotation_with_mutual_information() {
    let cfg = RegistrationConfig {
        metric: MetricKind::MutualInformation.into(),
        ..config()
    };
    assert_recovers_rotation(cfg, 0.1);
}

#[test]
fn test_recovers_rotation_with_correlation() {
    let cfg = RegistrationConfig {
        metric: MetricKind::Correlation.into(),
        ..config()
    };
    assert_recovers_rotation(cfg, 0.05);
}

#[test]
fn test_recovers_rotation_with_principal_axes_seed() {
    let cfg = RegistrationConfig {
        use_principal_axes: RegistrationConfig::default().use_principal_axes,
        ..config()
    };
    assert!(cfg.use_principal_axes);
    assert_recovers_rotation(cfg, 0.05);
}

#[test]
fn test_result_not_ready_before_execute() {
    let (_dir, mut archive, _) = two_view_archive();
    let registration = MultiViewRegistration::new(&mut archive, config());
    assert_eq!(registration.state(), JobState::Idle);
    assert!(matches!(registration.get_final_transform(), Err(MvregError::NotReady)));
    assert!(matches!(registration.get_resampled_result(), Err(MvregError::NotReady)));
}

#[test]
fn test_skip_existing_leaves_result_untouched() {
    let (dir, mut archive, _) = two_view_archive();
    {
        let mut registration = MultiViewRegistration::new(&mut archive, config());
        registration.execute().unwrap();
    }
    let transform_path = dir
        .path()
        .join("archive/transform/scale_100/index_1/channel_0/transform.toml");
    let before = std::fs::read(&transform_path).unwrap();

    let mut registration = MultiViewRegistration::new(&mut archive, config());
    let outcome = registration.execute().unwrap();
    assert!(matches!(outcome, RegistrationOutcome::Skipped));
    assert_eq!(registration.state(), JobState::Skipped);
    // The stored transform is still available from the handle.
    let stored = registration.get_final_transform().unwrap();
    drop(registration);

    assert_eq!(std::fs::read(&transform_path).unwrap(), before);
    assert_eq!(archive.get_transform(NATIVE_SCALE, 1, 0).unwrap(), stored);
}

#[test]
fn test_without_write_results_archive_is_unchanged() {
    let (_dir, mut archive, _) = two_view_archive();
    let cfg = RegistrationConfig {
        write_results: false,
        ..config()
    };
    let mut registration = MultiViewRegistration::new(&mut archive, cfg);
    registration.execute().unwrap();
    assert!(registration.get_final_transform().is_ok());
    drop(registration);

    assert_eq!(archive.count(ImageType::Registered).unwrap(), 0);
    assert!(!archive.has_transform(NATIVE_SCALE, 1, 0).unwrap());
}

#[test]
fn test_unknown_metric() {
    let (_dir, mut archive, _) = two_view_archive();
    let cfg = RegistrationConfig {
        metric: MetricName("nearest-neighbour".into()),
        ..config()
    };
    let mut registration = MultiViewRegistration::new(&mut archive, cfg);
    assert!(matches!(
        registration.execute(),
        Err(MvregError::UnknownMetric(name)) if name == "nearest-neighbour"
    ));
    assert_eq!(registration.state(), JobState::Failed);
}

#[test]
fn test_storage_failure_marks_job_failed() {
    let (_dir, mut archive, _) = two_view_archive();
    // A plain file where the registered group belongs makes the result write fail.
    let group = archive.root().join("registered");
    if group.exists() {
        std::fs::remove_dir_all(&group).unwrap();
    }
    std::fs::write(&group, "not a directory").unwrap();

    let mut registration = MultiViewRegistration::new(&mut archive, config());
    registration.set_moving(1);
    assert!(matches!(registration.execute(), Err(MvregError::Storage(_))));
    assert_eq!(registration.state(), JobState::Failed);
    assert!(matches!(registration.get_final_transform(), Err(MvregError::NotReady)));
    drop(registration);

    assert!(!archive.has_transform(NATIVE_SCALE, 1, 0).unwrap());
}

#[test]
fn test_failed_job_writes_nothing() {
    let (_dir, mut archive) = temp_archive();
    archive
        .add_view(&unit_view(original_key(0), reference_volume(16), 0.0), false)
        .unwrap();
    archive
        .add_view(&unit_view(original_key(1), Array3::zeros((16, 16, 16)), 30.0), false)
        .unwrap();

    let mut registration = MultiViewRegistration::new(&mut archive, config());
    assert!(matches!(registration.execute(), Err(MvregError::Convergence(_))));
    assert_eq!(registration.state(), JobState::Failed);
    assert!(matches!(registration.get_final_transform(), Err(MvregError::NotReady)));
    drop(registration);

    assert_eq!(archive.count(ImageType::Registered).unwrap(), 0);
    assert!(!archive.has_transform(NATIVE_SCALE, 1, 0).unwrap());
}

#[test]
fn test_missing_moving_view() {
    let (_dir, mut archive) = temp_archive();
    archive
        .add_view(&unit_view(original_key(0), reference_volume(16), 0.0), false)
        .unwrap();
    let mut registration = MultiViewRegistration::new(&mut archive, config());
    registration.set_moving(4);
    assert!(matches!(
        registration.execute(),
        Err(MvregError::NotFound { what: "view", .. })
    ));
}

#[test]
fn test_register_all_continues_after_failure() {
    let (_dir, mut archive) = temp_archive();
    let reference = reference_volume(20);
    archive
        .add_view(&unit_view(original_key(0), reference.clone(), 0.0), false)
        .unwrap();
    archive
        .add_view(&unit_view(original_key(1), Array3::zeros((20, 20, 20)), 0.0), false)
        .unwrap();
    archive
        .add_view(&unit_view(original_key(2), reference, 0.0), false)
        .unwrap();

    let cfg = RegistrationConfig {
        offset: [0.0; 3],
        ..config()
    };
    let results = register_all(&mut archive, &cfg, &[]).unwrap();

    assert_eq!(results.len(), 2);
    assert!(matches!(results[0], (1, BatchResult::Failed(_))));
    assert!(matches!(results[1], (2, BatchResult::Registered(_))));
    assert!(archive.has_transform(NATIVE_SCALE, 2, 0).unwrap());
    assert!(!archive.has_transform(NATIVE_SCALE, 1, 0).unwrap());

    // A second pass skips the view that is already registered.
    let again = register_all(&mut archive, &cfg, &[]).unwrap();
    assert!(matches!(again[1], (2, BatchResult::Skipped)));
}
