use approx::assert_relative_eq;
use nalgebra::{Matrix3, Vector3};

use mvreg_core::transform::AFFINE_PARAMETER_COUNT;
use mvreg_core::{compose, AffineTransform, MvregError, Transform, TransformKind};

fn sample_points() -> Vec<Vector3<f64>> {
    vec![
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(3.0, -1.0, 2.5),
        Vector3::new(-4.0, 7.0, 1.0),
        Vector3::new(10.0, 10.0, -10.0),
    ]
}

fn shear() -> AffineTransform {
    AffineTransform::new(
        Matrix3::new(1.1, 0.2, 0.0, -0.1, 0.9, 0.05, 0.0, 0.3, 1.0),
        Vector3::new(5.0, 4.0, 3.0),
        Vector3::new(1.0, -2.0, 0.5),
    )
}

fn rotation() -> AffineTransform {
    AffineTransform::rotation_about_axis(
        0,
        20f64.to_radians(),
        Vector3::new(10.0, 12.0, 14.0),
        Vector3::new(-3.0, 0.0, 2.0),
    )
    .unwrap()
}

#[test]
fn test_compose_matches_sequential_application() {
    let manual = rotation();
    let estimated = shear();
    let combined = compose(&manual, &estimated);

    assert_eq!(combined.center, estimated.center);
    for p in sample_points() {
        let expected = manual.apply(&estimated.apply(&p));
        assert_relative_eq!(combined.apply(&p), expected, epsilon = 1e-9);
    }
}

#[test]
fn test_compose_with_identity() {
    let t = shear();
    let identity = AffineTransform::identity(Vector3::new(7.0, 7.0, 7.0));

    for p in sample_points() {
        assert_relative_eq!(compose(&identity, &t).apply(&p), t.apply(&p), epsilon = 1e-9);
        assert_relative_eq!(compose(&t, &identity).apply(&p), t.apply(&p), epsilon = 1e-9);
    }
}

#[test]
fn test_compose_is_not_commutative() {
    let a = rotation();
    let b = shear();
    let p = Vector3::new(3.0, -1.0, 2.5);
    let ab = compose(&a, &b).apply(&p);
    let ba = compose(&b, &a).apply(&p);
    assert!((ab - ba).norm() > 1e-3);
}

#[test]
fn test_inverse_round_trip() {
    let t = shear();
    let inv = t.inverse().unwrap();
    for p in sample_points() {
        assert_relative_eq!(inv.apply(&t.apply(&p)), p, epsilon = 1e-9);
    }
}

#[test]
fn test_singular_matrix_has_no_inverse() {
    let t = AffineTransform::new(Matrix3::zeros(), Vector3::zeros(), Vector3::zeros());
    assert!(matches!(t.inverse(), Err(MvregError::InvalidTransform(_))));
}

#[test]
fn test_recentered_is_same_map() {
    let t = shear();
    let moved = t.recentered(Vector3::new(-20.0, 1.0, 8.0));
    for p in sample_points() {
        assert_relative_eq!(moved.apply(&p), t.apply(&p), epsilon = 1e-9);
    }
}

#[test]
fn test_parameters_layout() {
    let t = shear();
    let params = t.parameters();
    assert_eq!(params.len(), AFFINE_PARAMETER_COUNT);
    assert_eq!(params[1], 0.2);
    assert_eq!(params[3], -0.1);
    assert_eq!(&params[9..], &[1.0, -2.0, 0.5]);

    let back = AffineTransform::from_parameters(&params, t.center).unwrap();
    assert_eq!(back, t);
    assert!(AffineTransform::from_parameters(&params[..6], t.center).is_err());
}

#[test]
fn test_record_carries_center() {
    let record = rotation().to_record();
    assert_eq!(record.kind, TransformKind::Affine);
    assert_eq!(record.fixed_parameters, vec![10.0, 12.0, 14.0]);
    assert_eq!(record.to_affine().unwrap(), rotation());
}

#[test]
fn test_euler_record() {
    let record = Transform {
        kind: TransformKind::Euler,
        parameters: vec![0.3, 0.0, 0.0, 1.0, 2.0, 3.0],
        fixed_parameters: vec![1.0, 1.0, 1.0],
    };
    let affine = record.to_affine().unwrap();
    let expected = AffineTransform::rotation_about_axis(
        0,
        0.3,
        Vector3::new(1.0, 1.0, 1.0),
        Vector3::new(1.0, 2.0, 3.0),
    )
    .unwrap();
    assert_relative_eq!(affine.matrix, expected.matrix, epsilon = 1e-12);
    assert_eq!(affine.translation, expected.translation);
}

#[test]
fn test_euler_angle_order() {
    let center = Vector3::new(1.0, 2.0, 3.0);
    let record = Transform {
        kind: TransformKind::Euler,
        parameters: vec![0.2, 0.4, -0.3, 0.0, 0.0, 0.0],
        fixed_parameters: center.iter().copied().collect(),
    };
    let about = |axis, angle| {
        AffineTransform::rotation_about_axis(axis, angle, center, Vector3::zeros())
            .unwrap()
            .matrix
    };
    let expected = about(0, 0.2) * about(2, -0.3) * about(1, 0.4);
    assert_relative_eq!(record.to_affine().unwrap().matrix, expected, epsilon = 1e-12);
}

#[test]
fn test_class_names() {
    assert_eq!(
        TransformKind::from_class_name("AffineTransform_double_3_3").unwrap(),
        TransformKind::Affine
    );
    assert_eq!(
        TransformKind::from_class_name("Euler3DTransform_double_3_3").unwrap(),
        TransformKind::Euler
    );
    assert!(TransformKind::from_class_name("BSplineTransform_double_3_3").is_err());
}
