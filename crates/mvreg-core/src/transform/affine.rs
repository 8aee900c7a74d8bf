use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{MvregError, Result};

/// Number of free parameters of a 3D affine transform: 9 matrix entries
/// (row-major) followed by 3 translation components.
pub const AFFINE_PARAMETER_COUNT: usize = 12;

/// Number of parameters of a rigid transform: 3 rotation angles followed by
/// 3 translation components.
pub const EULER_PARAMETER_COUNT: usize = 6;

/// Centered affine map `x -> A (x - c) + c + t`.
///
/// Transforms map points of the fixed (reference) space into the moving
/// space, so resampling a moving view onto the fixed grid reads
/// `moving(T(x))` at each fixed-grid point `x`.
#[derive(Clone, Debug, PartialEq)]
pub struct AffineTransform {
    pub matrix: Matrix3<f64>,
    pub center: Vector3<f64>,
    pub translation: Vector3<f64>,
}

impl AffineTransform {
    pub fn new(matrix: Matrix3<f64>, center: Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            matrix,
            center,
            translation,
        }
    }

    pub fn identity(center: Vector3<f64>) -> Self {
        Self::new(Matrix3::identity(), center, Vector3::zeros())
    }

    /// Rigid rotation by `angle` radians about the array axis `axis` through
    /// `center`, followed by `translation`.
    pub fn rotation_about_axis(
        axis: usize,
        angle: f64,
        center: Vector3<f64>,
        translation: Vector3<f64>,
    ) -> Result<Self> {
        let unit = match axis {
            0 => Vector3::x_axis(),
            1 => Vector3::y_axis(),
            2 => Vector3::z_axis(),
            other => {
                return Err(MvregError::InvalidConfig(format!(
                    "rotation axis must be 0, 1 or 2, got {other}"
                )))
            }
        };
        let rotation = Rotation3::from_axis_angle(&unit, angle);
        Ok(Self::new(*rotation.matrix(), center, translation))
    }

    /// Rigid transform from rotation angles about array axes 0, 1 and 2 and a
    /// translation. The rotation is `R0 · R2 · R1`: axis 1 first, then axis 2,
    /// then axis 0.
    pub fn from_euler(angles: [f64; 3], center: Vector3<f64>, translation: Vector3<f64>) -> Self {
        let r0 = Rotation3::from_axis_angle(&Vector3::x_axis(), angles[0]);
        let r1 = Rotation3::from_axis_angle(&Vector3::y_axis(), angles[1]);
        let r2 = Rotation3::from_axis_angle(&Vector3::z_axis(), angles[2]);
        Self::new(*(r0 * r2 * r1).matrix(), center, translation)
    }

    pub fn apply(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * (point - self.center) + self.center + self.translation
    }

    /// Constant offset `o` such that `T(x) = A x + o`.
    pub fn offset(&self) -> Vector3<f64> {
        self.center + self.translation - self.matrix * self.center
    }

    /// Inverse map, expressed around the same center.
    pub fn inverse(&self) -> Result<Self> {
        let inv = self
            .matrix
            .try_inverse()
            .ok_or_else(|| MvregError::InvalidTransform("matrix is singular".into()))?;
        let translation = -(inv * self.translation);
        Ok(Self::new(inv, self.center, translation))
    }

    /// The same map re-expressed around a different center.
    pub fn recentered(&self, center: Vector3<f64>) -> Self {
        let translation = self.offset() + self.matrix * center - center;
        Self::new(self.matrix, center, translation)
    }

    /// Flat parameter vector: row-major matrix entries, then translation.
    pub fn parameters(&self) -> Vec<f64> {
        let mut params = Vec::with_capacity(AFFINE_PARAMETER_COUNT);
        for row in 0..3 {
            for col in 0..3 {
                params.push(self.matrix[(row, col)]);
            }
        }
        params.extend(self.translation.iter());
        params
    }

    pub fn from_parameters(params: &[f64], center: Vector3<f64>) -> Result<Self> {
        if params.len() != AFFINE_PARAMETER_COUNT {
            return Err(MvregError::InvalidTransform(format!(
                "affine transform needs {AFFINE_PARAMETER_COUNT} parameters, got {}",
                params.len()
            )));
        }
        let matrix = Matrix3::from_row_slice(&params[..9]);
        let translation = Vector3::new(params[9], params[10], params[11]);
        Ok(Self::new(matrix, center, translation))
    }

    pub fn is_finite(&self) -> bool {
        self.matrix.iter().all(|v| v.is_finite())
            && self.center.iter().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite())
    }

    pub fn to_record(&self) -> Transform {
        Transform {
            kind: TransformKind::Affine,
            parameters: self.parameters(),
            fixed_parameters: self.center.iter().copied().collect(),
        }
    }
}

/// Kind tag of a stored transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    /// Rigid: rotation angles about axes 0, 1, 2 then translation, composed
    /// as in [`AffineTransform::from_euler`].
    Euler,
    Affine,
}

impl TransformKind {
    /// Parse the class name used in Insight transform files, e.g.
    /// `AffineTransform_double_3_3`.
    pub fn from_class_name(name: &str) -> Result<Self> {
        let base = name.split('_').next().unwrap_or(name);
        match base {
            "AffineTransform" => Ok(Self::Affine),
            "Euler3DTransform" => Ok(Self::Euler),
            other => Err(MvregError::InvalidTransform(format!(
                "unsupported transform class '{other}'"
            ))),
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Affine => "AffineTransform_double_3_3",
            Self::Euler => "Euler3DTransform_double_3_3",
        }
    }
}

/// Stored transform record: kind tag, flat parameters and fixed parameters
/// (the center of rotation).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub kind: TransformKind,
    pub parameters: Vec<f64>,
    pub fixed_parameters: Vec<f64>,
}

impl Transform {
    pub fn center(&self) -> Result<Vector3<f64>> {
        match self.fixed_parameters.as_slice() {
            [a, b, c, ..] => Ok(Vector3::new(*a, *b, *c)),
            _ => Err(MvregError::InvalidTransform(format!(
                "expected 3 fixed parameters, got {}",
                self.fixed_parameters.len()
            ))),
        }
    }

    pub fn to_affine(&self) -> Result<AffineTransform> {
        let center = self.center()?;
        match self.kind {
            TransformKind::Affine => AffineTransform::from_parameters(&self.parameters, center),
            TransformKind::Euler => {
                let p = &self.parameters;
                if p.len() != EULER_PARAMETER_COUNT {
                    return Err(MvregError::InvalidTransform(format!(
                        "rigid transform needs {EULER_PARAMETER_COUNT} parameters, got {}",
                        p.len()
                    )));
                }
                Ok(AffineTransform::from_euler(
                    [p[0], p[1], p[2]],
                    center,
                    Vector3::new(p[3], p[4], p[5]),
                ))
            }
        }
    }
}
