//! Moments-based initialization of the affine transform.
//!
//! The center of mass of the fixed image becomes the transform center and
//! the translation moves it onto the moving image's center of mass. When
//! principal axes are requested and well separated, the matrix rotates the
//! fixed principal frame onto the moving one.

use nalgebra::{linalg::SymmetricEigen, Matrix3, Vector3};
use ndarray::Array3;
use tracing::debug;

use crate::consts::{EPSILON, PRINCIPAL_AXES_MIN_SEPARATION};
use crate::error::{MvregError, Result};
use crate::transform::AffineTransform;
use crate::view::Grid;

/// Zeroth, first and second moments of a masked intensity volume.
#[derive(Clone, Debug)]
pub struct ImageMoments {
    pub mass: f64,
    pub center_of_mass: Vector3<f64>,
    /// Intensity-weighted covariance about the center of mass.
    pub covariance: Matrix3<f64>,
}

impl ImageMoments {
    pub fn compute(data: &Array3<f32>, mask: &Array3<bool>, grid: &Grid) -> Option<Self> {
        let mut mass = 0.0f64;
        let mut first = Vector3::zeros();
        let mut second = Matrix3::zeros();

        for ((i, j, k), &v) in data.indexed_iter() {
            if v <= 0.0 || !mask[[i, j, k]] {
                continue;
            }
            let w = v as f64;
            let p = grid.index_to_physical([i as f64, j as f64, k as f64]);
            mass += w;
            first += p * w;
            second += p * p.transpose() * w;
        }

        if mass <= EPSILON {
            return None;
        }
        let center_of_mass = first / mass;
        let covariance = second / mass - center_of_mass * center_of_mass.transpose();
        Some(Self {
            mass,
            center_of_mass,
            covariance,
        })
    }

    /// Principal axes as columns, sorted by ascending second moment, or
    /// `None` when two moments are too close to order the axes reliably.
    pub fn principal_axes(&self) -> Option<Matrix3<f64>> {
        let eig = SymmetricEigen::new(self.covariance);
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));

        for pair in order.windows(2) {
            let low = eig.eigenvalues[pair[0]].max(0.0);
            let high = eig.eigenvalues[pair[1]];
            if high <= low * PRINCIPAL_AXES_MIN_SEPARATION + EPSILON {
                return None;
            }
        }

        let mut axes = Matrix3::zeros();
        for (col, &src) in order.iter().enumerate() {
            axes.set_column(col, &eig.eigenvectors.column(src));
        }
        Some(axes)
    }
}

/// Rotation taking the fixed principal frame onto the moving one, with axis
/// signs chosen closest to the identity.
fn principal_rotation(fixed_axes: &Matrix3<f64>, moving_axes: &Matrix3<f64>) -> Matrix3<f64> {
    let mut moving = *moving_axes;
    let mut alignment = [0f64; 3];
    for col in 0..3 {
        let dot = fixed_axes.column(col).dot(&moving.column(col));
        if dot < 0.0 {
            let flipped = -moving.column(col);
            moving.set_column(col, &flipped);
        }
        alignment[col] = dot.abs();
    }

    let mut rotation = moving * fixed_axes.transpose();
    if rotation.determinant() < 0.0 {
        // Flip the least certain axis to stay a proper rotation.
        let weakest = (0..3)
            .min_by(|&a, &b| alignment[a].total_cmp(&alignment[b]))
            .unwrap_or(0);
        let flipped = -moving.column(weakest);
        moving.set_column(weakest, &flipped);
        rotation = moving * fixed_axes.transpose();
    }
    rotation
}

/// Build the initial affine transform from the moments of the masked fixed
/// and moving images.
pub fn moments_initializer(
    fixed: &Array3<f32>,
    fixed_mask: &Array3<bool>,
    fixed_grid: &Grid,
    moving: &Array3<f32>,
    moving_mask: &Array3<bool>,
    moving_grid: &Grid,
    use_principal_axes: bool,
) -> Result<AffineTransform> {
    let fixed_moments = ImageMoments::compute(fixed, fixed_mask, fixed_grid)
        .ok_or_else(|| MvregError::Convergence("fixed image has no foreground".into()))?;
    let moving_moments = ImageMoments::compute(moving, moving_mask, moving_grid)
        .ok_or_else(|| MvregError::Convergence("moving image has no foreground".into()))?;

    let center = fixed_moments.center_of_mass;
    let translation = moving_moments.center_of_mass - fixed_moments.center_of_mass;

    let matrix = if use_principal_axes {
        match (fixed_moments.principal_axes(), moving_moments.principal_axes()) {
            (Some(f), Some(m)) => principal_rotation(&f, &m),
            _ => {
                debug!("Principal axes degenerate, initializing with identity matrix");
                Matrix3::identity()
            }
        }
    } else {
        Matrix3::identity()
    };

    debug!(
        center = ?center.as_slice(),
        translation = ?translation.as_slice(),
        "Moments initializer"
    );
    Ok(AffineTransform::new(matrix, center, translation))
}
