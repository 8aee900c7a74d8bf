//! Trilinear sampling and resampling of volumes through affine transforms.

use nalgebra::Vector3;
use ndarray::Array3;
use rayon::prelude::*;

use crate::consts::PARALLEL_VOXEL_THRESHOLD;
use crate::error::{MvregError, Result};
use crate::transform::AffineTransform;
use crate::view::{Grid, VoxelSize};

/// Lower corner and fractional offset along one axis, or `None` when the
/// continuous index lies outside the axis.
///
/// Single-sample axes accept indices within half a voxel of zero.
fn axis_cell(i: f64, n: usize) -> Option<(usize, f64)> {
    if n == 1 {
        return (i.abs() <= 0.5).then_some((0, 0.0));
    }
    let max = (n - 1) as f64;
    if !(0.0..=max).contains(&i) {
        return None;
    }
    let i0 = (i.floor() as usize).min(n - 2);
    Some((i0, i - i0 as f64))
}

/// Trilinear interpolation at a continuous index; `None` outside the volume.
pub fn trilinear_sample_checked(data: &Array3<f32>, idx: [f64; 3]) -> Option<f32> {
    trilinear_with_gradient(data, idx).map(|(v, _)| v)
}

/// Trilinear interpolation at a continuous index; zero outside the volume.
pub fn trilinear_sample(data: &Array3<f32>, idx: [f64; 3]) -> f32 {
    trilinear_sample_checked(data, idx).unwrap_or(0.0)
}

/// Interpolated value and its derivative with respect to the continuous
/// index on each axis.
pub fn trilinear_with_gradient(data: &Array3<f32>, idx: [f64; 3]) -> Option<(f32, [f64; 3])> {
    let (n0, n1, n2) = data.dim();
    let (a0, f0) = axis_cell(idx[0], n0)?;
    let (a1, f1) = axis_cell(idx[1], n1)?;
    let (a2, f2) = axis_cell(idx[2], n2)?;

    // Degenerate axes collapse onto a single sample.
    let b0 = if n0 == 1 { a0 } else { a0 + 1 };
    let b1 = if n1 == 1 { a1 } else { a1 + 1 };
    let b2 = if n2 == 1 { a2 } else { a2 + 1 };

    let v = |i: usize, j: usize, k: usize| data[[i, j, k]] as f64;

    let c000 = v(a0, a1, a2);
    let c001 = v(a0, a1, b2);
    let c010 = v(a0, b1, a2);
    let c011 = v(a0, b1, b2);
    let c100 = v(b0, a1, a2);
    let c101 = v(b0, a1, b2);
    let c110 = v(b0, b1, a2);
    let c111 = v(b0, b1, b2);

    let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;

    let c00 = lerp(c000, c001, f2);
    let c01 = lerp(c010, c011, f2);
    let c10 = lerp(c100, c101, f2);
    let c11 = lerp(c110, c111, f2);
    let c0 = lerp(c00, c01, f1);
    let c1 = lerp(c10, c11, f1);
    let value = lerp(c0, c1, f0);

    let d0 = if n0 == 1 { 0.0 } else { c1 - c0 };
    let d1 = if n1 == 1 {
        0.0
    } else {
        lerp(c01 - c00, c11 - c10, f0)
    };
    let d2 = if n2 == 1 {
        0.0
    } else {
        let e0 = lerp(c001 - c000, c011 - c010, f1);
        let e1 = lerp(c101 - c100, c111 - c110, f1);
        lerp(e0, e1, f0)
    };

    Some((value as f32, [d0, d1, d2]))
}

/// Fill a volume of `shape` by evaluating `f` at every index, slice-parallel
/// for large volumes.
pub(crate) fn fill_volume<F>(shape: [usize; 3], f: F) -> Array3<f32>
where
    F: Fn(usize, usize, usize) -> f32 + Sync,
{
    let [n0, n1, n2] = shape;
    let slice = |i: usize| -> Vec<f32> {
        let mut out = Vec::with_capacity(n1 * n2);
        for j in 0..n1 {
            for k in 0..n2 {
                out.push(f(i, j, k));
            }
        }
        out
    };

    let slices: Vec<Vec<f32>> = if n0 * n1 * n2 >= PARALLEL_VOXEL_THRESHOLD {
        (0..n0).into_par_iter().map(slice).collect()
    } else {
        (0..n0).map(slice).collect()
    };

    let flat: Vec<f32> = slices.into_iter().flatten().collect();
    Array3::from_shape_vec((n0, n1, n2), flat)
        .unwrap_or_else(|_| Array3::zeros((n0, n1, n2)))
}

/// Resample `moving` onto the `reference` grid: every output voxel at
/// physical point `x` reads `moving(T(x))`, zero where `T(x)` falls outside.
pub fn resample(
    moving: &Array3<f32>,
    moving_grid: &Grid,
    transform: &AffineTransform,
    reference: &Grid,
) -> Array3<f32> {
    fill_volume(reference.shape, |i, j, k| {
        let p = reference.index_to_physical([i as f64, j as f64, k as f64]);
        let q = transform.apply(&p);
        trilinear_sample(moving, moving_grid.physical_to_index(&q))
    })
}

/// Rescale a volume by per-axis `factors`. Output shape is
/// `round(n * factor)` (at least 1) with corners aligned; the returned voxel
/// size keeps the physical extent.
pub fn zoom(data: &Array3<f32>, voxel_size: &VoxelSize, factors: [f64; 3]) -> Result<(Array3<f32>, VoxelSize)> {
    if factors.iter().any(|&f| !(f.is_finite() && f > 0.0)) {
        return Err(MvregError::InvalidConfig(format!(
            "zoom factors must be positive, got {factors:?}"
        )));
    }
    let (n0, n1, n2) = data.dim();
    let in_shape = [n0, n1, n2];
    let mut out_shape = [0usize; 3];
    let mut step = [0f64; 3];
    let mut spacing = [0f64; 3];
    for axis in 0..3 {
        let n_in = in_shape[axis];
        let n_out = ((n_in as f64 * factors[axis]).round() as usize).max(1);
        out_shape[axis] = n_out;
        step[axis] = if n_out > 1 {
            (n_in as f64 - 1.0) / (n_out as f64 - 1.0)
        } else {
            0.0
        };
        spacing[axis] = voxel_size.0[axis] * n_in as f64 / n_out as f64;
    }

    let origin_shift = [0, 1, 2].map(|axis| {
        if out_shape[axis] == 1 {
            (in_shape[axis] as f64 - 1.0) / 2.0
        } else {
            0.0
        }
    });

    let zoomed = fill_volume(out_shape, |i, j, k| {
        let idx = [
            i as f64 * step[0] + origin_shift[0],
            j as f64 * step[1] + origin_shift[1],
            k as f64 * step[2] + origin_shift[2],
        ];
        trilinear_sample(data, idx)
    });

    Ok((zoomed, VoxelSize::new(spacing)?))
}

/// Rotate a volume's content by `angle` radians about array axis `axis`
/// through its physical center, keeping the grid.
pub fn rotate(data: &Array3<f32>, voxel_size: &VoxelSize, axis: usize, angle: f64) -> Result<Array3<f32>> {
    let (n0, n1, n2) = data.dim();
    let grid = Grid {
        shape: [n0, n1, n2],
        voxel_size: *voxel_size,
    };
    let transform =
        AffineTransform::rotation_about_axis(axis, -angle, grid.physical_center(), Vector3::zeros())?;
    Ok(resample(data, &grid, &transform, &grid))
}
