use nalgebra::Vector3;
use ndarray::Array3;
use tempfile::TempDir;

use mvreg_core::consts::NATIVE_SCALE;
use mvreg_core::resample::resample;
use mvreg_core::{AffineTransform, Archive, Grid, ImageType, View, ViewKey, VoxelSize};

/// Anisotropic Gaussian blob centered at `center` (index units) over a zero
/// background.
pub fn gaussian_blob(
    shape: (usize, usize, usize),
    center: [f64; 3],
    sigma: [f64; 3],
    amplitude: f32,
) -> Array3<f32> {
    Array3::from_shape_fn(shape, |(i, j, k)| {
        let d = [
            (i as f64 - center[0]) / sigma[0],
            (j as f64 - center[1]) / sigma[1],
            (k as f64 - center[2]) / sigma[2],
        ];
        let r2 = d.iter().map(|v| v * v).sum::<f64>();
        amplitude * (-0.5 * r2).exp() as f32
    })
}

/// Blob used by the registration tests: centered in a cube, elongated along
/// each axis by a different amount.
pub fn reference_volume(n: usize) -> Array3<f32> {
    let c = (n as f64 - 1.0) / 2.0;
    gaussian_blob((n, n, n), [c, c, c], [3.0, 4.0, 6.0], 200.0)
}

/// Empty archive in a fresh temporary directory. Keep the `TempDir` alive
/// for as long as the archive is used.
pub fn temp_archive() -> (TempDir, Archive) {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::open(dir.path().join("archive")).unwrap();
    (dir, archive)
}

pub fn original_key(index: u32) -> ViewKey {
    ViewKey::new(ImageType::Original, NATIVE_SCALE, index, 0)
}

pub fn unit_view(key: ViewKey, data: Array3<f32>, angle: f64) -> View {
    View::new(key, data, angle, VoxelSize::isotropic(1.0))
}

/// Rotation by `angle_deg` about array axis 0 through the center of a unit
/// spaced grid, followed by `offset`.
pub fn acquisition_transform(shape: [usize; 3], angle_deg: f64, offset: [f64; 3]) -> AffineTransform {
    let grid = Grid {
        shape,
        voxel_size: VoxelSize::isotropic(1.0),
    };
    AffineTransform::rotation_about_axis(
        0,
        angle_deg.to_radians(),
        grid.physical_center(),
        Vector3::from(offset),
    )
    .unwrap()
}

/// Volume `moving` such that `moving(T(x)) == reference(x)` for the
/// acquisition transform `T`.
pub fn acquire(reference: &Array3<f32>, angle_deg: f64, offset: [f64; 3]) -> Array3<f32> {
    let (n0, n1, n2) = reference.dim();
    let shape = [n0, n1, n2];
    let grid = Grid {
        shape,
        voxel_size: VoxelSize::isotropic(1.0),
    };
    let forward = acquisition_transform(shape, angle_deg, offset);
    resample(reference, &grid, &forward.inverse().unwrap(), &grid)
}

pub fn max_abs_diff(a: &Array3<f32>, b: &Array3<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}
