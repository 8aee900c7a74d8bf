#[allow(dead_code)]
mod common;

use approx::assert_relative_eq;
use nalgebra::Vector3;
use ndarray::Array3;

use mvreg_core::registration::mask::{count_foreground, dilate, foreground_mask};
use mvreg_core::registration::moments::{moments_initializer, ImageMoments};
use mvreg_core::{Grid, MvregError, VoxelSize};

use common::gaussian_blob;

fn unit_grid(n: usize) -> Grid {
    Grid {
        shape: [n, n, n],
        voxel_size: VoxelSize::isotropic(1.0),
    }
}

#[test]
fn test_threshold_is_inclusive_background() {
    let mut data = Array3::<f32>::zeros((7, 7, 7));
    data[[3, 3, 3]] = 30.0;
    assert_eq!(count_foreground(&foreground_mask(&data, 30.0)), 0);

    data[[3, 3, 3]] = 30.5;
    let mask = foreground_mask(&data, 30.0);
    // One voxel grown to its full 3x3x3 neighborhood.
    assert_eq!(count_foreground(&mask), 27);
    assert!(mask[[2, 2, 2]] && mask[[4, 4, 4]]);
    assert!(!mask[[1, 3, 3]]);
}

#[test]
fn test_negative_values_are_foreground() {
    let mut data = Array3::<f32>::zeros((3, 3, 3));
    data[[0, 0, 0]] = -5.0;
    let mask = foreground_mask(&data, 30.0);
    assert!(mask[[0, 0, 0]]);
    assert_eq!(count_foreground(&mask), 8);
}

#[test]
fn test_dilate_clips_at_border() {
    let mut mask = Array3::from_elem((4, 4, 4), false);
    mask[[0, 0, 0]] = true;
    assert_eq!(count_foreground(&dilate(&mask)), 8);
}

#[test]
fn test_center_of_mass() {
    let grid = Grid {
        shape: [9, 11, 13],
        voxel_size: VoxelSize::new([2.0, 1.0, 0.5]).unwrap(),
    };
    let data = gaussian_blob((9, 11, 13), [4.0, 5.0, 6.0], [1.5, 1.5, 1.5], 100.0);
    let mask = Array3::from_elem((9, 11, 13), true);

    let moments = ImageMoments::compute(&data, &mask, &grid).unwrap();
    assert_relative_eq!(moments.center_of_mass, Vector3::new(8.0, 5.0, 3.0), epsilon = 1e-6);
}

#[test]
fn test_principal_axes_sorted_and_degenerate() {
    let grid = unit_grid(25);
    let mask = Array3::from_elem((25, 25, 25), true);

    let elongated = gaussian_blob((25, 25, 25), [12.0; 3], [2.0, 3.0, 5.0], 100.0);
    let axes = ImageMoments::compute(&elongated, &mask, &grid)
        .unwrap()
        .principal_axes()
        .unwrap();
    // Smallest spread is along axis 0, largest along axis 2.
    assert_relative_eq!(axes.column(0)[0].abs(), 1.0, epsilon = 1e-6);
    assert_relative_eq!(axes.column(2)[2].abs(), 1.0, epsilon = 1e-6);

    let round = gaussian_blob((25, 25, 25), [12.0; 3], [3.0, 3.0, 3.0], 100.0);
    assert!(ImageMoments::compute(&round, &mask, &grid)
        .unwrap()
        .principal_axes()
        .is_none());
}

#[test]
fn test_initializer_translation() {
    let grid = unit_grid(24);
    let fixed = gaussian_blob((24, 24, 24), [10.0, 11.0, 12.0], [2.0, 2.5, 3.0], 100.0);
    let moving = gaussian_blob((24, 24, 24), [12.0, 10.0, 12.5], [2.0, 2.5, 3.0], 100.0);
    let fixed_mask = foreground_mask(&fixed, 1.0);
    let moving_mask = foreground_mask(&moving, 1.0);

    let init = moments_initializer(&fixed, &fixed_mask, &grid, &moving, &moving_mask, &grid, true)
        .unwrap();
    assert_relative_eq!(init.center, Vector3::new(10.0, 11.0, 12.0), epsilon = 1e-3);
    assert_relative_eq!(init.translation, Vector3::new(2.0, -1.0, 0.5), epsilon = 1e-3);
    assert_relative_eq!(init.matrix, nalgebra::Matrix3::identity(), epsilon = 1e-4);
}

#[test]
fn test_initializer_needs_foreground() {
    let grid = unit_grid(8);
    let empty = Array3::<f32>::zeros((8, 8, 8));
    let mask = foreground_mask(&empty, 30.0);
    let blob = gaussian_blob((8, 8, 8), [3.5; 3], [1.0; 3], 100.0);
    let blob_mask = foreground_mask(&blob, 30.0);

    assert!(matches!(
        moments_initializer(&blob, &blob_mask, &grid, &empty, &mask, &grid, false),
        Err(MvregError::Convergence(_))
    ));
}
