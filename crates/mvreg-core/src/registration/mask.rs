use ndarray::Array3;

/// Foreground mask: voxels whose intensity lies in `[0, threshold]` are
/// background, everything else is foreground. The foreground is then grown
/// by one dilation pass so boundary voxels survive small misalignments.
pub fn foreground_mask(data: &Array3<f32>, threshold: f32) -> Array3<bool> {
    let raw = data.mapv(|v| !(0.0..=threshold).contains(&v));
    dilate(&raw)
}

/// Binary dilation: a voxel becomes true if ANY voxel in its 3x3x3
/// neighborhood is true. Out-of-bounds neighbors are ignored.
pub fn dilate(mask: &Array3<bool>) -> Array3<bool> {
    let (n0, n1, n2) = mask.dim();
    let mut result = Array3::from_elem((n0, n1, n2), false);

    for ((i, j, k), &set) in mask.indexed_iter() {
        if !set {
            continue;
        }
        for a in i.saturating_sub(1)..=(i + 1).min(n0 - 1) {
            for b in j.saturating_sub(1)..=(j + 1).min(n1 - 1) {
                for c in k.saturating_sub(1)..=(k + 1).min(n2 - 1) {
                    result[[a, b, c]] = true;
                }
            }
        }
    }

    result
}

/// Number of foreground voxels.
pub fn count_foreground(mask: &Array3<bool>) -> usize {
    mask.iter().filter(|&&m| m).count()
}
