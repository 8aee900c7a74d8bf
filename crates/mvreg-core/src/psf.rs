//! Reconciling a point-spread-function image with the stack it will
//! deconvolve.

use ndarray::Array3;
use tracing::debug;

use crate::archive::Archive;
use crate::consts::PSF_VOXEL_RTOL;
use crate::error::{MvregError, Result};
use crate::resample::{rotate, zoom};
use crate::view::{ImageType, View, ViewKey};

/// PSF and stack resampled onto a common orientation, voxel size and
/// padded shape.
#[derive(Clone, Debug)]
pub struct CoherentPair {
    /// PSF with its intensity centroid at index 0, summing to 1.
    pub psf: Array3<f32>,
    pub stack: Array3<f32>,
}

/// Smallest size `>= n` whose only prime factors are 2, 3 and 5.
pub fn optimal_fft_size(n: usize) -> usize {
    let mut candidate = n.max(1);
    loop {
        let mut rest = candidate;
        for p in [2, 3, 5] {
            while rest % p == 0 {
                rest /= p;
            }
        }
        if rest == 1 {
            return candidate;
        }
        candidate += 1;
    }
}

/// Zero-pad `data` to `shape`, keeping it centered. Axes already longer than
/// the target are cropped symmetrically.
pub fn expand_to_shape(data: &Array3<f32>, shape: [usize; 3]) -> Array3<f32> {
    let (n0, n1, n2) = data.dim();
    let src = [n0, n1, n2];
    let mut out = Array3::<f32>::zeros((shape[0], shape[1], shape[2]));

    // Offset of the source inside the output (negative means crop).
    let offset: [isize; 3] = [0, 1, 2].map(|a| (shape[a] as isize - src[a] as isize + 1).div_euclid(2));

    for ((i, j, k), &v) in data.indexed_iter() {
        let dst = [
            i as isize + offset[0],
            j as isize + offset[1],
            k as isize + offset[2],
        ];
        if (0..3).all(|a| dst[a] >= 0 && (dst[a] as usize) < shape[a]) {
            out[[dst[0] as usize, dst[1] as usize, dst[2] as usize]] = v;
        }
    }
    out
}

/// Circularly shift a volume so that its intensity centroid lands on index
/// `(0, 0, 0)`.
pub fn shift_centroid_to_origin(data: &Array3<f32>) -> Array3<f32> {
    let (n0, n1, n2) = data.dim();
    let mut mass = 0.0f64;
    let mut first = [0.0f64; 3];
    for ((i, j, k), &v) in data.indexed_iter() {
        let w = v.max(0.0) as f64;
        mass += w;
        first[0] += i as f64 * w;
        first[1] += j as f64 * w;
        first[2] += k as f64 * w;
    }
    if mass <= 0.0 {
        return data.clone();
    }
    let shift = first.map(|f| (f / mass).round() as usize);

    let mut out = Array3::<f32>::zeros((n0, n1, n2));
    for ((i, j, k), &v) in data.indexed_iter() {
        let a = (i + n0 - shift[0] % n0) % n0;
        let b = (j + n1 - shift[1] % n1) % n1;
        let c = (k + n2 - shift[2] % n2) % n2;
        out[[a, b, c]] = v;
    }
    out
}

fn voxels_close(a: &[f64; 3], b: &[f64; 3]) -> bool {
    a.iter()
        .zip(b)
        .all(|(&x, &y)| (x - y).abs() <= PSF_VOXEL_RTOL * y.abs())
}

/// Bring a PSF and a stack to the same orientation, voxel size and an
/// FFT-friendly common shape. The PSF is rotated about axis 0 by the angle
/// difference, rescaled to the stack's voxel size, centered on index 0 and
/// normalized to unit sum.
pub fn coherent_images(psf: &View, stack: &View) -> Result<CoherentPair> {
    let mut psf_data = psf.data.clone();

    if psf.angle != stack.angle {
        let rotation = psf.angle - stack.angle;
        psf_data = rotate(&psf_data, &psf.voxel_size, 0, rotation.to_radians())?;
        debug!(degrees = rotation, "PSF rotated");
    }

    if !voxels_close(&psf.voxel_size.0, &stack.voxel_size.0) {
        let factors = [0, 1, 2].map(|a| psf.voxel_size.0[a] / stack.voxel_size.0[a]);
        psf_data = zoom(&psf_data, &psf.voxel_size, factors)?.0;
        debug!(factors = ?factors, "PSF zoomed");
    }

    let (p0, p1, p2) = psf_data.dim();
    let (s0, s1, s2) = stack.data.dim();
    let shape = [p0.max(s0), p1.max(s1), p2.max(s2)].map(optimal_fft_size);

    let psf_padded = expand_to_shape(&psf_data, shape);
    let stack_padded = expand_to_shape(&stack.data, shape);

    let mut psf_centered = shift_centroid_to_origin(&psf_padded);
    let total: f64 = psf_centered.iter().map(|&v| v as f64).sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(MvregError::InvalidDimensions(psf.shape().to_vec()));
    }
    let inv = (1.0 / total) as f32;
    psf_centered.mapv_inplace(|v| v * inv);

    Ok(CoherentPair {
        psf: psf_centered,
        stack: stack_padded,
    })
}

/// PSF to use for a view: the single shared PSF when the archive holds one
/// for the view's scale and channel, otherwise the PSF at the view's index.
pub fn psf_for_view(archive: &Archive, key: &ViewKey) -> Result<View> {
    let candidates: Vec<ViewKey> = archive
        .keys(ImageType::Psf)?
        .into_iter()
        .filter(|k| k.scale == key.scale && k.channel == key.channel)
        .collect();

    match candidates.as_slice() {
        [shared] => archive.get_view(shared),
        _ => archive.get_view(&key.with_type(ImageType::Psf)),
    }
}
