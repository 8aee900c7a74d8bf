//! Collapsing a manual pre-alignment and an estimated alignment into one
//! affine transform.
//!
//! The registration optimizer runs against the moving view after it has been
//! resampled through the manual transform `T0`, so the estimated transform
//! `T1` relates the fixed view to that intermediate image. Reading the
//! original moving view therefore needs `T0(T1(x))`. Expanding both maps,
//!
//! ```text
//! T0(T1(x)) = A0 (A1 (x - c1) + c1 + t1 - c0) + c0 + t0
//!           = A0 A1 (x - c1) + c1 + [A0 (t1 + c1 - c0) + t0 + c0 - c1]
//! ```
//!
//! which is a single centered affine map around `c1`.

use super::affine::AffineTransform;

/// Compose `manual` (applied to the moving image first) with `estimated`
/// into one transform centered on the estimated transform's center.
///
/// The order matters: `compose(a, b)` and `compose(b, a)` differ in general.
pub fn compose(manual: &AffineTransform, estimated: &AffineTransform) -> AffineTransform {
    let (a0, c0, t0) = (&manual.matrix, &manual.center, &manual.translation);
    let (a1, c1, t1) = (&estimated.matrix, &estimated.center, &estimated.translation);

    let matrix = a0 * a1;
    let translation = a0 * (t1 + c1 - c0) + t0 + c0 - c1;

    AffineTransform::new(matrix, *c1, translation)
}
