pub mod affine;
pub mod compose;

pub use affine::{AffineTransform, Transform, TransformKind, AFFINE_PARAMETER_COUNT};
pub use compose::compose;
