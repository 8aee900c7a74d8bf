pub mod archive;
pub mod consts;
pub mod error;
pub mod io;
pub mod psf;
pub mod registration;
pub mod resample;
pub mod transform;
pub mod view;

pub use archive::Archive;
pub use error::{MvregError, Result};
pub use transform::{compose, AffineTransform, Transform, TransformKind};
pub use view::{Grid, ImageType, View, ViewKey, VoxelSize};
