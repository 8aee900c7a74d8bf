use std::fmt;
use std::str::FromStr;

use nalgebra::Vector3;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{MvregError, Result};

/// Acquisition type of a stored view. Also names the archive group it lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Original,
    Registered,
    Psf,
}

impl ImageType {
    pub const ALL: [ImageType; 3] = [ImageType::Original, ImageType::Registered, ImageType::Psf];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Registered => "registered",
            Self::Psf => "psf",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageType {
    type Err = MvregError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "original" => Ok(Self::Original),
            "registered" => Ok(Self::Registered),
            "psf" => Ok(Self::Psf),
            other => Err(MvregError::InvalidConfig(format!(
                "unknown image type '{other}'"
            ))),
        }
    }
}

/// Unique key of a view inside the archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewKey {
    pub image_type: ImageType,
    pub scale: u32,
    pub index: u32,
    pub channel: u32,
}

impl ViewKey {
    pub fn new(image_type: ImageType, scale: u32, index: u32, channel: u32) -> Self {
        Self {
            image_type,
            scale,
            index,
            channel,
        }
    }

    /// Same (scale, index, channel) under a different acquisition type.
    pub fn with_type(self, image_type: ImageType) -> Self {
        Self { image_type, ..self }
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/scale_{}/index_{}/channel_{}",
            self.image_type, self.scale, self.index, self.channel
        )
    }
}

/// Per-axis physical spacing, in array axis order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoxelSize(pub [f64; 3]);

impl VoxelSize {
    pub fn new(spacing: [f64; 3]) -> Result<Self> {
        if spacing.iter().any(|&s| !(s.is_finite() && s > 0.0)) {
            return Err(MvregError::InvalidConfig(format!(
                "voxel size must be positive and finite, got {spacing:?}"
            )));
        }
        Ok(Self(spacing))
    }

    pub fn isotropic(spacing: f64) -> Self {
        Self([spacing; 3])
    }

    pub fn as_vector(&self) -> Vector3<f64> {
        Vector3::new(self.0[0], self.0[1], self.0[2])
    }
}

/// One stored image plus its acquisition metadata.
///
/// Pixel data is indexed `[axis0, axis1, axis2]`. Planar images are kept as
/// single-plane volumes (axis0 length 1). Physical coordinates place index
/// `(0, 0, 0)` at the origin.
#[derive(Clone, Debug, PartialEq)]
pub struct View {
    pub key: ViewKey,
    pub data: Array3<f32>,
    /// Estimated rotation angle of the acquisition, in degrees.
    pub angle: f64,
    pub voxel_size: VoxelSize,
}

impl View {
    pub fn new(key: ViewKey, data: Array3<f32>, angle: f64, voxel_size: VoxelSize) -> Self {
        Self {
            key,
            data,
            angle,
            voxel_size,
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        let (a, b, c) = self.data.dim();
        [a, b, c]
    }

    pub fn is_planar(&self) -> bool {
        self.data.dim().0 == 1
    }

    pub fn angle_radians(&self) -> f64 {
        self.angle.to_radians()
    }

    pub fn grid(&self) -> Grid {
        Grid {
            shape: self.shape(),
            voxel_size: self.voxel_size,
        }
    }

    /// Physical point of the continuous index `(size - 1) / 2` on every axis.
    pub fn physical_center(&self) -> Vector3<f64> {
        self.grid().physical_center()
    }
}

/// Sampling grid of a volume: shape plus spacing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Grid {
    pub shape: [usize; 3],
    pub voxel_size: VoxelSize,
}

impl Grid {
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index_to_physical(&self, idx: [f64; 3]) -> Vector3<f64> {
        let s = &self.voxel_size.0;
        Vector3::new(idx[0] * s[0], idx[1] * s[1], idx[2] * s[2])
    }

    pub fn physical_to_index(&self, p: &Vector3<f64>) -> [f64; 3] {
        let s = &self.voxel_size.0;
        [p[0] / s[0], p[1] / s[1], p[2] / s[2]]
    }

    pub fn physical_center(&self) -> Vector3<f64> {
        let c = self.shape.map(|n| (n as f64 - 1.0) / 2.0);
        self.index_to_physical(c)
    }
}
