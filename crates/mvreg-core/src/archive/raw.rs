use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array3;

use crate::error::{MvregError, Result};

pub(crate) const VOLUME_MAGIC: &[u8; 12] = b"MVREG-VOLUME";
pub(crate) const VOLUME_VERSION: u32 = 1;
/// Magic (12) + version (4) + three u64 dimensions (24).
pub(crate) const VOLUME_HEADER_SIZE: usize = 40;

/// Write a volume as a little-endian f32 pixel file.
pub(crate) fn write_volume(path: &Path, data: &Array3<f32>) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(VOLUME_MAGIC)?;
    writer.write_u32::<LittleEndian>(VOLUME_VERSION)?;
    let (n0, n1, n2) = data.dim();
    for n in [n0, n1, n2] {
        writer.write_u64::<LittleEndian>(n as u64)?;
    }
    // Iteration order is logical (row-major) even for non-standard layouts.
    for &v in data.iter() {
        writer.write_f32::<LittleEndian>(v)?;
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Read a pixel file written by [`write_volume`].
pub(crate) fn read_volume(path: &Path) -> Result<Array3<f32>> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let corrupt = |reason: String| MvregError::CorruptEntry {
        path: path.display().to_string(),
        reason,
    };

    if mmap.len() < VOLUME_HEADER_SIZE {
        return Err(corrupt("file too small for volume header".into()));
    }
    if &mmap[0..12] != VOLUME_MAGIC {
        return Err(corrupt("missing volume magic".into()));
    }
    let version = LittleEndian::read_u32(&mmap[12..16]);
    if version != VOLUME_VERSION {
        return Err(corrupt(format!("unsupported volume version {version}")));
    }

    let mut dims = [0usize; 3];
    for (axis, dim) in dims.iter_mut().enumerate() {
        let start = 16 + axis * 8;
        *dim = LittleEndian::read_u64(&mmap[start..start + 8]) as usize;
    }
    let count = dims
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(|| corrupt(format!("dimensions overflow: {dims:?}")))?;
    let expected = count
        .checked_mul(4)
        .and_then(|b| b.checked_add(VOLUME_HEADER_SIZE))
        .ok_or_else(|| corrupt(format!("dimensions overflow: {dims:?}")))?;
    if mmap.len() != expected {
        return Err(corrupt(format!(
            "expected {expected} bytes, got {}",
            mmap.len()
        )));
    }

    let mut samples = vec![0f32; count];
    LittleEndian::read_f32_into(&mmap[VOLUME_HEADER_SIZE..], &mut samples);

    Array3::from_shape_vec((dims[0], dims[1], dims[2]), samples)
        .map_err(|e| corrupt(e.to_string()))
}
