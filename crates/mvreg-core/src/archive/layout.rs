//! Directory layout of an archive:
//!
//! ```text
//! <root>/<group>/scale_<s>/index_<i>/channel_<c>/
//! ```
//!
//! with groups `original`, `registered`, `psf` (view leaves holding
//! `pixels.raw` + `meta.toml`) and `transform` (leaves holding
//! `transform.toml`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::view::VoxelSize;

pub(crate) const TRANSFORM_GROUP: &str = "transform";
pub(crate) const PIXELS_FILE: &str = "pixels.raw";
pub(crate) const META_FILE: &str = "meta.toml";
pub(crate) const TRANSFORM_FILE: &str = "transform.toml";
const STAGING_SUFFIX: &str = ".staging";
const RETIRED_SUFFIX: &str = ".retired";

/// Metadata stored next to a view's pixels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct ViewMeta {
    pub angle: f64,
    pub voxel_size: VoxelSize,
    pub shape: [usize; 3],
}

pub(crate) fn leaf_dir(root: &Path, group: &str, scale: u32, index: u32, channel: u32) -> PathBuf {
    root.join(group)
        .join(format!("scale_{scale}"))
        .join(format!("index_{index}"))
        .join(format!("channel_{channel}"))
}

fn parse_component(name: &str, prefix: &str) -> Option<u32> {
    name.strip_prefix(prefix)?.parse().ok()
}

fn numbered_children(dir: &Path, prefix: &str) -> Result<Vec<(u32, PathBuf)>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(n) = parse_component(name, prefix) {
            if entry.file_type()?.is_dir() {
                out.push((n, entry.path()));
            }
        }
    }
    out.sort_by_key(|(n, _)| *n);
    Ok(out)
}

/// All committed `(scale, index, channel)` leaves of a group that contain
/// `marker`, sorted.
pub(crate) fn list_leaves(root: &Path, group: &str, marker: &str) -> Result<Vec<(u32, u32, u32)>> {
    let mut keys = Vec::new();
    for (scale, scale_dir) in numbered_children(&root.join(group), "scale_")? {
        for (index, index_dir) in numbered_children(&scale_dir, "index_")? {
            for (channel, channel_dir) in numbered_children(&index_dir, "channel_")? {
                if channel_dir.join(marker).is_file() {
                    keys.push((scale, index, channel));
                }
            }
        }
    }
    Ok(keys)
}

fn sibling(leaf: &Path, suffix: &str) -> PathBuf {
    let mut name = leaf.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!(path = %dir.display(), error = %e, "Failed to remove archive scratch directory");
    }
}

/// Write a leaf through a staging directory so readers never observe a
/// partially written entry. An existing leaf is moved aside until the new
/// one is in place, so a failed replace keeps the previous entry.
pub(crate) fn commit_leaf<F>(leaf: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let parent = leaf.parent().unwrap_or(leaf);
    fs::create_dir_all(parent)?;

    let staging = sibling(leaf, STAGING_SUFFIX);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    if let Err(e) = write(&staging) {
        discard(&staging);
        return Err(e);
    }

    if !leaf.exists() {
        fs::rename(&staging, leaf)?;
        return Ok(());
    }

    let retired = sibling(leaf, RETIRED_SUFFIX);
    if retired.exists() {
        fs::remove_dir_all(&retired)?;
    }
    fs::rename(leaf, &retired)?;
    if let Err(e) = fs::rename(&staging, leaf) {
        if let Err(restore) = fs::rename(&retired, leaf) {
            warn!(
                path = %leaf.display(),
                error = %restore,
                "Failed to restore replaced archive entry"
            );
        }
        discard(&staging);
        return Err(e.into());
    }
    discard(&retired);
    Ok(())
}
