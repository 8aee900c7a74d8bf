//! Keyed, persistent store of views, rescaled derivatives, transforms and
//! PSFs.
//!
//! Every mutating call persists immediately. Writes are rejected when the key
//! is already taken unless the caller passes `overwrite = true`.

mod layout;
mod raw;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::consts::NATIVE_SCALE;
use crate::error::{MvregError, Result};
use crate::resample::zoom;
use crate::transform::Transform;
use crate::view::{ImageType, View, ViewKey};

use layout::{
    commit_leaf, leaf_dir, list_leaves, ViewMeta, META_FILE, PIXELS_FILE, TRANSFORM_FILE,
    TRANSFORM_GROUP,
};

/// Single-owner handle to an on-disk archive.
///
/// The handle does no locking; callers sharing an archive across threads or
/// processes must serialize access themselves.
#[derive(Debug)]
pub struct Archive {
    root: PathBuf,
    closed: bool,
}

impl Archive {
    /// Open an archive rooted at `root`, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!(path = %root.display(), "Opened archive");
        Ok(Self {
            root,
            closed: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(MvregError::ClosedArchive)
        } else {
            Ok(())
        }
    }

    fn view_dir(&self, key: &ViewKey) -> PathBuf {
        leaf_dir(
            &self.root,
            key.image_type.as_str(),
            key.scale,
            key.index,
            key.channel,
        )
    }

    fn transform_dir(&self, scale: u32, index: u32, channel: u32) -> PathBuf {
        leaf_dir(&self.root, TRANSFORM_GROUP, scale, index, channel)
    }

    /// True iff a view is stored under `key`.
    pub fn exists(&self, key: &ViewKey) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.view_dir(key).join(PIXELS_FILE).is_file())
    }

    pub fn get_view(&self, key: &ViewKey) -> Result<View> {
        self.ensure_open()?;
        let dir = self.view_dir(key);
        let pixels = dir.join(PIXELS_FILE);
        if !pixels.is_file() {
            return Err(MvregError::NotFound { what: "view", key: *key });
        }

        let meta_path = dir.join(META_FILE);
        let meta_text = fs::read_to_string(&meta_path)?;
        let meta: ViewMeta = toml::from_str(&meta_text).map_err(|e| MvregError::CorruptEntry {
            path: meta_path.display().to_string(),
            reason: e.to_string(),
        })?;

        let data = raw::read_volume(&pixels)?;
        let (n0, n1, n2) = data.dim();
        if [n0, n1, n2] != meta.shape {
            return Err(MvregError::CorruptEntry {
                path: pixels.display().to_string(),
                reason: format!("shape {:?} disagrees with metadata {:?}", [n0, n1, n2], meta.shape),
            });
        }

        Ok(View::new(*key, data, meta.angle, meta.voxel_size))
    }

    /// Store a view under its key. Fails with `DuplicateKey` when the key is
    /// taken and `overwrite` is false.
    pub fn add_view(&mut self, view: &View, overwrite: bool) -> Result<()> {
        self.ensure_open()?;
        if view.data.is_empty() {
            return Err(MvregError::InvalidDimensions(view.shape().to_vec()));
        }
        if !overwrite && self.exists(&view.key)? {
            return Err(MvregError::DuplicateKey(view.key));
        }

        let meta = ViewMeta {
            angle: view.angle,
            voxel_size: view.voxel_size,
            shape: view.shape(),
        };
        let meta_text = toml::to_string(&meta).map_err(|e| MvregError::CorruptEntry {
            path: self.view_dir(&view.key).display().to_string(),
            reason: e.to_string(),
        })?;

        commit_leaf(&self.view_dir(&view.key), |dir| {
            raw::write_volume(&dir.join(PIXELS_FILE), &view.data)?;
            fs::write(dir.join(META_FILE), meta_text.as_bytes())?;
            Ok(())
        })?;

        debug!(key = %view.key, shape = ?view.shape(), "Stored view");
        Ok(())
    }

    /// Store the transform of the registered view at `(scale, index, channel)`.
    ///
    /// Fails with `MissingRegisteredView` when no registered view backs the
    /// key, and with `DuplicateKey` when a transform exists and `overwrite`
    /// is false.
    pub fn add_transform(
        &mut self,
        scale: u32,
        index: u32,
        channel: u32,
        transform: &Transform,
        overwrite: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        let key = ViewKey::new(ImageType::Registered, scale, index, channel);
        if !self.exists(&key)? {
            return Err(MvregError::MissingRegisteredView(key));
        }
        let dir = self.transform_dir(scale, index, channel);
        if !overwrite && dir.join(TRANSFORM_FILE).is_file() {
            return Err(MvregError::DuplicateKey(key));
        }

        let text = toml::to_string(transform).map_err(|e| MvregError::InvalidTransform(e.to_string()))?;
        commit_leaf(&dir, |staging| {
            fs::write(staging.join(TRANSFORM_FILE), text.as_bytes())?;
            Ok(())
        })?;

        debug!(key = %key, kind = ?transform.kind, "Stored transform");
        Ok(())
    }

    pub fn get_transform(&self, scale: u32, index: u32, channel: u32) -> Result<Transform> {
        self.ensure_open()?;
        let path = self.transform_dir(scale, index, channel).join(TRANSFORM_FILE);
        if !path.is_file() {
            return Err(MvregError::NotFound {
                what: "transform",
                key: ViewKey::new(ImageType::Registered, scale, index, channel),
            });
        }
        let text = fs::read_to_string(&path)?;
        toml::from_str(&text).map_err(|e| MvregError::CorruptEntry {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn has_transform(&self, scale: u32, index: u32, channel: u32) -> Result<bool> {
        self.ensure_open()?;
        Ok(self
            .transform_dir(scale, index, channel)
            .join(TRANSFORM_FILE)
            .is_file())
    }

    /// All keys of a type, sorted by (scale, index, channel).
    pub fn keys(&self, image_type: ImageType) -> Result<Vec<ViewKey>> {
        self.ensure_open()?;
        Ok(list_leaves(&self.root, image_type.as_str(), PIXELS_FILE)?
            .into_iter()
            .map(|(scale, index, channel)| ViewKey::new(image_type, scale, index, channel))
            .collect())
    }

    /// Number of views stored under a type, across all scales.
    pub fn count(&self, image_type: ImageType) -> Result<usize> {
        Ok(self.keys(image_type)?.len())
    }

    /// Distinct scales present for a type.
    pub fn scales(&self, image_type: ImageType) -> Result<Vec<u32>> {
        let mut scales: Vec<u32> = self.keys(image_type)?.iter().map(|k| k.scale).collect();
        scales.dedup();
        Ok(scales)
    }

    /// Derive every view of `image_type` at `target_scale` percent from its
    /// native-scale counterpart. Existing views at the target scale are
    /// replaced, so repeated calls leave the same result. Returns the number
    /// of views written.
    pub fn create_rescaled(&mut self, image_type: ImageType, target_scale: u32) -> Result<usize> {
        self.ensure_open()?;
        if target_scale == 0 || target_scale == NATIVE_SCALE {
            return Err(MvregError::InvalidConfig(format!(
                "rescaled sets need a scale other than 0 and {NATIVE_SCALE}, got {target_scale}"
            )));
        }

        let factor = target_scale as f64 / NATIVE_SCALE as f64;
        let sources: Vec<ViewKey> = self
            .keys(image_type)?
            .into_iter()
            .filter(|k| k.scale == NATIVE_SCALE)
            .collect();

        for key in &sources {
            let source = self.get_view(key)?;
            let planar_factor = if source.is_planar() { 1.0 } else { factor };
            let (data, voxel_size) = zoom(&source.data, &source.voxel_size, [planar_factor, factor, factor])?;
            let rescaled = View::new(
                ViewKey { scale: target_scale, ..*key },
                data,
                source.angle,
                voxel_size,
            );
            self.add_view(&rescaled, true)?;
        }

        info!(
            image_type = %image_type,
            scale = target_scale,
            views = sources.len(),
            "Created rescaled set"
        );
        Ok(sources.len())
    }

    /// Flush and release the archive. Every later call fails with
    /// `ClosedArchive`.
    pub fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;
        info!(path = %self.root.display(), "Closed archive");
        Ok(())
    }
}
