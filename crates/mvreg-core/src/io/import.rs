//! Bulk import of a directory of named images and transform files.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::archive::Archive;
use crate::consts::REFERENCE_INDEX;
use crate::error::{MvregError, Result};
use crate::resample::resample;
use crate::view::{ImageType, View, ViewKey};

use super::image_io::{FileImageReader, ImageReader};
use super::naming::{parse_name, NameParse, TransformName, ViewName};
use super::transform_file::read_transform;

const TRANSFORM_SUFFIXES: [&str; 2] = ["txt", "tfm"];

#[derive(Clone, Debug, Default)]
pub struct ImportOptions {
    /// Rescaled original sets to create after the views are in, as
    /// percentages of the native size.
    pub scales: Vec<u32>,
    /// Replace entries already present in the archive.
    pub overwrite: bool,
}

#[derive(Clone, Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Clone, Debug, Default)]
pub struct ImportReport {
    pub views: usize,
    pub rescaled: usize,
    pub transforms: usize,
    /// Registered views computed from an imported transform.
    pub resampled: usize,
    pub skipped: Vec<SkippedFile>,
}

impl ImportReport {
    fn skip(&mut self, path: &Path, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(path = %path.display(), %reason, "Skipping file");
        self.skipped.push(SkippedFile {
            path: path.to_path_buf(),
            reason,
        });
    }
}

/// Import every recognized file in `dir` using [`FileImageReader`].
pub fn import_directory(
    archive: &mut Archive,
    dir: &Path,
    options: &ImportOptions,
) -> Result<ImportReport> {
    import_directory_with(archive, dir, options, &FileImageReader)
}

/// Import with a caller-supplied pixel reader.
///
/// Views go in first, then the rescaled sets, then transforms. A file that
/// fails to parse, read or store is skipped with a warning; only errors that
/// make the whole archive unusable abort the import.
pub fn import_directory_with(
    archive: &mut Archive,
    dir: &Path,
    options: &ImportOptions,
    reader: &dyn ImageReader,
) -> Result<ImportReport> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    let mut report = ImportReport::default();
    let mut transforms = Vec::new();

    for path in &entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match parse_name(name) {
            NameParse::View(view_name) if reader.supports(path) => {
                match import_view(archive, path, &view_name, reader, options.overwrite) {
                    Ok(()) => report.views += 1,
                    Err(MvregError::ClosedArchive) => return Err(MvregError::ClosedArchive),
                    Err(e) => report.skip(path, e.to_string()),
                }
            }
            NameParse::Transform(t) if TRANSFORM_SUFFIXES.contains(&t.suffix.as_str()) => {
                transforms.push((path.clone(), t));
            }
            NameParse::View(_) | NameParse::Transform(_) => {
                report.skip(path, "unsupported file type")
            }
            NameParse::Unrecognized => {
                let is_candidate = reader.supports(path)
                    || path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| TRANSFORM_SUFFIXES.contains(&e));
                if is_candidate {
                    report.skip(path, "unrecognized file name");
                }
            }
        }
    }

    for &scale in &options.scales {
        info!(scale, "Creating rescaled originals");
        report.rescaled += archive.create_rescaled(ImageType::Original, scale)?;
    }

    for (path, name) in &transforms {
        match import_transform(archive, path, name, options.overwrite) {
            Ok(resampled) => {
                report.transforms += 1;
                if resampled {
                    report.resampled += 1;
                }
            }
            Err(MvregError::ClosedArchive) => return Err(MvregError::ClosedArchive),
            Err(e) => report.skip(path, e.to_string()),
        }
    }

    info!(
        views = report.views,
        transforms = report.transforms,
        skipped = report.skipped.len(),
        "Import finished"
    );
    Ok(report)
}

fn import_view(
    archive: &mut Archive,
    path: &Path,
    name: &ViewName,
    reader: &dyn ImageReader,
    overwrite: bool,
) -> Result<()> {
    let raw = reader.read(path)?;
    let view = View::new(name.key(), raw.data, name.fields.angle, raw.voxel_size);
    archive.add_view(&view, overwrite)
}

/// Store a transform, first computing its registered view from the stored
/// originals when the archive has none. Returns true if a view was computed.
fn import_transform(
    archive: &mut Archive,
    path: &Path,
    name: &TransformName,
    overwrite: bool,
) -> Result<bool> {
    let transform = read_transform(path)?;
    let f = &name.fields;
    let registered_key = ViewKey::new(ImageType::Registered, f.scale, f.index, f.channel);

    let resampled = if archive.exists(&registered_key)? {
        false
    } else {
        info!(index = f.index, "Resampling registered view from transform");
        let reference = archive.get_view(&ViewKey::new(
            ImageType::Original,
            f.scale,
            REFERENCE_INDEX,
            f.channel,
        ))?;
        let moving = archive.get_view(&registered_key.with_type(ImageType::Original))?;
        let data = resample(
            &moving.data,
            &moving.grid(),
            &transform.to_affine()?,
            &reference.grid(),
        );
        let view = View::new(registered_key, data, f.angle, reference.voxel_size);
        archive.add_view(&view, overwrite)?;
        true
    };

    archive.add_transform(f.scale, f.index, f.channel, &transform, overwrite)?;
    Ok(resampled)
}
