//! File-name convention for importable data.
//!
//! Views are named
//! `<type>_scale_<s>_index_<i>_channel_<c>_angle_<a>.<suffix>` where `<type>`
//! is `original`, `registered` or `psf`. Transform files use the same
//! pattern with the `transform` prefix. Every numeric field must parse in
//! full; anything else is reported as unrecognized rather than half-matched.

use crate::view::{ImageType, ViewKey};

const TRANSFORM_PREFIX: &str = "transform";

/// Key fields shared by view and transform names.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NameFields {
    pub scale: u32,
    pub index: u32,
    pub channel: u32,
    /// Rotation angle in degrees.
    pub angle: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ViewName {
    pub image_type: ImageType,
    pub fields: NameFields,
    /// Lower-cased extension without the dot.
    pub suffix: String,
}

impl ViewName {
    pub fn key(&self) -> ViewKey {
        ViewKey::new(
            self.image_type,
            self.fields.scale,
            self.fields.index,
            self.fields.channel,
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransformName {
    pub fields: NameFields,
    pub suffix: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NameParse {
    View(ViewName),
    Transform(TransformName),
    Unrecognized,
}

/// Parse a bare file name (no directory part).
pub fn parse_name(name: &str) -> NameParse {
    let Some((stem, suffix)) = name.rsplit_once('.') else {
        return NameParse::Unrecognized;
    };
    if suffix.is_empty() {
        return NameParse::Unrecognized;
    }
    let suffix = suffix.to_ascii_lowercase();

    let Some((prefix, rest)) = stem.split_once("_scale_") else {
        return NameParse::Unrecognized;
    };
    let Some(fields) = parse_fields(rest) else {
        return NameParse::Unrecognized;
    };

    if prefix == TRANSFORM_PREFIX {
        return NameParse::Transform(TransformName { fields, suffix });
    }
    match prefix.parse::<ImageType>() {
        Ok(image_type) => NameParse::View(ViewName {
            image_type,
            fields,
            suffix,
        }),
        Err(_) => NameParse::Unrecognized,
    }
}

/// Parse `<s>_index_<i>_channel_<c>_angle_<a>`.
fn parse_fields(rest: &str) -> Option<NameFields> {
    let (scale, rest) = rest.split_once("_index_")?;
    let (index, rest) = rest.split_once("_channel_")?;
    let (channel, angle) = rest.split_once("_angle_")?;

    let angle: f64 = angle.parse().ok()?;
    if !angle.is_finite() {
        return None;
    }
    Some(NameFields {
        scale: parse_unsigned(scale)?,
        index: parse_unsigned(index)?,
        channel: parse_unsigned(channel)?,
        angle,
    })
}

fn parse_unsigned(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
