//! Insight text transform files.
//!
//! ```text
//! #Insight Transform File V1.0
//! #Transform 0
//! Transform: AffineTransform_double_3_3
//! Parameters: 1 0 0 0 1 0 0 0 1 0 0 0
//! FixedParameters: 0 0 0
//! ```
//!
//! Files describe points as `(x, y, z)` while the archive works in array
//! axis order `(z, y, x)`. Conversion happens here and nowhere else: the
//! matrix becomes `P·A·P` for the axis reversal `P`, vectors are reversed,
//! and Euler angles `(ax, ay, az)` with `R = Rz·Rx·Ry` become array angles
//! `(-az, -ay, -ax)` composed as in `AffineTransform::from_euler`. Rigid
//! files flagged `Rz·Ry·Rx` (a fourth fixed parameter of 1) are stored as
//! affine transforms.

use std::fs;
use std::path::Path;

use nalgebra::{Rotation3, Vector3};

use crate::error::{MvregError, Result};
use crate::transform::{AffineTransform, Transform, TransformKind};

const HEADER: &str = "#Insight Transform File V1.0";

/// Parse the first transform in an Insight transform file into array axis
/// order.
pub fn parse_transform(text: &str) -> Result<Transform> {
    let mut kind = None;
    let mut parameters = None;
    let mut fixed_parameters = None;

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Transform" if kind.is_none() => {
                kind = Some(TransformKind::from_class_name(value.trim())?)
            }
            "Parameters" if parameters.is_none() => parameters = Some(parse_numbers(value)?),
            "FixedParameters" if fixed_parameters.is_none() => {
                fixed_parameters = Some(parse_numbers(value)?)
            }
            _ => {}
        }
    }

    let missing = |field: &str| MvregError::InvalidTransform(format!("missing {field} line"));
    let file_record = Transform {
        kind: kind.ok_or_else(|| missing("Transform"))?,
        parameters: parameters.ok_or_else(|| missing("Parameters"))?,
        fixed_parameters: fixed_parameters.ok_or_else(|| missing("FixedParameters"))?,
    };
    let transform = from_file_axes(&file_record)?;
    // Reject parameter counts that do not match the kind.
    transform.to_affine()?;
    Ok(transform)
}

fn parse_numbers(value: &str) -> Result<Vec<f64>> {
    value
        .split_whitespace()
        .map(|v| {
            v.parse::<f64>()
                .map_err(|e| MvregError::InvalidTransform(format!("bad number '{v}': {e}")))
        })
        .collect()
}

/// Format an archive transform as an Insight transform file.
pub fn format_transform(transform: &Transform) -> Result<String> {
    let file_record = to_file_axes(transform)?;
    let join = |values: &[f64]| {
        values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    };
    Ok(format!(
        "{HEADER}\n#Transform 0\nTransform: {}\nParameters: {}\nFixedParameters: {}\n",
        file_record.kind.class_name(),
        join(&file_record.parameters),
        join(&file_record.fixed_parameters),
    ))
}

pub fn read_transform(path: &Path) -> Result<Transform> {
    let text = fs::read_to_string(path)?;
    parse_transform(&text)
}

pub fn write_transform(path: &Path, transform: &Transform) -> Result<()> {
    fs::write(path, format_transform(transform)?)?;
    Ok(())
}

fn reversed3(values: &[f64], what: &str) -> Result<[f64; 3]> {
    match values {
        [a, b, c] => Ok([*c, *b, *a]),
        _ => Err(MvregError::InvalidTransform(format!(
            "{what} needs 3 values, got {}",
            values.len()
        ))),
    }
}

/// Row-major 3x3 matrix conjugated by the axis reversal: entry `(i, j)`
/// moves to `(2 - i, 2 - j)`.
fn reversed_matrix(values: &[f64]) -> [f64; 9] {
    let mut out = [0.0; 9];
    for i in 0..3 {
        for j in 0..3 {
            out[i * 3 + j] = values[(2 - i) * 3 + (2 - j)];
        }
    }
    out
}

fn expect_len(values: &[f64], len: usize, what: &str) -> Result<()> {
    if values.len() == len {
        Ok(())
    } else {
        Err(MvregError::InvalidTransform(format!(
            "{what} needs {len} parameters, got {}",
            values.len()
        )))
    }
}

fn from_file_axes(file: &Transform) -> Result<Transform> {
    let (center_values, zyx_order) = match file.fixed_parameters.as_slice() {
        [x, y, z] => ([*x, *y, *z], false),
        [x, y, z, flag] => ([*x, *y, *z], *flag != 0.0),
        other => {
            return Err(MvregError::InvalidTransform(format!(
                "expected 3 fixed parameters, got {}",
                other.len()
            )))
        }
    };
    let center = reversed3(&center_values, "center")?;
    let p = &file.parameters;

    match file.kind {
        TransformKind::Affine => {
            expect_len(p, 12, "affine transform")?;
            let mut parameters = reversed_matrix(&p[..9]).to_vec();
            parameters.extend(reversed3(&p[9..], "translation")?);
            Ok(Transform {
                kind: TransformKind::Affine,
                parameters,
                fixed_parameters: center.to_vec(),
            })
        }
        TransformKind::Euler if zyx_order => {
            // Rz·Ry·Rx has no Euler form in array order; keep it as a matrix.
            expect_len(p, 6, "rigid transform")?;
            let r0 = Rotation3::from_axis_angle(&Vector3::x_axis(), -p[2]);
            let r1 = Rotation3::from_axis_angle(&Vector3::y_axis(), -p[1]);
            let r2 = Rotation3::from_axis_angle(&Vector3::z_axis(), -p[0]);
            let translation = reversed3(&p[3..], "translation")?;
            Ok(AffineTransform::new(
                *(r0 * r1 * r2).matrix(),
                Vector3::from(center),
                Vector3::from(translation),
            )
            .to_record())
        }
        TransformKind::Euler => {
            expect_len(p, 6, "rigid transform")?;
            let mut parameters = vec![-p[2], -p[1], -p[0]];
            parameters.extend(reversed3(&p[3..], "translation")?);
            Ok(Transform {
                kind: TransformKind::Euler,
                parameters,
                fixed_parameters: center.to_vec(),
            })
        }
    }
}

fn to_file_axes(transform: &Transform) -> Result<Transform> {
    let center = reversed3(&transform.fixed_parameters, "center")?;
    let p = &transform.parameters;

    let parameters = match transform.kind {
        TransformKind::Affine => {
            expect_len(p, 12, "affine transform")?;
            let mut parameters = reversed_matrix(&p[..9]).to_vec();
            parameters.extend(reversed3(&p[9..], "translation")?);
            parameters
        }
        TransformKind::Euler => {
            expect_len(p, 6, "rigid transform")?;
            let mut parameters = vec![-p[2], -p[1], -p[0]];
            parameters.extend(reversed3(&p[3..], "translation")?);
            parameters
        }
    };
    Ok(Transform {
        kind: transform.kind,
        parameters,
        fixed_parameters: center.to_vec(),
    })
}
