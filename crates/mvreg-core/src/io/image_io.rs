use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use image::DynamicImage;
use ndarray::Array3;
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::debug;

use crate::error::{MvregError, Result};
use crate::view::VoxelSize;

/// Pixel data and spacing as read from disk, before any archive metadata is
/// attached.
#[derive(Clone, Debug)]
pub struct RawImage {
    pub data: Array3<f32>,
    pub voxel_size: VoxelSize,
}

/// Source of pixel data for import.
pub trait ImageReader {
    /// True if this reader understands the file's extension.
    fn supports(&self, path: &Path) -> bool;

    fn read(&self, path: &Path) -> Result<RawImage>;
}

/// Reads TIFF stacks (one page per plane, ImageJ spacing), single-plane PNG
/// through `image`, and MetaImage volumes (`.mhd` with a detached data file,
/// `.mha` with inline data).
#[derive(Clone, Copy, Debug, Default)]
pub struct FileImageReader;

impl ImageReader for FileImageReader {
    fn supports(&self, path: &Path) -> bool {
        matches!(
            extension(path).as_deref(),
            Some("tif" | "tiff" | "png" | "mhd" | "mha")
        )
    }

    fn read(&self, path: &Path) -> Result<RawImage> {
        let image = match extension(path).as_deref() {
            Some("tif" | "tiff") => load_tiff_stack(path),
            Some("png") => load_plane(path),
            Some("mhd" | "mha") => load_meta_image(path),
            _ => Err(unreadable(path, "unsupported file extension")),
        }?;
        debug!(path = %path.display(), shape = ?image.data.dim(), "Read image");
        Ok(image)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn unreadable(path: &Path, reason: impl Into<String>) -> MvregError {
    MvregError::UnreadableImage {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Load a grayscale PNG plane keeping raw integer intensities.
fn load_plane(path: &Path) -> Result<RawImage> {
    let img = image::open(path).map_err(|e| unreadable(path, e.to_string()))?;
    let (w, h) = (img.width() as usize, img.height() as usize);

    let values: Vec<f32> = match img {
        DynamicImage::ImageLuma8(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageLuma16(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
        other => other
            .to_luma16()
            .into_raw()
            .into_iter()
            .map(f32::from)
            .collect(),
    };

    let data = Array3::from_shape_vec((1, h, w), values)
        .map_err(|_| MvregError::InvalidDimensions(vec![1, h, w]))?;
    Ok(RawImage {
        data,
        voxel_size: VoxelSize::isotropic(1.0),
    })
}

/// Decode every page of a grayscale TIFF into a `(pages, height, width)`
/// volume. Pages must share one size; a stack that cannot be decoded in full
/// is unreadable.
fn load_tiff_stack(path: &Path) -> Result<RawImage> {
    let tiff_err = |e: tiff::TiffError| unreadable(path, e.to_string());

    let file = fs::File::open(path).map_err(|e| unreadable(path, e.to_string()))?;
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(tiff_err)?;
    let (w, h) = decoder.dimensions().map_err(tiff_err)?;
    let spacing = imagej_spacing(&mut decoder);

    let plane_len = w as usize * h as usize;
    let mut values = Vec::new();
    let mut pages = 0usize;
    loop {
        let dims = decoder.dimensions().map_err(tiff_err)?;
        if dims != (w, h) {
            return Err(unreadable(
                path,
                format!(
                    "page {pages} is {}x{}, first page is {w}x{h}",
                    dims.0, dims.1
                ),
            ));
        }
        match decoder.colortype().map_err(tiff_err)? {
            ColorType::Gray(_) => {}
            other => {
                return Err(unreadable(
                    path,
                    format!("page {pages} has unsupported colour type {other:?}"),
                ))
            }
        }

        let before = values.len();
        let page = decoder.read_image().map_err(tiff_err)?;
        append_samples(page, &mut values)
            .ok_or_else(|| unreadable(path, format!("page {pages} has an unsupported sample format")))?;
        if values.len() - before != plane_len {
            return Err(unreadable(
                path,
                format!(
                    "page {pages} decoded {} samples, expected {plane_len}",
                    values.len() - before
                ),
            ));
        }
        pages += 1;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(tiff_err)?;
    }

    let (h, w) = (h as usize, w as usize);
    let data = Array3::from_shape_vec((pages, h, w), values)
        .map_err(|_| MvregError::InvalidDimensions(vec![pages, h, w]))?;
    Ok(RawImage {
        data,
        voxel_size: VoxelSize::new(spacing)?,
    })
}

fn append_samples(page: DecodingResult, out: &mut Vec<f32>) -> Option<()> {
    match page {
        DecodingResult::U8(v) => out.extend(v.into_iter().map(f32::from)),
        DecodingResult::U16(v) => out.extend(v.into_iter().map(f32::from)),
        DecodingResult::U32(v) => out.extend(v.into_iter().map(|x| x as f32)),
        DecodingResult::I8(v) => out.extend(v.into_iter().map(f32::from)),
        DecodingResult::I16(v) => out.extend(v.into_iter().map(f32::from)),
        DecodingResult::I32(v) => out.extend(v.into_iter().map(|x| x as f32)),
        DecodingResult::F32(v) => out.extend(v),
        DecodingResult::F64(v) => out.extend(v.into_iter().map(|x| x as f32)),
        _ => return None,
    }
    Some(())
}

/// Voxel size in array order. ImageJ keeps the planar pixel size as
/// pixels-per-unit in the resolution tags and the plane step as `spacing=`
/// in the image description. Missing entries default to 1.
fn imagej_spacing<R: Read + Seek>(decoder: &mut Decoder<R>) -> [f64; 3] {
    let x = pixel_size(decoder, Tag::XResolution);
    let y = pixel_size(decoder, Tag::YResolution);
    let z = decoder
        .get_tag_ascii_string(Tag::ImageDescription)
        .ok()
        .and_then(|description| description_spacing(&description))
        .unwrap_or(1.0);
    [z, y, x]
}

fn pixel_size<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> f64 {
    match decoder.find_tag(tag) {
        Ok(Some(Value::Rational(n, d))) if n > 0 && d > 0 => f64::from(d) / f64::from(n),
        _ => 1.0,
    }
}

fn description_spacing(description: &str) -> Option<f64> {
    description
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "spacing")
        .and_then(|(_, value)| value.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ElementType {
    UChar,
    UShort,
    Float,
}

impl ElementType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "MET_UCHAR" => Some(Self::UChar),
            "MET_USHORT" => Some(Self::UShort),
            "MET_FLOAT" => Some(Self::Float),
            _ => None,
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::UChar => 1,
            Self::UShort => 2,
            Self::Float => 4,
        }
    }
}

/// MetaImage header fields, in file (x-fastest) order.
struct MetaHeader {
    dims: Vec<usize>,
    spacing: Vec<f64>,
    element: ElementType,
    big_endian: bool,
    data_file: String,
}

fn parse_meta_header(path: &Path, fields: &HashMap<String, String>) -> Result<MetaHeader> {
    let get = |key: &str| {
        fields
            .get(key)
            .ok_or_else(|| unreadable(path, format!("missing header field {key}")))
    };

    let dims: Vec<usize> = get("DimSize")?
        .split_whitespace()
        .map(|v| v.parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| unreadable(path, format!("bad DimSize: {e}")))?;
    if !(2..=3).contains(&dims.len()) || dims.iter().any(|&d| d == 0) {
        return Err(MvregError::InvalidDimensions(dims));
    }

    let spacing: Vec<f64> = match fields.get("ElementSpacing").or_else(|| fields.get("ElementSize")) {
        Some(s) => s
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| unreadable(path, format!("bad ElementSpacing: {e}")))?,
        None => vec![1.0; dims.len()],
    };
    if spacing.len() != dims.len() {
        return Err(unreadable(path, "ElementSpacing does not match DimSize"));
    }

    let element_name = get("ElementType")?;
    let element = ElementType::parse(element_name)
        .ok_or_else(|| unreadable(path, format!("unsupported ElementType {element_name}")))?;

    let big_endian = fields
        .get("ElementByteOrderMSB")
        .or_else(|| fields.get("BinaryDataByteOrderMSB"))
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    Ok(MetaHeader {
        dims,
        spacing,
        element,
        big_endian,
        data_file: get("ElementDataFile")?.clone(),
    })
}

fn load_meta_image(path: &Path) -> Result<RawImage> {
    let bytes = fs::read(path).map_err(|e| unreadable(path, e.to_string()))?;

    // Header lines run up to and including ElementDataFile.
    let mut fields = HashMap::new();
    let mut header_end = None;
    let mut offset = 0usize;
    for line in bytes.split_inclusive(|&b| b == b'\n') {
        offset += line.len();
        let text = String::from_utf8_lossy(line);
        if let Some((key, value)) = text.split_once('=') {
            let key = key.trim().to_string();
            let done = key == "ElementDataFile";
            fields.insert(key, value.trim().to_string());
            if done {
                header_end = Some(offset);
                break;
            }
        }
    }
    let header_end = header_end.ok_or_else(|| unreadable(path, "no ElementDataFile field"))?;
    let header = parse_meta_header(path, &fields)?;

    let payload = if header.data_file.eq_ignore_ascii_case("LOCAL") {
        bytes[header_end..].to_vec()
    } else {
        let data_path = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&header.data_file);
        fs::read(&data_path).map_err(|e| unreadable(&data_path, e.to_string()))?
    };

    // File order is x-fastest; array axis 0 is the slowest file axis.
    let (shape, spacing) = match header.dims.as_slice() {
        [x, y] => ([1, *y, *x], [1.0, header.spacing[1], header.spacing[0]]),
        [x, y, z] => (
            [*z, *y, *x],
            [header.spacing[2], header.spacing[1], header.spacing[0]],
        ),
        _ => return Err(MvregError::InvalidDimensions(header.dims)),
    };
    let count: usize = shape.iter().product();
    let needed = count * header.element.size();
    if payload.len() < needed {
        return Err(unreadable(
            path,
            format!("expected {needed} data bytes, found {}", payload.len()),
        ));
    }

    let values = decode_elements(&payload[..needed], header.element, header.big_endian, count)
        .map_err(|e| unreadable(path, e.to_string()))?;
    let data = Array3::from_shape_vec((shape[0], shape[1], shape[2]), values)
        .map_err(|_| MvregError::InvalidDimensions(shape.to_vec()))?;

    Ok(RawImage {
        data,
        voxel_size: VoxelSize::new(spacing)?,
    })
}

fn decode_elements(
    bytes: &[u8],
    element: ElementType,
    big_endian: bool,
    count: usize,
) -> std::io::Result<Vec<f32>> {
    let mut cursor = Cursor::new(bytes);
    let mut values = Vec::with_capacity(count);
    match element {
        ElementType::UChar => {
            let mut buf = vec![0u8; count];
            cursor.read_exact(&mut buf)?;
            values.extend(buf.into_iter().map(f32::from));
        }
        ElementType::UShort => {
            for _ in 0..count {
                let v = if big_endian {
                    cursor.read_u16::<BigEndian>()?
                } else {
                    cursor.read_u16::<LittleEndian>()?
                };
                values.push(f32::from(v));
            }
        }
        ElementType::Float => {
            for _ in 0..count {
                let v = if big_endian {
                    cursor.read_f32::<BigEndian>()?
                } else {
                    cursor.read_f32::<LittleEndian>()?
                };
                values.push(v);
            }
        }
    }
    Ok(values)
}

/// Write a volume as an inline MetaImage (`.mha`, `MET_FLOAT`, little
/// endian). Used to export views and to build import fixtures.
pub fn write_meta_image(path: &Path, data: &Array3<f32>, voxel_size: &VoxelSize) -> Result<()> {
    use byteorder::WriteBytesExt;
    use std::io::Write;

    let (n0, n1, n2) = data.dim();
    let s = voxel_size.0;
    let mut out = Vec::with_capacity(256 + data.len() * 4);
    write!(
        out,
        "ObjectType = Image\nNDims = 3\nBinaryData = True\nBinaryDataByteOrderMSB = False\n\
         DimSize = {n2} {n1} {n0}\nElementSpacing = {} {} {}\nElementType = MET_FLOAT\n\
         ElementDataFile = LOCAL\n",
        s[2], s[1], s[0]
    )?;
    for &v in data.iter() {
        out.write_f32::<LittleEndian>(v)?;
    }
    fs::write(path, out)?;
    Ok(())
}
