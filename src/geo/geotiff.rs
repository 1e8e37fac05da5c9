//! Minimal GeoTIFF metadata: affine georeferencing and CRS key passthrough.
//!
//! Only the tags needed to place a raster are handled: ModelPixelScale plus
//! ModelTiepoint, or a full ModelTransformation, and the GeoKey directory
//! with its double/ascii parameter tags. GeoKeys are copied verbatim.

use std::io::{Cursor, Read, Seek, Write};

use ndarray::Array3;
use tiff::{
    TiffResult,
    decoder::Decoder,
    encoder::TiffEncoder,
    tags::Tag,
};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_DOUBLE_PARAMS: u16 = 34736;
const GEO_ASCII_PARAMS: u16 = 34737;

const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Pixel → world mapping: `x = a·col + b·row + c`, `y = d·col + e·row + f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// World coordinates of pixel-space point `(col, row)`.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    fn from_scale_tiepoint(scale: &[f64], tiepoint: &[f64]) -> Option<Self> {
        let [sx, sy, ..] = *scale else { return None };
        let [i, j, _, x, y, ..] = *tiepoint else {
            return None;
        };
        Some(Self::new(sx, 0.0, x - i * sx, 0.0, -sy, y + j * sy))
    }

    fn from_transformation(matrix: &[f64]) -> Option<Self> {
        if matrix.len() < 8 {
            return None;
        }
        Some(Self::new(
            matrix[0], matrix[1], matrix[3], matrix[4], matrix[5], matrix[7],
        ))
    }

    /// North-up transforms fit the scale/tiepoint pair.
    fn is_north_up(&self) -> bool {
        self.b == 0.0 && self.d == 0.0 && self.a > 0.0 && self.e < 0.0
    }
}

/// Coordinate reference system as raw GeoKeys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Crs {
    pub geo_keys: Vec<u16>,
    pub double_params: Vec<f64>,
    pub ascii_params: Option<String>,
}

impl Crs {
    /// EPSG code of the projected or geographic CRS, when stored inline.
    pub fn epsg(&self) -> Option<u16> {
        let entries = self.geo_keys.get(4..)?;
        let mut code = None;
        for entry in entries.chunks_exact(4) {
            let [key, location, _count, value] = [entry[0], entry[1], entry[2], entry[3]];
            if location != 0 {
                continue;
            }
            if key == PROJECTED_CS_TYPE_KEY {
                return Some(value);
            }
            if key == GEOGRAPHIC_TYPE_KEY {
                code = Some(value);
            }
        }
        code
    }
}

/// Where a raster sits in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoReference {
    pub transform: Affine,
    pub crs: Option<Crs>,
}

/// Read the georeferencing of the first image in a TIFF stream.
///
/// Returns `Ok(None)` for a plain TIFF without model tags.
pub fn read_georeference<R: Read + Seek>(reader: R) -> TiffResult<Option<GeoReference>> {
    let mut decoder = Decoder::new(reader)?;
    let transform = match optional_f64s(&mut decoder, MODEL_TRANSFORMATION)? {
        Some(matrix) => Affine::from_transformation(&matrix),
        None => {
            let scale = optional_f64s(&mut decoder, MODEL_PIXEL_SCALE)?;
            let tiepoint = optional_f64s(&mut decoder, MODEL_TIEPOINT)?;
            match (scale, tiepoint) {
                (Some(scale), Some(tiepoint)) => Affine::from_scale_tiepoint(&scale, &tiepoint),
                _ => None,
            }
        }
    };
    let Some(transform) = transform else {
        return Ok(None);
    };

    let crs = if decoder.find_tag(tag(GEO_KEY_DIRECTORY))?.is_some() {
        let geo_keys = decoder.get_tag_u16_vec(tag(GEO_KEY_DIRECTORY))?;
        let double_params = optional_f64s(&mut decoder, GEO_DOUBLE_PARAMS)?.unwrap_or_default();
        let ascii_params = if decoder.find_tag(tag(GEO_ASCII_PARAMS))?.is_some() {
            Some(decoder.get_tag_ascii_string(tag(GEO_ASCII_PARAMS))?)
        } else {
            None
        };
        Some(Crs {
            geo_keys,
            double_params,
            ascii_params,
        })
    } else {
        None
    };
    Ok(Some(GeoReference { transform, crs }))
}

fn optional_f64s<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    code: u16,
) -> TiffResult<Option<Vec<f64>>> {
    if decoder.find_tag(tag(code))?.is_none() {
        return Ok(None);
    }
    decoder.get_tag_f64_vec(tag(code)).map(Some)
}

/// Encode an H×W×B `u8` raster as a pixel-interleaved GeoTIFF in memory.
pub fn write_geotiff(bands: &Array3<u8>, georef: &GeoReference) -> TiffResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    write_geotiff_to(&mut cursor, bands, georef)?;
    Ok(cursor.into_inner())
}

fn write_geotiff_to<W: Write + Seek>(
    writer: W,
    bands: &Array3<u8>,
    georef: &GeoReference,
) -> TiffResult<()> {
    let (height, width, samples) = bands.dim();
    let pixels: Vec<u8> = bands.iter().copied().collect();

    let mut encoder = TiffEncoder::new(writer)?;
    let mut dir = encoder.new_directory()?;
    let offset = dir.write_data(&pixels[..])?;

    dir.write_tag(Tag::ImageWidth, width as u32)?;
    dir.write_tag(Tag::ImageLength, height as u32)?;
    dir.write_tag(Tag::BitsPerSample, &vec![8u16; samples][..])?;
    dir.write_tag(Tag::Compression, 1u16)?;
    dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
    dir.write_tag(Tag::SamplesPerPixel, samples as u16)?;
    dir.write_tag(Tag::RowsPerStrip, height as u32)?;
    dir.write_tag(Tag::StripOffsets, offset as u32)?;
    dir.write_tag(Tag::StripByteCounts, pixels.len() as u32)?;
    dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
    dir.write_tag(Tag::SampleFormat, &vec![1u16; samples][..])?;
    if samples > 1 {
        dir.write_tag(Tag::ExtraSamples, &vec![0u16; samples - 1][..])?;
    }

    let t = georef.transform;
    if t.is_north_up() {
        dir.write_tag(tag(MODEL_PIXEL_SCALE), &[t.a, -t.e, 0.0][..])?;
        dir.write_tag(tag(MODEL_TIEPOINT), &[0.0, 0.0, 0.0, t.c, t.f, 0.0][..])?;
    } else {
        let matrix = [
            t.a, t.b, 0.0, t.c, t.d, t.e, 0.0, t.f, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(tag(MODEL_TRANSFORMATION), &matrix[..])?;
    }
    if let Some(crs) = &georef.crs {
        dir.write_tag(tag(GEO_KEY_DIRECTORY), &crs.geo_keys[..])?;
        if !crs.double_params.is_empty() {
            dir.write_tag(tag(GEO_DOUBLE_PARAMS), &crs.double_params[..])?;
        }
        if let Some(ascii) = &crs.ascii_params {
            dir.write_tag(tag(GEO_ASCII_PARAMS), ascii.as_str())?;
        }
    }
    dir.finish()
}
