//! Conversion between class-index masks and their storage/export encodings.
//!
//! - `integer`: the class grid itself.
//! - `binary`: one boolean layer per class, exactly one `true` per pixel.
//! - `rgb` / `rgba`: each pixel painted with its class colour.

use std::{fmt, str::FromStr};

use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Mask;

/// Errors raised while encoding or decoding masks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unknown mask encoding mode: {0}")]
    UnknownMode(String),
    #[error("Class id {class_id} is out of range for {class_count} classes")]
    ClassOutOfRange { class_id: u8, class_count: usize },
    #[error("Encoded mask has {found} layers but {expected} were expected")]
    LayerCount { expected: usize, found: usize },
    #[error("Colour {0:?} does not belong to any class")]
    UnknownColour(Vec<u8>),
}

/// Representation used when a mask is persisted or exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    Integer,
    Binary,
    Rgb,
    Rgba,
}

impl EncodingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Binary => "binary",
            Self::Rgb => "rgb",
            Self::Rgba => "rgba",
        }
    }
}

impl fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncodingMode {
    type Err = CodecError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "integer" => Ok(Self::Integer),
            "binary" => Ok(Self::Binary),
            "rgb" => Ok(Self::Rgb),
            "rgba" => Ok(Self::Rgba),
            other => Err(CodecError::UnknownMode(other.to_string())),
        }
    }
}

/// Per-class RGBA colours, indexed by class id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colours: Vec<[u8; 4]>,
}

impl Palette {
    pub fn new(colours: Vec<[u8; 4]>) -> Self {
        Self { colours }
    }

    pub fn class_count(&self) -> usize {
        self.colours.len()
    }

    pub fn colour(&self, class_id: u8) -> Option<[u8; 4]> {
        self.colours.get(class_id as usize).copied()
    }

    fn class_for(&self, pixel: &[u8]) -> Option<u8> {
        self.colours
            .iter()
            .position(|colour| colour[..pixel.len()] == *pixel)
            .and_then(|idx| u8::try_from(idx).ok())
    }
}

/// A mask in one of its encoded forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedMask {
    /// H×W class ids.
    Integer(Array2<u8>),
    /// H×W×C one-hot layers.
    Binary(Array3<bool>),
    /// H×W×3 colours.
    Rgb(Array3<u8>),
    /// H×W×4 colours.
    Rgba(Array3<u8>),
}

impl EncodedMask {
    pub fn mode(&self) -> EncodingMode {
        match self {
            Self::Integer(_) => EncodingMode::Integer,
            Self::Binary(_) => EncodingMode::Binary,
            Self::Rgb(_) => EncodingMode::Rgb,
            Self::Rgba(_) => EncodingMode::Rgba,
        }
    }
}

/// Encode `mask` in the requested mode.
///
/// Every class id must be below `palette.class_count()` for the layered and
/// colour modes; `integer` is the identity and performs no check.
pub fn encode(mask: &Mask, mode: EncodingMode, palette: &Palette) -> Result<EncodedMask, CodecError> {
    let class_count = palette.class_count();
    if mode != EncodingMode::Integer {
        check_class_range(mask, class_count)?;
    }
    let labels = mask.labels();
    let (height, width) = labels.dim();
    let encoded = match mode {
        EncodingMode::Integer => EncodedMask::Integer(labels.clone()),
        EncodingMode::Binary => EncodedMask::Binary(Array3::from_shape_fn(
            (height, width, class_count),
            |(row, col, layer)| labels[(row, col)] as usize == layer,
        )),
        EncodingMode::Rgb | EncodingMode::Rgba => {
            let channels = if mode == EncodingMode::Rgb { 3 } else { 4 };
            let painted = Array3::from_shape_fn((height, width, channels), |(row, col, ch)| {
                palette
                    .colour(labels[(row, col)])
                    .map(|colour| colour[ch])
                    .unwrap_or(0)
            });
            if mode == EncodingMode::Rgb {
                EncodedMask::Rgb(painted)
            } else {
                EncodedMask::Rgba(painted)
            }
        }
    };
    Ok(encoded)
}

/// Decode an encoded mask back into class ids.
///
/// Binary layers decode by argmax along the layer axis, so a pixel with no
/// (or several) `true` layers resolves to the lowest class id among the
/// maxima. Colour encodings are reversed through `palette`.
pub fn decode(encoded: &EncodedMask, palette: &Palette) -> Result<Mask, CodecError> {
    match encoded {
        EncodedMask::Integer(labels) => Ok(Mask::new(labels.clone())),
        EncodedMask::Binary(layers) => Ok(decode_binary(layers)),
        EncodedMask::Rgb(colours) | EncodedMask::Rgba(colours) => decode_colours(colours, palette),
    }
}

/// Argmax over the layer axis with ties resolved to the lowest layer index.
pub fn decode_binary(layers: &Array3<bool>) -> Mask {
    let labels = layers.map_axis(Axis(2), |pixel| {
        let mut best = 0usize;
        for (layer, &on) in pixel.iter().enumerate() {
            if on && !pixel[best] {
                best = layer;
            }
        }
        best as u8
    });
    Mask::new(labels)
}

fn decode_colours(colours: &Array3<u8>, palette: &Palette) -> Result<Mask, CodecError> {
    let (height, width, _) = colours.dim();
    let mut labels = Array2::zeros((height, width));
    for ((row, col), label) in labels.indexed_iter_mut() {
        let pixel: Vec<u8> = colours.slice(ndarray::s![row, col, ..]).to_vec();
        *label = palette
            .class_for(&pixel)
            .ok_or(CodecError::UnknownColour(pixel))?;
    }
    Ok(Mask::new(labels))
}

fn check_class_range(mask: &Mask, class_count: usize) -> Result<(), CodecError> {
    match mask.max_class() {
        Some(class_id) if class_id as usize >= class_count => Err(CodecError::ClassOutOfRange {
            class_id,
            class_count,
        }),
        _ => Ok(()),
    }
}

/// Ensure a binary encoding carries one layer per configured class.
pub fn check_layer_count(layers: &Array3<bool>, class_count: usize) -> Result<(), CodecError> {
    let found = layers.dim().2;
    if found == class_count {
        Ok(())
    } else {
        Err(CodecError::LayerCount {
            expected: class_count,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::MaskShape;

    fn palette() -> Palette {
        Palette::new(vec![[0, 0, 0, 0], [255, 0, 0, 255], [0, 0, 255, 128]])
    }

    fn sample_mask() -> Mask {
        Mask::from_vec(MaskShape::new(2, 3), vec![0, 1, 2, 2, 1, 0]).unwrap()
    }

    #[test]
    fn integer_is_identity() {
        let mask = sample_mask();
        let encoded = encode(&mask, EncodingMode::Integer, &palette()).unwrap();
        assert_eq!(encoded, EncodedMask::Integer(mask.labels().clone()));
    }

    #[test]
    fn binary_layers_are_one_hot() {
        let EncodedMask::Binary(layers) =
            encode(&sample_mask(), EncodingMode::Binary, &palette()).unwrap()
        else {
            panic!("expected binary encoding");
        };
        assert_eq!(layers.dim(), (2, 3, 3));
        for pixel in layers.lanes(Axis(2)) {
            assert_eq!(pixel.iter().filter(|&&on| on).count(), 1);
        }
        assert!(layers[(0, 2, 2)]);
    }

    #[test]
    fn binary_decodes_back_to_mask() {
        let mask = sample_mask();
        let encoded = encode(&mask, EncodingMode::Binary, &palette()).unwrap();
        assert_eq!(decode(&encoded, &palette()).unwrap(), mask);
    }

    #[test]
    fn binary_ties_resolve_to_lowest_class() {
        let mut layers = Array3::from_elem((1, 2, 3), false);
        layers[(0, 0, 1)] = true;
        layers[(0, 0, 2)] = true;
        let mask = decode_binary(&layers);
        assert_eq!(mask.to_bytes(), vec![1, 0]);
    }

    #[test]
    fn rgb_paints_class_colours_and_reverses() {
        let mask = sample_mask();
        let encoded = encode(&mask, EncodingMode::Rgb, &palette()).unwrap();
        let EncodedMask::Rgb(colours) = &encoded else {
            panic!("expected rgb encoding");
        };
        assert_eq!(colours.slice(ndarray::s![0, 1, ..]).to_vec(), vec![255, 0, 0]);
        assert_eq!(decode(&encoded, &palette()).unwrap(), mask);
    }

    #[test]
    fn rgba_keeps_alpha() {
        let encoded = encode(&sample_mask(), EncodingMode::Rgba, &palette()).unwrap();
        let EncodedMask::Rgba(colours) = encoded else {
            panic!("expected rgba encoding");
        };
        assert_eq!(colours[(0, 2, 3)], 128);
    }

    #[test]
    fn out_of_range_class_is_rejected() {
        let mask = Mask::from_vec(MaskShape::new(1, 2), vec![0, 3]).unwrap();
        let err = encode(&mask, EncodingMode::Binary, &palette()).unwrap_err();
        assert_eq!(
            err,
            CodecError::ClassOutOfRange {
                class_id: 3,
                class_count: 3
            }
        );
    }

    #[test]
    fn unknown_mode_is_a_codec_error() {
        let err = "bitmap".parse::<EncodingMode>().unwrap_err();
        assert_eq!(err, CodecError::UnknownMode("bitmap".into()));
        assert_eq!("rgba".parse::<EncodingMode>().unwrap(), EncodingMode::Rgba);
    }
}
