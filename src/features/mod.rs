//! Per-pixel feature extraction for the interactive classifier.
//!
//! Source imagery arrives as a [`BandCube`]: named bands flattened in their
//! declared order into one H×W×B array. [`build_features`] turns a cube
//! restricted to the mask region into a row-per-pixel [`FeatureMatrix`].

pub mod edges;
pub mod extract;
pub mod spatial;
pub mod superpixels;

use std::{
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
};

use ndarray::{Array2, Array3, ArrayView2, Axis, s};
use ndarray_npy::{ReadNpyError, ReadNpyExt};
use thiserror::Error;

use crate::config::MaskArea;

pub use extract::{FeatureMatrix, FeatureToggles, build_features};
pub use superpixels::SuperpixelParams;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Band cube has no bands")]
    NoBands,
    #[error("Unknown band {0:?}")]
    UnknownBand(String),
    #[error("Band {band:?} is {found:?}, expected {expected:?}")]
    ShapeMismatch {
        band: String,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("Region {area:?} lies outside the {width}x{height} image")]
    RegionOutOfBounds {
        area: MaskArea,
        width: usize,
        height: usize,
    },
    #[error("Failed to open {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Decoded image {path} has an unexpected layout: {reason}")]
    Layout { path: PathBuf, reason: String },
    #[error("Failed to read band array {path}: {source}")]
    Npy {
        path: PathBuf,
        source: ReadNpyError,
    },
}

/// Ordered, named image bands sharing one H×W grid.
#[derive(Debug, Clone, PartialEq)]
pub struct BandCube {
    names: Vec<String>,
    data: Array3<f32>,
}

impl BandCube {
    /// Stack bands in the given order.
    pub fn from_bands(bands: Vec<(String, Array2<f32>)>) -> Result<Self, FeatureError> {
        let Some((_, first)) = bands.first() else {
            return Err(FeatureError::NoBands);
        };
        let expected = first.dim();
        let mut data = Array3::zeros((expected.0, expected.1, bands.len()));
        let mut names = Vec::with_capacity(bands.len());
        for (idx, (name, band)) in bands.into_iter().enumerate() {
            if band.dim() != expected {
                return Err(FeatureError::ShapeMismatch {
                    band: name,
                    expected,
                    found: band.dim(),
                });
            }
            data.index_axis_mut(Axis(2), idx).assign(&band);
            names.push(name);
        }
        Ok(Self { names, data })
    }

    /// Wrap an H×W×B array; bands are named `band_<i>`.
    pub fn from_array(data: Array3<f32>) -> Result<Self, FeatureError> {
        if data.dim().2 == 0 {
            return Err(FeatureError::NoBands);
        }
        let names = (0..data.dim().2).map(|idx| format!("band_{idx}")).collect();
        Ok(Self { names, data })
    }

    /// Load a cube from an `.npy` array (H×W or H×W×B) or any image the
    /// `image` crate decodes (bands `gray`, or `red`/`green`/`blue`[/`alpha`]).
    pub fn open(path: &Path) -> Result<Self, FeatureError> {
        let is_npy = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("npy"));
        if is_npy {
            Self::open_npy(path)
        } else {
            Self::open_image(path)
        }
    }

    fn open_npy(path: &Path) -> Result<Self, FeatureError> {
        let read = || -> Result<File, FeatureError> {
            File::open(path).map_err(|source| FeatureError::Io {
                path: path.to_path_buf(),
                source,
            })
        };
        let npy_err = |source| FeatureError::Npy {
            path: path.to_path_buf(),
            source,
        };
        match Array3::<f32>::read_npy(BufReader::new(read()?)) {
            Ok(data) => Self::from_array(data),
            Err(ReadNpyError::WrongNdim(..)) => {
                let band = Array2::<f32>::read_npy(BufReader::new(read()?)).map_err(npy_err)?;
                Self::from_array(band.insert_axis(Axis(2)))
            }
            Err(source) => Err(npy_err(source)),
        }
    }

    fn open_image(path: &Path) -> Result<Self, FeatureError> {
        let image = image::open(path).map_err(|source| FeatureError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let color = image.color();
        let (names, channels): (&[&str], usize) = match (color.has_color(), color.has_alpha()) {
            (false, _) => (&["gray"], 1),
            (true, false) => (&["red", "green", "blue"], 3),
            (true, true) => (&["red", "green", "blue", "alpha"], 4),
        };
        let (width, height) = (image.width() as usize, image.height() as usize);
        let raw: Vec<f32> = match channels {
            1 => image.to_luma32f().into_raw(),
            3 => image.to_rgb32f().into_raw(),
            _ => image.to_rgba32f().into_raw(),
        };
        let data = Array3::from_shape_vec((height, width, channels), raw).map_err(|err| {
            FeatureError::Layout {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        })?;
        Ok(Self {
            names: names.iter().map(|name| name.to_string()).collect(),
            data,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn n_bands(&self) -> usize {
        self.data.dim().2
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn band(&self, idx: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(2), idx)
    }

    /// Keep only `names`, in that order; an empty list keeps every band.
    pub fn select(&self, names: &[String]) -> Result<Self, FeatureError> {
        if names.is_empty() {
            return Ok(self.clone());
        }
        let indices = names
            .iter()
            .map(|name| {
                self.names
                    .iter()
                    .position(|candidate| candidate == name)
                    .ok_or_else(|| FeatureError::UnknownBand(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            names: names.to_vec(),
            data: self.data.select(Axis(2), &indices),
        })
    }

    /// Restrict the cube to the mask region.
    pub fn roi(&self, area: MaskArea) -> Result<Self, FeatureError> {
        let (xmin, ymin) = (area.xmin as usize, area.ymin as usize);
        let (xmax, ymax) = (area.xmax as usize, area.ymax as usize);
        if xmin >= xmax || ymin >= ymax || xmax > self.width() || ymax > self.height() {
            return Err(FeatureError::RegionOutOfBounds {
                area,
                width: self.width(),
                height: self.height(),
            });
        }
        Ok(Self {
            names: self.names.clone(),
            data: self.data.slice(s![ymin..ymax, xmin..xmax, ..]).to_owned(),
        })
    }
}
