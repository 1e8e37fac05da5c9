//! Export a stored mask in the geometry of its source image.

use std::{
    fs::{self, File},
    io::{self, BufReader},
    path::{Path, PathBuf},
};

use ndarray::Array3;
use ndarray_npy::{WriteNpyError, WriteNpyExt};
use thiserror::Error;
use tracing::{debug, warn};

use super::geotiff::{Affine, GeoReference, read_georeference, write_geotiff};
use crate::{
    config::MaskArea,
    error::ErrorKind,
    mask::store::{StoreError, read_npy_file},
};

const RASTER_EXTENSIONS: [&str; 2] = [".tif", ".tiff"];
const PASSTHROUGH_EXTENSIONS: [&str; 4] = [".png", ".jpg", ".jpeg", ".npy"];

#[derive(Debug, Error)]
pub enum AlignError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Failed to read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Failed to read georeference of {path}: {source}")]
    ReadTiff {
        path: PathBuf,
        source: tiff::TiffError,
    },
    #[error("Failed to encode aligned raster: {0}")]
    WriteTiff(tiff::TiffError),
    #[error("Failed to encode mask array: {0}")]
    WriteNpy(#[from] WriteNpyError),
}

/// How the exported bytes relate to the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignedFormat {
    /// Georeferenced raster with one band per class.
    GeoTiff,
    /// One-hot mask as an `.npy` array, no georeferencing.
    Npy,
    /// The stored mask file, untouched; the source format is unknown.
    Raw,
}

impl AlignedFormat {
    /// Non-fatal problem a boundary should report next to the export.
    pub fn degradation(self) -> Option<ErrorKind> {
        match self {
            Self::Raw => Some(ErrorKind::UnsupportedFormat),
            Self::GeoTiff | Self::Npy => None,
        }
    }
}

/// Exported mask bytes plus the extension they should be served under.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedMask {
    pub bytes: Vec<u8>,
    /// Lower-cased source extension including the dot, e.g. `.tif`.
    pub extension: String,
    pub format: AlignedFormat,
}

/// Lower-cased extension of `path` with a leading dot, or empty.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Align the binary mask at `mask_file` with `source_image`.
///
/// For GeoTIFF sources the mask region's corners are mapped through the
/// source transform and the result is emitted with a transform scaled to the
/// mask's own pixel grid. Sources without georeferencing get the mask back as
/// `.npy` bytes, and unknown formats get the stored file unchanged.
pub fn align_mask(
    mask_file: &Path,
    source_image: &Path,
    area: MaskArea,
) -> Result<AlignedMask, AlignError> {
    let extension = dotted_extension(source_image);
    let ext = extension.as_str();
    if !RASTER_EXTENSIONS.contains(&ext) && !PASSTHROUGH_EXTENSIONS.contains(&ext) {
        warn!(
            source = %source_image.display(),
            extension = ext,
            "Unsupported export format, returning unaligned mask"
        );
        let bytes = fs::read(mask_file).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                AlignError::Store(StoreError::NotFound(mask_file.to_path_buf()))
            } else {
                AlignError::Io {
                    path: mask_file.to_path_buf(),
                    source,
                }
            }
        })?;
        return Ok(AlignedMask {
            bytes,
            extension,
            format: AlignedFormat::Raw,
        });
    }

    let layers: Array3<bool> = read_npy_file(mask_file)?;
    if RASTER_EXTENSIONS.contains(&ext) {
        if let Some(source_ref) = source_georeference(source_image)? {
            let (height, width, _) = layers.dim();
            let georef = GeoReference {
                transform: mask_transform(&source_ref.transform, area, width, height),
                crs: source_ref.crs,
            };
            let bands = layers.mapv(u8::from);
            let bytes = write_geotiff(&bands, &georef).map_err(AlignError::WriteTiff)?;
            debug!(
                source = %source_image.display(),
                epsg = ?georef.crs.as_ref().and_then(|crs| crs.epsg()),
                "Mask aligned to source raster"
            );
            return Ok(AlignedMask {
                bytes,
                extension,
                format: AlignedFormat::GeoTiff,
            });
        }
        debug!(source = %source_image.display(), "Source has no georeference");
    }

    let mut bytes = Vec::new();
    layers.write_npy(&mut bytes)?;
    Ok(AlignedMask {
        bytes,
        extension,
        format: AlignedFormat::Npy,
    })
}

fn source_georeference(path: &Path) -> Result<Option<GeoReference>, AlignError> {
    let file = File::open(path).map_err(|source| AlignError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_georeference(BufReader::new(file)).map_err(|source| AlignError::ReadTiff {
        path: path.to_path_buf(),
        source,
    })
}

/// Transform placing a `width`×`height` grid over `area` of the source image.
pub fn mask_transform(source: &Affine, area: MaskArea, width: usize, height: usize) -> Affine {
    let (xmin, ymin) = source.apply(f64::from(area.xmin), f64::from(area.ymin));
    let (xmax, ymax) = source.apply(f64::from(area.xmax), f64::from(area.ymax));
    Affine::new(
        (xmax - xmin) / width.max(1) as f64,
        0.0,
        xmin,
        0.0,
        (ymax - ymin) / height.max(1) as f64,
        ymin,
    )
}
