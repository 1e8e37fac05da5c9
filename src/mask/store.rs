//! On-disk mask store for one project.
//!
//! Layout under the project root:
//! - `segmentation/<image>/<user>_final.npy`: binary-encoded final mask (H×W×C bool)
//! - `segmentation/<image>/<user>_user.npy`: user-origin mask (H×W bool)
//! - `segmentation/<image>/final_combined.npy`: binary consensus of complete contributors
//! - the configured consensus template (e.g. `masks/{id}.png`) for the current consensus
//!
//! Every write lands in a temp file next to its target and is renamed into
//! place, so readers only ever see complete files.

use std::{
    fs::{self, File},
    io::{self, BufReader, Cursor, Write},
    path::{Path, PathBuf},
};

use image::{GrayImage, ImageFormat, RgbImage, RgbaImage};
use ndarray::{Array2, Array3};
use ndarray_npy::{ReadNpyError, ReadNpyExt, WriteNpyError, WriteNpyExt};
use thiserror::Error;
use tracing::debug;

use super::{
    Mask, MaskShape, UserOriginMask,
    codec::{self, CodecError, EncodedMask, EncodingMode, Palette},
};

const SEGMENTATION_DIR: &str = "segmentation";
const FINAL_SUFFIX: &str = "_final.npy";
const USER_SUFFIX: &str = "_user.npy";
const COMBINED_FILE_NAME: &str = "final_combined.npy";

/// Errors raised by the mask store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Mask file not found: {0}")]
    NotFound(PathBuf),
    #[error("Mask file {path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("Identifier {0:?} is not usable as a path component")]
    InvalidId(String),
    #[error("{mode} masks can only be stored as .npy, not {path}")]
    UnsupportedEncoding { path: PathBuf, mode: EncodingMode },
    #[error("Failed to access {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Failed to write {path}: {source}")]
    WriteNpy {
        path: PathBuf,
        source: WriteNpyError,
    },
    #[error("Failed to encode image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Failed to move {path} into place: {source}")]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// File-backed store for per-user and consensus masks.
///
/// Stored masks are read back only when they match the project's grid and
/// class count; anything else is [`StoreError::Malformed`].
#[derive(Debug, Clone)]
pub struct MaskStore {
    root: PathBuf,
    consensus_template: String,
    shape: MaskShape,
    class_count: usize,
}

impl MaskStore {
    /// Create a store rooted at `root`; `consensus_template` is relative to it
    /// and has `{id}` replaced by the image id.
    pub fn new(
        root: impl Into<PathBuf>,
        consensus_template: impl Into<String>,
        shape: MaskShape,
        class_count: usize,
    ) -> Self {
        Self {
            root: root.into(),
            consensus_template: consensus_template.into(),
            shape,
            class_count,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn image_dir(&self, image_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(SEGMENTATION_DIR).join(checked_id(image_id)?))
    }

    pub fn final_mask_path(&self, image_id: &str, user_id: &str) -> Result<PathBuf, StoreError> {
        let user = checked_id(user_id)?;
        Ok(self.image_dir(image_id)?.join(format!("{user}{FINAL_SUFFIX}")))
    }

    pub fn user_mask_path(&self, image_id: &str, user_id: &str) -> Result<PathBuf, StoreError> {
        let user = checked_id(user_id)?;
        Ok(self.image_dir(image_id)?.join(format!("{user}{USER_SUFFIX}")))
    }

    /// Path of the binary consensus built from complete contributors.
    pub fn combined_path(&self, image_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.image_dir(image_id)?.join(COMBINED_FILE_NAME))
    }

    /// Path of the current consensus, per the configured template.
    pub fn consensus_path(&self, image_id: &str) -> Result<PathBuf, StoreError> {
        let id = checked_id(image_id)?;
        Ok(self.root.join(self.consensus_template.replace("{id}", id)))
    }

    /// Persist a user's final mask (binary encoded) and its provenance mask.
    pub fn save_user_masks(
        &self,
        image_id: &str,
        user_id: &str,
        mask: &Mask,
        origin: &UserOriginMask,
        palette: &Palette,
    ) -> Result<(), StoreError> {
        let final_path = self.final_mask_path(image_id, user_id)?;
        let user_path = self.user_mask_path(image_id, user_id)?;
        let encoded = codec::encode(mask, EncodingMode::Binary, palette)?;
        self.write_encoded(&final_path, &encoded)?;
        write_npy_atomic(&user_path, origin.labeled())?;
        debug!(image_id, user_id, "Saved user masks");
        Ok(())
    }

    /// Read a user's final mask (argmax-decoded) and provenance mask.
    pub fn read_user_masks(
        &self,
        image_id: &str,
        user_id: &str,
    ) -> Result<(Mask, UserOriginMask), StoreError> {
        let mask = self.read_final_mask(image_id, user_id)?;
        let user_path = self.user_mask_path(image_id, user_id)?;
        let origin = UserOriginMask::new(read_npy_file::<Array2<bool>>(&user_path)?);
        if origin.shape() != self.shape {
            return Err(StoreError::Malformed {
                path: user_path,
                reason: format!(
                    "shape {:?} does not match the project mask shape {:?}",
                    origin.shape(),
                    self.shape
                ),
            });
        }
        Ok((mask, origin))
    }

    /// Read a user's final mask, decoded to class ids.
    pub fn read_final_mask(&self, image_id: &str, user_id: &str) -> Result<Mask, StoreError> {
        Ok(codec::decode_binary(
            &self.read_final_layers(image_id, user_id)?,
        ))
    }

    /// Read a user's final mask in its stored one-hot form.
    pub fn read_final_layers(
        &self,
        image_id: &str,
        user_id: &str,
    ) -> Result<Array3<bool>, StoreError> {
        self.read_layers(&self.final_mask_path(image_id, user_id)?)
    }

    /// Read the combined consensus of complete contributors.
    pub fn read_combined(&self, image_id: &str) -> Result<Mask, StoreError> {
        let layers = self.read_layers(&self.combined_path(image_id)?)?;
        Ok(codec::decode_binary(&layers))
    }

    fn read_layers(&self, path: &Path) -> Result<Array3<bool>, StoreError> {
        let layers: Array3<bool> = read_npy_file(path)?;
        let (height, width, _) = layers.dim();
        if MaskShape::new(height, width) != self.shape {
            return Err(StoreError::Malformed {
                path: path.to_path_buf(),
                reason: format!(
                    "grid {height}x{width} does not match the project mask shape {}x{}",
                    self.shape.height, self.shape.width
                ),
            });
        }
        codec::check_layer_count(&layers, self.class_count).map_err(|err| {
            StoreError::Malformed {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        })?;
        Ok(layers)
    }

    /// Users with a final mask on disk for `image_id`, sorted.
    pub fn final_mask_users(&self, image_id: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.image_dir(image_id)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };
        let mut users: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix(FINAL_SUFFIX).map(str::to_string)
            })
            .filter(|user| !user.is_empty())
            .collect();
        users.sort();
        Ok(users)
    }

    /// Write an encoded mask to `path`; `.npy` keeps the array as-is, other
    /// extensions go through the image encoder.
    pub fn write_encoded(&self, path: &Path, encoded: &EncodedMask) -> Result<(), StoreError> {
        if is_npy(path) {
            return match encoded {
                EncodedMask::Integer(labels) => write_npy_atomic(path, labels),
                EncodedMask::Binary(layers) => write_npy_atomic(path, layers),
                EncodedMask::Rgb(colours) | EncodedMask::Rgba(colours) => {
                    write_npy_atomic(path, colours)
                }
            };
        }
        let bytes = encode_image(path, encoded)?;
        write_atomic(path, |file| {
            file.write_all(&bytes).map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        })
    }
}

fn checked_id(id: &str) -> Result<&str, StoreError> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\'])
        || id.contains('\0');
    if bad {
        Err(StoreError::InvalidId(id.to_string()))
    } else {
        Ok(id)
    }
}

fn is_npy(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("npy"))
}

fn encode_image(path: &Path, encoded: &EncodedMask) -> Result<Vec<u8>, StoreError> {
    let image_err = |source| StoreError::Image {
        path: path.to_path_buf(),
        source,
    };
    let format = ImageFormat::from_path(path).map_err(image_err)?;
    let mut out = Cursor::new(Vec::new());
    match encoded {
        EncodedMask::Integer(labels) => {
            let (height, width) = labels.dim();
            let raw: Vec<u8> = labels.iter().copied().collect();
            let image = GrayImage::from_raw(width as u32, height as u32, raw)
                .ok_or_else(|| malformed_buffer(path))?;
            image.write_to(&mut out, format).map_err(image_err)?;
        }
        EncodedMask::Rgb(colours) => {
            let (height, width, _) = colours.dim();
            let raw: Vec<u8> = colours.iter().copied().collect();
            let image = RgbImage::from_raw(width as u32, height as u32, raw)
                .ok_or_else(|| malformed_buffer(path))?;
            image.write_to(&mut out, format).map_err(image_err)?;
        }
        EncodedMask::Rgba(colours) => {
            let (height, width, _) = colours.dim();
            let raw: Vec<u8> = colours.iter().copied().collect();
            let image = RgbaImage::from_raw(width as u32, height as u32, raw)
                .ok_or_else(|| malformed_buffer(path))?;
            image.write_to(&mut out, format).map_err(image_err)?;
        }
        EncodedMask::Binary(_) => {
            return Err(StoreError::UnsupportedEncoding {
                path: path.to_path_buf(),
                mode: EncodingMode::Binary,
            });
        }
    }
    Ok(out.into_inner())
}

fn malformed_buffer(path: &Path) -> StoreError {
    StoreError::Malformed {
        path: path.to_path_buf(),
        reason: "pixel buffer does not match image dimensions".to_string(),
    }
}

pub(crate) fn read_npy_file<T: ReadNpyExt>(path: &Path) -> Result<T, StoreError> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(path.to_path_buf())
        } else {
            StoreError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    T::read_npy(BufReader::new(file)).map_err(|err: ReadNpyError| StoreError::Malformed {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn write_npy_atomic<T: WriteNpyExt>(path: &Path, array: &T) -> Result<(), StoreError> {
    write_atomic(path, |file| {
        array
            .write_npy(file)
            .map_err(|source| StoreError::WriteNpy {
                path: path.to_path_buf(),
                source,
            })
    })
}

fn write_atomic(
    path: &Path,
    write: impl FnOnce(&mut File) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut temp = tempfile::Builder::new()
        .prefix(".segmask")
        .tempfile_in(dir)
        .map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    write(temp.as_file_mut())?;
    temp.as_file_mut()
        .sync_all()
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    temp.persist(path).map_err(|source| StoreError::Persist {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
