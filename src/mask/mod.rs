//! Class-index masks and their persisted/transferred representations.

pub mod codec;
pub mod store;
pub mod transfer;

use ndarray::{Array2, ShapeError};
use serde::{Deserialize, Serialize};

pub use codec::{CodecError, EncodedMask, EncodingMode, Palette, decode, encode};
pub use store::{MaskStore, StoreError};
pub use transfer::{SENTINEL, TransferError};

/// Height/width of a mask grid in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskShape {
    pub height: usize,
    pub width: usize,
}

impl MaskShape {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    /// Number of pixels in the grid.
    pub fn pixel_count(&self) -> usize {
        self.height * self.width
    }

    fn dims(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

/// H×W grid of class ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    labels: Array2<u8>,
}

impl Mask {
    pub fn new(labels: Array2<u8>) -> Self {
        Self { labels }
    }

    /// Build a mask from row-major class ids.
    pub fn from_vec(shape: MaskShape, labels: Vec<u8>) -> Result<Self, ShapeError> {
        Array2::from_shape_vec(shape.dims(), labels).map(Self::new)
    }

    /// Mask filled with a single class.
    pub fn filled(shape: MaskShape, class_id: u8) -> Self {
        Self::new(Array2::from_elem(shape.dims(), class_id))
    }

    pub fn shape(&self) -> MaskShape {
        let (height, width) = self.labels.dim();
        MaskShape { height, width }
    }

    pub fn labels(&self) -> &Array2<u8> {
        &self.labels
    }

    /// Class id at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Option<u8> {
        self.labels.get((row, col)).copied()
    }

    /// Row-major class ids, one byte per pixel.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.labels.iter().copied().collect()
    }

    /// Highest class id present, if the mask is non-empty.
    pub fn max_class(&self) -> Option<u8> {
        self.labels.iter().copied().max()
    }
}

/// Provenance grid paired with a [`Mask`]: `true` marks human-labelled pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOriginMask {
    labeled: Array2<bool>,
}

impl UserOriginMask {
    pub fn new(labeled: Array2<bool>) -> Self {
        Self { labeled }
    }

    /// Build from row-major bytes where any non-zero value counts as labelled.
    pub fn from_bytes(shape: MaskShape, bytes: &[u8]) -> Result<Self, ShapeError> {
        let flags = bytes.iter().map(|&b| b != 0).collect();
        Array2::from_shape_vec(shape.dims(), flags).map(Self::new)
    }

    pub fn shape(&self) -> MaskShape {
        let (height, width) = self.labeled.dim();
        MaskShape { height, width }
    }

    pub fn labeled(&self) -> &Array2<bool> {
        &self.labeled
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.labeled.iter().map(|&flag| u8::from(flag)).collect()
    }

    /// Number of human-labelled pixels.
    pub fn labeled_count(&self) -> usize {
        self.labeled.iter().filter(|&&flag| flag).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_is_row_major() {
        let mask = Mask::from_vec(MaskShape::new(2, 3), vec![0, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(mask.get(0, 2), Some(2));
        assert_eq!(mask.get(1, 0), Some(3));
        assert_eq!(mask.to_bytes(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(mask.max_class(), Some(5));
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(Mask::from_vec(MaskShape::new(2, 2), vec![0; 3]).is_err());
    }

    #[test]
    fn user_origin_treats_nonzero_as_labeled() {
        let origin = UserOriginMask::from_bytes(MaskShape::new(1, 4), &[0, 1, 7, 0]).unwrap();
        assert_eq!(origin.labeled_count(), 2);
        assert_eq!(origin.to_bytes(), vec![0, 1, 1, 0]);
    }
}
