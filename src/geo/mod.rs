//! Georeferenced export of masks.

pub mod align;
pub mod geotiff;

pub use align::{AlignError, AlignedFormat, AlignedMask, align_mask};
pub use geotiff::{Affine, Crs, GeoReference};
