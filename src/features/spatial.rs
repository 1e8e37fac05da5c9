//! Spatial position channels.

use ndarray::Array2;

use crate::config::GridCells;

/// Column (`x`) and row (`y`) channels for an `height`×`width` region.
///
/// [`GridCells::Pixelwise`] yields raw pixel coordinates; `R×C` cells yield
/// the index of the cell each pixel falls into, splitting rows into `R`
/// bands and columns into `C` bands of near-equal size.
pub fn coordinate_channels(
    height: usize,
    width: usize,
    cells: GridCells,
) -> (Array2<f32>, Array2<f32>) {
    let (rows, cols) = match cells {
        GridCells::Pixelwise => (height, width),
        GridCells::Cells { rows, cols } => (rows.clamp(1, height.max(1)), cols.clamp(1, width.max(1))),
    };
    let x = Array2::from_shape_fn((height, width), |(_, col)| cell_of(col, width, cols) as f32);
    let y = Array2::from_shape_fn((height, width), |(row, _)| cell_of(row, height, rows) as f32);
    (x, y)
}

fn cell_of(pos: usize, extent: usize, cells: usize) -> usize {
    if extent == 0 { 0 } else { pos * cells / extent }
}
