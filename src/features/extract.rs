use ndarray::Array2;
use tracing::debug;

use super::{
    BandCube,
    edges::sobel_magnitude,
    spatial::coordinate_channels,
    superpixels::{SuperpixelParams, felzenszwalb},
};
use crate::config::{AiModelSettings, GridCells};

/// Optional feature channels; raw band intensities are always included.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureToggles {
    pub edges: bool,
    /// `Some` adds the `x`/`y` channels at the given resolution.
    pub spatial: Option<GridCells>,
    pub superpixels: bool,
}

impl FeatureToggles {
    pub fn from_settings(settings: &AiModelSettings) -> Self {
        Self {
            edges: settings.use_edge_filter,
            spatial: settings.use_meshgrid.then_some(settings.meshgrid_cells),
            superpixels: settings.use_superpixels,
        }
    }
}

/// Row-major per-pixel features: one row per region pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    n_rows: usize,
    columns: Vec<String>,
    values: Vec<f32>,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Channel names in column order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn row(&self, idx: usize) -> &[f32] {
        let n_cols = self.n_cols();
        &self.values[idx * n_cols..(idx + 1) * n_cols]
    }

    /// Copy the given rows into a new row-major buffer.
    pub fn gather(&self, rows: &[usize]) -> Vec<f32> {
        let mut out = Vec::with_capacity(rows.len() * self.n_cols());
        for &row in rows {
            out.extend_from_slice(self.row(row));
        }
        out
    }
}

/// Build the feature matrix for a region cube.
///
/// Columns are, in order: every band, then each band's edge magnitude, then
/// `x` and `y`, then the superpixel id.
pub fn build_features(cube: &BandCube, toggles: FeatureToggles) -> FeatureMatrix {
    let (h, w) = (cube.height(), cube.width());
    let mut columns: Vec<String> = Vec::new();
    let mut channels: Vec<Array2<f32>> = Vec::new();

    for (idx, name) in cube.names().iter().enumerate() {
        columns.push(name.clone());
        channels.push(cube.band(idx).to_owned());
    }
    if toggles.edges {
        for (idx, name) in cube.names().iter().enumerate() {
            columns.push(format!("{name}_edges"));
            channels.push(sobel_magnitude(cube.band(idx)));
        }
    }
    if let Some(cells) = toggles.spatial {
        let (x, y) = coordinate_channels(h, w, cells);
        columns.push("x".to_string());
        channels.push(x);
        columns.push("y".to_string());
        channels.push(y);
    }
    if toggles.superpixels {
        let segments = felzenszwalb(cube, SuperpixelParams::for_region(h));
        let count = segments.iter().copied().max().map_or(0, |max| max + 1);
        debug!(segments = count, "Superpixels computed");
        columns.push("superpixel".to_string());
        channels.push(segments.mapv(|id| id as f32));
    }

    let n_rows = h * w;
    let n_cols = channels.len();
    let mut values = vec![0f32; n_rows * n_cols];
    for (col, channel) in channels.iter().enumerate() {
        for (row, &value) in channel.iter().enumerate() {
            values[row * n_cols + col] = value;
        }
    }
    FeatureMatrix {
        n_rows,
        columns,
        values,
    }
}
