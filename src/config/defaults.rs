use std::path::PathBuf;

use super::GridCells;
use crate::mask::EncodingMode;

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_project_path() -> PathBuf {
    PathBuf::from(".")
}

pub(super) fn default_consensus_path() -> String {
    "masks/{id}.npy".to_string()
}

pub(super) fn default_mask_encoding() -> EncodingMode {
    EncodingMode::Rgb
}

pub(super) fn default_unverified_threshold() -> usize {
    1
}

pub(super) fn default_meshgrid_cells() -> GridCells {
    GridCells::Cells { rows: 3, cols: 3 }
}

pub(super) fn default_n_leaves() -> usize {
    31
}

pub(super) fn default_max_depth() -> usize {
    0
}

pub(super) fn default_n_estimators() -> usize {
    100
}

pub(super) fn default_n_jobs() -> usize {
    4
}

pub(super) fn default_suppression_filter_size() -> usize {
    5
}
