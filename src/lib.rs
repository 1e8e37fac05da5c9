//! Image annotation core: mask storage and transfer, interactive per-pixel
//! classification, multi-annotator consensus and georeferenced export.

/// Application directory resolution.
pub mod app_dirs;
/// Project configuration loading and validation.
pub mod config;
/// Consensus merging, agreement scores and the annotation service.
pub mod consensus;
/// Crate-wide error classification.
pub mod error;
/// Per-pixel feature extraction.
pub mod features;
/// Georeferenced mask export.
pub mod geo;
/// Logging setup.
pub mod logging;
/// Masks, their codecs, transfer framing and storage.
pub mod mask;
/// Boosted trees, stratified splits and agreement metrics.
pub mod ml;
/// Interactive prediction pipeline.
pub mod segmentation;
