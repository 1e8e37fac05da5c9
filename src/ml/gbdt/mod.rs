//! Gradient-boosted decision trees for per-pixel classification.
//!
//! Trees are grown leaf-wise on quantile-binned features and combined with a
//! softmax link, so a single forest covers any number of classes. Training is
//! deterministic for a given input regardless of the worker count.

mod bins;
mod model;
mod train;

pub use bins::{BinMapper, BinnedMatrix};
pub use model::{BoostedForest, Node, Tree, argmax, softmax};
pub use train::{
    FeatureRows, LabelledRows, TrainError, TrainOptions, TrainedModel, train_boosted_forest,
};
