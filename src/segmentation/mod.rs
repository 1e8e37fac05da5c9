//! Interactive mask prediction: classifier plus post-processing.

pub mod classify;
pub mod suppression;

pub use classify::{ClassificationRequest, ClassifyError, OnlineClassifier, predict_region};
pub use suppression::SuppressionFilter;
