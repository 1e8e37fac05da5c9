//! Machine learning building blocks for the interactive classifier.
//!
//! `gbdt` trains and evaluates the boosted forest, `split` holds out the
//! validation rows used for early stopping, and `metrics` scores label grids
//! against each other.

pub mod gbdt;
pub mod metrics;
pub mod split;
