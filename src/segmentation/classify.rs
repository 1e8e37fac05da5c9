//! Interactive per-pixel classification from sparse user labels.

use std::collections::BTreeSet;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::suppression::SuppressionFilter;
use crate::{
    config::AiModelSettings,
    features::{BandCube, FeatureMatrix, FeatureToggles, build_features},
    mask::{Mask, MaskShape},
    ml::{
        gbdt::{FeatureRows, LabelledRows, TrainError, TrainOptions, train_boosted_forest},
        split::{SPLIT_SEED, VALIDATION_FRACTION, stratified_split},
    },
};

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Malformed classification request: {0}")]
    InvalidRequest(#[from] serde_json::Error),
    #[error("Request has {pixels} pixels but {labels} labels")]
    LengthMismatch { pixels: usize, labels: usize },
    #[error("Pixel index {pixel} is outside the {pixel_count}-pixel region")]
    PixelOutOfRange { pixel: usize, pixel_count: usize },
    #[error("Label {label} is not one of the {class_count} classes")]
    LabelOutOfRange { label: u8, class_count: usize },
    #[error("Need labels from at least 2 classes, got {0}")]
    TooFewClasses(usize),
    #[error("Region is {found:?} but masks are {expected:?}")]
    RegionMismatch {
        expected: MaskShape,
        found: MaskShape,
    },
    #[error("Failed to build prediction thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Training failed: {0}")]
    Train(#[from] TrainError),
}

impl ClassifyError {
    /// Whether the request itself was at fault.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_)
                | Self::LengthMismatch { .. }
                | Self::PixelOutOfRange { .. }
                | Self::LabelOutOfRange { .. }
                | Self::TooFewClasses(_)
        )
    }
}

/// Sparse supervision: region pixel indices (row-major) and their labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRequest {
    pub user_pixels: Vec<usize>,
    pub user_labels: Vec<u8>,
}

impl ClassificationRequest {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ClassifyError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Check the request against a region of `pixel_count` pixels and `class_count` classes.
    pub fn validate(&self, pixel_count: usize, class_count: usize) -> Result<(), ClassifyError> {
        if self.user_pixels.len() != self.user_labels.len() {
            return Err(ClassifyError::LengthMismatch {
                pixels: self.user_pixels.len(),
                labels: self.user_labels.len(),
            });
        }
        if let Some(&pixel) = self.user_pixels.iter().find(|&&p| p >= pixel_count) {
            return Err(ClassifyError::PixelOutOfRange { pixel, pixel_count });
        }
        if let Some(&label) = self
            .user_labels
            .iter()
            .find(|&&label| label as usize >= class_count)
        {
            return Err(ClassifyError::LabelOutOfRange { label, class_count });
        }
        let distinct: BTreeSet<u8> = self.user_labels.iter().copied().collect();
        if distinct.len() < 2 {
            return Err(ClassifyError::TooFewClasses(distinct.len()));
        }
        Ok(())
    }
}

/// Boosted-tree classifier trained from scratch for every request.
#[derive(Debug, Clone)]
pub struct OnlineClassifier {
    options: TrainOptions,
}

impl OnlineClassifier {
    pub fn new(options: TrainOptions) -> Self {
        Self { options }
    }

    /// Tree size and concurrency come from the user's settings; the rest is fixed.
    pub fn from_settings(settings: &AiModelSettings) -> Self {
        Self::new(TrainOptions {
            num_leaves: settings.n_leaves,
            max_depth: settings.max_depth,
            n_estimators: settings.n_estimators,
            n_threads: settings.n_jobs,
            ..TrainOptions::default()
        })
    }

    pub fn options(&self) -> &TrainOptions {
        &self.options
    }

    /// Train on the labelled rows of `features` and predict a label for every row.
    ///
    /// The request must already be validated against `features`.
    pub fn fit_predict(
        &self,
        features: &FeatureMatrix,
        request: &ClassificationRequest,
    ) -> Result<Vec<u8>, ClassifyError> {
        let split = stratified_split(
            &request.user_pixels,
            &request.user_labels,
            VALIDATION_FRACTION,
            SPLIT_SEED,
        );
        let pick = |indices: &[usize]| -> (Vec<f32>, Vec<u8>) {
            let pixels: Vec<usize> = indices.iter().map(|&i| request.user_pixels[i]).collect();
            let labels = indices.iter().map(|&i| request.user_labels[i]).collect();
            (features.gather(&pixels), labels)
        };
        let (train_x, train_y) = pick(&split.train);
        let (val_x, val_y) = pick(&split.validation);
        let n_features = features.n_cols();

        let train = LabelledRows {
            rows: FeatureRows::new(&train_x, n_features),
            labels: &train_y,
        };
        let validation = (!val_y.is_empty()).then(|| LabelledRows {
            rows: FeatureRows::new(&val_x, n_features),
            labels: &val_y,
        });
        let model = train_boosted_forest(train, validation, &self.options)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.n_threads.max(1))
            .build()?;
        let forest = &model.forest;
        let predictions: Vec<u8> = pool.install(|| {
            (0..features.n_rows())
                .into_par_iter()
                .map(|row| forest.predict_label(features.row(row)))
                .collect()
        });
        info!(
            train = split.train.len(),
            validation = split.validation.len(),
            best_iteration = model.best_iteration,
            iterations = model.iterations_run,
            "Classifier trained"
        );
        Ok(predictions)
    }
}

/// Predict a full mask for a region cube from sparse labels.
///
/// The request is validated before any features are computed. The
/// prediction is post-processed with the configured suppression filter.
pub fn predict_region(
    region: &BandCube,
    request: &ClassificationRequest,
    settings: &AiModelSettings,
    class_count: usize,
    shape: MaskShape,
) -> Result<Mask, ClassifyError> {
    let found = MaskShape::new(region.height(), region.width());
    if found != shape {
        return Err(ClassifyError::RegionMismatch {
            expected: shape,
            found,
        });
    }
    request.validate(shape.pixel_count(), class_count)?;

    let started = Instant::now();
    let features = build_features(region, FeatureToggles::from_settings(settings));
    let labels = OnlineClassifier::from_settings(settings).fit_predict(&features, request)?;
    let mask = Mask::from_vec(shape, labels).map_err(|_| ClassifyError::RegionMismatch {
        expected: shape,
        found,
    })?;
    let filter = SuppressionFilter {
        default_class: settings.suppression_default_class,
        threshold_percent: settings.suppression_threshold,
        window_size: settings.suppression_filter_size,
    };
    let mask = filter.apply(&mask);
    info!(
        pixels = shape.pixel_count(),
        features = features.n_cols(),
        labelled = request.user_pixels.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Mask predicted"
    );
    Ok(mask)
}
