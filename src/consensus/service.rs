//! Save, merge, load and export orchestration for one project.
//!
//! The service owns the mask store and talks to an [`ActionRepository`] for
//! per-user bookkeeping. Merges for one image are serialized behind a
//! per-image lock; files are replaced atomically by the store, so readers
//! never see a half-written consensus.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    time::Instant,
};

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::{
    actions::{ActionError, ActionKey, ActionRepository, AnnotationAction, SEGMENTATION_KIND},
    merge::{ConsensusResult, Contributor, MergeError, MergeScope, merge},
};
use crate::{
    config::ProjectConfig,
    error::ErrorKind,
    features::{BandCube, FeatureError},
    geo::{AlignError, AlignedMask, align_mask},
    mask::{
        CodecError, EncodingMode, MaskStore, StoreError, TransferError,
        encode,
        transfer::{decode_save_buffer, encode_load_buffer, encode_mask_buffer},
    },
    segmentation::{ClassificationRequest, ClassifyError, predict_region},
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("Mask uses class {class_id} but the project has {class_count} classes")]
    ClassOutOfRange { class_id: u8, class_count: usize },
    #[error("No action {0}")]
    NoAction(ActionKey),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Actions(#[from] ActionError),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Features(#[from] FeatureError),
    #[error(transparent)]
    Align(#[from] AlignError),
    #[error("Image lock table was poisoned")]
    Poisoned,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transfer(_) | Self::ClassOutOfRange { .. } => ErrorKind::Validation,
            Self::NoAction(_) => ErrorKind::NotFound,
            Self::Store(err) | Self::Align(AlignError::Store(err)) => store_kind(err),
            Self::Classify(err) if err.is_validation() => ErrorKind::Validation,
            Self::Features(err) => match err {
                FeatureError::NoBands
                | FeatureError::UnknownBand(_)
                | FeatureError::RegionOutOfBounds { .. } => ErrorKind::Config,
                _ => ErrorKind::Io,
            },
            Self::Align(_) => ErrorKind::Io,
            Self::Merge(_) | Self::Actions(_) | Self::Classify(_) | Self::Poisoned => {
                ErrorKind::Internal
            }
        }
    }
}

fn store_kind(err: &StoreError) -> ErrorKind {
    match err {
        StoreError::NotFound(_) => ErrorKind::NotFound,
        StoreError::InvalidId(_) => ErrorKind::Validation,
        StoreError::UnsupportedEncoding { .. } | StoreError::Codec(_) => ErrorKind::Config,
        _ => ErrorKind::Io,
    }
}

/// Results of one merge of an image.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergeOutcome {
    /// Consensus of every contributor, written to the configured path.
    pub consensus: Option<ConsensusResult>,
    /// Consensus of complete contributors, written to `final_combined.npy`.
    pub combined: Option<ConsensusResult>,
}

/// Exported final mask ready to be served as a download.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskDownload {
    pub file_name: String,
    pub mask: AlignedMask,
}

pub struct AnnotationService {
    config: ProjectConfig,
    store: MaskStore,
    actions: Arc<dyn ActionRepository>,
    image_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AnnotationService {
    pub fn new(config: ProjectConfig, actions: Arc<dyn ActionRepository>) -> Self {
        let store = MaskStore::new(
            config.path.clone(),
            config.segmentation.path.clone(),
            config.segmentation.mask_shape(),
            config.class_count(),
        );
        Self {
            config,
            store,
            actions,
            image_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn store(&self) -> &MaskStore {
        &self.store
    }

    /// Validate and persist a user's mask, then recompute the image consensus.
    ///
    /// Nothing is written when the buffer is malformed.
    pub fn save_mask(
        &self,
        image_id: &str,
        user_id: &str,
        bytes: &[u8],
    ) -> Result<MergeOutcome, ServiceError> {
        let shape = self.config.segmentation.mask_shape();
        let (mask, origin) = decode_save_buffer(bytes, shape)?;
        let class_count = self.config.class_count();
        if let Some(class_id) = mask.max_class() {
            if usize::from(class_id) >= class_count {
                return Err(ServiceError::ClassOutOfRange {
                    class_id,
                    class_count,
                });
            }
        }

        self.store
            .save_user_masks(image_id, user_id, &mask, &origin, &self.config.palette())?;
        let key = ActionKey::segmentation(user_id, image_id);
        let now = OffsetDateTime::now_utc();
        let mut action = self
            .actions
            .get(&key)?
            .unwrap_or_else(|| AnnotationAction::new(&key, now));
        action.last_modification = now;
        self.actions.save(&action)?;
        info!(
            image_id,
            user_id,
            labelled = origin.labeled_count(),
            "Mask saved"
        );
        self.merge_image(image_id)
    }

    /// Recompute both consensus files of `image_id` from the stored masks.
    pub fn merge_image(&self, image_id: &str) -> Result<MergeOutcome, ServiceError> {
        let lock = self.image_lock(image_id)?;
        let _guard = lock.lock().map_err(|_| ServiceError::Poisoned)?;
        let started = Instant::now();

        let contributors = self.contributors(image_id)?;
        let seg = &self.config.segmentation;
        let mut outcome = MergeOutcome::default();

        if let Some(result) = merge(
            &contributors,
            MergeScope::All,
            seg.score,
            seg.unverified_threshold,
        )? {
            let encoded = encode(&result.mask, seg.mask_encoding, &self.config.palette())?;
            self.store
                .write_encoded(&self.store.consensus_path(image_id)?, &encoded)?;
            self.write_back_scores(image_id, &result)?;
            outcome.consensus = Some(result);
        }

        if let Some(result) = merge(
            &contributors,
            MergeScope::CompleteOnly,
            seg.score,
            seg.unverified_threshold,
        )? {
            let encoded = encode(&result.mask, EncodingMode::Binary, &self.config.palette())?;
            self.store
                .write_encoded(&self.store.combined_path(image_id)?, &encoded)?;
            outcome.combined = Some(result);
        }

        info!(
            image_id,
            contributors = contributors.len(),
            complete = outcome.combined.as_ref().map_or(0, |c| c.users.len()),
            verified = outcome.consensus.as_ref().is_some_and(|c| c.verified),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Consensus merged"
        );
        Ok(outcome)
    }

    /// Stored final mask and provenance of a user, framed for the client.
    pub fn load_mask(&self, image_id: &str, user_id: &str) -> Result<Vec<u8>, ServiceError> {
        let (mask, origin) = self.store.read_user_masks(image_id, user_id)?;
        Ok(encode_load_buffer(&mask, &origin))
    }

    /// Combined consensus of complete contributors, framed for the client.
    pub fn load_combined_mask(&self, image_id: &str) -> Result<Vec<u8>, ServiceError> {
        let mask = self.store.read_combined(image_id)?;
        Ok(encode_mask_buffer(&mask))
    }

    /// Export a user's final mask aligned with `source_image`.
    pub fn download_final_mask(
        &self,
        image_id: &str,
        user_id: &str,
        source_image: &Path,
    ) -> Result<MaskDownload, ServiceError> {
        let final_path = self.store.final_mask_path(image_id, user_id)?;
        let user_path = self.store.user_mask_path(image_id, user_id)?;
        for path in [&final_path, &user_path] {
            if !path.is_file() {
                return Err(StoreError::NotFound(path.clone()).into());
            }
        }
        let mask = align_mask(&final_path, source_image, self.config.segmentation.area())?;
        let file_name = format!("{image_id}_{user_id}_mask{}", mask.extension);
        debug!(image_id, user_id, %file_name, format = ?mask.format, "Final mask exported");
        Ok(MaskDownload { file_name, mask })
    }

    /// Flag a user's annotation as (in)complete and re-merge the image.
    pub fn mark_complete(
        &self,
        image_id: &str,
        user_id: &str,
        complete: bool,
    ) -> Result<MergeOutcome, ServiceError> {
        let key = ActionKey::segmentation(user_id, image_id);
        let Some(mut action) = self.actions.get(&key)? else {
            return Err(ServiceError::NoAction(key));
        };
        action.complete = complete;
        action.last_modification = OffsetDateTime::now_utc();
        self.actions.update(&action)?;
        info!(image_id, user_id, complete, "Completion updated");
        self.merge_image(image_id)
    }

    /// Predict a mask for the configured region of `image` from sparse labels.
    ///
    /// Returns one class byte per region pixel in row-major order.
    pub fn predict_mask(
        &self,
        image_id: &str,
        user_id: &str,
        image: &BandCube,
        request_json: &[u8],
    ) -> Result<Vec<u8>, ServiceError> {
        let request = ClassificationRequest::from_json(request_json)?;
        let settings = self.config.user_config(user_id);
        let shape = settings.mask_shape();
        let class_count = self.config.class_count();
        request.validate(shape.pixel_count(), class_count)?;

        let region = image
            .select(&settings.ai_model.bands)?
            .roi(settings.area())?;
        let mask = predict_region(&region, &request, &settings.ai_model, class_count, shape)?;
        debug!(image_id, user_id, "Prediction served");
        Ok(mask.to_bytes())
    }

    fn image_lock(&self, image_id: &str) -> Result<Arc<Mutex<()>>, ServiceError> {
        let mut locks = self.image_locks.lock().map_err(|_| ServiceError::Poisoned)?;
        Ok(locks.entry(image_id.to_string()).or_default().clone())
    }

    /// Users with both an action and a final mask for `image_id`, by user id.
    fn contributors(&self, image_id: &str) -> Result<Vec<Contributor>, ServiceError> {
        let mut contributors = Vec::new();
        for action in self.actions.find_for_image(image_id, SEGMENTATION_KIND)? {
            match self.store.read_final_mask(image_id, &action.user_id) {
                Ok(mask) => {
                    contributors.push(Contributor {
                        user_id: action.user_id,
                        mask,
                        complete: action.complete,
                    });
                }
                Err(StoreError::NotFound(path)) => {
                    warn!(
                        image_id,
                        user_id = %action.user_id,
                        path = %path.display(),
                        "Skipping contributor without a final mask"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        contributors.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(contributors)
    }

    fn write_back_scores(
        &self,
        image_id: &str,
        result: &ConsensusResult,
    ) -> Result<(), ServiceError> {
        for (user_id, score) in &result.scores {
            let key = ActionKey::segmentation(user_id.as_str(), image_id);
            let Some(mut action) = self.actions.get(&key)? else {
                continue;
            };
            action.score = Some(*score);
            action.unverified = !result.verified;
            self.actions.update(&action)?;
        }
        Ok(())
    }
}

impl From<CodecError> for ServiceError {
    fn from(err: CodecError) -> Self {
        Self::Store(StoreError::Codec(err))
    }
}
