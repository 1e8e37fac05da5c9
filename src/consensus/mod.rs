//! Consensus of per-user masks: merging, scoring and the services around it.

pub mod actions;
pub mod merge;
pub mod score;
pub mod service;

pub use actions::{
    ActionError, ActionKey, ActionRepository, AnnotationAction, InMemoryActions, SqliteActions,
};
pub use merge::{ConsensusResult, Contributor, MergeError, MergeScope, merge};
pub use service::{AnnotationService, MaskDownload, MergeOutcome, ServiceError};
