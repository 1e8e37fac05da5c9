//! Majority-vote merge of per-user final masks.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::Array2;
use thiserror::Error;
use tracing::debug;

use super::score::{agreement_scores, is_verified};
use crate::{
    mask::{Mask, MaskShape},
    ml::metrics::ScoreMetric,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("Mask of user {user_id} is {found:?}, expected {expected:?}")]
    ShapeMismatch {
        user_id: String,
        expected: MaskShape,
        found: MaskShape,
    },
}

/// One user's final mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Contributor {
    pub user_id: String,
    pub mask: Mask,
    pub complete: bool,
}

/// Which contributors take part in a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeScope {
    /// Every contributor, complete or not; feeds the current consensus.
    All,
    /// Only contributors flagged complete; feeds the combined final mask.
    CompleteOnly,
}

impl MergeScope {
    fn includes(self, contributor: &Contributor) -> bool {
        match self {
            Self::All => true,
            Self::CompleteOnly => contributor.complete,
        }
    }
}

/// Consensus mask plus per-user agreement.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusResult {
    pub mask: Mask,
    /// Integer percentage per contributing user.
    pub scores: BTreeMap<String, i64>,
    pub verified: bool,
    /// Users that took part, in input order.
    pub users: Vec<String>,
}

/// Merge the contributors selected by `scope`.
///
/// Each pixel takes the class most contributors assigned to it; ties go to
/// the lowest class id. Returns `Ok(None)` when nobody is selected.
pub fn merge(
    contributors: &[Contributor],
    scope: MergeScope,
    metric: ScoreMetric,
    unverified_threshold: usize,
) -> Result<Option<ConsensusResult>, MergeError> {
    let selected: Vec<&Contributor> = contributors
        .iter()
        .filter(|contributor| scope.includes(contributor))
        .collect();
    let Some(first) = selected.first() else {
        debug!(?scope, "No contributors to merge");
        return Ok(None);
    };
    let shape = first.mask.shape();
    if let Some(bad) = selected.iter().find(|c| c.mask.shape() != shape) {
        return Err(MergeError::ShapeMismatch {
            user_id: bad.user_id.clone(),
            expected: shape,
            found: bad.mask.shape(),
        });
    }

    let masks: Vec<&Mask> = selected.iter().map(|c| &c.mask).collect();
    let consensus = majority_vote(&masks, shape);
    let pairs: Vec<(&str, &Mask)> = selected
        .iter()
        .map(|c| (c.user_id.as_str(), &c.mask))
        .collect();
    let scores = agreement_scores(&pairs, &consensus, metric);
    Ok(Some(ConsensusResult {
        mask: consensus,
        scores,
        verified: is_verified(selected.len(), unverified_threshold),
        users: selected.iter().map(|c| c.user_id.clone()).collect(),
    }))
}

/// Per-pixel mode of `masks`, lowest class winning ties.
pub fn majority_vote(masks: &[&Mask], shape: MaskShape) -> Mask {
    let classes: Vec<u8> = masks
        .iter()
        .flat_map(|mask| mask.labels().iter().copied())
        .collect::<BTreeSet<u8>>()
        .into_iter()
        .collect();
    let mut slot_of = [0usize; 256];
    for (slot, &class_id) in classes.iter().enumerate() {
        slot_of[class_id as usize] = slot;
    }
    let mut votes = vec![0u32; classes.len()];
    let labels = Array2::from_shape_fn((shape.height, shape.width), |pos| {
        votes.iter_mut().for_each(|count| *count = 0);
        for mask in masks {
            votes[slot_of[mask.labels()[pos] as usize]] += 1;
        }
        let mut best = 0usize;
        for (slot, &count) in votes.iter().enumerate() {
            if count > votes[best] {
                best = slot;
            }
        }
        classes.get(best).copied().unwrap_or(0)
    });
    Mask::new(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contributor(user_id: &str, labels: &[u8], complete: bool) -> Contributor {
        let side = (labels.len() as f64).sqrt() as usize;
        Contributor {
            user_id: user_id.to_string(),
            mask: Mask::from_vec(MaskShape::new(side, side), labels.to_vec()).unwrap(),
            complete,
        }
    }

    #[test]
    fn zero_contributors_is_a_no_op() {
        assert_eq!(merge(&[], MergeScope::All, ScoreMetric::F1, 1), Ok(None));
        let incomplete = [contributor("a", &[0, 1, 1, 0], false)];
        assert_eq!(
            merge(&incomplete, MergeScope::CompleteOnly, ScoreMetric::F1, 1),
            Ok(None)
        );
    }

    #[test]
    fn ties_go_to_lowest_class() {
        let masks = [
            contributor("a", &[2, 1, 0, 2], true),
            contributor("b", &[1, 2, 0, 0], true),
        ];
        let result = merge(&masks, MergeScope::All, ScoreMetric::F1, 1)
            .unwrap()
            .unwrap();
        assert_eq!(result.mask.to_bytes(), vec![1, 1, 0, 0]);
        assert!(result.verified);
    }

    #[test]
    fn majority_wins_and_order_does_not_matter() {
        let a = contributor("a", &[0, 1, 2, 2], false);
        let b = contributor("b", &[0, 1, 1, 2], false);
        let c = contributor("c", &[0, 2, 1, 2], true);
        let forward = merge(
            &[a.clone(), b.clone(), c.clone()],
            MergeScope::All,
            ScoreMetric::Jaccard,
            1,
        )
        .unwrap()
        .unwrap();
        let backward = merge(&[c, b, a], MergeScope::All, ScoreMetric::Jaccard, 1)
            .unwrap()
            .unwrap();
        assert_eq!(forward.mask.to_bytes(), vec![0, 1, 1, 2]);
        assert_eq!(forward.mask, backward.mask);
        assert_eq!(forward.scores, backward.scores);
    }

    #[test]
    fn complete_scope_filters_contributors() {
        let masks = [
            contributor("a", &[0, 0, 0, 0], true),
            contributor("b", &[1, 1, 1, 1], false),
            contributor("c", &[1, 1, 1, 1], false),
        ];
        let result = merge(&masks, MergeScope::CompleteOnly, ScoreMetric::F1, 1)
            .unwrap()
            .unwrap();
        assert_eq!(result.mask.to_bytes(), vec![0, 0, 0, 0]);
        assert_eq!(result.users, vec!["a".to_string()]);
        assert!(!result.verified);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let masks = [
            contributor("a", &[0, 0, 0, 0], true),
            contributor("b", &[0; 9], true),
        ];
        assert!(matches!(
            merge(&masks, MergeScope::All, ScoreMetric::F1, 1),
            Err(MergeError::ShapeMismatch { user_id, .. }) if user_id == "b"
        ));
    }
}
