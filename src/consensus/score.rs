//! Agreement scores written back to each contributor's action.

use std::collections::BTreeMap;

use crate::{
    mask::Mask,
    ml::metrics::{ScoreMetric, percent_score},
};

/// Score every contributor against a reference mask.
///
/// With exactly two contributors each is scored against the other's mask;
/// otherwise every mask is scored against `consensus`. Scores are integer
/// percentages.
pub fn agreement_scores(
    contributors: &[(&str, &Mask)],
    consensus: &Mask,
    metric: ScoreMetric,
) -> BTreeMap<String, i64> {
    let consensus_bytes = consensus.to_bytes();
    let pairwise: Option<[Vec<u8>; 2]> = match contributors {
        [(_, a), (_, b)] => Some([a.to_bytes(), b.to_bytes()]),
        _ => None,
    };
    contributors
        .iter()
        .enumerate()
        .map(|(idx, (user_id, mask))| {
            let own = mask.to_bytes();
            let reference = match &pairwise {
                Some(pair) => &pair[1 - idx],
                None => &consensus_bytes,
            };
            (user_id.to_string(), percent_score(metric, reference, &own))
        })
        .collect()
}

/// A consensus is trusted once more than `unverified_threshold` users contributed.
pub fn is_verified(contributor_count: usize, unverified_threshold: usize) -> bool {
    contributor_count > unverified_threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::MaskShape;

    fn mask(labels: &[u8]) -> Mask {
        Mask::from_vec(MaskShape::new(2, 2), labels.to_vec()).unwrap()
    }

    #[test]
    fn two_contributors_score_each_other() {
        let a = mask(&[0, 1, 1, 2]);
        let b = mask(&[0, 1, 2, 2]);
        let consensus = mask(&[0, 1, 1, 2]);
        let scores = agreement_scores(&[("a", &a), ("b", &b)], &consensus, ScoreMetric::Accuracy);
        assert_eq!(scores["a"], 75);
        assert_eq!(scores["b"], 75);
    }

    #[test]
    fn larger_groups_score_against_consensus() {
        let a = mask(&[0, 1, 1, 2]);
        let b = mask(&[0, 1, 2, 2]);
        let c = mask(&[0, 1, 1, 2]);
        let scores = agreement_scores(
            &[("a", &a), ("b", &b), ("c", &c)],
            &a,
            ScoreMetric::Accuracy,
        );
        assert_eq!(scores["a"], 100);
        assert_eq!(scores["b"], 75);
        assert_eq!(scores["c"], 100);
    }

    #[test]
    fn verified_only_above_threshold() {
        for threshold in 0..5 {
            for count in 0..6 {
                assert_eq!(is_verified(count, threshold), count > threshold);
            }
        }
        assert!(!is_verified(1, 1));
        assert!(is_verified(2, 1));
    }
}
