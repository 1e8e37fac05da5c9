//! Reproducible stratified train/validation split for sparse pixel labels.
//!
//! Samples are ordered inside each class by a blake3 hash of
//! `seed|label|pixel`, so the same request always yields the same split
//! without carrying RNG state.

use std::collections::BTreeMap;

/// Fraction of each class held out for validation.
pub const VALIDATION_FRACTION: f64 = 0.3;

/// Fixed seed mixed into the ordering hash.
pub const SPLIT_SEED: u64 = 42;

/// Indices into the labelled sample list, split into train and validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Split `labels` per class, holding out `round(n * fraction)` of each class.
///
/// A class with a single sample stays entirely in training, and at least one
/// sample of every class is kept for training. `keys` identify each sample
/// (pixel indices) and only affect the ordering.
pub fn stratified_split(keys: &[usize], labels: &[u8], fraction: f64, seed: u64) -> Split {
    let mut by_class: BTreeMap<u8, Vec<(u128, usize)>> = BTreeMap::new();
    for (idx, (&key, &label)) in keys.iter().zip(labels).enumerate() {
        let hash = blake3::hash(format!("{seed}|{label}|{key}").as_bytes());
        let mut head = [0u8; 16];
        head.copy_from_slice(&hash.as_bytes()[..16]);
        by_class
            .entry(label)
            .or_default()
            .push((u128::from_le_bytes(head), idx));
    }

    let mut split = Split::default();
    for (_label, mut entries) in by_class {
        entries.sort_unstable();
        let n = entries.len();
        let val_n = if n < 2 {
            0
        } else {
            (((n as f64) * fraction).round() as usize).min(n - 1)
        };
        for (pos, (_hash, idx)) in entries.into_iter().enumerate() {
            if pos < val_n {
                split.validation.push(idx);
            } else {
                split.train.push(idx);
            }
        }
    }
    split.train.sort_unstable();
    split.validation.sort_unstable();
    split
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_is_stratified_and_reproducible() {
        let keys: Vec<usize> = (0..30).map(|i| i * 7).collect();
        let labels: Vec<u8> = (0..30).map(|i| if i < 20 { 0 } else { 3 }).collect();
        let first = stratified_split(&keys, &labels, VALIDATION_FRACTION, SPLIT_SEED);
        let second = stratified_split(&keys, &labels, VALIDATION_FRACTION, SPLIT_SEED);
        assert_eq!(first, second);

        let val_zero = first.validation.iter().filter(|&&i| labels[i] == 0).count();
        let val_three = first.validation.iter().filter(|&&i| labels[i] == 3).count();
        assert_eq!(val_zero, 6);
        assert_eq!(val_three, 3);
        assert_eq!(first.train.len() + first.validation.len(), 30);
    }

    #[test]
    fn singleton_classes_stay_in_training() {
        let split = stratified_split(&[5, 9, 11], &[0, 1, 1], VALIDATION_FRACTION, SPLIT_SEED);
        assert!(split.train.contains(&0));
        assert_eq!(split.validation.len(), 1);
        assert_eq!(split.train.len(), 2);
    }

    #[test]
    fn seed_changes_ordering_not_sizes() {
        let keys: Vec<usize> = (0..40).collect();
        let labels: Vec<u8> = (0..40).map(|i| (i % 2) as u8).collect();
        let a = stratified_split(&keys, &labels, VALIDATION_FRACTION, 1);
        let b = stratified_split(&keys, &labels, VALIDATION_FRACTION, 2);
        assert_eq!(a.validation.len(), b.validation.len());
        assert_ne!(a.validation, b.validation);
    }
}
