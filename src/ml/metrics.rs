//! Agreement metrics between class-label sequences.

use serde::{Deserialize, Serialize};

/// Metric used to score a user's mask against a reference mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMetric {
    /// Macro-averaged intersection over union.
    Jaccard,
    /// Macro-averaged F1.
    #[default]
    F1,
    /// Fraction of identical labels.
    Accuracy,
}

#[derive(Debug, Clone)]
/// Confusion matrix for a `K`-class labelling.
pub struct ConfusionMatrix {
    /// Number of classes.
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u64>,
}

impl ConfusionMatrix {
    /// Create an empty `KxK` confusion matrix.
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    /// Tally two aligned label sequences; the shorter one bounds the count.
    pub fn from_labels(truth: &[u8], predicted: &[u8]) -> Self {
        let n_classes = truth
            .iter()
            .chain(predicted)
            .copied()
            .max()
            .map_or(0, |max| max as usize + 1);
        let mut cm = Self::new(n_classes);
        for (&t, &p) in truth.iter().zip(predicted) {
            cm.add(t as usize, p as usize);
        }
        cm
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u64 {
        self.counts[truth * self.n_classes + predicted]
    }

    /// Classes that occur in either the truth or the predictions.
    pub fn present_classes(&self) -> Vec<usize> {
        (0..self.n_classes)
            .filter(|&class_idx| {
                (0..self.n_classes)
                    .any(|j| self.get(class_idx, j) > 0 || self.get(j, class_idx) > 0)
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
/// Per-class counts derived from a confusion matrix.
pub struct PerClassStats {
    pub true_positive: f64,
    pub false_positive: f64,
    pub false_negative: f64,
    /// `TP / (TP + FP)`.
    pub precision: f64,
    /// `TP / (TP + FN)`.
    pub recall: f64,
    /// Total number of true examples for the class.
    pub support: u64,
}

impl PerClassStats {
    /// `2TP / (2TP + FP + FN)`; zero when the class never occurs.
    pub fn f1(&self) -> f64 {
        let denom = 2.0 * self.true_positive + self.false_positive + self.false_negative;
        if denom == 0.0 {
            0.0
        } else {
            2.0 * self.true_positive / denom
        }
    }

    /// `TP / (TP + FP + FN)`; zero when the class never occurs.
    pub fn jaccard(&self) -> f64 {
        let denom = self.true_positive + self.false_positive + self.false_negative;
        if denom == 0.0 {
            0.0
        } else {
            self.true_positive / denom
        }
    }
}

/// Compute per-class precision and recall from a confusion matrix.
pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    let mut stats = Vec::with_capacity(k);
    for class_idx in 0..k {
        let tp = cm.get(class_idx, class_idx) as f64;
        let mut fp = 0f64;
        let mut fn_ = 0f64;
        let mut support = 0u64;
        for j in 0..k {
            let v = cm.get(class_idx, j);
            support = support.saturating_add(v);
            if j != class_idx {
                fn_ += v as f64;
            }
        }
        for i in 0..k {
            if i != class_idx {
                fp += cm.get(i, class_idx) as f64;
            }
        }
        let precision = if tp + fp == 0.0 { 0.0 } else { tp / (tp + fp) };
        let recall = if tp + fn_ == 0.0 { 0.0 } else { tp / (tp + fn_) };
        stats.push(PerClassStats {
            true_positive: tp,
            false_positive: fp,
            false_negative: fn_,
            precision,
            recall,
            support,
        });
    }
    stats
}

/// Compute overall accuracy from a confusion matrix.
pub fn accuracy(cm: &ConfusionMatrix) -> f64 {
    let mut correct = 0u64;
    let mut total = 0u64;
    for truth in 0..cm.n_classes {
        for predicted in 0..cm.n_classes {
            let v = cm.get(truth, predicted);
            total += v;
            if truth == predicted {
                correct += v;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        (correct as f64) / (total as f64)
    }
}

/// Unweighted mean of per-class F1 over the classes present.
pub fn macro_f1(cm: &ConfusionMatrix) -> f64 {
    macro_average(cm, PerClassStats::f1)
}

/// Unweighted mean of per-class Jaccard index over the classes present.
pub fn macro_jaccard(cm: &ConfusionMatrix) -> f64 {
    macro_average(cm, PerClassStats::jaccard)
}

fn macro_average(cm: &ConfusionMatrix, per_class: impl Fn(&PerClassStats) -> f64) -> f64 {
    let present = cm.present_classes();
    if present.is_empty() {
        return 0.0;
    }
    let stats = precision_recall_by_class(cm);
    let sum: f64 = present.iter().map(|&idx| per_class(&stats[idx])).sum();
    sum / present.len() as f64
}

/// Evaluate `metric` on aligned label sequences.
pub fn evaluate(metric: ScoreMetric, truth: &[u8], predicted: &[u8]) -> f64 {
    let cm = ConfusionMatrix::from_labels(truth, predicted);
    match metric {
        ScoreMetric::Jaccard => macro_jaccard(&cm),
        ScoreMetric::F1 => macro_f1(&cm),
        ScoreMetric::Accuracy => accuracy(&cm),
    }
}

/// `metric` as an integer percentage, rounded half to even.
pub fn percent_score(metric: ScoreMetric, truth: &[u8], predicted: &[u8]) -> i64 {
    (100.0 * evaluate(metric, truth, predicted)).round_ties_even() as i64
}
