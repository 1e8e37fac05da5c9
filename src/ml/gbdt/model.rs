/// A node of a regression tree stored in a flat arena.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Terminal node; `value` already includes shrinkage.
    Leaf { value: f32 },
    /// `feature <= threshold` goes left.
    Split {
        feature: u32,
        threshold: f32,
        left: u32,
        right: u32,
    },
}

/// Regression tree used as a weak learner; node `0` is the root.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Single-leaf tree.
    pub fn constant(value: f32) -> Self {
        Self::new(vec![Node::Leaf { value }])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Value of leaf node `idx`, or `0.0` for split nodes.
    pub fn leaf_value(&self, idx: usize) -> f32 {
        match self.nodes.get(idx) {
            Some(Node::Leaf { value }) => *value,
            _ => 0.0,
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, Node::Leaf { .. }))
            .count()
    }

    /// Predict the tree value for a feature vector.
    pub fn predict(&self, features: &[f32]) -> f32 {
        let mut idx = 0usize;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = features.get(*feature as usize).copied().unwrap_or(0.0);
                    idx = if value <= *threshold { *left } else { *right } as usize;
                }
                None => return 0.0,
            }
        }
    }
}

/// Gradient-boosted tree ensemble for multi-class classification.
#[derive(Debug, Clone)]
pub struct BoostedForest {
    /// Original class ids, indexed by internal class index.
    pub classes: Vec<u8>,
    /// Number of `f32` values per feature vector.
    pub n_features: usize,
    /// Initial raw logits before boosting rounds.
    pub init_raw: Vec<f32>,
    /// Shape: `[n_rounds][n_classes]`.
    pub rounds: Vec<Vec<Tree>>,
}

impl BoostedForest {
    /// Validate structural invariants of the model.
    pub fn validate(&self) -> Result<(), String> {
        if self.classes.len() < 2 {
            return Err("Model must contain at least 2 classes".to_string());
        }
        if self.init_raw.len() != self.classes.len() {
            return Err("init_raw length must match classes length".to_string());
        }
        for (round_idx, round) in self.rounds.iter().enumerate() {
            if round.len() != self.classes.len() {
                return Err(format!(
                    "Round {round_idx} has {} trees but expected {}",
                    round.len(),
                    self.classes.len()
                ));
            }
        }
        Ok(())
    }

    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// Drop every round after the first `n_rounds`.
    pub fn truncate(&mut self, n_rounds: usize) {
        self.rounds.truncate(n_rounds);
    }

    /// Predict raw logits for a feature vector.
    pub fn predict_raw(&self, features: &[f32]) -> Vec<f32> {
        let mut raw = self.init_raw.clone();
        for round in &self.rounds {
            for (class_idx, tree) in round.iter().enumerate() {
                raw[class_idx] += tree.predict(features);
            }
        }
        raw
    }

    /// Predict class probabilities for a feature vector.
    pub fn predict_proba(&self, features: &[f32]) -> Vec<f32> {
        softmax(&self.predict_raw(features))
    }

    /// Predict the best internal class index for a feature vector.
    pub fn predict_class_index(&self, features: &[f32]) -> usize {
        argmax(&self.predict_raw(features))
    }

    /// Predict the original class id for a feature vector.
    pub fn predict_label(&self, features: &[f32]) -> u8 {
        self.classes
            .get(self.predict_class_index(features))
            .copied()
            .unwrap_or(0)
    }
}

/// Compute a numerically-stable softmax for a set of logits.
pub fn softmax(raw: &[f32]) -> Vec<f32> {
    let mut out = raw.to_vec();
    softmax_in_place(&mut out);
    out
}

/// In-place variant of [`softmax`].
pub fn softmax_in_place(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let max = values
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, |a, b| a.max(b));
    let mut sum = 0.0f32;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum == 0.0 || !sum.is_finite() {
        let uniform = 1.0 / values.len() as f32;
        values.iter_mut().for_each(|v| *v = uniform);
        return;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}

/// Index of the largest value; the first one wins ties.
pub fn argmax(values: &[f32]) -> usize {
    let mut best_idx = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &v) in values.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = idx;
        }
    }
    best_idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_tree() -> Tree {
        Tree::new(vec![
            Node::Split {
                feature: 1,
                threshold: 0.5,
                left: 1,
                right: 2,
            },
            Node::Leaf { value: -1.0 },
            Node::Leaf { value: 2.0 },
        ])
    }

    #[test]
    fn tree_predict_branches() {
        let tree = split_tree();
        assert_eq!(tree.predict(&[9.0, 0.0]), -1.0);
        assert_eq!(tree.predict(&[9.0, 0.5]), -1.0);
        assert_eq!(tree.predict(&[9.0, 0.6]), 2.0);
        assert_eq!(tree.leaf_count(), 2);
        assert_eq!(tree.leaf_value(2), 2.0);
        assert_eq!(tree.leaf_value(0), 0.0);
    }

    #[test]
    fn forest_maps_back_to_original_labels() {
        let mirrored = Tree::new(vec![
            Node::Split {
                feature: 1,
                threshold: 0.5,
                left: 1,
                right: 2,
            },
            Node::Leaf { value: 2.0 },
            Node::Leaf { value: -1.0 },
        ]);
        let forest = BoostedForest {
            classes: vec![3, 7],
            n_features: 2,
            init_raw: vec![0.0, 0.0],
            rounds: vec![vec![mirrored, split_tree()]],
        };
        forest.validate().unwrap();
        assert_eq!(forest.predict_label(&[0.0, 0.0]), 3);
        assert_eq!(forest.predict_label(&[0.0, 1.0]), 7);
        let proba = forest.predict_proba(&[0.0, 1.0]);
        assert!((proba.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn softmax_is_stable_for_large_logits() {
        let p = softmax(&[1000.0, 1000.0]);
        assert!((p[0] - 0.5).abs() < 1e-6);
        assert_eq!(argmax(&[1.0, 3.0, 3.0]), 1);
    }
}
