use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use super::bins::BinnedMatrix;
use super::model::{BoostedForest, Node, Tree, softmax_in_place};

/// Training hyperparameters for leaf-wise boosting.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Maximum number of leaves per tree.
    pub num_leaves: usize,
    /// Maximum tree depth; `0` means unbounded.
    pub max_depth: usize,
    /// Shrinkage applied to every leaf value.
    pub learning_rate: f32,
    /// Maximum number of boosting rounds.
    pub n_estimators: usize,
    /// Number of bins used for split search.
    pub max_bins: usize,
    /// Minimum number of training rows in a leaf.
    pub min_data_in_leaf: usize,
    /// Minimum hessian sum in a leaf.
    pub min_sum_hessian: f64,
    /// L2 regularisation on leaf values.
    pub lambda_l2: f64,
    /// Rounds without validation improvement before stopping.
    pub early_stopping_rounds: usize,
    /// Worker threads used for histogram construction.
    pub n_threads: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            num_leaves: 31,
            max_depth: 0,
            learning_rate: 0.05,
            n_estimators: 100,
            max_bins: 128,
            min_data_in_leaf: 20,
            min_sum_hessian: 1e-3,
            lambda_l2: 0.0,
            early_stopping_rounds: 4,
            n_threads: 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("No training rows")]
    Empty,
    #[error("Need at least 2 classes, found {0}")]
    SingleClass(usize),
    #[error("Feature matrix has {rows} rows but {labels} labels")]
    Mismatch { rows: usize, labels: usize },
    #[error("Failed to build training thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Borrowed row-major feature matrix.
#[derive(Debug, Clone, Copy)]
pub struct FeatureRows<'a> {
    pub values: &'a [f32],
    pub n_features: usize,
}

impl<'a> FeatureRows<'a> {
    pub fn new(values: &'a [f32], n_features: usize) -> Self {
        Self { values, n_features }
    }

    pub fn n_rows(&self) -> usize {
        if self.n_features == 0 {
            0
        } else {
            self.values.len() / self.n_features
        }
    }

    pub fn row(&self, idx: usize) -> &'a [f32] {
        &self.values[idx * self.n_features..(idx + 1) * self.n_features]
    }
}

/// Labelled rows; `labels` holds original class ids.
#[derive(Debug, Clone, Copy)]
pub struct LabelledRows<'a> {
    pub rows: FeatureRows<'a>,
    pub labels: &'a [u8],
}

impl LabelledRows<'_> {
    fn check(&self) -> Result<(), TrainError> {
        let rows = self.rows.n_rows();
        if rows != self.labels.len() {
            return Err(TrainError::Mismatch {
                rows,
                labels: self.labels.len(),
            });
        }
        Ok(())
    }
}

/// Result of a training run.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    /// Forest truncated to the best iteration.
    pub forest: BoostedForest,
    /// Number of rounds kept in `forest`.
    pub best_iteration: usize,
    /// Number of rounds actually trained before stopping.
    pub iterations_run: usize,
    /// Validation multi-class log loss at `best_iteration`, when validating.
    pub best_validation_loss: Option<f64>,
}

/// Validation rows restricted to classes seen in training.
struct ValidationSet<'a> {
    rows: FeatureRows<'a>,
    row_ids: Vec<usize>,
    targets: Vec<usize>,
    raw: Vec<f32>,
}

/// Train a multi-class softmax booster with leaf-wise histogram trees.
///
/// When `validation` is given, boosting stops once its log loss has not
/// improved for `early_stopping_rounds` rounds and the forest is truncated
/// to the best round. Validation rows whose label never occurs in training
/// are ignored.
pub fn train_boosted_forest(
    train: LabelledRows<'_>,
    validation: Option<LabelledRows<'_>>,
    options: &TrainOptions,
) -> Result<TrainedModel, TrainError> {
    train.check()?;
    if let Some(validation) = &validation {
        validation.check()?;
    }
    let n = train.labels.len();
    if n == 0 {
        return Err(TrainError::Empty);
    }
    let mut classes: Vec<u8> = train.labels.to_vec();
    classes.sort_unstable();
    classes.dedup();
    if classes.len() < 2 {
        return Err(TrainError::SingleClass(classes.len()));
    }
    let k = classes.len();
    let class_index = |label: u8| classes.binary_search(&label).ok();
    let y: Vec<usize> = train
        .labels
        .iter()
        .filter_map(|&label| class_index(label))
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.n_threads.max(1))
        .build()?;
    let n_features = train.rows.n_features;
    let binned = BinnedMatrix::build(train.rows.values, n_features, options.max_bins);

    let init_raw: Vec<f32> = class_priors(&y, k)
        .iter()
        .map(|&p| p.max(1e-6).ln())
        .collect();
    let mut raw: Vec<f32> = repeat_logits(&init_raw, n);

    let mut validation = validation
        .map(|set| {
            let (row_ids, targets): (Vec<usize>, Vec<usize>) = set
                .labels
                .iter()
                .enumerate()
                .filter_map(|(row, &label)| class_index(label).map(|class_idx| (row, class_idx)))
                .unzip();
            let raw = repeat_logits(&init_raw, row_ids.len());
            ValidationSet {
                rows: set.rows,
                row_ids,
                targets,
                raw,
            }
        })
        .filter(|set| !set.row_ids.is_empty());

    let mut rounds: Vec<Vec<Tree>> = Vec::with_capacity(options.n_estimators);
    let mut best_iteration = 0usize;
    let mut best_loss: Option<f64> = None;
    let mut grad = vec![0f32; n * k];
    let mut hess = vec![0f32; n * k];

    for round in 0..options.n_estimators {
        compute_gradients(&raw, &y, k, &mut grad, &mut hess);

        let mut trees = Vec::with_capacity(k);
        let mut any_split = false;
        for class_idx in 0..k {
            let g: Vec<f32> = (0..n).map(|i| grad[i * k + class_idx]).collect();
            let h: Vec<f32> = (0..n).map(|i| hess[i * k + class_idx]).collect();
            let (tree, leaf_of_row) = grow_tree(&binned, &g, &h, options, &pool);
            any_split |= tree.leaf_count() > 1;
            for (i, &leaf) in leaf_of_row.iter().enumerate() {
                raw[i * k + class_idx] += tree.leaf_value(leaf as usize);
            }
            trees.push(tree);
        }
        if !any_split {
            debug!(round, "No tree in this round could split; stopping");
            break;
        }

        if let Some(set) = validation.as_mut() {
            for (pos, &row) in set.row_ids.iter().enumerate() {
                let features = set.rows.row(row);
                for (class_idx, tree) in trees.iter().enumerate() {
                    set.raw[pos * k + class_idx] += tree.predict(features);
                }
            }
        }
        rounds.push(trees);

        if let Some(set) = &validation {
            let loss = multi_logloss(&set.raw, &set.targets, k);
            if best_loss.is_none_or(|best| loss < best) {
                best_loss = Some(loss);
                best_iteration = round + 1;
            } else if round + 1 - best_iteration >= options.early_stopping_rounds {
                debug!(round, best_iteration, loss, "Early stopping");
                break;
            }
        }
    }

    let iterations_run = rounds.len();
    if best_loss.is_none() {
        best_iteration = iterations_run;
    }
    let mut forest = BoostedForest {
        classes,
        n_features,
        init_raw,
        rounds,
    };
    forest.truncate(best_iteration);
    debug!(
        iterations_run,
        best_iteration,
        classes = forest.classes.len(),
        "Boosting finished"
    );
    Ok(TrainedModel {
        forest,
        best_iteration,
        iterations_run,
        best_validation_loss: best_loss,
    })
}

fn repeat_logits(init_raw: &[f32], n_rows: usize) -> Vec<f32> {
    init_raw
        .iter()
        .copied()
        .cycle()
        .take(n_rows * init_raw.len())
        .collect()
}

fn class_priors(y: &[usize], n_classes: usize) -> Vec<f32> {
    let mut counts = vec![0usize; n_classes];
    for &label in y {
        if label < n_classes {
            counts[label] += 1;
        }
    }
    let total = y.len().max(1) as f32;
    counts.into_iter().map(|c| c as f32 / total).collect()
}

/// Softmax cross-entropy gradients; the hessian carries the `K/(K-1)` factor.
fn compute_gradients(raw: &[f32], y: &[usize], k: usize, grad: &mut [f32], hess: &mut [f32]) {
    let factor = k as f32 / (k as f32 - 1.0);
    let mut probs = vec![0f32; k];
    for (i, &yi) in y.iter().enumerate() {
        probs.copy_from_slice(&raw[i * k..(i + 1) * k]);
        softmax_in_place(&mut probs);
        for (class_idx, &p) in probs.iter().enumerate() {
            let target = if yi == class_idx { 1.0 } else { 0.0 };
            grad[i * k + class_idx] = p - target;
            hess[i * k + class_idx] = (factor * p * (1.0 - p)).max(1e-6);
        }
    }
}

fn multi_logloss(raw: &[f32], targets: &[usize], k: usize) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let mut probs = vec![0f32; k];
    let mut total = 0f64;
    for (pos, &target) in targets.iter().enumerate() {
        probs.copy_from_slice(&raw[pos * k..(pos + 1) * k]);
        softmax_in_place(&mut probs);
        total -= f64::from(probs[target].max(1e-15)).ln();
    }
    total / targets.len() as f64
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

#[derive(Debug)]
struct GrowingLeaf {
    node: usize,
    depth: usize,
    rows: Vec<u32>,
    best: Option<SplitCandidate>,
}

/// Grow one tree leaf-wise, always splitting the leaf with the largest gain.
///
/// Returns the tree plus, for every training row, the index of its leaf node.
fn grow_tree(
    binned: &BinnedMatrix,
    grad: &[f32],
    hess: &[f32],
    options: &TrainOptions,
    pool: &rayon::ThreadPool,
) -> (Tree, Vec<u32>) {
    let n = binned.n_rows();
    let depth_allows = |depth: usize| options.max_depth == 0 || depth < options.max_depth;
    let find = |rows: &[u32], depth: usize| {
        if depth_allows(depth) {
            best_split(binned, rows, grad, hess, options, pool)
        } else {
            None
        }
    };

    let mut nodes = vec![Node::Leaf { value: 0.0 }];
    let root_rows: Vec<u32> = (0..n as u32).collect();
    let root_best = find(&root_rows, 0);
    let mut leaves = vec![GrowingLeaf {
        node: 0,
        depth: 0,
        rows: root_rows,
        best: root_best,
    }];

    while leaves.len() < options.num_leaves.max(1) {
        let mut pick: Option<(usize, SplitCandidate)> = None;
        for (idx, leaf) in leaves.iter().enumerate() {
            let Some(candidate) = leaf.best else {
                continue;
            };
            if pick.is_none_or(|(_, best)| candidate.gain > best.gain) {
                pick = Some((idx, candidate));
            }
        }
        let Some((leaf_idx, split)) = pick else {
            break;
        };
        let leaf = leaves.swap_remove(leaf_idx);
        let column = binned.column(split.feature);
        let (left_rows, right_rows): (Vec<u32>, Vec<u32>) = leaf
            .rows
            .iter()
            .partition(|&&row| (column[row as usize] as usize) <= split.bin);

        let left = nodes.len();
        let right = left + 1;
        nodes.push(Node::Leaf { value: 0.0 });
        nodes.push(Node::Leaf { value: 0.0 });
        nodes[leaf.node] = Node::Split {
            feature: split.feature as u32,
            threshold: binned.mapper(split.feature).threshold(split.bin),
            left: left as u32,
            right: right as u32,
        };
        let depth = leaf.depth + 1;
        let left_best = find(&left_rows, depth);
        let right_best = find(&right_rows, depth);
        leaves.push(GrowingLeaf {
            node: left,
            depth,
            rows: left_rows,
            best: left_best,
        });
        leaves.push(GrowingLeaf {
            node: right,
            depth,
            rows: right_rows,
            best: right_best,
        });
    }

    let mut leaf_of_row = vec![0u32; n];
    for leaf in &leaves {
        let (g, h) = leaf.rows.iter().fold((0f64, 0f64), |(g, h), &row| {
            (g + f64::from(grad[row as usize]), h + f64::from(hess[row as usize]))
        });
        let value = -f64::from(options.learning_rate) * g / (h + options.lambda_l2).max(1e-12);
        nodes[leaf.node] = Node::Leaf {
            value: value as f32,
        };
        for &row in &leaf.rows {
            leaf_of_row[row as usize] = leaf.node as u32;
        }
    }
    (Tree::new(nodes), leaf_of_row)
}

/// Best split of `rows` across all features; features are scanned in parallel
/// and the winner picked in feature order so results do not depend on scheduling.
fn best_split(
    binned: &BinnedMatrix,
    rows: &[u32],
    grad: &[f32],
    hess: &[f32],
    options: &TrainOptions,
    pool: &rayon::ThreadPool,
) -> Option<SplitCandidate> {
    if rows.len() < 2 * options.min_data_in_leaf.max(1) {
        return None;
    }
    let per_feature: Vec<Option<SplitCandidate>> = pool.install(|| {
        (0..binned.n_features())
            .into_par_iter()
            .map(|feature| best_split_for_feature(binned, feature, rows, grad, hess, options))
            .collect()
    });
    let mut best: Option<SplitCandidate> = None;
    for candidate in per_feature.into_iter().flatten() {
        if best.is_none_or(|current| candidate.gain > current.gain) {
            best = Some(candidate);
        }
    }
    best
}

fn best_split_for_feature(
    binned: &BinnedMatrix,
    feature: usize,
    rows: &[u32],
    grad: &[f32],
    hess: &[f32],
    options: &TrainOptions,
) -> Option<SplitCandidate> {
    let n_bins = binned.mapper(feature).n_bins();
    if n_bins < 2 {
        return None;
    }
    let column = binned.column(feature);
    let mut hist_g = vec![0f64; n_bins];
    let mut hist_h = vec![0f64; n_bins];
    let mut hist_n = vec![0usize; n_bins];
    for &row in rows {
        let row = row as usize;
        let bin = column[row] as usize;
        hist_g[bin] += f64::from(grad[row]);
        hist_h[bin] += f64::from(hess[row]);
        hist_n[bin] += 1;
    }
    let total_g: f64 = hist_g.iter().sum();
    let total_h: f64 = hist_h.iter().sum();
    let total_n = rows.len();
    let lambda = options.lambda_l2;
    let parent = total_g * total_g / (total_h + lambda).max(1e-12);

    let mut best: Option<SplitCandidate> = None;
    let (mut left_g, mut left_h, mut left_n) = (0f64, 0f64, 0usize);
    for bin in 0..n_bins - 1 {
        left_g += hist_g[bin];
        left_h += hist_h[bin];
        left_n += hist_n[bin];
        let right_n = total_n - left_n;
        if left_n < options.min_data_in_leaf {
            continue;
        }
        if right_n < options.min_data_in_leaf {
            break;
        }
        let right_g = total_g - left_g;
        let right_h = total_h - left_h;
        if left_h < options.min_sum_hessian || right_h < options.min_sum_hessian {
            continue;
        }
        let gain = left_g * left_g / (left_h + lambda) + right_g * right_g / (right_h + lambda)
            - parent;
        if gain > 1e-12 && best.is_none_or(|current| gain > current.gain) {
            best = Some(SplitCandidate { feature, bin, gain });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs(n_per_class: usize) -> (Vec<f32>, Vec<u8>) {
        let mut values = Vec::new();
        let mut labels = Vec::new();
        for i in 0..n_per_class {
            let jitter = (i % 10) as f32 * 0.01;
            values.extend_from_slice(&[0.1 + jitter, 5.0]);
            labels.push(2);
            values.extend_from_slice(&[0.9 - jitter, 5.0]);
            labels.push(5);
        }
        (values, labels)
    }

    #[test]
    fn learns_separable_classes() {
        let (values, labels) = two_blobs(50);
        let train = LabelledRows {
            rows: FeatureRows::new(&values, 2),
            labels: &labels,
        };
        let model = train_boosted_forest(train, None, &TrainOptions::default()).unwrap();
        assert_eq!(model.forest.classes, vec![2, 5]);
        assert_eq!(model.best_iteration, model.iterations_run);
        assert_eq!(model.forest.predict_label(&[0.12, 5.0]), 2);
        assert_eq!(model.forest.predict_label(&[0.88, 5.0]), 5);
    }

    #[test]
    fn single_class_is_rejected() {
        let values = vec![0.0f32; 10];
        let labels = vec![1u8; 10];
        let train = LabelledRows {
            rows: FeatureRows::new(&values, 1),
            labels: &labels,
        };
        let err = train_boosted_forest(train, None, &TrainOptions::default()).unwrap_err();
        assert!(matches!(err, TrainError::SingleClass(1)));
    }

    #[test]
    fn mismatched_rows_are_rejected() {
        let values = vec![0.0f32; 10];
        let labels = vec![0u8, 1];
        let train = LabelledRows {
            rows: FeatureRows::new(&values, 1),
            labels: &labels,
        };
        assert!(matches!(
            train_boosted_forest(train, None, &TrainOptions::default()),
            Err(TrainError::Mismatch { rows: 10, labels: 2 })
        ));
    }

    #[test]
    fn tiny_leaves_fall_back_to_priors() {
        let values = vec![0.0f32, 1.0, 2.0];
        let labels = vec![0u8, 0, 1];
        let train = LabelledRows {
            rows: FeatureRows::new(&values, 1),
            labels: &labels,
        };
        let model = train_boosted_forest(train, None, &TrainOptions::default()).unwrap();
        assert_eq!(model.iterations_run, 0);
        assert_eq!(model.forest.predict_label(&[2.0]), 0);
    }

    #[test]
    fn early_stopping_truncates_to_best_round() {
        let (values, labels) = two_blobs(60);
        let (val_values, val_labels) = two_blobs(20);
        let train = LabelledRows {
            rows: FeatureRows::new(&values, 2),
            labels: &labels,
        };
        let validation = LabelledRows {
            rows: FeatureRows::new(&val_values, 2),
            labels: &val_labels,
        };
        let options = TrainOptions {
            n_estimators: 40,
            ..TrainOptions::default()
        };
        let model = train_boosted_forest(train, Some(validation), &options).unwrap();
        assert!(model.best_validation_loss.is_some());
        assert_eq!(model.forest.n_rounds(), model.best_iteration);
        assert!(model.best_iteration <= model.iterations_run);
        assert_eq!(model.forest.predict_label(&[0.1, 5.0]), 2);
    }

    #[test]
    fn training_is_deterministic_across_thread_counts() {
        let (values, labels) = two_blobs(40);
        let train = LabelledRows {
            rows: FeatureRows::new(&values, 2),
            labels: &labels,
        };
        let single = train_boosted_forest(train, None, &TrainOptions::default()).unwrap();
        let options = TrainOptions {
            n_threads: 4,
            ..TrainOptions::default()
        };
        let multi = train_boosted_forest(train, None, &options).unwrap();
        assert_eq!(single.forest.rounds, multi.forest.rounds);
    }
}
