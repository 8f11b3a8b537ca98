//! Gradient boosted regression trees.
//!
//! L2 regression with leaf-wise tree growth (the best-gain leaf is split
//! first until `num_leaves` is reached), exact greedy split search over
//! sorted feature values, shrinkage baked into leaf outputs and early
//! stopping on validation RMSE.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::error::{ForecastError, ForecastResult};
use crate::logger::Logger;
use crate::metrics::rmse;

/// Minimum gain for a split to be accepted.
const MIN_SPLIT_GAIN: f64 = 1e-12;

/// Boosting hyper-parameters recorded with every trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterParams {
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub max_rounds: usize,
    pub early_stopping_rounds: usize,
    pub min_data_in_leaf: usize,
    pub lambda_l2: f64,
    pub bagging_fraction: f64,
    pub seed: u64,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self::from(&TrainingConfig::default())
    }
}

impl From<&TrainingConfig> for BoosterParams {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            num_leaves: config.num_leaves,
            max_rounds: config.max_rounds,
            early_stopping_rounds: config.early_stopping_rounds,
            min_data_in_leaf: config.min_data_in_leaf,
            lambda_l2: config.lambda_l2,
            bagging_fraction: config.bagging_fraction,
            seed: config.seed,
        }
    }
}

/// Tree node. Rows with `value <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// A single regression tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Evaluate the tree on one row.
    pub fn predict(&self, row: &[f64]) -> f64 {
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
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if value <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    /// Number of leaves in the tree.
    pub fn num_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

/// Trained ensemble plus everything inference needs to use it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub trees: Vec<Tree>,
    /// Initial score (mean training target)
    pub base_score: f64,
    /// Feature names in the order rows must be assembled
    pub feature_names: Vec<String>,
    /// Number of boosting rounds kept (1-based)
    pub best_iteration: usize,
    pub params: BoosterParams,
    /// RFC 3339 training timestamp
    pub trained_at: String,
}

impl TrainedModel {
    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Predict one row.
    pub fn predict(&self, row: &[f64]) -> ForecastResult<f64> {
        if row.len() != self.num_features() {
            return Err(ForecastError::invalid_shape(format!(
                "expected {} features per row, got {}",
                self.num_features(),
                row.len()
            )));
        }
        Ok(self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>())
    }

    /// Predict a batch; output length always equals input length.
    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> ForecastResult<Vec<f64>> {
        rows.iter().map(|row| self.predict(row)).collect()
    }
}

/// Result of a boosting run.
#[derive(Debug, Clone)]
pub struct BoostOutcome {
    pub model: TrainedModel,
    /// Validation RMSE after each round that was run
    pub validation_history: Vec<f64>,
    pub best_validation_rmse: f64,
    pub stopped_early: bool,
}

/// Gradient boosting trainer.
pub struct GbdtTrainer {
    params: BoosterParams,
    logger: Logger,
}

impl GbdtTrainer {
    pub fn new(params: BoosterParams) -> Self {
        Self {
            params,
            logger: Logger::new("gbdt"),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn params(&self) -> &BoosterParams {
        &self.params
    }

    /// Fit against a training set, early-stopping on the validation set.
    pub fn fit(
        &self,
        train_x: &[Vec<f64>],
        train_y: &[f64],
        valid_x: &[Vec<f64>],
        valid_y: &[f64],
        feature_names: &[String],
    ) -> ForecastResult<BoostOutcome> {
        validate_matrix("training", train_x, train_y, feature_names.len())?;
        validate_matrix("validation", valid_x, valid_y, feature_names.len())?;

        let n = train_x.len();
        let base_score = train_y.iter().sum::<f64>() / n as f64;
        let mut train_pred = vec![base_score; n];
        let mut valid_pred = vec![base_score; valid_x.len()];

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let bag_size = ((n as f64) * self.params.bagging_fraction).round().max(1.0) as usize;

        let mut trees: Vec<Tree> = Vec::with_capacity(self.params.max_rounds);
        let mut history = Vec::with_capacity(self.params.max_rounds);
        let mut best_rmse = f64::INFINITY;
        let mut best_iteration = 0usize;
        let mut stopped_early = false;

        for round in 1..=self.params.max_rounds {
            // L2 loss: gradient = prediction - target, hessian = 1
            let gradients: Vec<f64> = train_pred
                .iter()
                .zip(train_y)
                .map(|(p, y)| p - y)
                .collect();

            let indices: Vec<usize> = if bag_size < n {
                let mut sample = rand::seq::index::sample(&mut rng, n, bag_size).into_vec();
                sample.sort_unstable();
                sample
            } else {
                (0..n).collect()
            };

            let tree = TreeBuilder::new(train_x, &gradients, &self.params).build(indices);

            for (pred, row) in train_pred.iter_mut().zip(train_x) {
                *pred += tree.predict(row);
            }
            for (pred, row) in valid_pred.iter_mut().zip(valid_x) {
                *pred += tree.predict(row);
            }
            trees.push(tree);

            let score = rmse(valid_y, &valid_pred);
            history.push(score);
            self.logger.log_round(round, score);

            if score < best_rmse - MIN_SPLIT_GAIN {
                best_rmse = score;
                best_iteration = round;
            } else if round - best_iteration >= self.params.early_stopping_rounds {
                stopped_early = true;
                break;
            }
        }

        let best_iteration = best_iteration.max(1);
        trees.truncate(best_iteration);
        if stopped_early {
            self.logger.log_early_stop(best_iteration, best_rmse);
        }

        let model = TrainedModel {
            trees,
            base_score,
            feature_names: feature_names.to_vec(),
            best_iteration,
            params: self.params.clone(),
            trained_at: chrono::Utc::now().to_rfc3339(),
        };

        Ok(BoostOutcome {
            model,
            validation_history: history,
            best_validation_rmse: best_rmse,
            stopped_early,
        })
    }
}

fn validate_matrix(
    name: &str,
    rows: &[Vec<f64>],
    targets: &[f64],
    width: usize,
) -> ForecastResult<()> {
    if rows.is_empty() {
        return Err(ForecastError::invalid_shape(format!("{} set is empty", name)));
    }
    if rows.len() != targets.len() {
        return Err(ForecastError::invalid_shape(format!(
            "{} set has {} rows but {} targets",
            name,
            rows.len(),
            targets.len()
        )));
    }
    if let Some(bad) = rows.iter().find(|r| r.len() != width) {
        return Err(ForecastError::invalid_shape(format!(
            "{} row has {} features, expected {}",
            name,
            bad.len(),
            width
        )));
    }
    Ok(())
}

// ============================================================================
// Tree construction
// ============================================================================

#[derive(Debug, Clone)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// A leaf that may still be split.
struct OpenLeaf {
    node: usize,
    indices: Vec<usize>,
    split: Option<SplitCandidate>,
}

struct TreeBuilder<'a> {
    rows: &'a [Vec<f64>],
    gradients: &'a [f64],
    params: &'a BoosterParams,
    feature_count: usize,
}

impl<'a> TreeBuilder<'a> {
    fn new(rows: &'a [Vec<f64>], gradients: &'a [f64], params: &'a BoosterParams) -> Self {
        let feature_count = rows.first().map(|r| r.len()).unwrap_or(0);
        Self {
            rows,
            gradients,
            params,
            feature_count,
        }
    }

    fn build(&self, indices: Vec<usize>) -> Tree {
        let mut nodes = vec![Node::Leaf {
            value: self.leaf_value(&indices),
        }];
        let mut open = vec![self.open_leaf(0, indices)];
        let mut leaves = 1usize;

        while leaves < self.params.num_leaves {
            let best = open
                .iter()
                .enumerate()
                .filter_map(|(pos, leaf)| leaf.split.as_ref().map(|s| (pos, s.gain)))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

            let Some((pos, _)) = best else { break };
            let leaf = open.swap_remove(pos);
            let Some(split) = leaf.split else { break };

            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = leaf
                .indices
                .iter()
                .partition(|&&i| self.rows[i][split.feature] <= split.threshold);

            let left = nodes.len();
            nodes.push(Node::Leaf {
                value: self.leaf_value(&left_idx),
            });
            let right = nodes.len();
            nodes.push(Node::Leaf {
                value: self.leaf_value(&right_idx),
            });
            nodes[leaf.node] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };

            open.push(self.open_leaf(left, left_idx));
            open.push(self.open_leaf(right, right_idx));
            leaves += 1;
        }

        Tree { nodes }
    }

    fn open_leaf(&self, node: usize, indices: Vec<usize>) -> OpenLeaf {
        let split = self.find_best_split(&indices);
        OpenLeaf {
            node,
            indices,
            split,
        }
    }

    /// Shrunk optimal leaf output: -lr * G / (H + lambda).
    fn leaf_value(&self, indices: &[usize]) -> f64 {
        let (g, h) = self.sums(indices);
        if h + self.params.lambda_l2 <= 0.0 {
            return 0.0;
        }
        -self.params.learning_rate * g / (h + self.params.lambda_l2)
    }

    fn sums(&self, indices: &[usize]) -> (f64, f64) {
        let g = indices.iter().map(|&i| self.gradients[i]).sum();
        (g, indices.len() as f64)
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.params.lambda_l2;
        if denom <= 0.0 {
            0.0
        } else {
            g * g / denom
        }
    }

    fn find_best_split(&self, indices: &[usize]) -> Option<SplitCandidate> {
        if indices.len() < 2 * self.params.min_data_in_leaf {
            return None;
        }
        let (sum_g, sum_h) = self.sums(indices);
        let parent = self.score(sum_g, sum_h);

        (0..self.feature_count)
            .into_par_iter()
            .filter_map(|f| self.best_split_for_feature(f, indices, sum_g, sum_h, parent))
            .max_by(|a, b| {
                a.gain
                    .partial_cmp(&b.gain)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| b.feature.cmp(&a.feature))
            })
    }

    fn best_split_for_feature(
        &self,
        feature: usize,
        indices: &[usize],
        sum_g: f64,
        sum_h: f64,
        parent: f64,
    ) -> Option<SplitCandidate> {
        let mut sorted: Vec<(f64, f64)> = indices
            .iter()
            .map(|&i| (self.rows[i][feature], self.gradients[i]))
            .collect();
        sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let n = sorted.len();
        let min_leaf = self.params.min_data_in_leaf;
        let mut best: Option<SplitCandidate> = None;
        let mut g_left = 0.0;

        for k in 0..n - 1 {
            g_left += sorted[k].1;
            let n_left = k + 1;
            if sorted[k].0 == sorted[k + 1].0 {
                continue;
            }
            if n_left < min_leaf || n - n_left < min_leaf {
                continue;
            }
            let h_left = n_left as f64;
            let gain = self.score(g_left, h_left)
                + self.score(sum_g - g_left, sum_h - h_left)
                - parent;
            if gain > MIN_SPLIT_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: (sorted[k].0 + sorted[k + 1].0) / 2.0,
                    gain,
                });
            }
        }

        best
    }
}
