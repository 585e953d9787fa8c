//! Gradient-boosted regression trees.
//!
//! Squared-error boosting with second-order split gain, in the manner of
//! XGBoost's exact greedy algorithm:
//!
//! - gradients `g = prediction - target`, hessians `h = 1`
//! - leaf weight `-G / (H + lambda)`, shrunk by `learning_rate`
//! - split gain `½ [G_L²/(H_L+λ) + G_R²/(H_R+λ) - G²/(H+λ)] - gamma`
//!
//! Trees are stored as flat node vectors so a fitted model serializes as
//! plain JSON.

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{check_lengths, ModelError, Regressor};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoostingParams {
    /// Number of boosting rounds.
    pub n_estimators: usize,

    pub max_depth: usize,

    #[serde(alias = "eta")]
    pub learning_rate: f64,

    /// L2 regularization on leaf weights.
    #[serde(alias = "lambda")]
    pub reg_lambda: f64,

    /// Minimum gain required to split.
    #[serde(alias = "min_split_loss")]
    pub gamma: f64,

    /// Minimum hessian sum (sample count for squared error) in a child.
    pub min_child_weight: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.3,
            reg_lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
        }
    }
}

impl BoostingParams {
    fn validate(&self) -> Result<(), ModelError> {
        let invalid = |reason: &str| {
            Err(ModelError::InvalidParams {
                model: "xgboost".to_string(),
                reason: reason.to_string(),
            })
        };
        if self.n_estimators == 0 {
            return invalid("n_estimators must be positive");
        }
        if !(self.learning_rate > 0.0) {
            return invalid("learning_rate must be positive");
        }
        if self.reg_lambda < 0.0 || self.gamma < 0.0 || self.min_child_weight < 0.0 {
            return invalid("reg_lambda, gamma and min_child_weight must not be negative");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] < *threshold { *left } else { *right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    params: BoostingParams,
    base_score: f64,
    n_features: Option<usize>,
    trees: Vec<Tree>,
}

impl GradientBoostedTrees {
    pub fn new(params: BoostingParams) -> Self {
        Self {
            params,
            base_score: 0.0,
            n_features: None,
            trees: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'x, 'a> {
    x: ArrayView2<'x, f64>,
    grad: &'a [f64],
    params: &'a BoostingParams,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_, '_> {
    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.reg_lambda)
    }

    /// Grow the subtree over `rows` and return its node index.
    fn grow(&mut self, rows: &mut [usize], depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h = rows.len() as f64;

        let split = if depth < self.params.max_depth
            && h >= 2.0 * self.params.min_child_weight.max(1.0)
        {
            self.best_split(rows, g, h)
        } else {
            None
        };

        let Some(split) = split else {
            let value = -g / (h + self.params.reg_lambda) * self.params.learning_rate;
            self.nodes.push(Node::Leaf { value });
            return self.nodes.len() - 1;
        };

        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value: 0.0 });

        let feature = split.feature;
        let threshold = split.threshold;
        let x = self.x;
        let boundary = partition(rows, |r| x[[r, feature]] < threshold);
        let (left_rows, right_rows) = rows.split_at_mut(boundary);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);

        self.nodes[idx] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        idx
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<Split> {
        let parent = self.score(g, h);
        let min_child = self.params.min_child_weight;
        let mut best: Option<Split> = None;

        let mut sorted = rows.to_vec();
        for feature in 0..self.x.ncols() {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut g_left = 0.0;
            let mut h_left = 0.0;
            for pair in sorted.windows(2) {
                let (cur, next) = (pair[0], pair[1]);
                g_left += self.grad[cur];
                h_left += 1.0;

                let (v_cur, v_next) = (self.x[[cur, feature]], self.x[[next, feature]]);
                if v_cur == v_next {
                    continue;
                }
                let h_right = h - h_left;
                if h_left < min_child || h_right < min_child {
                    continue;
                }

                let g_right = g - g_left;
                let gain = 0.5 * (self.score(g_left, h_left) + self.score(g_right, h_right) - parent)
                    - self.params.gamma;
                if gain > best.as_ref().map_or(0.0, |b| b.gain) {
                    best = Some(Split {
                        feature,
                        threshold: (v_cur + v_next) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Reorder `rows` so entries satisfying `pred` come first; returns their count.
fn partition(rows: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut boundary = 0;
    for i in 0..rows.len() {
        if pred(rows[i]) {
            rows.swap(i, boundary);
            boundary += 1;
        }
    }
    boundary
}

impl Regressor for GradientBoostedTrees {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ModelError> {
        check_lengths(x, y)?;
        self.params.validate()?;

        self.base_score = y.mean().unwrap_or(0.0);
        self.n_features = Some(x.ncols());
        self.trees.clear();

        let mut prediction = Array1::from_elem(y.len(), self.base_score);
        let mut grad = vec![0.0; y.len()];
        let mut rows: Vec<usize> = (0..y.len()).collect();

        for _ in 0..self.params.n_estimators {
            for (i, g) in grad.iter_mut().enumerate() {
                *g = prediction[i] - y[i];
            }

            let mut builder = TreeBuilder {
                x,
                grad: &grad,
                params: &self.params,
                nodes: Vec::new(),
            };
            builder.grow(&mut rows, 0);
            let tree = Tree {
                nodes: builder.nodes,
            };

            for (i, p) in prediction.iter_mut().enumerate() {
                *p += tree.predict_row(x.row(i));
            }
            self.trees.push(tree);
        }

        debug!(
            trees = self.trees.len(),
            base_score = self.base_score,
            "Boosted trees fitted"
        );
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        let expected = self.n_features.ok_or(ModelError::NotFitted)?;
        if x.ncols() != expected {
            return Err(ModelError::FeatureMismatch {
                expected,
                got: x.ncols(),
            });
        }
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                self.base_score + self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
            })
            .collect())
    }
}
