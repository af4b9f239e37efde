//! Regression trees and random forests.
//!
//! Trees are grown on per-sample gradients `g` and hessians `h`. A leaf
//! predicts `−G / (H + λ)` and a split is scored by
//!
//! ```text
//! gain = G_L²/(H_L + λ) + G_R²/(H_R + λ) − G²/(H + λ)
//! ```
//!
//! Plain least-squares CART is the special case `g = −y`, `h = 1`, `λ = 0`,
//! where leaves are target means and gain is the reduction in squared error.

use super::{check_training_data, Regressor};
use crate::error::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Minimum hessian sum per child.
    pub min_child_weight: f64,
    /// L2 penalty on leaf values.
    pub lambda: f64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            min_child_weight: 0.0,
            lambda: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// A fitted regression tree.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    root: Node,
}

impl RegressionTree {
    /// Least-squares tree on targets `y` restricted to rows `rows`.
    pub fn fit_targets(x: &[Vec<f64>], y: &[f64], rows: &[usize], params: &TreeParams) -> Self {
        let g: Vec<f64> = y.iter().map(|v| -v).collect();
        let h = vec![1.0; y.len()];
        Self::fit_gradients(x, &g, &h, rows, params)
    }

    /// Tree on gradients and hessians restricted to rows `rows`.
    ///
    /// `rows` may repeat indices (bootstrap samples).
    pub fn fit_gradients(
        x: &[Vec<f64>],
        g: &[f64],
        h: &[f64],
        rows: &[usize],
        params: &TreeParams,
    ) -> Self {
        let mut rows = rows.to_vec();
        let root = build(x, g, h, &mut rows, 0, params);
        Self { root }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(v) => return *v,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(n: &Node) -> usize {
            match n {
                Node::Leaf(_) => 0,
                Node::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }
}

fn leaf_value(g_sum: f64, h_sum: f64, lambda: f64) -> f64 {
    let denom = h_sum + lambda;
    if denom > 0.0 {
        -g_sum / denom
    } else {
        0.0
    }
}

fn score(g_sum: f64, h_sum: f64, lambda: f64) -> f64 {
    let denom = h_sum + lambda;
    if denom > 0.0 {
        g_sum * g_sum / denom
    } else {
        0.0
    }
}

fn build(
    x: &[Vec<f64>],
    g: &[f64],
    h: &[f64],
    rows: &mut [usize],
    depth: usize,
    params: &TreeParams,
) -> Node {
    let g_sum: f64 = rows.iter().map(|&i| g[i]).sum();
    let h_sum: f64 = rows.iter().map(|&i| h[i]).sum();
    let leaf = Node::Leaf(leaf_value(g_sum, h_sum, params.lambda));

    if depth >= params.max_depth || rows.len() < params.min_samples_split.max(2) {
        return leaf;
    }

    let Some(best) = best_split(x, g, h, rows, g_sum, h_sum, params) else {
        return leaf;
    };

    // Partition rows in place: left block first.
    let mut mid = 0;
    for k in 0..rows.len() {
        if x[rows[k]][best.feature] <= best.threshold {
            rows.swap(k, mid);
            mid += 1;
        }
    }
    let (left_rows, right_rows) = rows.split_at_mut(mid);

    Node::Split {
        feature: best.feature,
        threshold: best.threshold,
        left: Box::new(build(x, g, h, left_rows, depth + 1, params)),
        right: Box::new(build(x, g, h, right_rows, depth + 1, params)),
    }
}

fn best_split(
    x: &[Vec<f64>],
    g: &[f64],
    h: &[f64],
    rows: &[usize],
    g_sum: f64,
    h_sum: f64,
    params: &TreeParams,
) -> Option<BestSplit> {
    let n_features = x[rows[0]].len();
    let parent = score(g_sum, h_sum, params.lambda);
    let mut best: Option<BestSplit> = None;
    let mut order = rows.to_vec();

    for feature in 0..n_features {
        order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut gl = 0.0;
        let mut hl = 0.0;
        for k in 0..order.len() - 1 {
            let i = order[k];
            gl += g[i];
            hl += h[i];

            let here = x[i][feature];
            let next = x[order[k + 1]][feature];
            if here == next {
                continue;
            }
            let n_left = k + 1;
            let n_right = order.len() - n_left;
            if n_left < params.min_samples_leaf || n_right < params.min_samples_leaf {
                continue;
            }
            let hr = h_sum - hl;
            if hl < params.min_child_weight || hr < params.min_child_weight {
                continue;
            }

            let gain = score(gl, hl, params.lambda) + score(g_sum - gl, hr, params.lambda) - parent;
            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(BestSplit {
                    feature,
                    threshold: 0.5 * (here + next),
                    gain,
                });
            }
        }
    }

    best
}

/// Bagged least-squares trees with bootstrap resampling.
///
/// Tree `i` draws its bootstrap sample from `StdRng::seed_from_u64(seed + i)`,
/// so results do not depend on thread scheduling.
#[derive(Debug, Clone)]
pub struct RandomForest {
    n_trees: usize,
    params: TreeParams,
    seed: u64,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn new(n_trees: usize, max_depth: usize, seed: u64) -> Self {
        Self {
            n_trees,
            params: TreeParams {
                max_depth,
                ..Default::default()
            },
            seed,
            trees: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for RandomForest {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        check_training_data(x, y)?;
        let n = x.len();
        let params = self.params;
        let seed = self.seed;

        self.trees = (0..self.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit_targets(x, y, &sample, &params)
            })
            .collect();
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        if self.trees.is_empty() {
            return vec![0.0; x.len()];
        }
        let k = self.trees.len() as f64;
        x.iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / k)
            .collect()
    }
}
