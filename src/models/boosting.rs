//! Gradient-boosted tree ensembles.

use super::tree::{RegressionTree, TreeParams};
use super::{check_training_data, Regressor};
use crate::error::Result;

/// Shared stage-wise fitting: start at the target mean, then add `η·tree`
/// fitted to the squared-loss gradient `F − y` with unit hessians.
#[derive(Debug, Clone)]
struct Ensemble {
    base: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl Ensemble {
    fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        n_stages: usize,
        learning_rate: f64,
        params: &TreeParams,
    ) -> Result<Self> {
        check_training_data(x, y)?;
        let n = x.len();
        let base = y.iter().sum::<f64>() / n as f64;
        let rows: Vec<usize> = (0..n).collect();
        let h = vec![1.0; n];

        let mut pred = vec![base; n];
        let mut trees = Vec::with_capacity(n_stages);
        for _ in 0..n_stages {
            let g: Vec<f64> = pred.iter().zip(y).map(|(p, t)| p - t).collect();
            let tree = RegressionTree::fit_gradients(x, &g, &h, &rows, params);
            for (p, row) in pred.iter_mut().zip(x) {
                *p += learning_rate * tree.predict_row(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            base,
            learning_rate,
            trees,
        })
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| {
                self.base
                    + self.learning_rate
                        * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
            })
            .collect()
    }
}

/// Least-squares gradient boosting with unregularized trees.
#[derive(Debug, Clone)]
pub struct GradientBoosting {
    n_stages: usize,
    learning_rate: f64,
    params: TreeParams,
    ensemble: Option<Ensemble>,
}

impl GradientBoosting {
    pub fn new(n_stages: usize, max_depth: usize, learning_rate: f64) -> Self {
        Self {
            n_stages,
            learning_rate,
            params: TreeParams {
                max_depth,
                ..Default::default()
            },
            ensemble: None,
        }
    }
}

impl Regressor for GradientBoosting {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        self.ensemble = Some(Ensemble::fit(
            x,
            y,
            self.n_stages,
            self.learning_rate,
            &self.params,
        )?);
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        match &self.ensemble {
            Some(e) => e.predict(x),
            None => vec![0.0; x.len()],
        }
    }
}

/// Second-order boosted trees with L2-regularized leaves (XGBoost style).
#[derive(Debug, Clone)]
pub struct BoostedTrees {
    n_rounds: usize,
    learning_rate: f64,
    params: TreeParams,
    ensemble: Option<Ensemble>,
}

impl BoostedTrees {
    pub fn new(n_rounds: usize, max_depth: usize, learning_rate: f64, lambda: f64) -> Self {
        Self {
            n_rounds,
            learning_rate,
            params: TreeParams {
                max_depth,
                lambda,
                min_child_weight: 1.0,
                ..Default::default()
            },
            ensemble: None,
        }
    }
}

impl Regressor for BoostedTrees {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        self.ensemble = Some(Ensemble::fit(
            x,
            y,
            self.n_rounds,
            self.learning_rate,
            &self.params,
        )?);
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        match &self.ensemble {
            Some(e) => e.predict(x),
            None => vec![0.0; x.len()],
        }
    }
}
