//! Regression models compared by the training pipeline.
//!
//! Every model implements [`Regressor`]. The panel is a plain list of
//! `(name, factory)` pairs, so adding or removing a model is one line in
//! [`model_panel`].

mod boosting;
mod linear;
mod tree;

pub use boosting::{BoostedTrees, GradientBoosting};
pub use linear::{ElasticNet, LinearRegression, Ridge};
pub use tree::{RandomForest, RegressionTree, TreeParams};

use crate::error::{EngineError, Result};

/// A trainable regression model.
pub trait Regressor: Send {
    /// Fit on row-major features `x` and targets `y`.
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()>;

    /// Predict one value per row.
    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64>;
}

/// Constructs a fresh, unfitted model.
pub type ModelFactory = fn() -> Box<dyn Regressor>;

/// Seed shared by the randomized models.
pub const MODEL_SEED: u64 = 42;

/// The fixed model panel, in evaluation order.
pub fn model_panel() -> Vec<(&'static str, ModelFactory)> {
    vec![
        ("Linear Regression", || Box::new(LinearRegression::new())),
        ("Ridge Regression", || Box::new(Ridge::new(1.0))),
        ("Lasso Regression", || Box::new(ElasticNet::lasso(0.1))),
        ("Elastic Net", || Box::new(ElasticNet::new(0.1, 0.5))),
        ("Random Forest", || Box::new(RandomForest::new(100, 10, MODEL_SEED))),
        ("Gradient Boosting", || Box::new(GradientBoosting::new(100, 5, 0.1))),
        ("XGBoost", || Box::new(BoostedTrees::new(100, 5, 0.1, 1.0))),
    ]
}

/// Shape checks shared by every model's `fit`.
pub(crate) fn check_training_data(x: &[Vec<f64>], y: &[f64]) -> Result<usize> {
    if x.is_empty() {
        return Err(EngineError::InsufficientData(
            "no training rows".to_string(),
        ));
    }
    if x.len() != y.len() {
        return Err(EngineError::InvalidRequest(format!(
            "{} feature rows but {} targets",
            x.len(),
            y.len()
        )));
    }
    let n_features = x[0].len();
    if x.iter().any(|r| r.len() != n_features) {
        return Err(EngineError::InvalidRequest(
            "ragged feature rows".to_string(),
        ));
    }
    if x.iter().flatten().chain(y).any(|v| !v.is_finite()) {
        return Err(EngineError::DataError(
            "training data contains non-finite values".to_string(),
        ));
    }
    Ok(n_features)
}

#[cfg(test)]
pub(crate) mod test_data {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// `y = 3·x0 − 2·x1 + 0.5 + noise`, with an irrelevant third feature.
    pub fn linear_data(n: usize, noise: f64, seed: u64) -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x: Vec<Vec<f64>> = (0..n)
            .map(|_| (0..3).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();
        let y = x
            .iter()
            .map(|r| 3.0 * r[0] - 2.0 * r[1] + 0.5 + noise * rng.gen_range(-1.0..1.0))
            .collect();
        (x, y)
    }

    /// Piecewise-constant target that trees fit well.
    pub fn step_data(n: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x: Vec<Vec<f64>> = (0..n)
            .map(|_| (0..2).map(|_| rng.gen_range(0.0..1.0)).collect())
            .collect();
        let y = x
            .iter()
            .map(|r| if r[0] > 0.5 { 2.0 } else { -1.0 } + if r[1] > 0.3 { 0.5 } else { 0.0 })
            .collect();
        (x, y)
    }

    pub fn r2(y: &[f64], pred: &[f64]) -> f64 {
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        let ss_tot: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
        let ss_res: f64 = y.iter().zip(pred).map(|(a, b)| (a - b).powi(2)).sum();
        1.0 - ss_res / ss_tot
    }
}
