//! Return and risk estimation.
//!
//! Produces the sample mean vector and covariance matrix consumed by the
//! optimizer. Covariance matrices that are not positive-definite (duplicate
//! or collinear assets) get a fixed diagonal ridge before use.

use crate::error::{EngineError, Result};
use crate::returns::ReturnsMatrix;
use crate::types::RebalanceFrequency;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default ridge magnitude, relative to the average asset variance.
pub const DEFAULT_RIDGE_FACTOR: f64 = 1e-6;

/// Smallest eigenvalue ratio (min/max) accepted as positive-definite.
const PD_RELATIVE_TOLERANCE: f64 = 1e-12;

/// Variance scale below which a matrix is treated as degenerate.
const VARIANCE_FLOOR: f64 = 1e-12;

/// Risk model settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Ridge added to the diagonal is `ridge_factor * max(trace / n, floor)`.
    pub ridge_factor: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            ridge_factor: DEFAULT_RIDGE_FACTOR,
        }
    }
}

/// Periodic return statistics of a set of assets.
#[derive(Debug, Clone)]
pub struct RiskEstimate {
    /// Symbols in matrix order (lexicographic).
    pub symbols: Vec<String>,
    /// Mean periodic return per asset.
    pub mean: DVector<f64>,
    /// Covariance used by the optimizer (regularized when needed).
    pub covariance: DMatrix<f64>,
    /// Unregularized sample covariance.
    pub sample_covariance: DMatrix<f64>,
    /// Correlation matrix derived from the sample covariance.
    pub correlation: DMatrix<f64>,
    /// Periods per year for the estimation frequency.
    pub annualization_factor: f64,
    /// Ridge added to the diagonal, when one was needed.
    pub ridge: Option<f64>,
    /// Number of return observations used.
    pub observations: usize,
}

impl RiskEstimate {
    pub fn n_assets(&self) -> usize {
        self.symbols.len()
    }

    /// Portfolio periodic expected return `wᵀμ`.
    pub fn portfolio_return(&self, weights: &[f64]) -> f64 {
        weights.iter().zip(self.mean.iter()).map(|(w, m)| w * m).sum()
    }

    /// Portfolio periodic variance `wᵀΣw` on the sample covariance.
    pub fn portfolio_variance(&self, weights: &[f64]) -> f64 {
        let w = DVector::from_column_slice(weights);
        (w.transpose() * &self.sample_covariance * &w)[(0, 0)].max(0.0)
    }

    pub fn annualized_mean(&self) -> DVector<f64> {
        &self.mean * self.annualization_factor
    }

    pub fn annualized_covariance(&self) -> DMatrix<f64> {
        &self.sample_covariance * self.annualization_factor
    }
}

/// Estimates mean and covariance from a [`ReturnsMatrix`].
#[derive(Debug, Clone, Default)]
pub struct RiskModel {
    config: RiskConfig,
}

impl RiskModel {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Sample mean, sample covariance (n - 1) and correlation of `returns`.
    ///
    /// Requires at least two return observations.
    pub fn estimate(
        &self,
        returns: &ReturnsMatrix,
        frequency: RebalanceFrequency,
    ) -> Result<RiskEstimate> {
        let t = returns.periods();
        let n = returns.n_assets();
        if t < 2 {
            return Err(EngineError::InsufficientData(format!(
                "need at least 2 return observations for covariance, found {}",
                t
            )));
        }
        if returns
            .columns()
            .iter()
            .any(|c| c.iter().any(|r| !r.is_finite()))
        {
            return Err(EngineError::DataError(
                "returns contain non-finite values".to_string(),
            ));
        }

        let mean = DVector::from_vec(returns.means());
        let centered = DMatrix::from_fn(t, n, |i, j| returns.columns()[j][i] - mean[j]);
        let sample = (centered.transpose() * &centered) / (t as f64 - 1.0);
        let sample = (&sample + sample.transpose()) * 0.5;

        let correlation = correlation_from(&sample);
        let (covariance, ridge) = self.regularize(&sample)?;

        Ok(RiskEstimate {
            symbols: returns.symbols().to_vec(),
            mean,
            covariance,
            sample_covariance: sample,
            correlation,
            annualization_factor: frequency.annualization_factor(),
            ridge,
            observations: t,
        })
    }

    /// Add a diagonal ridge when `cov` is not positive-definite.
    fn regularize(&self, cov: &DMatrix<f64>) -> Result<(DMatrix<f64>, Option<f64>)> {
        if is_positive_definite(cov) {
            return Ok((cov.clone(), None));
        }

        let n = cov.nrows();
        let scale = (cov.trace() / n as f64).max(VARIANCE_FLOOR);
        let delta = self.config.ridge_factor * scale;
        let regularized = cov + DMatrix::identity(n, n) * delta;

        if !is_positive_definite(&regularized) {
            return Err(EngineError::OptimizationFailure(format!(
                "covariance not positive-definite after ridge {:.3e}",
                delta
            )));
        }

        warn!(
            "Covariance matrix is not positive-definite; applied diagonal ridge {:.3e}",
            delta
        );
        Ok((regularized, Some(delta)))
    }
}

/// Positive-definiteness by symmetric eigen-decomposition.
pub fn is_positive_definite(m: &DMatrix<f64>) -> bool {
    if m.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let eigen = m.clone().symmetric_eigen();
    let min = eigen.eigenvalues.min();
    let max = eigen.eigenvalues.max();
    debug!("Covariance eigenvalues: min={:.3e} max={:.3e}", min, max);
    min > PD_RELATIVE_TOLERANCE * max.max(VARIANCE_FLOOR)
}

fn correlation_from(cov: &DMatrix<f64>) -> DMatrix<f64> {
    let n = cov.nrows();
    DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            return 1.0;
        }
        let denom = (cov[(i, i)] * cov[(j, j)]).sqrt();
        if denom > 0.0 {
            (cov[(i, j)] / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    })
}
