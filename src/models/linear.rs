//! Linear models: ordinary least squares, ridge and elastic net.
//!
//! All fit an unpenalized intercept by centering `x` and `y` first.

use super::{check_training_data, Regressor};
use crate::error::{EngineError, Result};
use nalgebra::{DMatrix, DVector};

/// Coefficients plus intercept, shared by the linear models.
#[derive(Debug, Clone, Default)]
struct LinearFit {
    coef: Vec<f64>,
    intercept: f64,
}

impl LinearFit {
    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| {
                self.intercept
                    + row
                        .iter()
                        .zip(&self.coef)
                        .map(|(v, c)| v * c)
                        .sum::<f64>()
            })
            .collect()
    }
}

/// Centered design matrix, centered target and the means removed.
struct Centered {
    x: DMatrix<f64>,
    y: DVector<f64>,
    x_mean: Vec<f64>,
    y_mean: f64,
}

fn center(x: &[Vec<f64>], y: &[f64]) -> Result<Centered> {
    let p = check_training_data(x, y)?;
    let n = x.len();
    let x_mean: Vec<f64> = (0..p)
        .map(|j| x.iter().map(|r| r[j]).sum::<f64>() / n as f64)
        .collect();
    let y_mean = y.iter().sum::<f64>() / n as f64;
    Ok(Centered {
        x: DMatrix::from_fn(n, p, |i, j| x[i][j] - x_mean[j]),
        y: DVector::from_fn(n, |i, _| y[i] - y_mean),
        x_mean,
        y_mean,
    })
}

fn finish(c: &Centered, coef: Vec<f64>) -> Result<LinearFit> {
    if coef.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::DataError(
            "non-finite coefficients".to_string(),
        ));
    }
    let intercept = c.y_mean
        - c.x_mean
            .iter()
            .zip(&coef)
            .map(|(m, b)| m * b)
            .sum::<f64>();
    Ok(LinearFit { coef, intercept })
}

/// Ordinary least squares via SVD (minimum-norm solution when rank-deficient).
#[derive(Debug, Clone, Default)]
pub struct LinearRegression {
    fit: LinearFit,
}

impl LinearRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.fit.coef
    }

    pub fn intercept(&self) -> f64 {
        self.fit.intercept
    }
}

impl Regressor for LinearRegression {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let c = center(x, y)?;
        let svd = c.x.clone().svd(true, true);
        let beta = svd
            .solve(&c.y, 1e-12)
            .map_err(|e| EngineError::DataError(format!("least squares failed: {}", e)))?;
        self.fit = finish(&c, beta.iter().copied().collect())?;
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        self.fit.predict(x)
    }
}

/// L2-penalized least squares: `min ‖y − Xβ‖² + α‖β‖²`.
#[derive(Debug, Clone)]
pub struct Ridge {
    alpha: f64,
    fit: LinearFit,
}

impl Ridge {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            fit: LinearFit::default(),
        }
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.fit.coef
    }
}

impl Regressor for Ridge {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let c = center(x, y)?;
        let p = c.x.ncols();
        let gram = c.x.transpose() * &c.x + DMatrix::identity(p, p) * self.alpha;
        let rhs = c.x.transpose() * &c.y;
        let beta = gram
            .cholesky()
            .ok_or_else(|| EngineError::DataError("ridge system not positive-definite".to_string()))?
            .solve(&rhs);
        self.fit = finish(&c, beta.iter().copied().collect())?;
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        self.fit.predict(x)
    }
}

/// Elastic net by cyclic coordinate descent:
///
/// `min 1/(2n)‖y − Xβ‖² + α·ρ‖β‖₁ + ½α(1 − ρ)‖β‖²`
///
/// where `ρ` is the L1 ratio. `ρ = 1` is the lasso.
#[derive(Debug, Clone)]
pub struct ElasticNet {
    alpha: f64,
    l1_ratio: f64,
    max_iter: usize,
    tol: f64,
    fit: LinearFit,
}

impl ElasticNet {
    pub fn new(alpha: f64, l1_ratio: f64) -> Self {
        Self {
            alpha,
            l1_ratio,
            max_iter: 1000,
            tol: 1e-4,
            fit: LinearFit::default(),
        }
    }

    pub fn lasso(alpha: f64) -> Self {
        Self::new(alpha, 1.0)
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.fit.coef
    }
}

fn soft_threshold(z: f64, gamma: f64) -> f64 {
    if z > gamma {
        z - gamma
    } else if z < -gamma {
        z + gamma
    } else {
        0.0
    }
}

impl Regressor for ElasticNet {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let c = center(x, y)?;
        let (n, p) = c.x.shape();
        let l1 = self.alpha * self.l1_ratio * n as f64;
        let l2 = self.alpha * (1.0 - self.l1_ratio) * n as f64;

        let col_norms: Vec<f64> = (0..p).map(|j| c.x.column(j).norm_squared()).collect();
        let mut beta = vec![0.0; p];
        let mut residual = c.y.clone();

        for _ in 0..self.max_iter {
            let mut max_change: f64 = 0.0;
            let mut max_coef: f64 = 0.0;

            for j in 0..p {
                if col_norms[j] == 0.0 {
                    continue;
                }
                let col = c.x.column(j);
                let old = beta[j];
                let rho = col.dot(&residual) + col_norms[j] * old;
                let new = soft_threshold(rho, l1) / (col_norms[j] + l2);

                if new != old {
                    residual.axpy(old - new, &col, 1.0);
                    beta[j] = new;
                }
                max_change = max_change.max((new - old).abs());
                max_coef = max_coef.max(new.abs());
            }

            if max_coef == 0.0 || max_change / max_coef < self.tol {
                break;
            }
        }

        self.fit = finish(&c, beta)?;
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        self.fit.predict(x)
    }
}
