//! Mean-variance portfolio optimization.
//!
//! Every objective is expressed as a [`QpProblem`] and handed to a single
//! Clarabel solve:
//!
//! ```text
//! minimize    ½ xᵀPx + qᵀx
//! subject to  Ax + s = b,  s ∈ K
//! ```
//!
//! The risk tolerance `t ∈ [0, 1]` selects the objective:
//!
//! | t        | objective                                        |
//! |----------|--------------------------------------------------|
//! | 0        | minimum variance: `min wᵀΣw`                     |
//! | (0, 1)   | blended: `min wᵀΣw − t·λ·wᵀμ`                    |
//! | 1        | maximum Sharpe: `max wᵀμ / √(wᵀΣw)`              |
//!
//! with `Σw = 1` and `w ≥ 0` unless short mode is enabled. `λ` is the fixed
//! [`DEFAULT_RISK_AVERSION_SCALE`] unless configured otherwise.

use crate::error::{EngineError, Result};
use crate::metrics;
use crate::returns::ReturnsMatrix;
use crate::risk::RiskEstimate;
use crate::types::PortfolioWeights;
use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Risk-aversion scale λ applied to the blended objective.
///
/// With `wᵀΣw − t·λ·wᵀμ` the unconstrained optimum is `(tλ/2)·Σ⁻¹μ`, so
/// `λ = 2` makes `t` the usual mean-variance trade-off coefficient. The
/// ratio μ/Σ does not change under annualization, so the same λ applies at
/// every rebalance frequency.
pub const DEFAULT_RISK_AVERSION_SCALE: f64 = 2.0;

/// Weights below this magnitude are treated as solver round-off.
const WEIGHT_EPSILON: f64 = 1e-9;

/// Relative tolerance used to detect interchangeable assets.
const TIE_TOLERANCE: f64 = 1e-9;

/// Optimizer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// λ in the blended objective.
    pub risk_aversion_scale: f64,
    /// Drop the non-negativity constraint.
    pub allow_short: bool,
    /// Interior-point iteration cap.
    pub max_iter: u32,
    /// Risk-free rate per period, used by the maximum-Sharpe objective.
    pub risk_free_rate: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            risk_aversion_scale: DEFAULT_RISK_AVERSION_SCALE,
            allow_short: false,
            max_iter: 200,
            risk_free_rate: 0.0,
        }
    }
}

/// Optimization objective selected by risk tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Objective {
    MinVariance,
    Blended { tolerance: f64 },
    MaxSharpe,
}

impl Objective {
    /// `0 → MinVariance`, `1 → MaxSharpe`, anything in between blends.
    pub fn from_tolerance(risk_tolerance: f64) -> Result<Self> {
        if !risk_tolerance.is_finite() || !(0.0..=1.0).contains(&risk_tolerance) {
            return Err(EngineError::InvalidRequest(format!(
                "risk tolerance must be in [0, 1], got {}",
                risk_tolerance
            )));
        }
        Ok(if risk_tolerance == 0.0 {
            Objective::MinVariance
        } else if risk_tolerance == 1.0 {
            Objective::MaxSharpe
        } else {
            Objective::Blended {
                tolerance: risk_tolerance,
            }
        })
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::MinVariance => write!(f, "minimum variance"),
            Objective::Blended { tolerance } => write!(f, "blended (t = {:.2})", tolerance),
            Objective::MaxSharpe => write!(f, "maximum Sharpe"),
        }
    }
}

/// Quadratic program in Clarabel's standard form, stored densely.
#[derive(Debug, Clone)]
pub struct QpProblem {
    /// Quadratic cost, symmetric `n × n`.
    pub p: Vec<Vec<f64>>,
    /// Linear cost.
    pub q: Vec<f64>,
    /// Constraint rows, each of length `n`.
    pub a: Vec<Vec<f64>>,
    pub b: Vec<f64>,
    pub cones: Vec<SupportedConeT<f64>>,
}

impl QpProblem {
    /// `min ½xᵀ(2sΣ)x − s·c·μᵀx` over the budget (and optionally long-only) set.
    ///
    /// `s` normalizes Σ to unit scale and does not move the minimizer.
    fn mean_variance(cov: &[Vec<f64>], linear: &[f64], allow_short: bool) -> Self {
        let n = cov.len();
        let scale = objective_scale(cov);
        let p = cov
            .iter()
            .map(|row| row.iter().map(|v| 2.0 * v * scale).collect())
            .collect();
        let q = linear.iter().map(|v| v * scale).collect();

        let mut a = vec![vec![1.0; n]];
        let mut b = vec![1.0];
        let mut cones = vec![SupportedConeT::ZeroConeT(1)];
        if !allow_short {
            a.extend(negative_identity(n));
            b.extend(vec![0.0; n]);
            cones.push(SupportedConeT::NonnegativeConeT(n));
        }

        Self { p, q, a, b, cones }
    }

    pub fn min_variance(cov: &[Vec<f64>], allow_short: bool) -> Self {
        Self::mean_variance(cov, &vec![0.0; cov.len()], allow_short)
    }

    pub fn blended(
        cov: &[Vec<f64>],
        mean: &[f64],
        tolerance: f64,
        risk_aversion_scale: f64,
        allow_short: bool,
    ) -> Self {
        let linear: Vec<f64> = mean
            .iter()
            .map(|m| -tolerance * risk_aversion_scale * m)
            .collect();
        Self::mean_variance(cov, &linear, allow_short)
    }

    /// `min yᵀΣy` s.t. `(μ − rf)ᵀy = 1`; the Sharpe-optimal weights are `y / Σy`.
    pub fn max_sharpe(cov: &[Vec<f64>], excess: &[f64], allow_short: bool) -> Self {
        let n = cov.len();
        let scale = objective_scale(cov);
        let p = cov
            .iter()
            .map(|row| row.iter().map(|v| 2.0 * v * scale).collect())
            .collect();

        let mut a = vec![excess.to_vec()];
        let mut b = vec![1.0];
        let mut cones = vec![SupportedConeT::ZeroConeT(1)];
        if !allow_short {
            a.extend(negative_identity(n));
            b.extend(vec![0.0; n]);
            cones.push(SupportedConeT::NonnegativeConeT(n));
        }

        Self {
            p,
            q: vec![0.0; n],
            a,
            b,
            cones,
        }
    }

    pub fn n_vars(&self) -> usize {
        self.q.len()
    }

    /// Upper triangle of P in compressed sparse column form.
    fn p_csc(&self) -> CscMatrix<f64> {
        let n = self.n_vars();
        let mut data = Vec::new();
        let mut indices = Vec::new();
        let mut indptr = vec![0];
        for j in 0..n {
            for i in 0..=j {
                let val = self.p[i][j];
                if val != 0.0 {
                    data.push(val);
                    indices.push(i);
                }
            }
            indptr.push(data.len());
        }
        CscMatrix::new(n, n, indptr, indices, data)
    }

    fn a_csc(&self) -> CscMatrix<f64> {
        let n = self.n_vars();
        let m = self.a.len();
        let mut data = Vec::new();
        let mut indices = Vec::new();
        let mut indptr = vec![0];
        for j in 0..n {
            for (i, row) in self.a.iter().enumerate() {
                if row[j] != 0.0 {
                    data.push(row[j]);
                    indices.push(i);
                }
            }
            indptr.push(data.len());
        }
        CscMatrix::new(m, n, indptr, indices, data)
    }
}

fn negative_identity(n: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| {
            let mut row = vec![0.0; n];
            row[i] = -1.0;
            row
        })
        .collect()
}

fn objective_scale(cov: &[Vec<f64>]) -> f64 {
    let max_diag = cov
        .iter()
        .enumerate()
        .map(|(i, row)| row[i].abs())
        .fold(0.0, f64::max);
    if max_diag > 0.0 {
        1.0 / max_diag
    } else {
        1.0
    }
}

/// Solves mean-variance problems for a [`RiskEstimate`].
#[derive(Debug, Clone, Default)]
pub struct PortfolioOptimizer {
    config: OptimizerConfig,
}

impl PortfolioOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Optimal weights for a risk tolerance in `[0, 1]`.
    pub fn optimize(&self, estimate: &RiskEstimate, risk_tolerance: f64) -> Result<PortfolioWeights> {
        let objective = Objective::from_tolerance(risk_tolerance)?;
        self.optimize_objective(estimate, objective)
    }

    /// Optimal weights for an explicit objective.
    pub fn optimize_objective(
        &self,
        estimate: &RiskEstimate,
        objective: Objective,
    ) -> Result<PortfolioWeights> {
        let n = estimate.n_assets();
        if n < 2 {
            return Err(EngineError::InvalidRequest(format!(
                "optimization needs at least 2 symbols, got {}",
                n
            )));
        }

        info!("Optimizing {} assets for {}", n, objective);

        let cov: Vec<Vec<f64>> = (0..n)
            .map(|i| (0..n).map(|j| estimate.covariance[(i, j)]).collect())
            .collect();
        let mean: Vec<f64> = estimate.mean.iter().copied().collect();
        let allow_short = self.config.allow_short;

        let raw = match objective {
            Objective::MinVariance => self.solve(&QpProblem::min_variance(&cov, allow_short))?,
            Objective::Blended { tolerance } => self.solve(&QpProblem::blended(
                &cov,
                &mean,
                tolerance,
                self.config.risk_aversion_scale,
                allow_short,
            ))?,
            Objective::MaxSharpe => {
                let excess: Vec<f64> = mean
                    .iter()
                    .map(|m| m - self.config.risk_free_rate)
                    .collect();
                if excess.iter().all(|&r| r <= 0.0) {
                    warn!("No asset has positive excess return; using minimum variance");
                    self.solve(&QpProblem::min_variance(&cov, allow_short))?
                } else {
                    let y = self.solve(&QpProblem::max_sharpe(&cov, &excess, allow_short))?;
                    let total: f64 = y.iter().sum();
                    if total <= 0.0 || !total.is_finite() {
                        return Err(EngineError::OptimizationFailure(format!(
                            "maximum Sharpe solution has non-positive scale {}",
                            total
                        )));
                    }
                    y.iter().map(|v| v / total).collect()
                }
            }
        };

        let weights = self.clean_weights(raw, estimate)?;
        debug!("Optimal weights: {:?}", weights);
        PortfolioWeights::from_vec(&estimate.symbols, &weights, allow_short)
    }

    /// Run Clarabel on a problem and return the primal solution.
    pub fn solve(&self, problem: &QpProblem) -> Result<Vec<f64>> {
        let p = problem.p_csc();
        let a = problem.a_csc();

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.config.max_iter)
            .verbose(false)
            .build()
            .map_err(|e| {
                EngineError::OptimizationFailure(format!("Failed to build settings: {}", e))
            })?;

        let mut solver =
            DefaultSolver::new(&p, &problem.q, &a, &problem.b, &problem.cones, settings)
                .map_err(|e| {
                    EngineError::OptimizationFailure(format!("Failed to create solver: {:?}", e))
                })?;

        solver.solve();

        match solver.solution.status {
            SolverStatus::Solved => {}
            SolverStatus::AlmostSolved => {
                warn!("Solver reached reduced accuracy; accepting solution");
            }
            status => {
                return Err(EngineError::OptimizationFailure(format!(
                    "solver finished with status {:?} after {} iterations",
                    status, solver.solution.iterations
                )));
            }
        }

        let x = solver.solution.x.clone();
        if x.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::OptimizationFailure(
                "solver returned non-finite weights".to_string(),
            ));
        }
        Ok(x)
    }

    /// Clamp round-off, split weight evenly among interchangeable assets and
    /// renormalize to an exact unit sum.
    fn clean_weights(&self, mut w: Vec<f64>, estimate: &RiskEstimate) -> Result<Vec<f64>> {
        for v in w.iter_mut() {
            if v.abs() < WEIGHT_EPSILON || (!self.config.allow_short && *v < 0.0) {
                *v = 0.0;
            }
        }

        for group in interchangeable_groups(estimate) {
            let total: f64 = group.iter().map(|&i| w[i]).sum();
            let share = total / group.len() as f64;
            for &i in &group {
                w[i] = share;
            }
        }

        let sum: f64 = w.iter().sum();
        if sum <= 0.0 || !sum.is_finite() {
            return Err(EngineError::OptimizationFailure(format!(
                "weights sum to {} after clean-up",
                sum
            )));
        }
        Ok(w.iter().map(|v| v / sum).collect())
    }
}

/// Groups (size ≥ 2) of assets whose mean and covariance rows are identical,
/// so that swapping any two of them leaves the problem unchanged.
///
/// Groups are keyed by the lexicographically first member.
fn interchangeable_groups(estimate: &RiskEstimate) -> Vec<Vec<usize>> {
    let n = estimate.n_assets();
    let cov = &estimate.sample_covariance;
    let mu = &estimate.mean;

    let cov_scale = cov.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let mu_scale = mu.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let close = |a: f64, b: f64, scale: f64| (a - b).abs() <= TIE_TOLERANCE * scale.max(f64::MIN_POSITIVE);

    let same = |i: usize, j: usize| {
        close(mu[i], mu[j], mu_scale)
            && close(cov[(i, i)], cov[(j, j)], cov_scale)
            && (0..n)
                .filter(|&k| k != i && k != j)
                .all(|k| close(cov[(i, k)], cov[(j, k)], cov_scale))
    };

    let mut assigned = vec![false; n];
    let mut groups = Vec::new();
    for i in 0..n {
        if assigned[i] {
            continue;
        }
        let mut group = vec![i];
        for j in (i + 1)..n {
            if !assigned[j] && same(i, j) {
                group.push(j);
                assigned[j] = true;
            }
        }
        if group.len() > 1 {
            debug!(
                "Interchangeable assets: {:?}",
                group.iter().map(|&k| &estimate.symbols[k]).collect::<Vec<_>>()
            );
            groups.push(group);
        }
    }
    groups
}

/// Realized and expected statistics of a weighting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    /// Expected periodic return `wᵀμ`.
    pub expected_return: f64,
    /// Periodic standard deviation `√(wᵀΣw)`.
    pub risk: f64,
    /// `(1 + wᵀμ)^A − 1`.
    pub annualized_return: f64,
    /// `√(wᵀΣw) · √A`.
    pub annualized_risk: f64,
    /// `wᵀμ / σ` per period.
    pub sharpe_ratio: f64,
    /// `annualized_return / annualized_risk`.
    pub annualized_sharpe: f64,
    /// Periodic return over periodic downside deviation.
    pub sortino_ratio: f64,
    /// `annualized_return / annualized_downside_risk`.
    pub annualized_sortino: f64,
    /// Periodic downside deviation of the historical path.
    pub downside_risk: f64,
    pub annualized_downside_risk: f64,
    /// Max drawdown of the historical constant-weight path.
    pub max_drawdown: f64,
    /// Annualized return over |max drawdown|.
    pub calmar_ratio: f64,
}

impl PortfolioStats {
    /// Statistics for `weights` ordered like `estimate.symbols`.
    pub fn compute(weights: &[f64], estimate: &RiskEstimate, returns: &ReturnsMatrix) -> Result<Self> {
        let a = estimate.annualization_factor;
        let expected_return = estimate.portfolio_return(weights);
        let risk = estimate.portfolio_variance(weights).sqrt();
        let annualized_return = (1.0 + expected_return).powf(a) - 1.0;
        let annualized_risk = risk * a.sqrt();

        let path = returns.portfolio_returns(weights)?;
        let downside = metrics::downside_deviation(&path);
        let annualized_downside_risk = downside * a.sqrt();
        let values = metrics::value_path(&path);
        let max_drawdown = metrics::max_drawdown(&values);

        Ok(Self {
            expected_return,
            risk,
            annualized_return,
            annualized_risk,
            sharpe_ratio: ratio(expected_return, risk),
            annualized_sharpe: ratio(annualized_return, annualized_risk),
            sortino_ratio: ratio(expected_return, downside),
            annualized_sortino: ratio(annualized_return, annualized_downside_risk),
            downside_risk: downside,
            annualized_downside_risk,
            max_drawdown,
            calmar_ratio: metrics::drawdown_ratio(annualized_return, max_drawdown),
        })
    }

    /// Statistics for a [`PortfolioWeights`] map.
    pub fn for_weights(
        weights: &PortfolioWeights,
        estimate: &RiskEstimate,
        returns: &ReturnsMatrix,
    ) -> Result<Self> {
        let w = weights.to_vector(&estimate.symbols)?;
        Self::compute(&w, estimate, returns)
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 && den.is_finite() {
        num / den
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskModel;
    use crate::types::{AssetClass, AssetSeries, DateRange, RebalanceFrequency};
    use chrono::{Duration, NaiveDate};

    fn estimate_from(columns: &[(&str, Vec<f64>)]) -> (RiskEstimate, ReturnsMatrix) {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let series: Vec<AssetSeries> = columns
            .iter()
            .map(|(symbol, rets)| {
                let mut price = 50.0;
                let mut pairs = vec![(start, price)];
                for (i, r) in rets.iter().enumerate() {
                    price *= 1.0 + r;
                    pairs.push((start + Duration::days(i as i64 + 1), price));
                }
                AssetSeries::from_pairs(*symbol, AssetClass::Stock, pairs).unwrap()
            })
            .collect();
        let returns = ReturnsMatrix::from_series(&series, &DateRange::unbounded()).unwrap();
        let est = RiskModel::default()
            .estimate(&returns, RebalanceFrequency::Daily)
            .unwrap();
        (est, returns)
    }

    fn wave(n: usize, amp: f64, drift: f64, freq: f64) -> Vec<f64> {
        (0..n)
            .map(|i| drift + amp * ((i as f64) * freq).sin())
            .collect()
    }

    fn three_assets() -> (RiskEstimate, ReturnsMatrix) {
        estimate_from(&[
            ("AAA", wave(120, 0.010, 0.0004, 0.7)),
            ("BBB", wave(120, 0.020, 0.0012, 1.1)),
            ("CCC", wave(120, 0.030, 0.0020, 1.9)),
        ])
    }

    fn vector(w: &PortfolioWeights, est: &RiskEstimate) -> Vec<f64> {
        w.to_vector(&est.symbols).unwrap()
    }

    #[test]
    fn test_objective_selection() {
        assert_eq!(Objective::from_tolerance(0.0).unwrap(), Objective::MinVariance);
        assert_eq!(Objective::from_tolerance(1.0).unwrap(), Objective::MaxSharpe);
        assert_eq!(
            Objective::from_tolerance(0.4).unwrap(),
            Objective::Blended { tolerance: 0.4 }
        );
        assert!(Objective::from_tolerance(1.2).is_err());
        assert!(Objective::from_tolerance(f64::NAN).is_err());
    }

    #[test]
    fn test_weights_sum_to_one_and_long_only() {
        let (est, _) = three_assets();
        let opt = PortfolioOptimizer::default();
        for t in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let w = opt.optimize(&est, t).unwrap();
            assert!((w.sum() - 1.0).abs() < 1e-6);
            assert!(w.iter().all(|(_, &v)| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn test_min_variance_beats_alternatives() {
        let (est, _) = three_assets();
        let w = PortfolioOptimizer::default().optimize(&est, 0.0).unwrap();
        let var = est.portfolio_variance(&vector(&w, &est));

        for other in [[1.0, 0.0, 0.0], [0.5, 0.5, 0.0], [0.34, 0.33, 0.33], [0.7, 0.2, 0.1]] {
            assert!(var <= est.portfolio_variance(&other) + 1e-10);
        }
    }

    #[test]
    fn test_max_sharpe_beats_alternatives() {
        let (est, _) = three_assets();
        let w = PortfolioOptimizer::default().optimize(&est, 1.0).unwrap();
        let sharpe = |v: &[f64]| est.portfolio_return(v) / est.portfolio_variance(v).sqrt();
        let best = sharpe(&vector(&w, &est));

        for other in [[1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.34, 0.33, 0.33], [0.2, 0.3, 0.5]] {
            assert!(best >= sharpe(&other) - 1e-6);
        }
    }

    #[test]
    fn test_blend_is_monotonic_in_expected_return() {
        let (est, _) = three_assets();
        let opt = PortfolioOptimizer::default();
        let mut last = f64::NEG_INFINITY;
        for t in [0.0, 0.1, 0.3, 0.5, 0.7, 0.9] {
            let w = opt.optimize(&est, t).unwrap();
            let r = est.portfolio_return(&vector(&w, &est));
            assert!(r >= last - 1e-9, "t={} return {} < {}", t, r, last);
            last = r;
        }
    }

    #[test]
    fn test_identical_assets_split_evenly() {
        let r = vec![0.01; 30];
        let (est, _) = estimate_from(&[("A", r.clone()), ("B", r)]);
        let w = PortfolioOptimizer::default().optimize(&est, 0.0).unwrap();
        assert!((w.get("A").unwrap() - 0.5).abs() < 1e-9);
        assert!((w.get("B").unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_identical_noisy_assets_split_evenly() {
        let r = wave(60, 0.02, 0.001, 0.5);
        let (est, _) = estimate_from(&[("X", r.clone()), ("Y", r)]);
        for t in [0.0, 0.5, 1.0] {
            let w = PortfolioOptimizer::default().optimize(&est, t).unwrap();
            assert_eq!(w.get("X"), w.get("Y"));
        }
    }

    #[test]
    fn test_repeat_runs_identical() {
        let (est, _) = three_assets();
        let opt = PortfolioOptimizer::default();
        let a = opt.optimize(&est, 0.6).unwrap();
        let b = opt.optimize(&est, 0.6).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_max_sharpe_falls_back_without_positive_returns() {
        let (est, _) = estimate_from(&[
            ("A", wave(80, 0.01, -0.002, 0.7)),
            ("B", wave(80, 0.02, -0.001, 1.3)),
        ]);
        let opt = PortfolioOptimizer::default();
        let sharpe = opt.optimize(&est, 1.0).unwrap();
        let minvar = opt.optimize(&est, 0.0).unwrap();
        for (s, w) in sharpe.iter() {
            assert!((w - minvar.get(s).unwrap()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_single_asset_rejected() {
        let (est, _) = estimate_from(&[("A", wave(20, 0.01, 0.0, 0.7))]);
        let result = PortfolioOptimizer::default().optimize(&est, 0.5);
        assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
    }

    #[test]
    fn test_short_mode_allows_negative_weights() {
        let (est, _) = estimate_from(&[
            ("A", wave(100, 0.010, 0.0030, 0.7)),
            ("B", wave(100, 0.011, -0.0030, 0.75)),
        ]);
        let opt = PortfolioOptimizer::new(OptimizerConfig {
            allow_short: true,
            ..Default::default()
        });
        let w = opt.optimize(&est, 0.9).unwrap();
        assert!((w.sum() - 1.0).abs() < 1e-6);
        assert!(w.get("B").unwrap() < 0.0);
    }

    #[test]
    fn test_portfolio_stats() {
        let (est, returns) = three_assets();
        let w = [0.2, 0.3, 0.5];
        let stats = PortfolioStats::compute(&w, &est, &returns).unwrap();

        assert!((stats.expected_return - est.portfolio_return(&w)).abs() < 1e-15);
        assert!((stats.annualized_risk - stats.risk * 252f64.sqrt()).abs() < 1e-12);
        assert!(
            (stats.annualized_return - ((1.0 + stats.expected_return).powf(252.0) - 1.0)).abs()
                < 1e-12
        );
        assert!(stats.max_drawdown <= 0.0);

        let path = returns.portfolio_returns(&w).unwrap();
        let downside = metrics::downside_deviation(&path);
        assert!(downside > 0.0);
        assert!((stats.downside_risk - downside).abs() < 1e-15);
        assert!((stats.annualized_downside_risk - downside * 252f64.sqrt()).abs() < 1e-12);
        assert!((stats.sortino_ratio - stats.expected_return / downside).abs() < 1e-12);
        assert!(
            (stats.annualized_sortino - stats.annualized_return / stats.annualized_downside_risk).abs()
                < 1e-12
        );
    }
}
