//! Current-versus-optimal portfolio analysis.

use crate::error::{EngineError, Result};
use crate::optimizer::{PortfolioOptimizer, PortfolioStats};
use crate::returns::ReturnsMatrix;
use crate::risk::RiskEstimate;
use crate::types::{Holding, PortfolioWeights, Recommendation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Minimum number of holdings an analysis needs.
pub const MIN_HOLDINGS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Risk tolerance used for the optimized comparison portfolio.
    pub risk_tolerance: f64,
    /// Only symbols whose weight moves by at least this much are recommended.
    pub recommendation_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            risk_tolerance: 0.5,
            recommendation_threshold: 0.0,
        }
    }
}

/// A weighting together with its statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub weights: PortfolioWeights,
    #[serde(flatten)]
    pub stats: PortfolioStats,
}

/// Signed weight change for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightDifference {
    pub current: f64,
    pub optimal: f64,
    /// `optimal − current`.
    pub difference: f64,
}

/// Annualized gains from moving to the optimized portfolio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    pub return_increase: f64,
    pub risk_change: f64,
    pub sharpe_improvement: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub current_portfolio: PortfolioSnapshot,
    pub optimized_portfolio: PortfolioSnapshot,
    pub recommendations: Vec<Recommendation>,
    pub weight_differences: BTreeMap<String, WeightDifference>,
    pub potential_improvement: Improvement,
}

/// Compares a current allocation with the optimizer's.
#[derive(Debug, Clone, Default)]
pub struct AnalysisEngine {
    config: AnalysisConfig,
    optimizer: PortfolioOptimizer,
}

impl AnalysisEngine {
    pub fn new(config: AnalysisConfig, optimizer: PortfolioOptimizer) -> Self {
        Self { config, optimizer }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze `current` over the universe described by `estimate`.
    ///
    /// Symbols of the universe missing from `current` count as zero weight.
    pub fn analyze(
        &self,
        current: &PortfolioWeights,
        estimate: &RiskEstimate,
        returns: &ReturnsMatrix,
    ) -> Result<AnalysisReport> {
        if current.len() < MIN_HOLDINGS {
            return Err(EngineError::InsufficientHoldings {
                required: MIN_HOLDINGS,
                actual: current.len(),
            });
        }

        info!("Analyzing portfolio of {} holdings", current.len());

        let current_vec = current.to_vector(&estimate.symbols)?;
        let current_stats = PortfolioStats::compute(&current_vec, estimate, returns)?;

        let optimal = self.optimizer.optimize(estimate, self.config.risk_tolerance)?;
        let optimal_vec = optimal.to_vector(&estimate.symbols)?;
        let optimal_stats = PortfolioStats::compute(&optimal_vec, estimate, returns)?;

        let mut weight_differences = BTreeMap::new();
        let mut recommendations = Vec::new();
        for (i, symbol) in estimate.symbols.iter().enumerate() {
            let (c, o) = (current_vec[i], optimal_vec[i]);
            weight_differences.insert(
                symbol.clone(),
                WeightDifference {
                    current: c,
                    optimal: o,
                    difference: o - c,
                },
            );
            let rec = Recommendation::new(symbol.as_str(), c, o);
            if rec.difference >= self.config.recommendation_threshold {
                recommendations.push(rec);
            }
        }
        debug!(
            "{} of {} symbols pass the recommendation threshold",
            recommendations.len(),
            estimate.symbols.len()
        );

        let potential_improvement = Improvement {
            return_increase: optimal_stats.annualized_return - current_stats.annualized_return,
            risk_change: optimal_stats.annualized_risk - current_stats.annualized_risk,
            sharpe_improvement: optimal_stats.annualized_sharpe - current_stats.annualized_sharpe,
        };

        Ok(AnalysisReport {
            current_portfolio: PortfolioSnapshot {
                weights: PortfolioWeights::from_vec(&estimate.symbols, &current_vec, true)?,
                stats: current_stats,
            },
            optimized_portfolio: PortfolioSnapshot {
                weights: optimal,
                stats: optimal_stats,
            },
            recommendations,
            weight_differences,
            potential_improvement,
        })
    }
}

/// Market-value weights of `holdings` at `prices`, plus the total value.
///
/// Repeated symbols are merged.
pub fn weights_from_holdings(
    holdings: &[Holding],
    prices: &BTreeMap<String, f64>,
) -> Result<(PortfolioWeights, f64)> {
    let mut values: BTreeMap<String, f64> = BTreeMap::new();
    for h in holdings {
        if !h.quantity.is_finite() || h.quantity < 0.0 {
            return Err(EngineError::InvalidRequest(format!(
                "invalid quantity {} for {}",
                h.quantity, h.symbol
            )));
        }
        let price = prices
            .get(&h.symbol)
            .copied()
            .ok_or_else(|| EngineError::DataError(format!("no price for holding {}", h.symbol)))?;
        *values.entry(h.symbol.clone()).or_default() += h.quantity * price;
    }

    let total: f64 = values.values().sum();
    if !(total > 0.0) {
        return Err(EngineError::InvalidRequest(
            "holdings have no market value".to_string(),
        ));
    }
    let weights = values
        .into_iter()
        .map(|(symbol, value)| (symbol, value / total))
        .collect();
    Ok((PortfolioWeights::new(weights)?, total))
}
