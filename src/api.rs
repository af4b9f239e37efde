//! Request and response bodies of the HTTP interface.
//!
//! Field names follow the public JSON contract. Weights, returns and risk
//! are fractions; formatting them as percentages is left to callers.

use crate::analysis::{AnalysisReport, Improvement, PortfolioSnapshot, WeightDifference};
use crate::engine::{AnalysisOutcome, OptimizationOutcome};
use crate::error::{EngineError, Result};
use crate::optimizer::PortfolioStats;
use crate::tasks::TaskStatus;
use crate::types::{AssetClass, DateRange, Holding, PortfolioWeights, RebalanceFrequency, Recommendation};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

fn default_risk_tolerance() -> f64 {
    0.5
}

/// `POST /optimize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub symbols: Vec<String>,
    #[serde(default, alias = "asset_class")]
    pub asset_type: Option<AssetClass>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_risk_tolerance")]
    pub risk_tolerance: f64,
    #[serde(default)]
    pub rebalance_freq: Option<RebalanceFrequency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeResponse {
    pub weights: PortfolioWeights,
    #[serde(flatten)]
    pub stats: PortfolioStats,
    pub objective: String,
    pub rebalance_freq: RebalanceFrequency,
    pub observations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ridge: Option<f64>,
    pub covariance_matrix: Vec<Vec<f64>>,
}

impl From<OptimizationOutcome> for OptimizeResponse {
    fn from(o: OptimizationOutcome) -> Self {
        Self {
            weights: o.weights,
            stats: o.stats,
            objective: o.objective.to_string(),
            rebalance_freq: o.rebalance_frequency,
            observations: o.observations,
            ridge: o.ridge,
            covariance_matrix: o.covariance_matrix,
        }
    }
}

/// `POST /backtest`; the response is a [`crate::backtest::BacktestResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub symbols: Vec<String>,
    #[serde(default, alias = "asset_class")]
    pub asset_type: Option<AssetClass>,
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub rebalance_freq: Option<RebalanceFrequency>,
    /// Extra rebalance dates, the only ones for `on-demand`.
    #[serde(default)]
    pub rebalance_dates: Vec<NaiveDate>,
}

impl BacktestRequest {
    pub fn portfolio_weights(&self) -> Result<PortfolioWeights> {
        PortfolioWeights::new(self.weights.clone())
    }
}

/// `POST /models/train`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainRequest {
    pub symbols: Vec<String>,
    #[serde(default, alias = "asset_class")]
    pub asset_type: Option<AssetClass>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

/// `POST /portfolio/analyze`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Current holdings, supplied by the account service.
    pub holdings: Vec<Holding>,
    #[serde(default, alias = "asset_class")]
    pub asset_type: Option<AssetClass>,
    #[serde(default)]
    pub rebalance_freq: Option<RebalanceFrequency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub current_portfolio: CurrentPortfolio,
    pub optimized_portfolio: PortfolioSnapshot,
    pub recommendations: Vec<Recommendation>,
    pub weight_differences: BTreeMap<String, WeightDifference>,
    pub potential_improvement: Improvement,
}

/// Current allocation with its market value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentPortfolio {
    #[serde(flatten)]
    pub snapshot: PortfolioSnapshot,
    pub total_value: f64,
}

impl From<AnalysisOutcome> for AnalyzeResponse {
    fn from(o: AnalysisOutcome) -> Self {
        let AnalysisReport {
            current_portfolio,
            optimized_portfolio,
            recommendations,
            weight_differences,
            potential_improvement,
        } = o.report;
        Self {
            current_portfolio: CurrentPortfolio {
                snapshot: current_portfolio,
                total_value: o.total_value,
            },
            optimized_portfolio,
            recommendations,
            weight_differences,
            potential_improvement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error body: a stable kind plus a readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: String,
    pub detail: String,
}

impl From<&EngineError> for ErrorResponse {
    fn from(e: &EngineError) -> Self {
        Self {
            kind: e.kind().to_string(),
            detail: e.to_string(),
        }
    }
}

/// Date range from optional request dates.
pub fn request_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<DateRange> {
    DateRange::from_bounds(start, end)
}
