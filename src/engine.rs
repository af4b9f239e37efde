//! Portfolio engine facade.
//!
//! Ties a [`PriceSource`] to the return, risk, optimization, backtest,
//! analysis and training components. Everything except training is
//! synchronous; training is handed to the [`TrainingService`].

use crate::analysis::{weights_from_holdings, AnalysisConfig, AnalysisEngine, AnalysisReport};
use crate::backtest::{BacktestConfig, BacktestEngine, BacktestResult};
use crate::data::{align_prices, AlignedPrices, PriceSource};
use crate::error::{EngineError, Result};
use crate::optimizer::{Objective, OptimizerConfig, PortfolioOptimizer, PortfolioStats};
use crate::returns::ReturnsMatrix;
use crate::risk::{RiskConfig, RiskEstimate, RiskModel};
use crate::tasks::{TrainingService, TrainingTask};
use crate::training::TrainingConfig;
use crate::types::{
    validate_symbol, AssetClass, AssetSeries, DateRange, Holding, PortfolioWeights, RebalanceFrequency,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Settings of every engine component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub risk: RiskConfig,
    pub optimizer: OptimizerConfig,
    pub backtest: BacktestConfig,
    pub training: TrainingConfig,
    pub analysis: AnalysisConfig,
}

/// Result of an optimization request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub weights: PortfolioWeights,
    pub stats: PortfolioStats,
    pub objective: Objective,
    pub rebalance_frequency: RebalanceFrequency,
    /// Return observations behind the estimate.
    pub observations: usize,
    /// Diagonal ridge applied to the covariance, if any.
    pub ridge: Option<f64>,
    /// Periodic covariance the optimizer used, rows and columns in weight order.
    pub covariance_matrix: Vec<Vec<f64>>,
}

/// Result of an analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    #[serde(flatten)]
    pub report: AnalysisReport,
    /// Market value of the holdings at the latest aligned prices.
    pub total_value: f64,
}

/// The portfolio engine.
#[derive(Clone)]
pub struct PortfolioEngine {
    source: Arc<dyn PriceSource>,
    risk: RiskModel,
    optimizer: PortfolioOptimizer,
    backtester: BacktestEngine,
    analysis: AnalysisEngine,
    training: TrainingService,
}

impl PortfolioEngine {
    pub fn new(source: Arc<dyn PriceSource>, config: EngineConfig) -> Self {
        let optimizer = PortfolioOptimizer::new(config.optimizer);
        Self {
            source,
            risk: RiskModel::new(config.risk),
            analysis: AnalysisEngine::new(config.analysis, optimizer.clone()),
            optimizer,
            backtester: BacktestEngine::new(config.backtest),
            training: TrainingService::new(config.training),
        }
    }

    pub fn training(&self) -> &TrainingService {
        &self.training
    }

    /// Optimal weights for `symbols` over `range`.
    pub fn optimize(
        &self,
        symbols: &[String],
        asset_class: AssetClass,
        range: &DateRange,
        risk_tolerance: f64,
        rebalance: RebalanceFrequency,
    ) -> Result<OptimizationOutcome> {
        let symbols = validate_symbols(symbols, 2)?;
        let objective = Objective::from_tolerance(risk_tolerance)?;

        let (estimate, returns) = self.estimate(&symbols, asset_class, range, rebalance)?;
        let weights = self.optimizer.optimize_objective(&estimate, objective)?;
        let stats = PortfolioStats::for_weights(&weights, &estimate, &returns)?;

        info!(
            "Optimized {} symbols ({}): annualized return {:.4}, risk {:.4}",
            symbols.len(),
            objective,
            stats.annualized_return,
            stats.annualized_risk
        );

        Ok(OptimizationOutcome {
            weights,
            stats,
            objective,
            rebalance_frequency: rebalance,
            observations: estimate.observations,
            ridge: estimate.ridge,
            covariance_matrix: estimate
                .covariance
                .row_iter()
                .map(|row| row.iter().copied().collect())
                .collect(),
        })
    }

    /// Simulate a weighting over `range`.
    ///
    /// `symbols` must cover every weighted symbol; listed symbols without a
    /// weight are held at zero but still constrain the aligned dates.
    pub fn backtest(
        &self,
        symbols: &[String],
        asset_class: AssetClass,
        weights: &PortfolioWeights,
        range: &DateRange,
        rebalance: RebalanceFrequency,
        rebalance_dates: &[NaiveDate],
    ) -> Result<BacktestResult> {
        let symbols = validate_symbols(symbols, 1)?;
        if let Some(extra) = weights.symbols().into_iter().find(|s| !symbols.contains(s)) {
            return Err(EngineError::InvalidRequest(format!(
                "weight given for {} which is not among the requested symbols",
                extra
            )));
        }

        let series = self.source.fetch(&symbols, asset_class, range)?;
        self.backtester
            .run_with_rebalance_dates(weights, &series, rebalance, range, rebalance_dates)
    }

    /// Start a training task and return its id.
    pub fn train(&self, symbols: &[String], asset_class: AssetClass, range: &DateRange) -> Result<Uuid> {
        let symbols = validate_symbols(symbols, 1)?;
        let prices = self.aligned(&symbols, asset_class, range)?;
        self.training.submit(&prices)
    }

    pub fn training_status(&self, task_id: &Uuid) -> Result<TrainingTask> {
        self.training.status(task_id)
    }

    /// Compare holdings valued at the latest aligned prices with the optimizer's weights.
    pub fn analyze(
        &self,
        holdings: &[Holding],
        asset_class: AssetClass,
        range: &DateRange,
        rebalance: RebalanceFrequency,
    ) -> Result<AnalysisOutcome> {
        let symbols: BTreeSet<String> = holdings.iter().map(|h| h.symbol.clone()).collect();
        if symbols.len() < crate::analysis::MIN_HOLDINGS {
            return Err(EngineError::InsufficientHoldings {
                required: crate::analysis::MIN_HOLDINGS,
                actual: symbols.len(),
            });
        }
        let symbols: Vec<String> = symbols.into_iter().collect();
        for symbol in &symbols {
            validate_symbol(symbol)?;
        }

        let prices = self.aligned(&symbols, asset_class, range)?;
        let latest = prices.latest().ok_or_else(|| {
            EngineError::InsufficientData("no aligned prices to value holdings".to_string())
        })?;
        let (current, total_value) = weights_from_holdings(holdings, &latest)?;

        let returns = ReturnsMatrix::from_prices(&prices)?;
        let estimate = self.risk.estimate(&returns, rebalance)?;
        let report = self.analysis.analyze(&current, &estimate, &returns)?;

        Ok(AnalysisOutcome { report, total_value })
    }

    fn aligned(&self, symbols: &[String], asset_class: AssetClass, range: &DateRange) -> Result<AlignedPrices> {
        let series: Vec<Arc<AssetSeries>> = self.source.fetch(symbols, asset_class, range)?;
        align_prices(&series, range)
    }

    fn estimate(
        &self,
        symbols: &[String],
        asset_class: AssetClass,
        range: &DateRange,
        rebalance: RebalanceFrequency,
    ) -> Result<(RiskEstimate, ReturnsMatrix)> {
        let prices = self.aligned(symbols, asset_class, range)?;
        let returns = ReturnsMatrix::from_prices(&prices)?;
        let estimate = self.risk.estimate(&returns, rebalance)?;
        if estimate.ridge.is_some() {
            warn!("Covariance for {:?} needed regularization", symbols);
        }
        Ok((estimate, returns))
    }
}

/// Trim, reject blanks and duplicates, and enforce a minimum count.
fn validate_symbols(symbols: &[String], min: usize) -> Result<Vec<String>> {
    let cleaned: Vec<String> = symbols.iter().map(|s| s.trim().to_string()).collect();
    if cleaned.iter().any(|s| s.is_empty()) {
        return Err(EngineError::InvalidRequest("empty symbol".to_string()));
    }
    for symbol in &cleaned {
        validate_symbol(symbol)?;
    }
    let unique: BTreeSet<&String> = cleaned.iter().collect();
    if unique.len() != cleaned.len() {
        return Err(EngineError::InvalidRequest("duplicate symbols".to_string()));
    }
    if cleaned.len() < min {
        return Err(EngineError::InvalidRequest(format!(
            "need at least {} symbol(s), got {}",
            min,
            cleaned.len()
        )));
    }
    Ok(cleaned)
}
