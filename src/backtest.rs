//! Historical simulation of a weighting.
//!
//! The portfolio starts at a value of 1.0 split across assets by target
//! weight. Each asset sleeve then grows with its own price; between
//! rebalances the weights drift. A rebalance resets every sleeve to
//! `target_weight × current_value` at the close of the boundary date:
//!
//! - `daily`: before every period, so each period return is `Σ wᵢ·rᵢ`.
//! - `weekly`: when the next date falls in a new ISO week.
//! - `on-demand`: only at caller-supplied rebalance dates.

use crate::data::align_prices;
use crate::error::{EngineError, Result};
use crate::metrics::{self, DrawdownMetrics, TailMetrics};
use crate::types::{AssetSeries, DateRange, PortfolioWeights, RebalanceFrequency, ValuePoint};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Backtest settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Periods per year used to annualize statistics of the price data.
    pub periods_per_year: f64,
    /// Annual risk-free rate subtracted in Sharpe and Sortino.
    pub risk_free_rate: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            periods_per_year: 252.0,
            risk_free_rate: 0.0,
        }
    }
}

/// Outcome of a backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Portfolio value per aligned date; the first value is 1.0.
    pub cumulative_returns: Vec<ValuePoint>,
    /// Return of each period, dated at the period's end.
    pub daily_returns: Vec<ValuePoint>,
    /// Drawdown from the running peak per aligned date.
    pub drawdown_series: Vec<ValuePoint>,

    pub total_return: f64,
    pub cagr: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    pub ulcer_index: f64,
    pub pain_index: f64,
    pub recovery_factor: f64,
    pub win_rate: f64,
    pub best_day: f64,
    pub worst_day: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub var_95: f64,
    pub cvar_95: f64,
    /// Periodic downside deviation.
    pub downside_deviation: f64,
    /// Annualized downside deviation.
    pub downside_risk: f64,

    pub periods: usize,
    pub rebalances: usize,
    pub rebalance_frequency: RebalanceFrequency,
}

impl BacktestResult {
    pub fn final_value(&self) -> f64 {
        self.cumulative_returns.last().map(|p| p.value).unwrap_or(1.0)
    }
}

/// Simulates weightings over aligned price histories.
#[derive(Debug, Clone, Default)]
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Backtest with scheduled rebalancing only.
    pub fn run<S: AsRef<AssetSeries>>(
        &self,
        weights: &PortfolioWeights,
        series: &[S],
        rebalance: RebalanceFrequency,
        range: &DateRange,
    ) -> Result<BacktestResult> {
        self.run_with_rebalance_dates(weights, series, rebalance, range, &[])
    }

    /// Backtest with additional explicit rebalance dates.
    ///
    /// Explicit dates apply on top of any schedule; they are the only
    /// rebalances for [`RebalanceFrequency::OnDemand`].
    pub fn run_with_rebalance_dates<S: AsRef<AssetSeries>>(
        &self,
        weights: &PortfolioWeights,
        series: &[S],
        rebalance: RebalanceFrequency,
        range: &DateRange,
        rebalance_dates: &[NaiveDate],
    ) -> Result<BacktestResult> {
        let aligned = align_prices(series, range)?;
        if aligned.is_empty() {
            return Err(EngineError::InsufficientData(
                "no aligned price history in range".to_string(),
            ));
        }
        if aligned.len() < 2 {
            return Err(EngineError::InsufficientData(format!(
                "need at least 2 aligned dates to backtest, found {}",
                aligned.len()
            )));
        }

        let raw = weights.to_vector(&aligned.symbols)?;
        let total: f64 = raw.iter().sum();
        let target: Vec<f64> = raw.iter().map(|w| w / total).collect();
        let explicit: BTreeSet<NaiveDate> = rebalance_dates.iter().copied().collect();

        info!(
            "Backtesting {} assets over {} periods ({} rebalancing)",
            aligned.symbols.len(),
            aligned.len() - 1,
            rebalance
        );

        let mut sleeves = target.clone();
        let mut value = 1.0;
        let mut values = Vec::with_capacity(aligned.len());
        let mut returns = Vec::with_capacity(aligned.len() - 1);
        let mut rebalances = 0;
        values.push(value);

        for t in 1..aligned.len() {
            let prev_date = aligned.dates[t - 1];
            let date = aligned.dates[t];

            if t > 1 && self.rebalance_due(rebalance, prev_date, date, &explicit) {
                for (s, w) in sleeves.iter_mut().zip(&target) {
                    *s = w * value;
                }
                rebalances += 1;
            }

            for (j, s) in sleeves.iter_mut().enumerate() {
                *s *= aligned.prices[t][j] / aligned.prices[t - 1][j];
            }

            let new_value: f64 = sleeves.iter().sum();
            returns.push(if value != 0.0 {
                new_value / value - 1.0
            } else {
                0.0
            });
            value = new_value;
            values.push(value);
        }

        debug!("Backtest finished with value {:.6} after {} rebalances", value, rebalances);

        Ok(self.summarize(&aligned.dates, &values, &returns, rebalances, rebalance))
    }

    fn rebalance_due(
        &self,
        frequency: RebalanceFrequency,
        prev_date: NaiveDate,
        date: NaiveDate,
        explicit: &BTreeSet<NaiveDate>,
    ) -> bool {
        if explicit.contains(&prev_date) {
            return true;
        }
        match frequency {
            RebalanceFrequency::Daily => true,
            RebalanceFrequency::Weekly => prev_date.iso_week() != date.iso_week(),
            RebalanceFrequency::OnDemand => false,
        }
    }

    fn summarize(
        &self,
        dates: &[NaiveDate],
        values: &[f64],
        returns: &[f64],
        rebalances: usize,
        frequency: RebalanceFrequency,
    ) -> BacktestResult {
        let a = self.config.periods_per_year;
        let rf = self.config.risk_free_rate;

        let total_return = values[values.len() - 1] / values[0] - 1.0;
        let cagr = if total_return > -1.0 {
            metrics::cagr(values, a)
        } else {
            -1.0
        };
        let drawdowns = metrics::drawdown_series(values);
        let dd = DrawdownMetrics::compute(values);
        let tail = TailMetrics::compute(returns);
        let downside = metrics::downside_deviation(returns);

        let dated = |d: &[NaiveDate], v: &[f64]| -> Vec<ValuePoint> {
            d.iter()
                .zip(v)
                .map(|(&date, &value)| ValuePoint { date, value })
                .collect()
        };

        BacktestResult {
            cumulative_returns: dated(dates, values),
            daily_returns: dated(&dates[1..], returns),
            drawdown_series: dated(dates, &drawdowns),
            total_return,
            cagr,
            volatility: metrics::sample_std(returns) * a.sqrt(),
            sharpe_ratio: metrics::sharpe_ratio(returns, a, rf),
            sortino_ratio: metrics::sortino_ratio(returns, a, rf),
            calmar_ratio: metrics::drawdown_ratio(cagr, dd.max_drawdown),
            max_drawdown: dd.max_drawdown,
            ulcer_index: dd.ulcer_index,
            pain_index: dd.pain_index,
            recovery_factor: metrics::drawdown_ratio(total_return, dd.max_drawdown),
            win_rate: tail.win_rate,
            best_day: tail.best_period,
            worst_day: tail.worst_period,
            avg_win: tail.avg_win,
            avg_loss: tail.avg_loss,
            profit_factor: tail.profit_factor,
            var_95: tail.var_95,
            cvar_95: tail.cvar_95,
            downside_deviation: downside,
            downside_risk: downside * a.sqrt(),
            periods: returns.len(),
            rebalances,
            rebalance_frequency: frequency,
        }
    }
}
