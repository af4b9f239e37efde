//! Periodic return series on a common date index.

use crate::data::{align_prices, AlignedPrices};
use crate::error::{EngineError, Result};
use crate::types::{AssetSeries, DateRange};
use chrono::NaiveDate;
use tracing::debug;

/// Simple returns of several symbols aligned on shared dates.
///
/// `columns[j][t]` is the return of `symbols[j]` from `dates[t]`'s previous
/// aligned date to `dates[t]`. The first aligned price date is kept as
/// `base_date`, so there is one fewer return than there are aligned prices.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnsMatrix {
    base_date: NaiveDate,
    dates: Vec<NaiveDate>,
    symbols: Vec<String>,
    columns: Vec<Vec<f64>>,
}

/// Fewest return periods a matrix may hold.
pub const MIN_PERIODS: usize = 2;

impl ReturnsMatrix {
    /// Build from price series: align on the intersection of dates in `range`,
    /// then compute `p_t / p_{t-1} - 1`.
    pub fn from_series<S: AsRef<AssetSeries>>(series: &[S], range: &DateRange) -> Result<Self> {
        let aligned = align_prices(series, range)?;
        Self::from_prices(&aligned)
    }

    /// Build from already aligned prices. At least [`MIN_PERIODS`] return
    /// periods are required.
    pub fn from_prices(aligned: &AlignedPrices) -> Result<Self> {
        let periods = aligned.len().saturating_sub(1);
        if periods < MIN_PERIODS {
            return Err(EngineError::InsufficientData(format!(
                "need at least {} return periods, found {} across {} aligned dates",
                MIN_PERIODS,
                periods,
                aligned.len()
            )));
        }

        let columns: Vec<Vec<f64>> = (0..aligned.symbols.len())
            .map(|j| {
                aligned
                    .prices
                    .windows(2)
                    .map(|w| w[1][j] / w[0][j] - 1.0)
                    .collect()
            })
            .collect();

        debug!(
            "Computed {} return periods for {} symbols",
            aligned.len() - 1,
            aligned.symbols.len()
        );

        Ok(Self {
            base_date: aligned.dates[0],
            dates: aligned.dates[1..].to_vec(),
            symbols: aligned.symbols.clone(),
            columns,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Date of the first aligned price, which has no return.
    pub fn base_date(&self) -> NaiveDate {
        self.base_date
    }

    /// Dates of each return period.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Number of return periods.
    pub fn periods(&self) -> usize {
        self.dates.len()
    }

    pub fn n_assets(&self) -> usize {
        self.symbols.len()
    }

    pub fn column(&self, symbol: &str) -> Option<&[f64]> {
        let j = self.symbols.iter().position(|s| s == symbol)?;
        Some(&self.columns[j])
    }

    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    /// Returns of every symbol in period `t`, in symbol order.
    pub fn row(&self, t: usize) -> Vec<f64> {
        self.columns.iter().map(|c| c[t]).collect()
    }

    /// Arithmetic mean return per symbol.
    pub fn means(&self) -> Vec<f64> {
        let n = self.periods() as f64;
        self.columns
            .iter()
            .map(|c| c.iter().sum::<f64>() / n)
            .collect()
    }

    /// Return series of a constant-weight portfolio (rebalanced every period).
    ///
    /// `weights` are ordered like [`ReturnsMatrix::symbols`].
    pub fn portfolio_returns(&self, weights: &[f64]) -> Result<Vec<f64>> {
        if weights.len() != self.symbols.len() {
            return Err(EngineError::InvalidRequest(format!(
                "{} weights for {} symbols",
                weights.len(),
                self.symbols.len()
            )));
        }
        Ok((0..self.periods())
            .map(|t| {
                self.columns
                    .iter()
                    .zip(weights)
                    .map(|(c, w)| c[t] * w)
                    .sum()
            })
            .collect())
    }
}
