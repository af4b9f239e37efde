//! Core data types for the portfolio engine.

use crate::error::{EngineError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tolerance applied to the weights-sum-to-one invariant.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Date format used at every external boundary.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Check that a ticker is safe to use as a file stem.
///
/// Accepts ASCII letters, digits and `. ^ - _ =`; rejects `..` and a leading dot.
pub fn validate_symbol(symbol: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '^' | '-' | '_' | '=');
    if symbol.is_empty()
        || symbol.len() > 32
        || !symbol.chars().all(allowed)
        || symbol.starts_with('.')
        || symbol.contains("..")
    {
        return Err(EngineError::InvalidRequest(format!(
            "invalid symbol {:?}",
            symbol
        )));
    }
    Ok(())
}

/// Asset class of a price series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    #[default]
    #[serde(alias = "stocks")]
    Stock,
    Crypto,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Stock => write!(f, "stock"),
            AssetClass::Crypto => write!(f, "crypto"),
        }
    }
}

/// A single dated observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, price: f64) -> Self {
        Self { date, price }
    }
}

/// Dated value on a derived series (cumulative value, drawdown, returns).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuePoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Price history of one symbol.
///
/// Dates are strictly increasing and every price is finite and positive.
/// The series is immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetSeries {
    symbol: String,
    asset_class: AssetClass,
    points: Vec<PricePoint>,
}

impl AssetSeries {
    /// Build a series, rejecting unordered, duplicated or non-positive observations.
    pub fn new(
        symbol: impl Into<String>,
        asset_class: AssetClass,
        points: Vec<PricePoint>,
    ) -> Result<Self> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(EngineError::DataError("Symbol must not be empty".to_string()));
        }

        for (i, p) in points.iter().enumerate() {
            if !p.price.is_finite() || p.price <= 0.0 {
                return Err(EngineError::DataError(format!(
                    "{}: invalid price {} on {}",
                    symbol, p.price, p.date
                )));
            }
            if i > 0 && points[i - 1].date >= p.date {
                return Err(EngineError::DataError(format!(
                    "{}: dates must be strictly increasing ({} follows {})",
                    symbol,
                    p.date,
                    points[i - 1].date
                )));
            }
        }

        Ok(Self {
            symbol,
            asset_class,
            points,
        })
    }

    /// Convenience constructor from parallel date/price slices.
    pub fn from_pairs(
        symbol: impl Into<String>,
        asset_class: AssetClass,
        pairs: impl IntoIterator<Item = (NaiveDate, f64)>,
    ) -> Result<Self> {
        let points = pairs
            .into_iter()
            .map(|(date, price)| PricePoint::new(date, price))
            .collect();
        Self::new(symbol, asset_class, points)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn asset_class(&self) -> AssetClass {
        self.asset_class
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Price on an exact date, if observed.
    pub fn price_on(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|i| self.points[i].price)
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }
}

/// How often a portfolio is reset to its target weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RebalanceFrequency {
    #[default]
    Daily,
    Weekly,
    #[serde(alias = "on_demand", alias = "ondemand")]
    OnDemand,
}

impl RebalanceFrequency {
    /// Periods per year used to annualize statistics estimated at this frequency.
    pub fn annualization_factor(&self) -> f64 {
        match self {
            RebalanceFrequency::Daily => 252.0,
            RebalanceFrequency::Weekly => 52.0,
            RebalanceFrequency::OnDemand => 1.0,
        }
    }
}

impl fmt::Display for RebalanceFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebalanceFrequency::Daily => write!(f, "daily"),
            RebalanceFrequency::Weekly => write!(f, "weekly"),
            RebalanceFrequency::OnDemand => write!(f, "on-demand"),
        }
    }
}

/// Inclusive date range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(EngineError::InvalidRequest(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse a range from two `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).map_err(|e| {
                EngineError::InvalidRequest(format!("invalid date '{}': {}", s, e))
            })
        };
        Self::new(parse(start)?, parse(end)?)
    }

    /// Range covering every representable date.
    pub fn unbounded() -> Self {
        Self {
            start: NaiveDate::MIN,
            end: NaiveDate::MAX,
        }
    }

    /// Range with optional ends; a missing end is open.
    pub fn from_bounds(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        Self::new(start.unwrap_or(NaiveDate::MIN), end.unwrap_or(NaiveDate::MAX))
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Target allocation: symbol to fraction of portfolio value.
///
/// Weights sum to one within [`WEIGHT_TOLERANCE`]. Without short mode every
/// weight lies in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortfolioWeights(BTreeMap<String, f64>);

impl PortfolioWeights {
    /// Validate a long-only allocation.
    pub fn new(weights: BTreeMap<String, f64>) -> Result<Self> {
        Self::with_shorting(weights, false)
    }

    /// Validate an allocation, allowing negative weights when `allow_short` is set.
    pub fn with_shorting(weights: BTreeMap<String, f64>, allow_short: bool) -> Result<Self> {
        if weights.is_empty() {
            return Err(EngineError::InvalidRequest(
                "weights must not be empty".to_string(),
            ));
        }

        for (symbol, &w) in &weights {
            if !w.is_finite() {
                return Err(EngineError::InvalidRequest(format!(
                    "weight for {} is not finite",
                    symbol
                )));
            }
            if !allow_short && !(-WEIGHT_TOLERANCE..=1.0 + WEIGHT_TOLERANCE).contains(&w) {
                return Err(EngineError::InvalidRequest(format!(
                    "weight for {} is {:.6}, outside [0, 1]",
                    symbol, w
                )));
            }
        }

        let sum: f64 = weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(EngineError::InvalidRequest(format!(
                "weights sum to {:.8}, expected 1",
                sum
            )));
        }

        Ok(Self(weights))
    }

    /// Build from parallel symbol/weight slices.
    pub fn from_vec(symbols: &[String], weights: &[f64], allow_short: bool) -> Result<Self> {
        if symbols.len() != weights.len() {
            return Err(EngineError::InvalidRequest(format!(
                "{} symbols but {} weights",
                symbols.len(),
                weights.len()
            )));
        }
        let map = symbols.iter().cloned().zip(weights.iter().copied()).collect();
        Self::with_shorting(map, allow_short)
    }

    /// Equal allocation across the given symbols.
    pub fn equal(symbols: &[String]) -> Result<Self> {
        if symbols.is_empty() {
            return Err(EngineError::InvalidRequest(
                "weights must not be empty".to_string(),
            ));
        }
        let w = 1.0 / symbols.len() as f64;
        Self::from_vec(symbols, &vec![w; symbols.len()], false)
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.0.get(symbol).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.0
    }

    /// Weights ordered by `symbols`; symbols absent from the allocation get 0.
    pub fn to_vector(&self, symbols: &[String]) -> Result<Vec<f64>> {
        if let Some(unknown) = self.0.keys().find(|s| !symbols.contains(s)) {
            return Err(EngineError::InvalidRequest(format!(
                "weight given for unknown symbol {}",
                unknown
            )));
        }
        Ok(symbols
            .iter()
            .map(|s| self.0.get(s).copied().unwrap_or(0.0))
            .collect())
    }
}

/// Direction of a rebalancing recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Increase,
    Decrease,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Increase => write!(f, "increase"),
            Action::Decrease => write!(f, "decrease"),
        }
    }
}

/// Per-symbol move from the current to the optimal allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    pub action: Action,
    pub current_weight: f64,
    pub optimal_weight: f64,
    pub difference: f64,
}

impl Recommendation {
    pub fn new(symbol: impl Into<String>, current_weight: f64, optimal_weight: f64) -> Self {
        let action = if optimal_weight > current_weight {
            Action::Increase
        } else {
            Action::Decrease
        };
        Self {
            symbol: symbol.into(),
            action,
            current_weight,
            optimal_weight,
            difference: (optimal_weight - current_weight).abs(),
        }
    }
}

/// Position held in an account: a symbol and a quantity of units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub quantity: f64,
}
