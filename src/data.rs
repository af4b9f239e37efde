//! Price data loading, price sources and date alignment.
//!
//! Price histories are supplied by a [`PriceSource`]. Two sources ship with
//! the crate: [`InMemoryPrices`] for callers that already hold the data and
//! [`CsvDirectory`] which reads one `SYMBOL.csv` file per symbol.

use crate::error::{EngineError, Result};
use crate::types::{validate_symbol, AssetClass, AssetSeries, DateRange, PricePoint, DATE_FORMAT};
use chrono::{NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Raw CSV row. Only a date and a price column are required.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(
        alias = "Date",
        alias = "DATE",
        alias = "Timestamp",
        alias = "timestamp",
        alias = "datetime",
        alias = "Datetime"
    )]
    date: String,
    #[serde(
        alias = "Close",
        alias = "close",
        alias = "Price",
        alias = "price",
        alias = "Adj Close",
        alias = "adj_close"
    )]
    close: f64,
}

/// Configuration for CSV price loading.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Date format string (e.g. "%Y-%m-%d"). Common formats are tried when unset.
    pub date_format: Option<String>,
    /// CSV delimiter.
    pub delimiter: u8,
    /// Skip invalid rows instead of failing.
    pub skip_invalid: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            delimiter: b',',
            skip_invalid: true,
        }
    }
}

fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let s = s.trim();
    if let Some(fmt) = format {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    for fmt in [DATE_FORMAT, "%Y/%m/%d", "%m/%d/%Y", "%d-%m-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%SZ"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    Err(EngineError::DataError(format!("Unable to parse date: {}", s)))
}

/// Load a price history for one symbol from a CSV file.
///
/// Rows are sorted by date; duplicate dates keep the first occurrence.
pub fn load_csv(
    path: impl AsRef<Path>,
    symbol: &str,
    asset_class: AssetClass,
    config: &DataConfig,
) -> Result<AssetSeries> {
    let path = path.as_ref();
    info!("Loading prices for {} from: {}", symbol, path.display());

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(config.delimiter)
        .flexible(true)
        .from_path(path)?;

    let mut points = Vec::new();
    let mut skipped = 0;

    for (row_num, result) in reader.deserialize().enumerate() {
        let row: CsvRow = match result {
            Ok(r) => r,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num + 1, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(EngineError::CsvError(e)),
        };

        let date = match parse_date(&row.date, config.date_format.as_deref()) {
            Ok(d) => d,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {} due to date parse error: {}", row_num + 1, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        if !row.close.is_finite() || row.close <= 0.0 {
            if config.skip_invalid {
                skipped += 1;
                continue;
            }
            return Err(EngineError::DataError(format!(
                "Invalid price {} at row {}",
                row.close,
                row_num + 1
            )));
        }

        points.push(PricePoint::new(date, row.close));
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows in {}", skipped, path.display());
    }

    points.sort_by_key(|p| p.date);
    let original_len = points.len();
    points.dedup_by_key(|p| p.date);
    if points.len() < original_len {
        warn!("Removed {} duplicate dates", original_len - points.len());
    }

    if points.is_empty() {
        return Err(EngineError::InsufficientData(format!(
            "no price rows for {}",
            symbol
        )));
    }

    debug!(
        "Loaded {} prices for {} from {} to {}",
        points.len(),
        symbol,
        points[0].date,
        points[points.len() - 1].date
    );

    AssetSeries::new(symbol, asset_class, points)
}

/// External collaborator that supplies historical prices.
pub trait PriceSource: Send + Sync {
    /// Fetch one series per requested symbol, restricted to `range`.
    fn fetch(
        &self,
        symbols: &[String],
        asset_class: AssetClass,
        range: &DateRange,
    ) -> Result<Vec<Arc<AssetSeries>>>;
}

fn restrict(series: &AssetSeries, range: &DateRange) -> Result<AssetSeries> {
    let points: Vec<PricePoint> = series
        .points()
        .iter()
        .filter(|p| range.contains(p.date))
        .copied()
        .collect();
    AssetSeries::new(series.symbol(), series.asset_class(), points)
}

/// Price store held in memory, shared read-only between requests.
#[derive(Debug, Default)]
pub struct InMemoryPrices {
    series: RwLock<HashMap<(String, AssetClass), Arc<AssetSeries>>>,
}

impl InMemoryPrices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a series.
    pub fn insert(&self, series: AssetSeries) {
        let key = (series.symbol().to_string(), series.asset_class());
        // Entries are replaced whole, so a poisoned map is still consistent.
        let mut guard = self.series.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(key, Arc::new(series));
    }

    pub fn with_series(series: impl IntoIterator<Item = AssetSeries>) -> Self {
        let store = Self::new();
        for s in series {
            store.insert(s);
        }
        store
    }
}

impl PriceSource for InMemoryPrices {
    fn fetch(
        &self,
        symbols: &[String],
        asset_class: AssetClass,
        range: &DateRange,
    ) -> Result<Vec<Arc<AssetSeries>>> {
        let guard = self.series.read().unwrap_or_else(|e| e.into_inner());

        symbols
            .iter()
            .map(|symbol| {
                let series = guard
                    .get(&(symbol.clone(), asset_class))
                    .ok_or_else(|| {
                        EngineError::InsufficientData(format!(
                            "no {} prices for {}",
                            asset_class, symbol
                        ))
                    })?;
                Ok(Arc::new(restrict(series, range)?))
            })
            .collect()
    }
}

/// Directory of CSV files laid out as `<root>/<SYMBOL>.csv`.
///
/// Crypto symbols may optionally live under `<root>/crypto/`.
#[derive(Debug, Clone)]
pub struct CsvDirectory {
    root: PathBuf,
    config: DataConfig,
}

impl CsvDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: DataConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DataConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve `<root>/<SYMBOL>.csv`; the result never leaves the root.
    fn path_for(&self, symbol: &str, asset_class: AssetClass) -> Result<PathBuf> {
        validate_symbol(symbol)?;
        let file = format!("{}.csv", symbol);
        let path = if asset_class == AssetClass::Crypto && self.root.join("crypto").join(&file).exists() {
            self.root.join("crypto").join(&file)
        } else {
            self.root.join(&file)
        };

        let inside = path
            .strip_prefix(&self.root)
            .map(|rest| rest.components().all(|c| matches!(c, Component::Normal(_))))
            .unwrap_or(false);
        if !inside {
            return Err(EngineError::InvalidRequest(format!(
                "symbol {:?} resolves outside the price directory",
                symbol
            )));
        }
        Ok(path)
    }
}

impl PriceSource for CsvDirectory {
    fn fetch(
        &self,
        symbols: &[String],
        asset_class: AssetClass,
        range: &DateRange,
    ) -> Result<Vec<Arc<AssetSeries>>> {
        symbols
            .iter()
            .map(|symbol| {
                let path = self.path_for(symbol, asset_class)?;
                if !path.exists() {
                    return Err(EngineError::InsufficientData(format!(
                        "no price file for {} at {}",
                        symbol,
                        path.display()
                    )));
                }
                let series = load_csv(&path, symbol, asset_class, &self.config)?;
                Ok(Arc::new(restrict(&series, range)?))
            })
            .collect()
    }
}

/// Prices of several symbols on their common dates.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPrices {
    /// Symbols in lexicographic order.
    pub symbols: Vec<String>,
    /// Dates present in every series, ascending.
    pub dates: Vec<NaiveDate>,
    /// `prices[i][j]` is the price of `symbols[j]` on `dates[i]`.
    pub prices: Vec<Vec<f64>>,
}

impl AlignedPrices {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Price column of one symbol.
    pub fn column(&self, symbol: &str) -> Option<Vec<f64>> {
        let j = self.symbols.iter().position(|s| s == symbol)?;
        Some(self.prices.iter().map(|row| row[j]).collect())
    }

    /// Last aligned price of every symbol.
    pub fn latest(&self) -> Option<BTreeMap<String, f64>> {
        let row = self.prices.last()?;
        Some(
            self.symbols
                .iter()
                .cloned()
                .zip(row.iter().copied())
                .collect(),
        )
    }
}

/// Inner-join series on dates present in all of them, restricted to `range`.
///
/// Output symbols are sorted lexicographically; duplicated symbols are rejected.
pub fn align_prices<S: AsRef<AssetSeries>>(series: &[S], range: &DateRange) -> Result<AlignedPrices> {
    if series.is_empty() {
        return Err(EngineError::InvalidRequest(
            "at least one price series is required".to_string(),
        ));
    }

    let mut ordered: Vec<&AssetSeries> = series.iter().map(|s| s.as_ref()).collect();
    ordered.sort_by(|a, b| a.symbol().cmp(b.symbol()));
    if let Some(w) = ordered.windows(2).find(|w| w[0].symbol() == w[1].symbol()) {
        return Err(EngineError::InvalidRequest(format!(
            "duplicate symbol {}",
            w[0].symbol()
        )));
    }

    let maps: Vec<BTreeMap<NaiveDate, f64>> = ordered
        .iter()
        .map(|s| {
            s.points()
                .iter()
                .filter(|p| range.contains(p.date))
                .map(|p| (p.date, p.price))
                .collect()
        })
        .collect();

    let dates: Vec<NaiveDate> = maps[0]
        .keys()
        .filter(|d| maps[1..].iter().all(|m| m.contains_key(d)))
        .copied()
        .collect();

    let prices = dates
        .iter()
        .map(|d| maps.iter().map(|m| m[d]).collect())
        .collect();

    let dropped = maps.iter().map(|m| m.len()).max().unwrap_or(0) - dates.len();
    if dropped > 0 {
        debug!("Alignment dropped {} unmatched dates", dropped);
    }

    Ok(AlignedPrices {
        symbols: ordered.iter().map(|s| s.symbol().to_string()).collect(),
        dates,
        prices,
    })
}

/// Simple moving average of the trailing `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period || period == 0 {
        return None;
    }
    let sum: f64 = values[values.len() - period..].iter().sum();
    Some(sum / period as f64)
}

/// Sample standard deviation (n - 1) of the trailing `period` values.
pub fn std_dev(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period || period < 2 {
        return None;
    }
    let mean = sma(values, period)?;
    let variance: f64 = values[values.len() - period..]
        .iter()
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / (period - 1) as f64;
    Some(variance.sqrt())
}

/// Exponentially weighted mean series with span `span`, bias-adjusted from the first value.
pub fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let decay = 1.0 - alpha;
    let mut num = 0.0;
    let mut den = 0.0;
    values
        .iter()
        .map(|&v| {
            num = v + decay * num;
            den = 1.0 + decay * den;
            num / den
        })
        .collect()
}

/// Relative Strength Index over the trailing `period` price changes.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period + 1 || period == 0 {
        return None;
    }

    let (gain, loss) = values[values.len() - period - 1..]
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold((0.0, 0.0), |(g, l), c| {
            if c > 0.0 {
                (g + c, l)
            } else {
                (g, l - c)
            }
        });

    let avg_gain = gain / period as f64;
    let avg_loss = loss / period as f64;

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

impl AsRef<AssetSeries> for AssetSeries {
    fn as_ref(&self) -> &AssetSeries {
        self
    }
}
