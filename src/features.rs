//! Feature engineering for return forecasting.
//!
//! Each aligned date yields one row with, per symbol:
//! - Lagged returns over several horizons
//! - Moving-average to price ratios
//! - Rolling volatility of one-period returns
//! - RSI and MACD normalized by price
//!
//! The target is the next period's mean return across all symbols.

use crate::data::{ema_series, rsi, sma, std_dev, AlignedPrices};
use crate::error::{EngineError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which features to compute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Horizons of lagged returns `p_t / p_{t-k} − 1`.
    pub return_lags: Vec<usize>,
    /// Windows of `sma(price) / price`.
    pub ma_windows: Vec<usize>,
    /// Windows of the sample std of one-period returns.
    pub volatility_windows: Vec<usize>,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            return_lags: vec![1, 2, 3, 5, 10],
            ma_windows: vec![5, 10, 20],
            volatility_windows: vec![5, 10, 20],
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
        }
    }
}

impl FeatureConfig {
    /// Small feature set, mainly for quick experiments.
    pub fn minimal() -> Self {
        Self {
            return_lags: vec![1, 5],
            ma_windows: vec![10],
            volatility_windows: vec![10],
            ..Default::default()
        }
    }

    /// Reject windows that cannot produce a defined value.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(EngineError::ConfigError(msg));
        if self.return_lags.contains(&0) {
            return fail("features.return_lags must be >= 1".to_string());
        }
        if self.ma_windows.contains(&0) {
            return fail("features.ma_windows must be >= 1".to_string());
        }
        if self.volatility_windows.iter().any(|&w| w < 2) {
            return fail("features.volatility_windows must be >= 2".to_string());
        }
        if self.rsi_period == 0 {
            return fail("features.rsi_period must be >= 1".to_string());
        }
        if self.macd_fast == 0 || self.macd_fast >= self.macd_slow {
            return fail(format!(
                "features.macd_fast must be in [1, macd_slow), got {} and {}",
                self.macd_fast, self.macd_slow
            ));
        }
        Ok(())
    }

    /// Number of leading dates without a complete feature row.
    pub fn warmup_period(&self) -> usize {
        let lag = self.return_lags.iter().copied().max().unwrap_or(0);
        let ma = self.ma_windows.iter().copied().max().unwrap_or(1).saturating_sub(1);
        let vol = self.volatility_windows.iter().copied().max().unwrap_or(0);
        lag.max(ma).max(vol).max(self.rsi_period)
    }

    fn names_for(&self, symbol: &str) -> Vec<String> {
        let mut names = Vec::new();
        for lag in &self.return_lags {
            names.push(format!("{}_return_lag_{}", symbol, lag));
        }
        for w in &self.ma_windows {
            names.push(format!("{}_ma_{}", symbol, w));
        }
        for w in &self.volatility_windows {
            names.push(format!("{}_vol_{}", symbol, w));
        }
        names.push(format!("{}_rsi", symbol));
        names.push(format!("{}_macd", symbol));
        names
    }
}

/// Feature matrix with aligned targets.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    /// Date each row's features are observed at.
    pub dates: Vec<NaiveDate>,
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Rows `[start, end)` as a new dataset.
    pub fn slice(&self, start: usize, end: usize) -> Dataset {
        Dataset {
            feature_names: self.feature_names.clone(),
            dates: self.dates[start..end].to_vec(),
            features: self.features[start..end].to_vec(),
            targets: self.targets[start..end].to_vec(),
        }
    }
}

/// Builds a [`Dataset`] from aligned prices.
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Extract features and next-period targets; rows with undefined values are dropped.
    pub fn extract(&self, prices: &AlignedPrices) -> Result<Dataset> {
        self.config.validate()?;
        if prices.symbols.is_empty() {
            return Err(EngineError::InvalidRequest(
                "at least one symbol is required".to_string(),
            ));
        }

        let columns: Vec<Vec<f64>> = prices
            .symbols
            .iter()
            .enumerate()
            .map(|(j, _)| prices.prices.iter().map(|row| row[j]).collect())
            .collect();
        let macd: Vec<Vec<f64>> = columns.iter().map(|c| self.macd_ratio(c)).collect();

        let feature_names: Vec<String> = prices
            .symbols
            .iter()
            .flat_map(|s| self.config.names_for(s))
            .collect();

        let mut dates = Vec::new();
        let mut features = Vec::new();
        let mut targets = Vec::new();

        let n = prices.len();
        for t in self.config.warmup_period()..n.saturating_sub(1) {
            let mut row = Vec::with_capacity(feature_names.len());
            let mut complete = true;
            for (j, col) in columns.iter().enumerate() {
                match self.symbol_features(&col[..=t], macd[j][t]) {
                    Some(f) => row.extend(f),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }

            let target = columns.iter().map(|c| c[t + 1] / c[t] - 1.0).sum::<f64>()
                / columns.len() as f64;

            if complete && target.is_finite() && row.iter().all(|v| v.is_finite()) {
                dates.push(prices.dates[t]);
                features.push(row);
                targets.push(target);
            }
        }

        debug!(
            "Extracted {} rows x {} features from {} dates",
            targets.len(),
            feature_names.len(),
            n
        );

        Ok(Dataset {
            feature_names,
            dates,
            features,
            targets,
        })
    }

    /// Features of one symbol given its price history up to and including `t`.
    fn symbol_features(&self, history: &[f64], macd: f64) -> Option<Vec<f64>> {
        let t = history.len() - 1;
        let price = history[t];
        let mut out = Vec::new();

        for &lag in &self.config.return_lags {
            if lag > t {
                return None;
            }
            out.push(price / history[t - lag] - 1.0);
        }

        for &w in &self.config.ma_windows {
            out.push(sma(history, w)? / price);
        }

        let returns: Vec<f64> = history.windows(2).map(|p| p[1] / p[0] - 1.0).collect();
        for &w in &self.config.volatility_windows {
            out.push(std_dev(&returns, w)?);
        }

        out.push(rsi(history, self.config.rsi_period)?);
        out.push(macd);
        Some(out)
    }

    fn macd_ratio(&self, prices: &[f64]) -> Vec<f64> {
        let fast = ema_series(prices, self.config.macd_fast);
        let slow = ema_series(prices, self.config.macd_slow);
        prices
            .iter()
            .zip(fast.iter().zip(&slow))
            .map(|(p, (f, s))| (f - s) / p)
            .collect()
    }
}

/// Chronological train/test splitting for time series (no shuffling).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesSplitter {
    test_ratio: f64,
    gap: usize, // rows skipped between train and test
}

impl Default for TimeSeriesSplitter {
    fn default() -> Self {
        Self {
            test_ratio: 0.2,
            gap: 0,
        }
    }
}

impl TimeSeriesSplitter {
    pub fn new(test_ratio: f64) -> Result<Self> {
        if !(test_ratio > 0.0 && test_ratio < 1.0) {
            return Err(EngineError::ConfigError(format!(
                "test ratio must be in (0, 1), got {}",
                test_ratio
            )));
        }
        Ok(Self { test_ratio, gap: 0 })
    }

    /// Skip `gap` rows between the training and test sets.
    pub fn with_gap(mut self, gap: usize) -> Self {
        self.gap = gap;
        self
    }

    /// Index ranges `(train, test)`: the first rows train, the last rows test.
    pub fn split_indices(&self, n: usize) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let test_len = ((n as f64 * self.test_ratio).round() as usize).clamp(1, n.max(1)).min(n);
        let train_end = n.saturating_sub(test_len + self.gap);
        (0..train_end, (train_end + self.gap).min(n)..n)
    }

    pub fn split(&self, data: &Dataset) -> (Dataset, Dataset) {
        let (train, test) = self.split_indices(data.len());
        (
            data.slice(train.start, train.end),
            data.slice(test.start, test.end),
        )
    }

    /// Expanding-window folds: each trains on a prefix and tests on the next block.
    pub fn time_series_cv(&self, n: usize, n_splits: usize) -> Vec<(std::ops::Range<usize>, std::ops::Range<usize>)> {
        if n_splits == 0 || n < 2 * (n_splits + 1) {
            return Vec::new();
        }
        let min_train = n / (n_splits + 1);
        let fold = (n - min_train) / n_splits;

        (0..n_splits)
            .map(|i| {
                let train_end = min_train + i * fold;
                let test_start = (train_end + self.gap).min(n);
                let test_end = (train_end + fold + self.gap).min(n);
                (0..train_end, test_start..test_end)
            })
            .filter(|(_, test)| !test.is_empty())
            .collect()
    }
}

/// Per-column z-scoring fitted on training rows only.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Standardizer {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let n = rows.len().max(1) as f64;
        let means: Vec<f64> = (0..n_cols)
            .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / n)
            .collect();
        let scales = (0..n_cols)
            .map(|j| {
                let var = rows.iter().map(|r| (r[j] - means[j]).powi(2)).sum::<f64>() / n;
                let sd = var.sqrt();
                if sd > 1e-12 {
                    sd
                } else {
                    1.0
                }
            })
            .collect();
        Self { means, scales }
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter()
            .map(|r| {
                r.iter()
                    .zip(self.means.iter().zip(&self.scales))
                    .map(|(v, (m, s))| (v - m) / s)
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices(n: usize, symbols: &[&str]) -> AlignedPrices {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        AlignedPrices {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            dates: (0..n)
                .map(|i| start + chrono::Duration::days(i as i64))
                .collect(),
            prices: (0..n)
                .map(|i| {
                    (0..symbols.len())
                        .map(|j| {
                            100.0 + i as f64 * 0.1 * (j + 1) as f64
                                + (i as f64 * 0.5 + j as f64).sin() * 3.0
                        })
                        .collect()
                })
                .collect(),
        }
    }

    #[test]
    fn test_warmup_period() {
        assert_eq!(FeatureConfig::default().warmup_period(), 20);
    }

    #[test]
    fn test_zero_windows_rejected() {
        let config = FeatureConfig {
            ma_windows: vec![0],
            ..Default::default()
        };
        assert_eq!(config.warmup_period(), 20);
        assert!(matches!(config.validate(), Err(EngineError::ConfigError(_))));

        let p = prices(100, &["A"]);
        let result = FeatureExtractor::new(config).extract(&p);
        assert!(matches!(result, Err(EngineError::ConfigError(_))));

        for bad in [
            FeatureConfig { return_lags: vec![0, 1], ..Default::default() },
            FeatureConfig { volatility_windows: vec![1], ..Default::default() },
            FeatureConfig { rsi_period: 0, ..Default::default() },
            FeatureConfig { macd_fast: 26, macd_slow: 12, ..Default::default() },
        ] {
            assert!(bad.validate().is_err(), "{:?}", bad);
        }
        assert!(FeatureConfig::minimal().validate().is_ok());
    }

    #[test]
    fn test_extract_shapes() {
        let p = prices(100, &["A", "B"]);
        let ds = FeatureExtractor::default().extract(&p).unwrap();

        assert_eq!(ds.n_features(), 2 * 13);
        // Rows 20..=98 have features and a next-period target.
        assert_eq!(ds.len(), 79);
        assert!(ds.features.iter().all(|r| r.len() == 26));
        assert_eq!(ds.dates[0], p.dates[20]);
    }

    #[test]
    fn test_target_is_next_mean_return() {
        let p = prices(60, &["A", "B"]);
        let ds = FeatureExtractor::default().extract(&p).unwrap();
        let t = 20;
        let expected = ((p.prices[t + 1][0] / p.prices[t][0] - 1.0)
            + (p.prices[t + 1][1] / p.prices[t][1] - 1.0))
            / 2.0;
        assert!((ds.targets[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_features_have_no_lookahead() {
        let p = prices(80, &["A"]);
        let mut altered = p.clone();
        altered.prices[60][0] *= 1.5;

        let a = FeatureExtractor::default().extract(&p).unwrap();
        let b = FeatureExtractor::default().extract(&altered).unwrap();
        // Row for date index 58 must not change when date 60 changes.
        let row = 58 - 20;
        assert_eq!(a.features[row], b.features[row]);
    }

    #[test]
    fn test_chronological_split() {
        let splitter = TimeSeriesSplitter::new(0.2).unwrap();
        let (train, test) = splitter.split_indices(100);
        assert_eq!(train, 0..80);
        assert_eq!(test, 80..100);

        let (train, test) = splitter.with_gap(2).split_indices(100);
        assert_eq!(train, 0..78);
        assert_eq!(test, 80..100);
    }

    #[test]
    fn test_time_series_cv_expanding() {
        let folds = TimeSeriesSplitter::default().time_series_cv(100, 4);
        assert_eq!(folds.len(), 4);
        for w in folds.windows(2) {
            assert!(w[1].0.end > w[0].0.end);
        }
        for (train, test) in &folds {
            assert!(train.end <= test.start);
        }
    }

    #[test]
    fn test_standardizer_uses_training_stats() {
        let train = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let s = Standardizer::fit(&train);
        let out = s.transform(&[vec![2.0, 7.0]]);
        assert_eq!(out[0][0], 0.0);
        assert_eq!(out[0][1], 2.0);
    }
}
