//! Configuration file support.
//!
//! A single TOML file configures the server, the price data source and every
//! engine component. Missing sections and keys fall back to defaults.

use crate::analysis::AnalysisConfig;
use crate::backtest::BacktestConfig;
use crate::data::DataConfig;
use crate::engine::EngineConfig;
use crate::error::{EngineError, Result};
use crate::optimizer::OptimizerConfig;
use crate::risk::{RiskConfig, DEFAULT_RIDGE_FACTOR};
use crate::training::TrainingConfig;
use crate::types::{AssetClass, RebalanceFrequency};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete configuration loaded from a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolioConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8080 }

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Price data settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSettings {
    /// Directory holding `<SYMBOL>.csv` files (crypto optionally under `crypto/`).
    #[serde(default = "default_prices_dir")]
    pub prices_dir: PathBuf,
    /// Date format; common formats are tried when unset.
    #[serde(default)]
    pub date_format: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_true")]
    pub skip_invalid: bool,
}

fn default_prices_dir() -> PathBuf { PathBuf::from("data") }
fn default_delimiter() -> char { ',' }
fn default_true() -> bool { true }

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            prices_dir: default_prices_dir(),
            date_format: None,
            delimiter: default_delimiter(),
            skip_invalid: true,
        }
    }
}

impl DataSettings {
    pub fn to_data_config(&self) -> Result<DataConfig> {
        if !self.delimiter.is_ascii() {
            return Err(EngineError::ConfigError(format!(
                "delimiter must be a single ASCII character, got {:?}",
                self.delimiter
            )));
        }
        Ok(DataConfig {
            date_format: self.date_format.clone(),
            delimiter: self.delimiter as u8,
            skip_invalid: self.skip_invalid,
        })
    }
}

/// Engine-wide settings and request defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Ridge magnitude relative to the average asset variance.
    #[serde(default = "default_ridge_factor")]
    pub ridge_factor: f64,
    /// Asset class used when a request does not name one.
    #[serde(default)]
    pub default_asset_class: AssetClass,
    /// Rebalance frequency used when a request does not name one.
    #[serde(default)]
    pub default_rebalance: RebalanceFrequency,
}

fn default_ridge_factor() -> f64 { DEFAULT_RIDGE_FACTOR }

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ridge_factor: DEFAULT_RIDGE_FACTOR,
            default_asset_class: AssetClass::default(),
            default_rebalance: RebalanceFrequency::default(),
        }
    }
}

impl FolioConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: FolioConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings no component can run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(EngineError::ConfigError(msg));

        if !(self.engine.ridge_factor >= 0.0) {
            return fail(format!("engine.ridge_factor must be >= 0, got {}", self.engine.ridge_factor));
        }
        if !(self.optimizer.risk_aversion_scale > 0.0) {
            return fail(format!(
                "optimizer.risk_aversion_scale must be > 0, got {}",
                self.optimizer.risk_aversion_scale
            ));
        }
        if self.optimizer.max_iter == 0 {
            return fail("optimizer.max_iter must be > 0".to_string());
        }
        if !(self.backtest.periods_per_year > 0.0) {
            return fail(format!(
                "backtest.periods_per_year must be > 0, got {}",
                self.backtest.periods_per_year
            ));
        }
        if !(self.training.test_ratio > 0.0 && self.training.test_ratio < 1.0) {
            return fail(format!(
                "training.test_ratio must be in (0, 1), got {}",
                self.training.test_ratio
            ));
        }
        self.training.features.validate()?;
        if !(0.0..=1.0).contains(&self.analysis.risk_tolerance) {
            return fail(format!(
                "analysis.risk_tolerance must be in [0, 1], got {}",
                self.analysis.risk_tolerance
            ));
        }
        if !(self.analysis.recommendation_threshold >= 0.0) {
            return fail(format!(
                "analysis.recommendation_threshold must be >= 0, got {}",
                self.analysis.recommendation_threshold
            ));
        }
        self.data.to_data_config()?;
        Ok(())
    }

    /// Component settings for [`crate::engine::PortfolioEngine`].
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            risk: RiskConfig {
                ridge_factor: self.engine.ridge_factor,
            },
            optimizer: self.optimizer,
            backtest: self.backtest,
            training: self.training.clone(),
            analysis: self.analysis,
        }
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# folio configuration file

[server]
host = "127.0.0.1"
port = 8080

[data]
# One CSV per symbol: <prices_dir>/<SYMBOL>.csv, crypto may use <prices_dir>/crypto/
prices_dir = "data"
# date_format = "%Y-%m-%d"
delimiter = ","
skip_invalid = true

[engine]
ridge_factor = 1e-6
default_asset_class = "stock"      # stock | crypto
default_rebalance = "daily"        # daily | weekly | on-demand

[optimizer]
risk_aversion_scale = 2.0
allow_short = false
max_iter = 200
risk_free_rate = 0.0

[backtest]
periods_per_year = 252.0
risk_free_rate = 0.0

[training]
min_samples = 50
test_ratio = 0.2
split_gap = 0
cv_folds = 3
standardize = true

[training.features]
return_lags = [1, 2, 3, 5, 10]
ma_windows = [5, 10, 20]
volatility_windows = [5, 10, 20]
rsi_period = 14
macd_fast = 12
macd_slow = 26

[analysis]
risk_tolerance = 0.5
recommendation_threshold = 0.0
"#
        .to_string()
    }
}
