//! folio - a portfolio construction engine.
//!
//! # Overview
//!
//! folio turns historical prices into portfolio decisions:
//!
//! - **Optimization**: long-only (or short-enabled) mean-variance weights, from
//!   minimum variance at risk tolerance 0 to maximum Sharpe at 1
//! - **Backtesting**: daily, weekly or on-demand rebalanced simulations with
//!   CAGR, volatility, Sharpe, Sortino, drawdown and tail metrics
//! - **Analysis**: current holdings versus the optimizer's allocation, with
//!   per-symbol recommendations
//! - **Model training**: a fixed panel of regression models compared on a
//!   chronological split, run as background tasks
//! - **Interfaces**: an HTTP API (axum) and a CLI, configured from TOML
//!
//! # Quick Start
//!
//! ```no_run
//! use folio::data::CsvDirectory;
//! use folio::engine::{EngineConfig, PortfolioEngine};
//! use folio::types::{AssetClass, DateRange, RebalanceFrequency};
//! use std::sync::Arc;
//!
//! let engine = PortfolioEngine::new(Arc::new(CsvDirectory::new("data")), EngineConfig::default());
//! let symbols = vec!["AAPL".to_string(), "MSFT".to_string(), "GOOG".to_string()];
//! let range = DateRange::parse("2023-01-01", "2023-12-31").unwrap();
//!
//! let outcome = engine
//!     .optimize(&symbols, AssetClass::Stock, &range, 0.5, RebalanceFrequency::Daily)
//!     .unwrap();
//! for (symbol, weight) in outcome.weights.iter() {
//!     println!("{}: {:.2}%", symbol, weight * 100.0);
//! }
//! println!("Sharpe: {:.2}", outcome.stats.annualized_sharpe);
//! ```
//!
//! # Modules
//!
//! - [`types`]: Core data types (price series, weights, date ranges)
//! - [`data`]: CSV loading, price sources and date alignment
//! - [`returns`]: Simple-return matrices
//! - [`risk`]: Mean and covariance estimation with ridge regularization
//! - [`optimizer`]: Quadratic-program portfolio optimization
//! - [`backtest`]: Rebalanced historical simulation
//! - [`metrics`]: Return-series statistics
//! - [`features`]: Feature extraction and chronological splitting
//! - [`models`]: Regression models
//! - [`training`]: Model comparison pipeline
//! - [`tasks`]: Background training tasks
//! - [`analysis`]: Current-versus-optimal analysis
//! - [`engine`]: Facade over all of the above
//! - [`api`], [`server`]: HTTP interface
//! - [`config`]: TOML configuration file support
//! - [`report`]: Terminal output

pub mod analysis;
pub mod api;
pub mod backtest;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod features;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod report;
pub mod returns;
pub mod risk;
pub mod server;
pub mod tasks;
pub mod training;
pub mod types;

pub use analysis::{AnalysisEngine, AnalysisReport};
pub use backtest::{BacktestConfig, BacktestEngine, BacktestResult};
pub use data::{AlignedPrices, CsvDirectory, InMemoryPrices, PriceSource};
pub use engine::{EngineConfig, PortfolioEngine};
pub use error::{EngineError, Result};
pub use optimizer::{Objective, OptimizerConfig, PortfolioOptimizer, PortfolioStats};
pub use returns::ReturnsMatrix;
pub use risk::{RiskEstimate, RiskModel};
pub use tasks::{TaskStatus, TrainingService, TrainingTask};
pub use training::{TrainingConfig, TrainingPipeline, TrainingReport};
pub use types::{AssetClass, AssetSeries, DateRange, Holding, PortfolioWeights, RebalanceFrequency};
