//! Property-based tests using proptest.
//!
//! These tests verify that:
//! 1. Optimized weights are always a feasible long-only allocation
//! 2. Recommendations report the absolute weight change and its direction
//! 3. Backtest value paths start at 1 and match the reported total return
//! 4. Chronological splits never leak test rows into training

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

use folio::backtest::BacktestEngine;
use folio::features::TimeSeriesSplitter;
use folio::metrics::{max_drawdown, value_path};
use folio::optimizer::PortfolioOptimizer;
use folio::returns::ReturnsMatrix;
use folio::risk::RiskModel;
use folio::types::{
    Action, AssetClass, AssetSeries, DateRange, PortfolioWeights, RebalanceFrequency, Recommendation,
};

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
}

/// Price series compounded from a vector of periodic returns.
fn series_from_returns(symbol: &str, returns: &[f64]) -> AssetSeries {
    let mut price = 100.0;
    let mut pairs = vec![(base_date(), price)];
    for (i, r) in returns.iter().enumerate() {
        price *= 1.0 + r;
        pairs.push((base_date() + Duration::days(i as i64 + 1), price));
    }
    AssetSeries::from_pairs(symbol, AssetClass::Stock, pairs).unwrap()
}

/// Three return columns of equal length with bounded daily moves.
fn market_strategy() -> impl Strategy<Value = Vec<Vec<f64>>> {
    (30usize..90).prop_flat_map(|len| {
        prop::collection::vec(prop::collection::vec(-0.05..0.05f64, len), 3)
    })
}

/// Random long-only weights over `n` symbols.
fn weights_strategy(n: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.01..1.0f64, n).prop_map(|raw| {
        let total: f64 = raw.iter().sum();
        raw.iter().map(|w| w / total).collect()
    })
}

fn build_market(columns: &[Vec<f64>]) -> Vec<AssetSeries> {
    ["AAA", "BBB", "CCC"]
        .iter()
        .zip(columns)
        .map(|(s, r)| series_from_returns(s, r))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // ========================================================================
    // Optimizer
    // ========================================================================

    #[test]
    fn optimized_weights_are_feasible(columns in market_strategy(), t in 0.0..=1.0f64) {
        let market = build_market(&columns);
        let returns = ReturnsMatrix::from_series(&market, &DateRange::unbounded()).unwrap();
        let estimate = RiskModel::default()
            .estimate(&returns, RebalanceFrequency::Daily)
            .unwrap();

        if let Ok(weights) = PortfolioOptimizer::default().optimize(&estimate, t) {
            prop_assert!((weights.sum() - 1.0).abs() < 1e-6, "sum {}", weights.sum());
            for (symbol, w) in weights.iter() {
                prop_assert!(*w >= 0.0 && *w <= 1.0 + 1e-9, "{} = {}", symbol, w);
            }
        }
    }

    #[test]
    fn out_of_range_tolerance_rejected(t in prop_oneof![-10.0..-1e-9f64, 1.0 + 1e-9..10.0f64]) {
        let market = build_market(&[vec![0.01, -0.02, 0.005, 0.0], vec![0.0, 0.01, -0.01, 0.02], vec![0.003, 0.001, 0.002, -0.004]]);
        let returns = ReturnsMatrix::from_series(&market, &DateRange::unbounded()).unwrap();
        let estimate = RiskModel::default()
            .estimate(&returns, RebalanceFrequency::Daily)
            .unwrap();
        prop_assert!(PortfolioOptimizer::default().optimize(&estimate, t).is_err());
    }

    // ========================================================================
    // Recommendations
    // ========================================================================

    #[test]
    fn recommendation_difference_and_direction(current in 0.0..=1.0f64, optimal in 0.0..=1.0f64) {
        let rec = Recommendation::new("AAA", current, optimal);
        prop_assert_eq!(rec.difference, (optimal - current).abs());
        prop_assert!(rec.difference >= 0.0);
        if optimal > current {
            prop_assert_eq!(rec.action, Action::Increase);
        } else {
            prop_assert_eq!(rec.action, Action::Decrease);
        }
    }

    // ========================================================================
    // Backtesting
    // ========================================================================

    #[test]
    fn backtest_value_path_starts_at_one(
        columns in market_strategy(),
        w in weights_strategy(3),
        weekly in any::<bool>(),
    ) {
        let market = build_market(&columns);
        let symbols: Vec<String> = ["AAA", "BBB", "CCC"].iter().map(|s| s.to_string()).collect();
        let weights = PortfolioWeights::from_vec(&symbols, &w, false).unwrap();
        let freq = if weekly { RebalanceFrequency::Weekly } else { RebalanceFrequency::Daily };

        let result = BacktestEngine::default()
            .run(&weights, &market, freq, &DateRange::unbounded())
            .unwrap();

        prop_assert_eq!(result.cumulative_returns.len(), columns[0].len() + 1);
        prop_assert_eq!(result.cumulative_returns[0].value, 1.0);
        prop_assert!(result.cumulative_returns.iter().all(|p| p.value > 0.0));
        prop_assert!((result.final_value() - 1.0 - result.total_return).abs() < 1e-9);
        prop_assert!(result.max_drawdown <= 0.0 && result.max_drawdown >= -1.0);
        prop_assert!(result.best_day >= result.worst_day);
        prop_assert!((0.0..=1.0).contains(&result.win_rate));
    }

    #[test]
    fn value_path_drawdown_bounded(returns in prop::collection::vec(-0.5..0.5f64, 1..200)) {
        let values = value_path(&returns);
        prop_assert_eq!(values.len(), returns.len() + 1);
        prop_assert_eq!(values[0], 1.0);
        let mdd = max_drawdown(&values);
        prop_assert!((-1.0..=0.0).contains(&mdd));
    }

    // ========================================================================
    // Chronological split
    // ========================================================================

    #[test]
    fn split_is_chronological(n in 2usize..2000, ratio in 0.05..0.95f64, gap in 0usize..5) {
        let splitter = TimeSeriesSplitter::new(ratio).unwrap().with_gap(gap);
        let (train, test) = splitter.split_indices(n);

        prop_assert_eq!(train.start, 0);
        prop_assert!(train.end <= test.start);
        prop_assert_eq!(test.end, n);
        if gap == 0 {
            prop_assert!(!test.is_empty());
        }
    }

    #[test]
    fn cv_folds_never_overlap(n in 10usize..1000, splits in 1usize..6) {
        let splitter = TimeSeriesSplitter::default();
        for (train, test) in splitter.time_series_cv(n, splits) {
            prop_assert!(train.end <= test.start);
            prop_assert!(test.end <= n);
            prop_assert!(!train.is_empty());
        }
    }
}
