//! Integration tests for the portfolio engine and its HTTP interface.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, NaiveDate};
use folio::backtest::BacktestEngine;
use folio::data::{CsvDirectory, InMemoryPrices};
use folio::engine::{EngineConfig, PortfolioEngine};
use folio::error::EngineError;
use folio::optimizer::PortfolioOptimizer;
use folio::returns::ReturnsMatrix;
use folio::risk::RiskModel;
use folio::server::{router, AppState};
use folio::tasks::TaskStatus;
use folio::training::TrainingConfig;
use folio::types::{AssetClass, AssetSeries, DateRange, Holding, PortfolioWeights, RebalanceFrequency};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use tower::ServiceExt;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

/// Daily series built from a price function of the day index.
fn series(symbol: &str, days: i64, price: impl Fn(i64) -> f64) -> AssetSeries {
    let pairs: Vec<_> = (0..days).map(|i| (start() + Duration::days(i), price(i))).collect();
    AssetSeries::from_pairs(symbol, AssetClass::Stock, pairs).unwrap()
}

/// Three assets with distinct return patterns and a positive drift.
fn market() -> Vec<AssetSeries> {
    vec![
        series("AAA", 200, |i| {
            100.0 * (1.0 + 0.0008 * i as f64) * (1.0 + 0.02 * (i as f64 * 0.9).sin())
        }),
        series("BBB", 200, |i| {
            40.0 * (1.0 + 0.0015 * i as f64) * (1.0 + 0.04 * (i as f64 * 0.35).cos())
        }),
        series("CCC", 200, |i| {
            10.0 * (1.0 + 0.0002 * i as f64) * (1.0 + 0.005 * (i as f64 * 1.7).sin())
        }),
    ]
}

fn engine_with(series: Vec<AssetSeries>) -> PortfolioEngine {
    let config = EngineConfig {
        training: TrainingConfig {
            cv_folds: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    PortfolioEngine::new(Arc::new(InMemoryPrices::with_series(series)), config)
}

fn syms(s: &[&str]) -> Vec<String> {
    s.iter().map(|s| s.to_string()).collect()
}

fn weights(pairs: &[(&str, f64)]) -> PortfolioWeights {
    PortfolioWeights::new(pairs.iter().map(|(s, w)| (s.to_string(), *w)).collect()).unwrap()
}

// ============================================================================
// Optimization
// ============================================================================

#[test]
fn test_identical_assets_split_evenly() {
    let engine = engine_with(vec![
        series("A", 60, |i| 100.0 * 1.01f64.powi(i as i32)),
        series("B", 60, |i| 100.0 * 1.01f64.powi(i as i32)),
    ]);
    let outcome = engine
        .optimize(&syms(&["A", "B"]), AssetClass::Stock, &DateRange::unbounded(), 0.0, RebalanceFrequency::Daily)
        .unwrap();

    assert!((outcome.weights.get("A").unwrap() - 0.5).abs() < 1e-6);
    assert!((outcome.weights.get("B").unwrap() - 0.5).abs() < 1e-6);
}

#[test]
fn test_single_symbol_optimize_rejected() {
    let engine = engine_with(market());
    let result = engine.optimize(&syms(&["AAA"]), AssetClass::Stock, &DateRange::unbounded(), 0.5, RebalanceFrequency::Daily);
    assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
}

#[test]
fn test_weights_feasible_across_tolerances() {
    let engine = engine_with(market());
    for t in [0.0, 0.1, 0.25, 0.5, 0.75, 0.9, 1.0] {
        let outcome = engine
            .optimize(&syms(&["AAA", "BBB", "CCC"]), AssetClass::Stock, &DateRange::unbounded(), t, RebalanceFrequency::Daily)
            .unwrap();
        let sum = outcome.weights.sum();
        assert!((sum - 1.0).abs() < 1e-6, "t={} sum={}", t, sum);
        for (symbol, w) in outcome.weights.iter() {
            assert!((-1e-9..=1.0 + 1e-9).contains(w), "t={} {}={}", t, symbol, w);
        }
    }
}

#[test]
fn test_objective_extremes_and_monotonic_blend() {
    let returns = ReturnsMatrix::from_series(&market(), &DateRange::unbounded()).unwrap();
    let estimate = RiskModel::default()
        .estimate(&returns, RebalanceFrequency::Daily)
        .unwrap();
    let optimizer = PortfolioOptimizer::default();

    let min_var = optimizer.optimize(&estimate, 0.0).unwrap();
    let max_sharpe = optimizer.optimize(&estimate, 1.0).unwrap();
    let mv = min_var.to_vector(&estimate.symbols).unwrap();
    let ms = max_sharpe.to_vector(&estimate.symbols).unwrap();

    let sharpe = |w: &[f64]| estimate.portfolio_return(w) / estimate.portfolio_variance(w).sqrt();

    // A grid of feasible portfolios never beats either extreme on its own objective.
    for a in 0..=10 {
        for b in 0..=(10 - a) {
            let w = [a as f64 / 10.0, b as f64 / 10.0, (10 - a - b) as f64 / 10.0];
            let v = estimate.portfolio_variance(&w);
            assert!(estimate.portfolio_variance(&mv) <= v * (1.0 + 1e-6) + 1e-12);
            assert!(sharpe(&ms) >= sharpe(&w) - 1e-4);
        }
    }

    let mut previous = f64::NEG_INFINITY;
    for k in 0..20 {
        let t = k as f64 / 20.0;
        let w = optimizer.optimize(&estimate, t).unwrap();
        let r = estimate.portfolio_return(&w.to_vector(&estimate.symbols).unwrap());
        assert!(r >= previous - 1e-6, "t={} return {} < {}", t, r, previous);
        previous = r;
    }
}

#[test]
fn test_optimize_round_trip_is_identical() {
    let engine = engine_with(market());
    let run = || {
        engine
            .optimize(&syms(&["CCC", "AAA", "BBB"]), AssetClass::Stock, &DateRange::unbounded(), 0.35, RebalanceFrequency::Daily)
            .unwrap()
    };
    assert_eq!(run().weights, run().weights);
}

#[test]
fn test_invalid_risk_tolerance() {
    let engine = engine_with(market());
    let result = engine.optimize(&syms(&["AAA", "BBB"]), AssetClass::Stock, &DateRange::unbounded(), 1.5, RebalanceFrequency::Daily);
    assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
}

// ============================================================================
// Backtesting
// ============================================================================

#[test]
fn test_flat_price_backtest() {
    let flat = series("FLAT", 30, |_| 42.0);
    let result = BacktestEngine::default()
        .run(&weights(&[("FLAT", 1.0)]), &[flat], RebalanceFrequency::Daily, &DateRange::unbounded())
        .unwrap();

    assert_eq!(result.total_return, 0.0);
    assert_eq!(result.volatility, 0.0);
    assert_eq!(result.max_drawdown, 0.0);
}

#[test]
fn test_rising_ten_percent() {
    let rising = series("A", 11, |i| 100.0 + i as f64);
    let result = BacktestEngine::default()
        .run(&weights(&[("A", 1.0)]), &[rising], RebalanceFrequency::Daily, &DateRange::unbounded())
        .unwrap();

    assert!((result.total_return - 0.10).abs() < 1e-12);
    assert_eq!(result.max_drawdown, 0.0);
}

#[test]
fn test_cumulative_series_shape() {
    let engine = engine_with(market());
    let range = DateRange::new(start() + Duration::days(10), start() + Duration::days(69)).unwrap();
    let result = engine
        .backtest(
            &syms(&["AAA", "BBB"]),
            AssetClass::Stock,
            &weights(&[("AAA", 0.3), ("BBB", 0.7)]),
            &range,
            RebalanceFrequency::Weekly,
            &[],
        )
        .unwrap();

    assert_eq!(result.cumulative_returns.len(), 60);
    assert_eq!(result.cumulative_returns[0].value, 1.0);
    assert_eq!(result.cumulative_returns[0].date, start() + Duration::days(10));
    assert!(result.best_day >= result.worst_day);
}

#[test]
fn test_backtest_empty_range() {
    let engine = engine_with(market());
    let range = DateRange::new(start() + Duration::days(500), start() + Duration::days(600)).unwrap();
    let result = engine.backtest(
        &syms(&["AAA"]),
        AssetClass::Stock,
        &weights(&[("AAA", 1.0)]),
        &range,
        RebalanceFrequency::Daily,
        &[],
    );
    assert!(matches!(result, Err(EngineError::InsufficientData(_))));
}

// ============================================================================
// Analysis and training
// ============================================================================

#[test]
fn test_analysis_recommendations() {
    let engine = engine_with(market());
    let holdings = vec![
        Holding { symbol: "AAA".to_string(), quantity: 10.0 },
        Holding { symbol: "BBB".to_string(), quantity: 20.0 },
        Holding { symbol: "CCC".to_string(), quantity: 5.0 },
    ];
    let outcome = engine
        .analyze(&holdings, AssetClass::Stock, &DateRange::unbounded(), RebalanceFrequency::Daily)
        .unwrap();

    for rec in &outcome.report.recommendations {
        assert_eq!(rec.difference, (rec.optimal_weight - rec.current_weight).abs());
    }
    let current_sum: f64 = outcome.report.current_portfolio.weights.sum();
    assert!((current_sum - 1.0).abs() < 1e-9);
}

#[test]
fn test_analysis_single_holding() {
    let engine = engine_with(market());
    let holdings = vec![Holding { symbol: "AAA".to_string(), quantity: 10.0 }];
    let result = engine.analyze(&holdings, AssetClass::Stock, &DateRange::unbounded(), RebalanceFrequency::Daily);
    assert!(matches!(result, Err(EngineError::InsufficientHoldings { .. })));
}

#[tokio::test]
async fn test_training_is_reproducible() {
    let engine = engine_with(market());
    let symbols = syms(&["AAA", "BBB"]);
    let a = engine.train(&symbols, AssetClass::Stock, &DateRange::unbounded()).unwrap();
    let b = engine.train(&symbols, AssetClass::Stock, &DateRange::unbounded()).unwrap();

    let ra = engine.training().wait(&a).await.unwrap();
    let rb = engine.training().wait(&b).await.unwrap();
    assert_eq!(ra.status, TaskStatus::Completed);
    assert_eq!(rb.status, TaskStatus::Completed);

    let (ra, rb) = (ra.results.unwrap(), rb.results.unwrap());
    assert_eq!(ra.models.len(), 7);
    for (name, m) in &ra.models {
        assert_eq!(m.test_r2, rb.models[name].test_r2, "{}", name);
    }
    assert_eq!(ra.best_model.name, rb.best_model.name);
}

// ============================================================================
// CSV data
// ============================================================================

#[test]
fn test_optimize_from_csv_directory() {
    let dir = tempfile::tempdir().unwrap();
    for s in market() {
        let mut file = std::fs::File::create(dir.path().join(format!("{}.csv", s.symbol()))).unwrap();
        writeln!(file, "Date,Close").unwrap();
        for p in s.points() {
            writeln!(file, "{},{}", p.date.format("%Y-%m-%d"), p.price).unwrap();
        }
    }

    let engine = PortfolioEngine::new(Arc::new(CsvDirectory::new(dir.path())), EngineConfig::default());
    let outcome = engine
        .optimize(&syms(&["AAA", "BBB", "CCC"]), AssetClass::Stock, &DateRange::unbounded(), 0.5, RebalanceFrequency::Daily)
        .unwrap();
    assert!((outcome.weights.sum() - 1.0).abs() < 1e-6);
    assert_eq!(outcome.observations, 199);

    let missing = engine.optimize(&syms(&["AAA", "ZZZ"]), AssetClass::Stock, &DateRange::unbounded(), 0.5, RebalanceFrequency::Daily);
    assert!(missing.is_err());
}

// ============================================================================
// HTTP
// ============================================================================

fn app() -> axum::Router {
    let state = AppState::new(engine_with(market()), Default::default());
    router(Arc::new(state))
}

async fn call(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_http_health() {
    let (status, body) = call(app(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_http_optimize() {
    let (status, body) = call(
        app(),
        "POST",
        "/optimize",
        Some(json!({
            "symbols": ["AAA", "BBB", "CCC"],
            "asset_type": "stock",
            "start_date": "2024-01-01",
            "end_date": "2024-06-30",
            "risk_tolerance": 0.5,
            "rebalance_freq": "weekly"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let total: f64 = body["weights"].as_object().unwrap().values().map(|v| v.as_f64().unwrap()).sum();
    assert!((total - 1.0).abs() < 1e-6);
    assert!(body["annualized_return"].is_number());
    assert!(body["annualized_risk"].is_number());
    assert!(body["annualized_sharpe"].is_number());
    assert!(body["annualized_sortino"].is_number());
    assert!(body["annualized_downside_risk"].as_f64().unwrap() >= body["downside_risk"].as_f64().unwrap());
    let cov = body["covariance_matrix"].as_array().unwrap();
    assert_eq!(cov.len(), 3);
    assert!(cov.iter().all(|row| row.as_array().unwrap().len() == 3));
    assert!((cov[0][1].as_f64().unwrap() - cov[1][0].as_f64().unwrap()).abs() < 1e-12);
}

#[tokio::test]
async fn test_http_optimize_errors() {
    let (status, body) = call(app(), "POST", "/optimize", Some(json!({"symbols": ["AAA"]}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");

    let (status, body) = call(
        app(),
        "POST",
        "/optimize",
        Some(json!({"symbols": ["AAA", "BBB"], "start_date": "2024-05-01", "end_date": "2024-01-01"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");
}

#[tokio::test]
async fn test_http_malformed_body_is_structured() {
    let (status, body) = call(
        app(),
        "POST",
        "/optimize",
        Some(json!({"symbols": ["AAA", "BBB"], "start_date": "2024-13-45"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");
    assert!(body["detail"].is_string());

    let (status, body) = call(app(), "POST", "/backtest", Some(json!({"symbols": "AAA"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");

    let request = Request::builder()
        .method("POST")
        .uri("/portfolio/analyze")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["kind"], "invalid_request");
}

#[tokio::test]
async fn test_http_rejects_path_like_symbols() {
    let (status, body) = call(
        app(),
        "POST",
        "/optimize",
        Some(json!({"symbols": ["AAA", "../../../../tmp/SECRET"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");
}

#[tokio::test]
async fn test_http_backtest() {
    let (status, body) = call(
        app(),
        "POST",
        "/backtest",
        Some(json!({
            "symbols": ["AAA", "BBB"],
            "asset_type": "stock",
            "weights": {"AAA": 0.6, "BBB": 0.4},
            "start_date": "2024-01-01",
            "end_date": "2024-03-31"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    for key in [
        "cagr", "sharpe_ratio", "volatility", "max_drawdown", "total_return",
        "sortino_ratio", "win_rate", "best_day", "worst_day",
    ] {
        assert!(body[key].is_number(), "missing {}", key);
    }
    let curve = body["cumulative_returns"].as_array().unwrap();
    assert_eq!(curve.len(), 91);
    assert_eq!(curve[0]["date"], "2024-01-01");
    assert_eq!(curve[0]["value"], 1.0);
}

#[tokio::test]
async fn test_http_analyze() {
    let (status, body) = call(
        app(),
        "POST",
        "/portfolio/analyze",
        Some(json!({"holdings": [{"symbol": "AAA", "quantity": 3.0}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "insufficient_holdings");

    let (status, body) = call(
        app(),
        "POST",
        "/portfolio/analyze",
        Some(json!({
            "start_date": "2024-01-01",
            "holdings": [{"symbol": "AAA", "quantity": 3.0}, {"symbol": "BBB", "quantity": 8.0}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["current_portfolio"]["total_value"].as_f64().unwrap() > 0.0);
    assert!(body["optimized_portfolio"]["weights"].is_object());
    assert!(body["recommendations"].is_array());
    assert!(body["potential_improvement"]["sharpe_improvement"].is_number());
}

#[tokio::test]
async fn test_http_training_flow() {
    let app = app();
    let (status, body) = call(
        app.clone(),
        "POST",
        "/models/train",
        Some(json!({"symbols": ["AAA", "BBB"], "asset_type": "stock"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let mut last = Value::Null;
    for _ in 0..600 {
        let (status, body) = call(app.clone(), "GET", &format!("/models/status/{}", task_id), None).await;
        assert_eq!(status, StatusCode::OK);
        let p = body["progress"].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&p));
        last = body;
        if last["status"] == "completed" || last["status"] == "failed" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert_eq!(last["status"], "completed");
    assert!(last["results"]["best_model"]["name"].is_string());

    let (status, body) = call(app, "GET", "/models/status/not-a-task", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "task_not_found");
}
