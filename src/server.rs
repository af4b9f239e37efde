//! HTTP interface.
//!
//! Optimize, backtest and analyze run on the blocking pool and answer in the
//! same request. Training returns a task id right away; callers poll
//! `/models/status/{task_id}`.

use crate::api::{
    request_range, AnalyzeRequest, AnalyzeResponse, BacktestRequest, ErrorResponse, HealthResponse,
    OptimizeRequest, OptimizeResponse, TrainRequest, TrainResponse,
};
use crate::backtest::BacktestResult;
use crate::config::{EngineSettings, FolioConfig};
use crate::data::CsvDirectory;
use crate::engine::PortfolioEngine;
use crate::error::EngineError;
use crate::tasks::{TaskStatus, TrainingTask};
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Shared handler state.
pub struct AppState {
    pub engine: PortfolioEngine,
    pub defaults: EngineSettings,
}

impl AppState {
    pub fn new(engine: PortfolioEngine, defaults: EngineSettings) -> Self {
        Self { engine, defaults }
    }
}

/// Handler error, rendered as `{kind, detail}`.
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    /// The request body could not be read as the expected JSON.
    BadBody(String),
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadBody(rejection.body_text())
    }
}

/// `Json` extractor whose rejections use the `{kind, detail}` error body.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

/// HTTP status for an engine error.
pub fn status_for(e: &EngineError) -> StatusCode {
    match e {
        EngineError::InvalidRequest(_)
        | EngineError::InsufficientHoldings { .. }
        | EngineError::JsonError(_)
        | EngineError::DateParseError(_) => StatusCode::BAD_REQUEST,
        EngineError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InsufficientData(_)
        | EngineError::OptimizationFailure(_)
        | EngineError::TrainingFailure { .. }
        | EngineError::DataError(_)
        | EngineError::CsvError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::ConfigError(_) | EngineError::IoError(_) | EngineError::TomlError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Engine(e) => {
                let status = status_for(&e);
                if status.is_server_error() {
                    error!("Request failed: {}", e);
                } else {
                    info!("Request rejected ({}): {}", e.kind(), e);
                }
                (status, Json(ErrorResponse::from(&e))).into_response()
            }
            ApiError::BadBody(detail) => {
                info!("Request rejected (invalid_request): {}", detail);
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        kind: "invalid_request".to_string(),
                        detail,
                    }),
                )
                    .into_response()
            }
            ApiError::Internal(detail) => {
                error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        kind: "internal".to_string(),
                        detail,
                    }),
                )
                    .into_response()
            }
        }
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Run a CPU-bound engine call off the async workers.
async fn blocking<T, F>(f: F) -> std::result::Result<T, ApiError>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/optimize", post(optimize))
        .route("/backtest", post(backtest))
        .route("/models/train", post(train))
        .route("/models/status/{task_id}", get(training_status))
        .route("/portfolio/analyze", post(analyze))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

async fn optimize(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<OptimizeRequest>,
) -> ApiResult<OptimizeResponse> {
    let range = request_range(req.start_date, req.end_date)?;
    let asset_class = req.asset_type.unwrap_or(state.defaults.default_asset_class);
    let rebalance = req.rebalance_freq.unwrap_or(state.defaults.default_rebalance);

    let outcome = blocking(move || {
        state
            .engine
            .optimize(&req.symbols, asset_class, &range, req.risk_tolerance, rebalance)
    })
    .await?;
    Ok(Json(outcome.into()))
}

async fn backtest(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<BacktestRequest>,
) -> ApiResult<BacktestResult> {
    let range = request_range(req.start_date, req.end_date)?;
    let weights = req.portfolio_weights()?;
    let asset_class = req.asset_type.unwrap_or(state.defaults.default_asset_class);
    let rebalance = req.rebalance_freq.unwrap_or(state.defaults.default_rebalance);

    let result = blocking(move || {
        state.engine.backtest(
            &req.symbols,
            asset_class,
            &weights,
            &range,
            rebalance,
            &req.rebalance_dates,
        )
    })
    .await?;
    Ok(Json(result))
}

async fn train(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<TrainRequest>,
) -> std::result::Result<(StatusCode, Json<TrainResponse>), ApiError> {
    let range = request_range(req.start_date, req.end_date)?;
    let asset_class = req.asset_type.unwrap_or(state.defaults.default_asset_class);

    let task_id = blocking(move || state.engine.train(&req.symbols, asset_class, &range)).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TrainResponse {
            task_id,
            status: TaskStatus::Queued,
        }),
    ))
}

async fn training_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<TrainingTask> {
    let id = Uuid::parse_str(&task_id).map_err(|_| EngineError::TaskNotFound(task_id.clone()))?;
    Ok(Json(state.engine.training_status(&id)?))
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<AnalyzeRequest>,
) -> ApiResult<AnalyzeResponse> {
    let range = request_range(req.start_date, req.end_date)?;
    let asset_class = req.asset_type.unwrap_or(state.defaults.default_asset_class);
    let rebalance = req.rebalance_freq.unwrap_or(state.defaults.default_rebalance);

    let outcome = blocking(move || {
        state
            .engine
            .analyze(&req.holdings, asset_class, &range, rebalance)
    })
    .await?;
    Ok(Json(outcome.into()))
}

/// Serve the API with prices read from the configured CSV directory.
pub async fn serve(config: &FolioConfig) -> crate::error::Result<()> {
    let source = CsvDirectory::new(config.data.prices_dir.clone()).with_config(config.data.to_data_config()?);
    let engine = PortfolioEngine::new(Arc::new(source), config.engine_config());
    let state = Arc::new(AppState::new(engine, config.engine.clone()));

    let address = config.server.address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(
        "Listening on http://{} (prices from {})",
        address,
        config.data.prices_dir.display()
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
}
