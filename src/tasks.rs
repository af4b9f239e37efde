//! Asynchronous training tasks.
//!
//! Each task owns a `watch` channel. The rayon worker holds the only sender
//! and publishes a fresh snapshot on every state change; the registry keeps
//! a receiver so readers can clone the latest snapshot or await completion.
//! Tasks cannot be cancelled once submitted.

use crate::data::AlignedPrices;
use crate::error::{EngineError, Result};
use crate::training::{TrainingConfig, TrainingPipeline, TrainingReport};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// Task lifecycle: queued → running → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Snapshot of a training task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingTask {
    pub task_id: Uuid,
    pub status: TaskStatus,
    /// Percentage in [0, 100].
    pub progress: f64,
    pub current_model: Option<String>,
    pub symbols: Vec<String>,
    pub results: Option<TrainingReport>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrainingTask {
    fn queued(task_id: Uuid, symbols: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            status: TaskStatus::Queued,
            progress: 0.0,
            current_model: None,
            symbols,
            results: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Registry and dispatcher for training tasks.
#[derive(Clone)]
pub struct TrainingService {
    pipeline: Arc<TrainingPipeline>,
    tasks: Arc<DashMap<Uuid, watch::Receiver<TrainingTask>>>,
}

impl Default for TrainingService {
    fn default() -> Self {
        Self::new(TrainingConfig::default())
    }
}

impl TrainingService {
    pub fn new(config: TrainingConfig) -> Self {
        Self::with_pipeline(TrainingPipeline::new(config))
    }

    pub fn with_pipeline(pipeline: TrainingPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Validate the data and start training in the background.
    ///
    /// Feature extraction and the sample-count check run before the task is
    /// registered, so an unusable dataset is rejected immediately.
    pub fn submit(&self, prices: &AlignedPrices) -> Result<Uuid> {
        let dataset = self.pipeline.prepare(prices)?;
        let task_id = Uuid::new_v4();
        let (tx, rx) = watch::channel(TrainingTask::queued(task_id, prices.symbols.clone()));
        self.tasks.insert(task_id, rx);

        info!(
            "Queued training task {} ({} symbols, {} rows)",
            task_id,
            prices.symbols.len(),
            dataset.len()
        );

        let pipeline = Arc::clone(&self.pipeline);
        rayon::spawn(move || {
            tx.send_modify(|t| {
                t.status = TaskStatus::Running;
                t.updated_at = Utc::now();
            });

            let run = panic::catch_unwind(AssertUnwindSafe(|| {
                pipeline.run_dataset(&dataset, &mut |progress, model| {
                    tx.send_modify(|t| {
                        t.progress = progress;
                        t.current_model = Some(model.to_string());
                        t.updated_at = Utc::now();
                    });
                })
            }));
            let outcome = run.unwrap_or_else(|payload| {
                let model = tx
                    .borrow()
                    .current_model
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                Err(EngineError::TrainingFailure {
                    model,
                    detail: format!("panicked: {}", panic_message(payload.as_ref())),
                })
            });

            tx.send_modify(|t| {
                match outcome {
                    Ok(report) => {
                        info!("Training task {} completed, best model {}", task_id, report.best_model.name);
                        t.status = TaskStatus::Completed;
                        t.progress = 100.0;
                        t.results = Some(report);
                    }
                    Err(e) => {
                        warn!("Training task {} failed: {}", task_id, e);
                        t.status = TaskStatus::Failed;
                        t.results = None;
                        t.error = Some(e.to_string());
                    }
                }
                t.updated_at = Utc::now();
            });
        });

        Ok(task_id)
    }

    /// Latest snapshot of a task.
    pub fn status(&self, task_id: &Uuid) -> Result<TrainingTask> {
        self.tasks
            .get(task_id)
            .map(|rx| rx.borrow().clone())
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))
    }

    /// Resolve once the task reaches a terminal state.
    pub async fn wait(&self, task_id: &Uuid) -> Result<TrainingTask> {
        let mut rx = self
            .tasks
            .get(task_id)
            .map(|rx| rx.clone())
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

        let finished = rx
            .wait_for(|t| t.status.is_terminal())
            .await
            .map(|t| t.clone())
            .ok();
        // Worker gone; report whatever it last published.
        Ok(finished.unwrap_or_else(|| rx.borrow().clone()))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::models::{LinearRegression, Regressor, Ridge};
    use chrono::NaiveDate;

    fn prices(n: usize) -> AlignedPrices {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        let mut a = 50.0;
        let mut b = 80.0;
        let rows = (0..n)
            .map(|i| {
                a *= 1.0 + 0.012 * (i as f64 * 0.7).sin();
                b *= 1.0 + 0.009 * (i as f64 * 0.23 + 0.5).cos();
                vec![a, b]
            })
            .collect();
        AlignedPrices {
            symbols: vec!["AAA".to_string(), "BBB".to_string()],
            dates: (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect(),
            prices: rows,
        }
    }

    fn service() -> TrainingService {
        let config = TrainingConfig {
            cv_folds: 0,
            ..Default::default()
        };
        TrainingService::with_pipeline(TrainingPipeline::new(config).with_panel(vec![
            ("Linear Regression", || Box::new(LinearRegression::new())),
            ("Ridge Regression", || Box::new(Ridge::new(1.0))),
        ]))
    }

    struct Broken;

    impl Regressor for Broken {
        fn fit(&mut self, _x: &[Vec<f64>], _y: &[f64]) -> Result<()> {
            Err(EngineError::DataError("boom".to_string()))
        }

        fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
            vec![0.0; x.len()]
        }
    }

    #[tokio::test]
    async fn test_task_completes() {
        let service = service();
        let id = service.submit(&prices(160)).unwrap();

        let snapshot = service.status(&id).unwrap();
        assert_eq!(snapshot.task_id, id);
        assert!(snapshot.progress >= 0.0 && snapshot.progress <= 100.0);

        let done = service.wait(&id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress, 100.0);
        assert!(done.error.is_none());
        let report = done.results.unwrap();
        assert_eq!(report.models.len(), 2);
        assert_eq!(service.status(&id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_task_failure_is_terminal() {
        let config = TrainingConfig {
            cv_folds: 0,
            ..Default::default()
        };
        let service = TrainingService::with_pipeline(TrainingPipeline::new(config).with_panel(vec![
            ("Linear Regression", || Box::new(LinearRegression::new())),
            ("Broken", || Box::new(Broken)),
        ]));
        let id = service.submit(&prices(160)).unwrap();
        let done = service.wait(&id).await.unwrap();

        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.results.is_none());
        assert!(done.error.unwrap().contains("Broken"));
    }

    struct Panicking;

    impl Regressor for Panicking {
        fn fit(&mut self, _x: &[Vec<f64>], _y: &[f64]) -> Result<()> {
            panic!("singular split");
        }

        fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
            vec![0.0; x.len()]
        }
    }

    #[tokio::test]
    async fn test_panicking_model_fails_task() {
        let config = TrainingConfig {
            cv_folds: 0,
            ..Default::default()
        };
        let service = TrainingService::with_pipeline(TrainingPipeline::new(config).with_panel(vec![
            ("Linear Regression", || Box::new(LinearRegression::new())),
            ("Panicking", || Box::new(Panicking)),
        ]));
        let id = service.submit(&prices(160)).unwrap();
        let done = service.wait(&id).await.unwrap();

        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.results.is_none());
        let error = done.error.unwrap();
        assert!(error.contains("Panicking"), "{}", error);
        assert!(error.contains("singular split"), "{}", error);

        // The pool keeps serving later tasks.
        let next = service.submit(&prices(160)).unwrap();
        assert_eq!(service.wait(&next).await.unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn test_unknown_task() {
        let service = service();
        let result = service.status(&Uuid::new_v4());
        assert!(matches!(result, Err(EngineError::TaskNotFound(_))));
    }

    #[test]
    fn test_insufficient_data_rejected_on_submit() {
        let service = service();
        let result = service.submit(&prices(40));
        assert!(matches!(result, Err(EngineError::InsufficientData(_))));
        assert!(service.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_tasks_are_independent() {
        let service = service();
        let a = service.submit(&prices(160)).unwrap();
        let b = service.submit(&prices(200)).unwrap();
        assert_ne!(a, b);
        assert_eq!(service.len(), 2);

        let ra = service.wait(&a).await.unwrap();
        let rb = service.wait(&b).await.unwrap();
        assert_ne!(
            ra.results.unwrap().data_points,
            rb.results.unwrap().data_points
        );
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskStatus::Completed).unwrap(), "\"completed\"");
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
