//! Model training and comparison.
//!
//! The pipeline turns aligned prices into a feature dataset, splits it
//! chronologically, fits every model of the panel on the same split and
//! reports comparable metrics. Any model failure aborts the whole run.

use crate::data::AlignedPrices;
use crate::error::{EngineError, Result};
use crate::features::{Dataset, FeatureConfig, FeatureExtractor, Standardizer, TimeSeriesSplitter};
use crate::metrics;
use crate::models::{model_panel, ModelFactory, Regressor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Training pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Minimum number of usable feature rows.
    pub min_samples: usize,
    /// Fraction of rows (taken from the end) held out for testing.
    pub test_ratio: f64,
    /// Rows skipped between train and test.
    pub split_gap: usize,
    /// Expanding-window folds on the training rows; 0 disables cross-validation.
    pub cv_folds: usize,
    /// Z-score features with training statistics.
    pub standardize: bool,
    pub features: FeatureConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_samples: 50,
            test_ratio: 0.2,
            split_gap: 0,
            cv_folds: 3,
            standardize: true,
            features: FeatureConfig::default(),
        }
    }
}

/// Evaluation metrics of one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub train_mse: f64,
    pub test_mse: f64,
    pub train_r2: f64,
    pub test_r2: f64,
    pub train_mae: f64,
    pub test_mae: f64,
    pub train_direction_accuracy: f64,
    pub test_direction_accuracy: f64,
    /// MSE on test rows with a negative target.
    pub downside_mse: f64,
    /// R² on test rows with a positive target (0 with five or fewer).
    pub upside_r2: f64,
    pub max_error: f64,
    /// Test R² over tracking error.
    pub information_ratio: f64,
    pub combined_score: f64,
    /// Mean R² over expanding-window folds, when enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cv_r2: Option<f64>,
}

/// Winning model and its metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestModel {
    pub name: String,
    pub metrics: ModelMetrics,
}

/// Comparison of every model on one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub models: BTreeMap<String, ModelMetrics>,
    pub best_model: BestModel,
    pub data_points: usize,
    pub train_size: usize,
    pub test_size: usize,
    pub n_features: usize,
}

/// Coefficient of determination; 1 for a perfect constant fit, 0 otherwise on constant targets.
pub fn r2_score(y: &[f64], pred: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let mean = metrics::mean(y);
    let ss_tot: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
    let ss_res: f64 = y.iter().zip(pred).map(|(a, b)| (a - b).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn mse(y: &[f64], pred: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    y.iter().zip(pred).map(|(a, b)| (a - b).powi(2)).sum::<f64>() / y.len() as f64
}

pub fn mae(y: &[f64], pred: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    y.iter().zip(pred).map(|(a, b)| (a - b).abs()).sum::<f64>() / y.len() as f64
}

fn direction_accuracy(y: &[f64], pred: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let hits = y
        .iter()
        .zip(pred)
        .filter(|(a, b)| (**a > 0.0) == (**b > 0.0))
        .count();
    hits as f64 / y.len() as f64
}

impl ModelMetrics {
    pub fn evaluate(y_train: &[f64], p_train: &[f64], y_test: &[f64], p_test: &[f64]) -> Self {
        let test_r2 = r2_score(y_test, p_test);
        let test_direction_accuracy = direction_accuracy(y_test, p_test);

        let (down_y, down_p): (Vec<f64>, Vec<f64>) = y_test
            .iter()
            .zip(p_test)
            .filter(|(a, _)| **a < 0.0)
            .map(|(a, b)| (*a, *b))
            .unzip();
        let downside_mse = mse(&down_y, &down_p);

        let (up_y, up_p): (Vec<f64>, Vec<f64>) = y_test
            .iter()
            .zip(p_test)
            .filter(|(a, _)| **a > 0.0)
            .map(|(a, b)| (*a, *b))
            .unzip();
        let upside_r2 = if up_y.len() > 5 { r2_score(&up_y, &up_p) } else { 0.0 };

        let errors: Vec<f64> = y_test.iter().zip(p_test).map(|(a, b)| a - b).collect();
        let max_error = errors.iter().fold(0.0f64, |m, e| m.max(e.abs()));
        let m = metrics::mean(&errors);
        let tracking_error = if errors.is_empty() {
            0.0
        } else {
            (errors.iter().map(|e| (e - m).powi(2)).sum::<f64>() / errors.len() as f64).sqrt()
        };
        let information_ratio = if tracking_error > 0.0 {
            test_r2 / tracking_error
        } else {
            0.0
        };

        let combined_score = 0.3 * test_r2
            + 0.2 * test_direction_accuracy
            + 0.2 * (1.0 - downside_mse.min(1.0))
            + 0.15 * upside_r2
            + 0.15 * information_ratio.min(1.0);

        Self {
            train_mse: mse(y_train, p_train),
            test_mse: mse(y_test, p_test),
            train_r2: r2_score(y_train, p_train),
            test_r2,
            train_mae: mae(y_train, p_train),
            test_mae: mae(y_test, p_test),
            train_direction_accuracy: direction_accuracy(y_train, p_train),
            test_direction_accuracy,
            downside_mse,
            upside_r2,
            max_error,
            information_ratio,
            combined_score,
            cv_r2: None,
        }
    }
}

/// Highest test R²; ties go to the lower test MSE, then the smaller name.
pub fn select_best(models: &BTreeMap<String, ModelMetrics>) -> Option<(&String, &ModelMetrics)> {
    models.iter().max_by(|(na, a), (nb, b)| {
        a.test_r2
            .total_cmp(&b.test_r2)
            .then_with(|| b.test_mse.total_cmp(&a.test_mse))
            .then_with(|| nb.cmp(na))
    })
}

/// Progress notification: percentage complete and the model about to run.
pub type ProgressFn<'a> = dyn FnMut(f64, &str) + 'a;

/// Fits and compares the model panel.
pub struct TrainingPipeline {
    config: TrainingConfig,
    panel: Vec<(&'static str, ModelFactory)>,
}

impl Default for TrainingPipeline {
    fn default() -> Self {
        Self::new(TrainingConfig::default())
    }
}

impl TrainingPipeline {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            panel: model_panel(),
        }
    }

    /// Replace the model panel.
    pub fn with_panel(mut self, panel: Vec<(&'static str, ModelFactory)>) -> Self {
        self.panel = panel;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn model_names(&self) -> Vec<&'static str> {
        self.panel.iter().map(|(n, _)| *n).collect()
    }

    /// Build the dataset and check it is large enough.
    pub fn prepare(&self, prices: &AlignedPrices) -> Result<Dataset> {
        let dataset = FeatureExtractor::new(self.config.features.clone()).extract(prices)?;
        if dataset.len() < self.config.min_samples {
            return Err(EngineError::InsufficientData(format!(
                "need at least {} samples for training, found {}",
                self.config.min_samples,
                dataset.len()
            )));
        }
        Ok(dataset)
    }

    /// Train every model and rank them.
    pub fn run(&self, prices: &AlignedPrices, progress: &mut ProgressFn<'_>) -> Result<TrainingReport> {
        let dataset = self.prepare(prices)?;
        self.run_dataset(&dataset, progress)
    }

    pub fn run_dataset(&self, dataset: &Dataset, progress: &mut ProgressFn<'_>) -> Result<TrainingReport> {
        let splitter = TimeSeriesSplitter::new(self.config.test_ratio)?.with_gap(self.config.split_gap);
        let (train, test) = splitter.split(dataset);
        if train.is_empty() || test.is_empty() {
            return Err(EngineError::InsufficientData(
                "chronological split left an empty partition".to_string(),
            ));
        }

        let (x_train, x_test) = self.scale(&train.features, &test.features);
        let folds = splitter.time_series_cv(train.len(), self.config.cv_folds);

        info!(
            "Training {} models on {} rows ({} train / {} test, {} features)",
            self.panel.len(),
            dataset.len(),
            train.len(),
            test.len(),
            dataset.n_features()
        );

        let total = self.panel.len();
        let mut models = BTreeMap::new();
        for (idx, (name, factory)) in self.panel.iter().enumerate() {
            progress(idx as f64 / total as f64 * 100.0, name);

            let mut model = factory();
            let (p_train, p_test) = fit_predict(&mut *model, name, &x_train, &train.targets, &x_test)?;
            let mut metrics = ModelMetrics::evaluate(&train.targets, &p_train, &test.targets, &p_test);

            if !folds.is_empty() {
                let mut scores = Vec::with_capacity(folds.len());
                for (fold_train, fold_test) in &folds {
                    let (xf_train, xf_test) = self.scale(
                        &train.features[fold_train.clone()],
                        &train.features[fold_test.clone()],
                    );
                    let mut fold_model = factory();
                    let (_, pf) = fit_predict(
                        &mut *fold_model,
                        name,
                        &xf_train,
                        &train.targets[fold_train.clone()],
                        &xf_test,
                    )?;
                    scores.push(r2_score(&train.targets[fold_test.clone()], &pf));
                }
                metrics.cv_r2 = Some(metrics::mean(&scores));
            }

            debug!("{}: test R² {:.4}, test MSE {:.3e}", name, metrics.test_r2, metrics.test_mse);
            models.insert(name.to_string(), metrics);
        }
        progress(100.0, "Complete");

        let (best_name, best_metrics) = select_best(&models)
            .map(|(n, m)| (n.clone(), m.clone()))
            .ok_or_else(|| EngineError::InvalidRequest("model panel is empty".to_string()))?;

        info!("Best model: {} (test R² {:.4})", best_name, best_metrics.test_r2);

        Ok(TrainingReport {
            best_model: BestModel {
                name: best_name,
                metrics: best_metrics,
            },
            models,
            data_points: dataset.len(),
            train_size: train.len(),
            test_size: test.len(),
            n_features: dataset.n_features(),
        })
    }

    fn scale(&self, train: &[Vec<f64>], test: &[Vec<f64>]) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        if self.config.standardize {
            let s = Standardizer::fit(train);
            (s.transform(train), s.transform(test))
        } else {
            (train.to_vec(), test.to_vec())
        }
    }
}

fn fit_predict(
    model: &mut dyn Regressor,
    name: &str,
    x_train: &[Vec<f64>],
    y_train: &[f64],
    x_test: &[Vec<f64>],
) -> Result<(Vec<f64>, Vec<f64>)> {
    model
        .fit(x_train, y_train)
        .map_err(|e| EngineError::TrainingFailure {
            model: name.to_string(),
            detail: e.to_string(),
        })?;

    let p_train = model.predict(x_train);
    let p_test = model.predict(x_test);
    if p_train.iter().chain(&p_test).any(|p| !p.is_finite()) {
        return Err(EngineError::TrainingFailure {
            model: name.to_string(),
            detail: "non-finite prediction".to_string(),
        });
    }
    Ok((p_train, p_test))
}
