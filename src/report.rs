//! Terminal reports for engine results.

use crate::backtest::BacktestResult;
use crate::engine::{AnalysisOutcome, OptimizationOutcome};
use crate::training::TrainingReport;
use crate::types::Action;
use colored::Colorize;
use serde::Serialize;
use tabled::{builder::Builder, settings::Style};

/// Formats results for the console.
pub struct ReportFormatter;

impl ReportFormatter {
    fn banner(title: &str) {
        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", format!(" {} ", title).bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();
    }

    fn pct(value: f64) -> String {
        format!("{:.2}%", value * 100.0)
    }

    fn signed_pct(value: f64) -> String {
        let s = format!("{:+.2}%", value * 100.0);
        if value >= 0.0 {
            s.green().to_string()
        } else {
            s.red().to_string()
        }
    }

    /// Weight table, largest first.
    pub fn weights_table(outcome: &OptimizationOutcome) -> String {
        let mut rows: Vec<(&String, &f64)> = outcome.weights.iter().collect();
        rows.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));

        let mut builder = Builder::new();
        builder.push_record(["Symbol", "Weight"]);
        for (symbol, w) in rows {
            builder.push_record([symbol.clone(), Self::pct(*w)]);
        }
        builder.build().with(Style::rounded()).to_string()
    }

    pub fn print_optimization(outcome: &OptimizationOutcome) {
        Self::banner("OPTIMAL PORTFOLIO");
        println!("  Objective:        {}", outcome.objective);
        println!("  Rebalance:        {}", outcome.rebalance_frequency);
        println!("  Observations:     {}", outcome.observations);
        if let Some(ridge) = outcome.ridge {
            println!("  Ridge:            {:.3e}", ridge);
        }
        println!();
        println!("{}", Self::weights_table(outcome));
        println!();

        let s = &outcome.stats;
        println!("{}", "Expected (annualized)".bold().underline());
        println!("  Return:           {:>10}", Self::pct(s.annualized_return));
        println!("  Risk:             {:>10}", Self::pct(s.annualized_risk));
        println!("  Sharpe:           {:>10.2}", s.annualized_sharpe);
        println!("  Downside Risk:    {:>10}", Self::pct(s.annualized_downside_risk));
        println!("  Sortino:          {:>10.2}", s.annualized_sortino);
        println!("  Max Drawdown:     {:>10}", Self::pct(s.max_drawdown));
        println!("  Calmar:           {:>10.2}", s.calmar_ratio);
        println!();
        println!("{}", "═".repeat(60).blue());
    }

    pub fn print_backtest(result: &BacktestResult) {
        Self::banner("BACKTEST RESULTS");

        if let (Some(first), Some(last)) = (result.cumulative_returns.first(), result.cumulative_returns.last()) {
            println!("{}", "Overview".bold().underline());
            println!("  Period:           {} to {}", first.date, last.date);
            println!("  Periods:          {}", result.periods);
            println!("  Rebalance:        {} ({} rebalances)", result.rebalance_frequency, result.rebalances);
            println!();
        }

        println!("{}", "Performance".bold().underline());
        println!("  Final Value:      {:>10.4}  {}", result.final_value(), Self::signed_pct(result.total_return));
        println!("  CAGR:             {:>10}", Self::pct(result.cagr));
        println!("  Best Day:         {:>10}", Self::pct(result.best_day));
        println!("  Worst Day:        {:>10}", Self::pct(result.worst_day));
        println!("  Win Rate:         {:>10}", Self::pct(result.win_rate));
        println!("  Profit Factor:    {:>10.2}", result.profit_factor);
        println!();

        println!("{}", "Risk".bold().underline());
        println!("  Volatility:       {:>10}", Self::pct(result.volatility));
        println!("  Max Drawdown:     {:>10}", Self::pct(result.max_drawdown));
        println!("  Sharpe:           {:>10.2}", result.sharpe_ratio);
        println!("  Sortino:          {:>10.2}", result.sortino_ratio);
        println!("  Calmar:           {:>10.2}", result.calmar_ratio);
        println!("  Ulcer Index:      {:>10.4}", result.ulcer_index);
        println!("  VaR 95%:          {:>10}", Self::pct(result.var_95));
        println!("  CVaR 95%:         {:>10}", Self::pct(result.cvar_95));
        println!();
        println!("{}", "═".repeat(60).blue());
    }

    /// Model comparison table sorted by test R².
    pub fn training_table(report: &TrainingReport) -> String {
        let mut rows: Vec<_> = report.models.iter().collect();
        rows.sort_by(|a, b| b.1.test_r2.total_cmp(&a.1.test_r2).then_with(|| a.0.cmp(b.0)));

        let mut builder = Builder::new();
        builder.push_record(["Model", "Test R²", "Test MSE", "Test MAE", "Direction", "CV R²", "Score"]);
        for (name, m) in rows {
            builder.push_record([
                name.clone(),
                format!("{:.4}", m.test_r2),
                format!("{:.3e}", m.test_mse),
                format!("{:.3e}", m.test_mae),
                Self::pct(m.test_direction_accuracy),
                m.cv_r2.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "-".to_string()),
                format!("{:.4}", m.combined_score),
            ]);
        }
        builder.build().with(Style::rounded()).to_string()
    }

    pub fn print_training(report: &TrainingReport) {
        Self::banner("MODEL COMPARISON");
        println!(
            "  Rows: {} ({} train / {} test), {} features",
            report.data_points, report.train_size, report.test_size, report.n_features
        );
        println!();
        println!("{}", Self::training_table(report));
        println!();
        println!(
            "  Best model: {} (test R² {:.4})",
            report.best_model.name.bold().green(),
            report.best_model.metrics.test_r2
        );
        println!();
    }

    pub fn recommendations_table(outcome: &AnalysisOutcome) -> String {
        let mut builder = Builder::new();
        builder.push_record(["Symbol", "Action", "Current", "Optimal", "Change"]);
        for rec in &outcome.report.recommendations {
            let action = match rec.action {
                Action::Increase => rec.action.to_string().green().to_string(),
                Action::Decrease => rec.action.to_string().red().to_string(),
            };
            builder.push_record([
                rec.symbol.clone(),
                action,
                Self::pct(rec.current_weight),
                Self::pct(rec.optimal_weight),
                Self::pct(rec.difference),
            ]);
        }
        builder.build().with(Style::rounded()).to_string()
    }

    pub fn print_analysis(outcome: &AnalysisOutcome) {
        Self::banner("PORTFOLIO ANALYSIS");
        let current = &outcome.report.current_portfolio.stats;
        let optimal = &outcome.report.optimized_portfolio.stats;

        println!("  Market value:     {:.2}", outcome.total_value);
        println!();

        let mut builder = Builder::new();
        builder.push_record(["", "Current", "Optimized"]);
        builder.push_record(["Annual return".to_string(), Self::pct(current.annualized_return), Self::pct(optimal.annualized_return)]);
        builder.push_record(["Annual risk".to_string(), Self::pct(current.annualized_risk), Self::pct(optimal.annualized_risk)]);
        builder.push_record([
            "Sharpe".to_string(),
            format!("{:.2}", current.annualized_sharpe),
            format!("{:.2}", optimal.annualized_sharpe),
        ]);
        println!("{}", builder.build().with(Style::rounded()).to_string());
        println!();

        if outcome.report.recommendations.is_empty() {
            println!("  No changes recommended.");
        } else {
            println!("{}", Self::recommendations_table(outcome));
        }
        println!();

        let imp = &outcome.report.potential_improvement;
        println!("{}", "Potential improvement".bold().underline());
        println!("  Return:           {}", Self::signed_pct(imp.return_increase));
        println!("  Risk:             {}", Self::signed_pct(imp.risk_change));
        println!("  Sharpe:           {:+.2}", imp.sharpe_improvement);
        println!();
    }

    /// Pretty JSON of any result.
    pub fn to_json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{Objective, PortfolioStats};
    use crate::training::{BestModel, ModelMetrics};
    use crate::types::{PortfolioWeights, RebalanceFrequency};
    use std::collections::BTreeMap;

    #[test]
    fn test_weights_table_sorted() {
        let outcome = OptimizationOutcome {
            weights: PortfolioWeights::new(
                [("AAA".to_string(), 0.25), ("BBB".to_string(), 0.75)].into_iter().collect(),
            )
            .unwrap(),
            stats: PortfolioStats::default(),
            objective: Objective::MinVariance,
            rebalance_frequency: RebalanceFrequency::Daily,
            observations: 10,
            ridge: None,
            covariance_matrix: vec![vec![1e-4, 0.0], vec![0.0, 2e-4]],
        };
        let table = ReportFormatter::weights_table(&outcome);
        let bbb = table.find("BBB").unwrap();
        let aaa = table.find("AAA").unwrap();
        assert!(bbb < aaa);
        assert!(table.contains("75.00%"));
    }

    #[test]
    fn test_training_table_lists_models() {
        let mut models = BTreeMap::new();
        models.insert("Ridge Regression".to_string(), ModelMetrics { test_r2: 0.2, ..Default::default() });
        models.insert("Linear Regression".to_string(), ModelMetrics { test_r2: 0.1, ..Default::default() });
        let report = TrainingReport {
            best_model: BestModel {
                name: "Ridge Regression".to_string(),
                metrics: models["Ridge Regression"].clone(),
            },
            models,
            data_points: 100,
            train_size: 80,
            test_size: 20,
            n_features: 26,
        };
        let table = ReportFormatter::training_table(&report);
        assert!(table.find("Ridge").unwrap() < table.find("Linear").unwrap());
        assert!(ReportFormatter::to_json(&report).contains("\"best_model\""));
    }
}
