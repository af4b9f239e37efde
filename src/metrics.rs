//! Performance statistics over periodic return series.
//!
//! All functions take simple periodic returns and an annualization factor
//! (periods per year). Degenerate inputs (empty series, zero volatility)
//! produce `0.0` rather than infinities so results stay JSON-serializable.

use serde::{Deserialize, Serialize};

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.max(0.0).sqrt()
}

/// Periodic downside deviation: sample standard deviation of the negative returns only.
pub fn downside_deviation(returns: &[f64]) -> f64 {
    let negative: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).copied().collect();
    sample_std(&negative)
}

/// Annualized Sharpe ratio: `(mean·A − rf) / (std·√A)`.
pub fn sharpe_ratio(returns: &[f64], annualization_factor: f64, risk_free_rate: f64) -> f64 {
    let vol = sample_std(returns) * annualization_factor.sqrt();
    if vol <= 0.0 || !vol.is_finite() {
        return 0.0;
    }
    (mean(returns) * annualization_factor - risk_free_rate) / vol
}

/// Annualized Sortino ratio: `(mean·A − rf) / (downside_std·√A)`.
pub fn sortino_ratio(returns: &[f64], annualization_factor: f64, risk_free_rate: f64) -> f64 {
    let downside = downside_deviation(returns) * annualization_factor.sqrt();
    if downside <= 0.0 || !downside.is_finite() {
        return 0.0;
    }
    (mean(returns) * annualization_factor - risk_free_rate) / downside
}

/// Compounded value path starting at 1.0; one element longer than `returns`.
pub fn value_path(returns: &[f64]) -> Vec<f64> {
    let mut values = Vec::with_capacity(returns.len() + 1);
    let mut v = 1.0;
    values.push(v);
    for r in returns {
        v *= 1.0 + r;
        values.push(v);
    }
    values
}

/// Drawdown of each value relative to its running maximum (`<= 0`).
pub fn drawdown_series(values: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    values
        .iter()
        .map(|&v| {
            peak = peak.max(v);
            if peak > 0.0 {
                v / peak - 1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Maximum drawdown as a non-positive fraction.
pub fn max_drawdown(values: &[f64]) -> f64 {
    drawdown_series(values)
        .into_iter()
        .fold(0.0, f64::min)
}

/// Compound annual growth rate from the value path.
pub fn cagr(values: &[f64], annualization_factor: f64) -> f64 {
    let periods = values.len().saturating_sub(1);
    match (values.first(), values.last()) {
        (Some(&first), Some(&last)) if periods > 0 && first > 0.0 && last > 0.0 => {
            (last / first).powf(annualization_factor / periods as f64) - 1.0
        }
        _ => 0.0,
    }
}

/// Quantile with linear interpolation between order statistics.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Tail statistics and win/loss breakdown of a return series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TailMetrics {
    pub win_rate: f64,
    pub best_period: f64,
    pub worst_period: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub var_95: f64,
    pub cvar_95: f64,
}

impl TailMetrics {
    pub fn compute(returns: &[f64]) -> Self {
        if returns.is_empty() {
            return Self::default();
        }

        let wins: Vec<f64> = returns.iter().filter(|&&r| r > 0.0).copied().collect();
        let losses: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).copied().collect();
        let loss_sum: f64 = losses.iter().sum();

        let var_95 = quantile(returns, 0.05);
        let tail: Vec<f64> = returns.iter().filter(|&&r| r <= var_95).copied().collect();

        Self {
            win_rate: wins.len() as f64 / returns.len() as f64,
            best_period: returns.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            worst_period: returns.iter().copied().fold(f64::INFINITY, f64::min),
            avg_win: mean(&wins),
            avg_loss: mean(&losses),
            profit_factor: if loss_sum != 0.0 {
                wins.iter().sum::<f64>() / loss_sum.abs()
            } else {
                0.0
            },
            var_95,
            cvar_95: mean(&tail),
        }
    }
}

/// Drawdown-based pain statistics of a value path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawdownMetrics {
    pub max_drawdown: f64,
    /// Root mean square drawdown.
    pub ulcer_index: f64,
    /// Mean absolute drawdown.
    pub pain_index: f64,
}

impl DrawdownMetrics {
    pub fn compute(values: &[f64]) -> Self {
        let dd = drawdown_series(values);
        if dd.is_empty() {
            return Self::default();
        }
        Self {
            max_drawdown: dd.iter().copied().fold(0.0, f64::min),
            ulcer_index: (dd.iter().map(|d| d * d).sum::<f64>() / dd.len() as f64).sqrt(),
            pain_index: mean(&dd).abs(),
        }
    }
}

/// `numerator / |max_drawdown|`, or 0 without a drawdown.
pub fn drawdown_ratio(numerator: f64, max_drawdown: f64) -> f64 {
    if max_drawdown != 0.0 {
        numerator / max_drawdown.abs()
    } else {
        0.0
    }
}
