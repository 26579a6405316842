use analysis_core::{Bar, RegimeLabel, ScreenError, VolatilityRegime};
use anyhow::{bail, Result};
use tracing::debug;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use technical_analysis::{atr_series, AtrMethod};

/// Upper percentile bound of each regime, in priority order.
///
/// Bounds are strictly increasing and the last one is 100, so together they
/// partition [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeThresholds {
    pub low: f64,
    pub normal: f64,
    pub elevated: f64,
    pub extreme: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            low: 25.0,
            normal: 75.0,
            elevated: 90.0,
            extreme: 100.0,
        }
    }
}

impl RegimeThresholds {
    pub fn new(low: f64, normal: f64, elevated: f64, extreme: f64) -> Result<Self> {
        let bounds = [low, normal, elevated, extreme];
        if bounds.iter().any(|b| !(0.0..=100.0).contains(b)) {
            bail!("regime thresholds must lie within [0, 100]");
        }
        if bounds.windows(2).any(|w| w[0] >= w[1]) {
            bail!("regime thresholds must be strictly increasing");
        }
        if extreme != 100.0 {
            bail!("extreme threshold must be 100 so every percentile has a label");
        }
        Ok(Self { low, normal, elevated, extreme })
    }

    pub fn upper_bound(&self, label: RegimeLabel) -> f64 {
        match label {
            RegimeLabel::Low => self.low,
            RegimeLabel::Normal => self.normal,
            RegimeLabel::Elevated => self.elevated,
            RegimeLabel::Extreme => self.extreme,
        }
    }
}

/// First label whose upper bound is >= `percentile`.
pub fn classify_regime(percentile: f64, thresholds: &RegimeThresholds) -> RegimeLabel {
    RegimeLabel::ALL
        .into_iter()
        .find(|label| percentile <= thresholds.upper_bound(*label))
        .unwrap_or(RegimeLabel::Extreme)
}

/// Rank the latest Wilder ATR against its trailing `lookback_days` values.
pub fn volatility_regime(
    bars: &[Bar],
    atr_period: usize,
    lookback_days: usize,
    thresholds: &RegimeThresholds,
) -> Result<VolatilityRegime, ScreenError> {
    let series: Vec<f64> = atr_series(bars, atr_period, AtrMethod::Wilder)?
        .into_iter()
        .filter(|v| !v.is_nan())
        .collect();

    let start = series.len().saturating_sub(lookback_days.max(1));
    let history = &series[start..];
    let current_atr = *history
        .last()
        .ok_or_else(|| ScreenError::InsufficientData("empty ATR history".to_string()))?;

    let n = history.len();
    let below = history.iter().filter(|v| **v < current_atr).count();
    let percentile = below as f64 / n as f64 * 100.0;

    let historical_mean = history.mean();
    // Sample standard deviation; undefined for a single value.
    let historical_std = if n > 1 { history.std_dev() } else { 0.0 };
    let z_score = if historical_std > 0.0 {
        (current_atr - historical_mean) / historical_std
    } else {
        0.0
    };

    let label = classify_regime(percentile, thresholds);
    debug!(
        "ATR {:.4} at {:.1} percentile over {} values -> {}",
        current_atr, percentile, n, label
    );

    Ok(VolatilityRegime {
        current_atr,
        historical_mean,
        historical_std,
        percentile,
        z_score,
        label,
        lookback_days: n,
    })
}

/// Volatility regime detector with fixed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityRegimeDetector {
    pub atr_period: usize,
    pub lookback_days: usize,
    pub thresholds: RegimeThresholds,
}

impl Default for VolatilityRegimeDetector {
    fn default() -> Self {
        Self {
            atr_period: 14,
            lookback_days: 252,
            thresholds: RegimeThresholds::default(),
        }
    }
}

impl VolatilityRegimeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(mut self, thresholds: RegimeThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn detect(&self, bars: &[Bar]) -> Result<VolatilityRegime, ScreenError> {
        volatility_regime(bars, self.atr_period, self.lookback_days, &self.thresholds)
    }
}
