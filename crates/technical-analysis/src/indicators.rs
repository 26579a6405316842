use analysis_core::{Bar, ScreenError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    let mut sum: f64 = data[..period].iter().sum();
    result.push(sum / period as f64);
    for i in period..data.len() {
        sum += data[i] - data[i - period];
        result.push(sum / period as f64);
    }
    result
}

/// Mean of the last `period` values, or None if there are fewer.
pub fn trailing_mean(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period {
        return None;
    }
    Some(data[data.len() - period..].iter().sum::<f64>() / period as f64)
}

/// Exponential Moving Average, seeded with the first value (span = period).
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(data.len());
    let mut prev = data[0];
    result.push(prev);
    for &value in &data[1..] {
        prev = alpha * value + (1.0 - alpha) * prev;
        result.push(prev);
    }
    result
}

/// True Range per bar. The first bar has no previous close and is NaN.
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        if i == 0 {
            out.push(f64::NAN);
            continue;
        }
        let prev_close = bars[i - 1].close;
        let high_low = bar.high - bar.low;
        let high_close = (bar.high - prev_close).abs();
        let low_close = (bar.low - prev_close).abs();
        out.push(high_low.max(high_close).max(low_close));
    }
    out
}

/// ATR smoothing method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtrMethod {
    #[default]
    Wilder,
    Sma,
    Ema,
}

impl AtrMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AtrMethod::Wilder => "wilder",
            AtrMethod::Sma => "sma",
            AtrMethod::Ema => "ema",
        }
    }
}

impl fmt::Display for AtrMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AtrMethod {
    type Err = ScreenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wilder" => Ok(AtrMethod::Wilder),
            "sma" => Ok(AtrMethod::Sma),
            "ema" => Ok(AtrMethod::Ema),
            other => Err(ScreenError::InvalidConfig(format!(
                "unknown ATR method '{}', use wilder, sma or ema",
                other
            ))),
        }
    }
}

/// Latest ATR plus context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtrResult {
    pub current_atr: f64,
    /// Current ATR as a percentage of the last close
    pub atr_pct: f64,
    pub period: usize,
    pub method: AtrMethod,
}

fn check_atr_input(bars: &[Bar], period: usize) -> Result<(), ScreenError> {
    if period == 0 {
        return Err(ScreenError::InvalidConfig("ATR period must be positive".to_string()));
    }
    if bars.len() < period + 1 {
        return Err(ScreenError::InsufficientData(format!(
            "ATR({}) needs at least {} bars, got {}",
            period,
            period + 1,
            bars.len()
        )));
    }
    Ok(())
}

/// ATR series aligned with `bars`. Positions without a value are NaN.
pub fn atr_series(bars: &[Bar], period: usize, method: AtrMethod) -> Result<Vec<f64>, ScreenError> {
    check_atr_input(bars, period)?;

    let tr = true_range(bars);
    let mut out = vec![f64::NAN; bars.len()];
    let p = period as f64;

    match method {
        AtrMethod::Wilder => {
            // Seeded with the mean of the first `period` true ranges, then
            // smoothed sequentially.
            let mut atr = tr[1..=period].iter().sum::<f64>() / p;
            out[period] = atr;
            for i in period + 1..tr.len() {
                atr = ((p - 1.0) * atr + tr[i]) / p;
                out[i] = atr;
            }
        }
        AtrMethod::Sma => {
            for (offset, value) in sma(&tr[1..], period).into_iter().enumerate() {
                out[offset + period] = value;
            }
        }
        AtrMethod::Ema => {
            for (offset, value) in ema(&tr[1..], period).into_iter().enumerate() {
                out[offset + 1] = value;
            }
        }
    }

    Ok(out)
}

/// Most recent ATR value
pub fn atr(bars: &[Bar], period: usize, method: AtrMethod) -> Result<AtrResult, ScreenError> {
    let series = atr_series(bars, period, method)?;
    let current_atr = series
        .iter()
        .rev()
        .find(|v| !v.is_nan())
        .copied()
        .ok_or_else(|| ScreenError::InsufficientData(format!("no ATR({}) value", period)))?;

    let last_close = bars.last().map(|b| b.close).unwrap_or(0.0);
    let atr_pct = if last_close > 0.0 { current_atr / last_close * 100.0 } else { 0.0 };

    Ok(AtrResult {
        current_atr,
        atr_pct,
        period,
        method,
    })
}

/// Highest high over the last `period` bars
pub fn highest_high(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.is_empty() {
        return None;
    }
    let start = bars.len().saturating_sub(period);
    bars[start..].iter().map(|b| b.high).reduce(f64::max)
}
