use analysis_core::{Bar, RegimeLabel, ScreenError, TrailingStopResult, VolatilityRegime};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use technical_analysis::{atr, ema, highest_high, AtrMethod};

/// Which bars are searched for the stop's anchor high
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecentHighWindow {
    /// Last N bars
    Lookback(usize),
    /// Every bar on or after the entry date
    Since(NaiveDate),
}

/// Highest high (and its date) inside `window`.
pub fn find_recent_high(bars: &[Bar], window: RecentHighWindow) -> Result<(f64, NaiveDate), ScreenError> {
    let subset: &[Bar] = match window {
        RecentHighWindow::Lookback(n) => &bars[bars.len().saturating_sub(n)..],
        RecentHighWindow::Since(entry) => {
            let start = bars.iter().position(|b| b.date() >= entry).unwrap_or(bars.len());
            &bars[start..]
        }
    };

    // Ties keep the earliest bar
    let mut best: Option<&Bar> = None;
    for bar in subset {
        if best.map_or(true, |b| bar.high > b.high) {
            best = Some(bar);
        }
    }

    best.map(|b| (b.high, b.date())).ok_or_else(|| {
        ScreenError::EmptyRange(match window {
            RecentHighWindow::Lookback(n) => format!("no bars in the last {} days", n),
            RecentHighWindow::Since(d) => format!("no bars on or after {}", d),
        })
    })
}

/// Stop at `recent_high - multiplier * atr`.
///
/// A price already below the stop gives a negative distance and risk per
/// share; that is reported as-is.
pub fn compute_trailing_stop(
    current_price: f64,
    recent_high: f64,
    atr: f64,
    multiplier: f64,
) -> TrailingStopResult {
    let stop_level = recent_high - multiplier * atr;
    let stop_distance = current_price - stop_level;
    let stop_distance_pct = if current_price > 0.0 {
        stop_distance / current_price * 100.0
    } else {
        0.0
    };

    TrailingStopResult {
        ticker: None,
        current_price,
        recent_high,
        recent_high_date: None,
        atr,
        atr_period: 0,
        multiplier,
        stop_level,
        stop_distance,
        stop_distance_pct,
        risk_per_share: stop_distance,
    }
}

/// Whole shares affordable for a dollar risk amount. Zero when risk per share is not positive.
pub fn shares_for_risk(risk_dollars: f64, risk_per_share: f64) -> u64 {
    if risk_per_share <= 0.0 || risk_dollars <= 0.0 {
        return 0;
    }
    (risk_dollars / risk_per_share).floor() as u64
}

/// ATR multiplier per volatility regime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeAdjustments(pub BTreeMap<RegimeLabel, f64>);

impl Default for RegimeAdjustments {
    fn default() -> Self {
        Self(BTreeMap::from([
            (RegimeLabel::Low, 1.5),
            (RegimeLabel::Normal, 2.0),
            (RegimeLabel::Elevated, 2.5),
            (RegimeLabel::Extreme, 3.0),
        ]))
    }
}

impl RegimeAdjustments {
    pub fn get(&self, label: RegimeLabel) -> Option<f64> {
        self.0.get(&label).copied()
    }
}

/// Table lookup for the regime label, or `base_multiplier` when there is no entry.
pub fn regime_multiplier(
    regime: Option<&VolatilityRegime>,
    base_multiplier: f64,
    adjustments: &RegimeAdjustments,
) -> f64 {
    regime
        .and_then(|r| adjustments.get(r.label))
        .unwrap_or(base_multiplier)
}

/// Chandelier exit: highest high over `period` minus `multiplier` ATRs.
pub fn chandelier_exit(bars: &[Bar], period: usize, multiplier: f64) -> Result<f64, ScreenError> {
    let current_atr = atr(bars, period, AtrMethod::Wilder)?.current_atr;
    let high = highest_high(bars, period)
        .ok_or_else(|| ScreenError::EmptyRange(format!("no bars for chandelier({})", period)))?;
    Ok(high - multiplier * current_atr)
}

/// Keltner lower band: EMA of closes minus `multiplier` ATRs.
pub fn keltner_stop(bars: &[Bar], period: usize, multiplier: f64) -> Result<f64, ScreenError> {
    let current_atr = atr(bars, period, AtrMethod::Wilder)?.current_atr;
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let mid = ema(&closes, period)
        .last()
        .copied()
        .ok_or_else(|| ScreenError::InsufficientData("no closes for keltner stop".to_string()))?;
    Ok(mid - multiplier * current_atr)
}
