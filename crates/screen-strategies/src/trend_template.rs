//! Stage-two uptrend screen: price stacked above rising moving averages.

use crate::strategy::{with_need, Checklist, CriterionWeight, ScreenStrategy};
use analysis_core::{FundamentalSnapshot, StrategyVerdict, TechnicalSnapshot};
use serde::{Deserialize, Serialize};

const WEIGHTS: &[CriterionWeight] = &[
    ("above_mas", 0.25),
    ("ma_alignment", 0.20),
    ("above_52w_low", 0.15),
    ("near_52w_high", 0.10),
    ("relative_strength", 0.20),
    ("tight_consolidation", 0.10),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendTemplateConfig {
    pub min_pct_above_52w_low: f64,
    /// Most negative distance from the 52-week high still accepted
    pub max_pct_from_52w_high: f64,
    pub min_rs_rating: f64,
    /// Largest ATR as percent of price
    pub max_consolidation_volatility: f64,
}

impl Default for TrendTemplateConfig {
    fn default() -> Self {
        Self {
            min_pct_above_52w_low: 30.0,
            max_pct_from_52w_high: -25.0,
            min_rs_rating: 70.0,
            max_consolidation_volatility: 20.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrendTemplateStrategy {
    config: TrendTemplateConfig,
}

impl TrendTemplateStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TrendTemplateConfig) -> Self {
        Self { config }
    }
}

fn mark(ok: bool) -> char {
    if ok {
        '✓'
    } else {
        '✗'
    }
}

impl ScreenStrategy for TrendTemplateStrategy {
    fn name(&self) -> &'static str {
        "trend_template"
    }

    fn description(&self) -> &'static str {
        "Uptrending stocks above aligned 50/150/200-day averages near their highs"
    }

    fn weights(&self) -> &'static [CriterionWeight] {
        WEIGHTS
    }

    fn config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }

    fn pass_threshold(&self) -> f64 {
        75.0
    }

    fn evaluate(
        &self,
        ticker: &str,
        f: &FundamentalSnapshot,
        _technicals: &TechnicalSnapshot,
    ) -> StrategyVerdict {
        let c = &self.config;
        let mut list = Checklist::new();

        let above = |v: Option<f64>| v.unwrap_or(-100.0) > 0.0;
        let (a50, a150, a200) = (above(f.price_vs_ma_50), above(f.price_vs_ma_150), above(f.price_vs_ma_200));
        let ok = a50 && a150 && a200;
        let note = if ok {
            "Price above all MAs".to_string()
        } else {
            format!("Price MA: 50{} 150{} 200{}", mark(a50), mark(a150), mark(a200))
        };
        list.check("above_mas", ok, Some(note));

        let ok = f.ma_50_above_ma_150 && f.ma_50_above_ma_200 && f.ma_150_above_ma_200;
        let note = if ok { "MA alignment: 50>150>200" } else { "MA alignment not ideal" };
        list.check("ma_alignment", ok, Some(note.to_string()));

        let ok = f.pct_from_52w_low >= c.min_pct_above_52w_low;
        let note = with_need(format!("+{:.0}% from 52w low", f.pct_from_52w_low), ok, || {
            format!("+{}%", c.min_pct_above_52w_low)
        });
        list.check("above_52w_low", ok, Some(note));

        let ok = f.pct_from_52w_high >= c.max_pct_from_52w_high;
        let mut note = format!("{:.1}% from 52w high", f.pct_from_52w_high);
        if !ok {
            note.push_str(" (too far)");
        }
        list.check("near_52w_high", ok, Some(note));

        match f.rs_rating {
            Some(rs) => {
                let ok = rs >= c.min_rs_rating;
                let note = with_need(format!("RS: {:.0}", rs), ok, || format!("{}+", c.min_rs_rating));
                list.check("relative_strength", ok, Some(note));
            }
            None => list.check("relative_strength", false, None),
        }

        match f.atr_pct() {
            Some(atr_pct) => {
                let ok = atr_pct <= c.max_consolidation_volatility;
                let mut note = format!("ATR: {:.1}%", atr_pct);
                if !ok {
                    note.push_str(" (too volatile)");
                }
                list.check("tight_consolidation", ok, Some(note));
            }
            None => list.check("tight_consolidation", false, None),
        }

        list.into_verdict(ticker, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn uptrend() -> FundamentalSnapshot {
        FundamentalSnapshot {
            ticker: "MSFT".to_string(),
            current_price: 100.0,
            price_vs_ma_50: Some(4.0),
            price_vs_ma_150: Some(10.0),
            price_vs_ma_200: Some(15.0),
            ma_50_above_ma_150: true,
            ma_50_above_ma_200: true,
            ma_150_above_ma_200: true,
            pct_from_52w_low: 60.0,
            pct_from_52w_high: -8.0,
            rs_rating: Some(80.0),
            atr_14: Some(2.5),
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_uptrend_passes() {
        let v = TrendTemplateStrategy::new().evaluate("MSFT", &uptrend(), &TechnicalSnapshot::default());
        assert_relative_eq!(v.score, 100.0, epsilon = 1e-9);
        assert!(v.passed);
        assert!(v.rationale.starts_with("Price above all MAs | MA alignment: 50>150>200"));
        assert!(v.rationale.ends_with("ATR: 2.5%"));
    }

    #[test]
    fn test_missing_ma_counts_as_below() {
        let snap = FundamentalSnapshot { price_vs_ma_200: None, ..uptrend() };
        let v = TrendTemplateStrategy::new().evaluate("X", &snap, &TechnicalSnapshot::default());
        assert!(v.rationale.contains("Price MA: 50✓ 150✓ 200✗"));
        assert_relative_eq!(v.score, 75.0, epsilon = 1e-9);
        assert!(v.passed);
    }

    #[test]
    fn test_missing_atr_fails_consolidation() {
        let snap = FundamentalSnapshot { atr_14: None, ma_50_above_ma_200: false, ..uptrend() };
        let v = TrendTemplateStrategy::new().evaluate("X", &snap, &TechnicalSnapshot::default());
        assert_eq!(v.failed_criteria, vec!["ma_alignment", "tight_consolidation"]);
        assert_relative_eq!(v.score, 70.0, epsilon = 1e-9);
        assert!(!v.passed);
    }

    #[test]
    fn test_far_from_high() {
        let snap = FundamentalSnapshot { pct_from_52w_high: -40.0, ..uptrend() };
        let v = TrendTemplateStrategy::new().evaluate("X", &snap, &TechnicalSnapshot::default());
        assert!(v.rationale.contains("-40.0% from 52w high (too far)"));
    }

    #[test]
    fn test_exactly_at_threshold_passes() {
        let snap = FundamentalSnapshot { pct_from_52w_low: 10.0, atr_14: None, ..uptrend() };
        let v = TrendTemplateStrategy::new().evaluate("EDGE", &snap, &TechnicalSnapshot::default());
        assert_eq!(v.failed_criteria, vec!["above_52w_low", "tight_consolidation"]);
        assert_eq!(v.score, 75.0);
        assert!(v.passed);
    }
}
