//! Momentum screen for wide-range, high-beta names.

use crate::strategy::{with_need, Checklist, CriterionWeight, ScreenStrategy};
use analysis_core::{FundamentalSnapshot, StrategyVerdict, TechnicalSnapshot};
use serde::{Deserialize, Serialize};

const WEIGHTS: &[CriterionWeight] = &[
    ("high_atr", 0.30),
    ("volume_surge", 0.20),
    ("momentum", 0.25),
    ("above_ma", 0.15),
    ("high_beta", 0.10),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighVolatilityConfig {
    /// Used when a volatility regime is attached to the technicals
    pub min_atr_percentile: f64,
    /// ATR as percent of price, used otherwise
    pub min_atr_pct: f64,
    pub min_volume_surge: f64,
    pub min_momentum_3m: f64,
    pub min_beta: f64,
}

impl Default for HighVolatilityConfig {
    fn default() -> Self {
        Self {
            min_atr_percentile: 75.0,
            min_atr_pct: 5.0,
            min_volume_surge: 1.3,
            min_momentum_3m: 10.0,
            min_beta: 1.2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HighVolatilityStrategy {
    config: HighVolatilityConfig,
}

impl HighVolatilityStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HighVolatilityConfig) -> Self {
        Self { config }
    }
}

impl ScreenStrategy for HighVolatilityStrategy {
    fn name(&self) -> &'static str {
        "high_volatility"
    }

    fn description(&self) -> &'static str {
        "Volatile, high-beta stocks with volume and 3-month momentum"
    }

    fn weights(&self) -> &'static [CriterionWeight] {
        WEIGHTS
    }

    fn config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }

    fn pass_threshold(&self) -> f64 {
        65.0
    }

    fn evaluate(
        &self,
        ticker: &str,
        f: &FundamentalSnapshot,
        technicals: &TechnicalSnapshot,
    ) -> StrategyVerdict {
        let c = &self.config;
        let mut list = Checklist::new();

        if let Some(regime) = &technicals.regime {
            let ok = regime.percentile >= c.min_atr_percentile;
            let note = with_need(
                format!("ATR percentile: {:.0} ({})", regime.percentile, regime.label),
                ok,
                || format!("{}+", c.min_atr_percentile),
            );
            list.check("high_atr", ok, Some(note));
        } else {
            match f.atr_pct() {
                Some(atr_pct) => {
                    let ok = atr_pct >= c.min_atr_pct;
                    let note = if ok {
                        format!("ATR: {:.1}% of price", atr_pct)
                    } else {
                        format!("ATR: {:.1}% (needs >{}%)", atr_pct, c.min_atr_pct)
                    };
                    list.check("high_atr", ok, Some(note));
                }
                None => list.check("high_atr", false, None),
            }
        }

        let ok = f.volume_surge_ratio >= c.min_volume_surge;
        let note = with_need(format!("Vol: {:.1}x avg", f.volume_surge_ratio), ok, || {
            format!("{}x+", c.min_volume_surge)
        });
        list.check("volume_surge", ok, Some(note));

        let momentum = f.momentum_3m.unwrap_or(-100.0);
        let ok = momentum >= c.min_momentum_3m;
        let note = if ok {
            format!("3M momentum: +{:.1}%", momentum)
        } else {
            format!("3M momentum: {:+.1}% (needs +{}%)", momentum, c.min_momentum_3m)
        };
        list.check("momentum", ok, Some(note));

        let ok = f.price_vs_ma_50.unwrap_or(-100.0) > 0.0;
        let note = if ok { "Above MA50" } else { "Below MA50" };
        list.check("above_ma", ok, Some(note.to_string()));

        match f.beta {
            Some(beta) => {
                let ok = beta >= c.min_beta;
                let note = with_need(format!("Beta: {:.2}", beta), ok, || format!("{}+", c.min_beta));
                list.check("high_beta", ok, Some(note));
            }
            None => list.check("high_beta", false, None),
        }

        list.into_verdict(ticker, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{RegimeLabel, VolatilityRegime};
    use approx::assert_relative_eq;

    fn mover() -> FundamentalSnapshot {
        FundamentalSnapshot {
            ticker: "TSLA".to_string(),
            current_price: 200.0,
            atr_14: Some(12.0),
            volume_surge_ratio: 1.8,
            momentum_3m: Some(22.0),
            price_vs_ma_50: Some(6.0),
            beta: Some(2.1),
            ..Default::default()
        }
    }

    fn regime(percentile: f64) -> VolatilityRegime {
        VolatilityRegime {
            current_atr: 12.0,
            historical_mean: 9.0,
            historical_std: 2.0,
            percentile,
            z_score: 1.5,
            label: RegimeLabel::Elevated,
            lookback_days: 252,
        }
    }

    #[test]
    fn test_atr_pct_proxy() {
        let v = HighVolatilityStrategy::new().evaluate("TSLA", &mover(), &TechnicalSnapshot::default());
        assert_relative_eq!(v.score, 100.0, epsilon = 1e-9);
        assert!(v.rationale.starts_with("ATR: 6.0% of price"));

        let calm = FundamentalSnapshot { atr_14: Some(4.0), ..mover() };
        let v = HighVolatilityStrategy::new().evaluate("TSLA", &calm, &TechnicalSnapshot::default());
        assert!(v.rationale.contains("ATR: 2.0% (needs >5%)"));
        assert_relative_eq!(v.score, 70.0, epsilon = 1e-9);
        assert!(v.passed);
    }

    #[test]
    fn test_regime_percentile_overrides_proxy() {
        let tech = TechnicalSnapshot { regime: Some(regime(40.0)) };
        let v = HighVolatilityStrategy::new().evaluate("TSLA", &mover(), &tech);
        assert!(v.failed_criteria.contains(&"high_atr".to_string()));

        let tech = TechnicalSnapshot { regime: Some(regime(88.0)) };
        let v = HighVolatilityStrategy::new().evaluate("TSLA", &mover(), &tech);
        assert!(v.passed_criteria.contains(&"high_atr".to_string()));
        assert!(v.rationale.starts_with("ATR percentile: 88 (elevated)"));
    }

    #[test]
    fn test_missing_inputs_fail() {
        let snap = FundamentalSnapshot {
            ticker: "NEW".to_string(),
            current_price: 10.0,
            ..Default::default()
        };
        let v = HighVolatilityStrategy::new().evaluate("NEW", &snap, &TechnicalSnapshot::default());
        assert_relative_eq!(v.score, 0.0);
        assert!(!v.passed);
        assert!(v.rationale.contains("3M momentum: -100.0% (needs +10%)"));
        assert!(v.rationale.contains("Below MA50"));
        assert!(!v.rationale.contains("Beta"));
    }

    #[test]
    fn test_exactly_at_threshold_passes() {
        let snap = FundamentalSnapshot { momentum_3m: Some(2.0), beta: Some(0.8), ..mover() };
        let v = HighVolatilityStrategy::new().evaluate("EDGE", &snap, &TechnicalSnapshot::default());
        assert_eq!(v.failed_criteria, vec!["momentum", "high_beta"]);
        assert_eq!(v.score, 65.0);
        assert!(v.passed);
    }
}
