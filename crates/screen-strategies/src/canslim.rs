//! Growth screen built on earnings acceleration, price leadership and sponsorship.

use crate::strategy::{with_need, Checklist, CriterionWeight, ScreenStrategy};
use analysis_core::{FundamentalSnapshot, StrategyVerdict, TechnicalSnapshot};
use serde::{Deserialize, Serialize};

const WEIGHTS: &[CriterionWeight] = &[
    ("current_earnings", 0.20),
    ("annual_earnings", 0.20),
    ("near_high", 0.15),
    ("volume_surge", 0.15),
    ("relative_strength", 0.20),
    ("institutional", 0.10),
];

/// Growth rates and ownership are fractions (0.25 = 25%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanslimConfig {
    pub min_eps_growth_qtrly: f64,
    pub min_eps_growth_annual: f64,
    /// Percent below the 52-week high, negative
    pub pct_from_52w_high: f64,
    pub min_volume_surge: f64,
    pub min_rs_rating: f64,
    pub min_institutional_ownership: f64,
}

impl Default for CanslimConfig {
    fn default() -> Self {
        Self {
            min_eps_growth_qtrly: 0.25,
            min_eps_growth_annual: 0.25,
            pct_from_52w_high: -15.0,
            min_volume_surge: 1.5,
            min_rs_rating: 70.0,
            min_institutional_ownership: 0.10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CanslimStrategy {
    config: CanslimConfig,
}

impl CanslimStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CanslimConfig) -> Self {
        Self { config }
    }
}

impl ScreenStrategy for CanslimStrategy {
    fn name(&self) -> &'static str {
        "canslim"
    }

    fn description(&self) -> &'static str {
        "Earnings growth leaders trading near highs with volume and institutional support"
    }

    fn weights(&self) -> &'static [CriterionWeight] {
        WEIGHTS
    }

    fn config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }

    fn pass_threshold(&self) -> f64 {
        70.0
    }

    fn evaluate(
        &self,
        ticker: &str,
        f: &FundamentalSnapshot,
        _technicals: &TechnicalSnapshot,
    ) -> StrategyVerdict {
        let c = &self.config;
        let mut list = Checklist::new();

        // Growth, ownership: a missing figure fails without a note
        match f.earnings_growth_qtrly {
            Some(g) => {
                let ok = g >= c.min_eps_growth_qtrly;
                let note = with_need(format!("EPS growth Q/Q: {:.1}%", g * 100.0), ok, || {
                    format!("{}%+", c.min_eps_growth_qtrly * 100.0)
                });
                list.check("current_earnings", ok, Some(note));
            }
            None => list.check("current_earnings", false, None),
        }

        match f.earnings_growth_annual {
            Some(g) => {
                let ok = g >= c.min_eps_growth_annual;
                let note = with_need(format!("EPS growth annual: {:.1}%", g * 100.0), ok, || {
                    format!("{}%+", c.min_eps_growth_annual * 100.0)
                });
                list.check("annual_earnings", ok, Some(note));
            }
            None => list.check("annual_earnings", false, None),
        }

        let ok = f.pct_from_52w_high >= c.pct_from_52w_high;
        let note = with_need(format!("Price {:.1}% from 52w high", f.pct_from_52w_high), ok, || {
            format!(">={}%", c.pct_from_52w_high)
        });
        list.check("near_high", ok, Some(note));

        let ok = f.volume_surge_ratio >= c.min_volume_surge;
        let note = with_need(format!("Volume {:.1}x average", f.volume_surge_ratio), ok, || {
            format!("{}x+", c.min_volume_surge)
        });
        list.check("volume_surge", ok, Some(note));

        match f.rs_rating {
            Some(rs) => {
                let ok = rs >= c.min_rs_rating;
                let note = with_need(format!("RS Rating: {:.0}", rs), ok, || format!("{}+", c.min_rs_rating));
                list.check("relative_strength", ok, Some(note));
            }
            None => list.check("relative_strength", false, None),
        }

        match f.institutional_ownership {
            Some(own) => {
                let ok = own >= c.min_institutional_ownership;
                let note = with_need(format!("Institutional: {:.1}%", own * 100.0), ok, || {
                    format!("{}%+", c.min_institutional_ownership * 100.0)
                });
                list.check("institutional", ok, Some(note));
            }
            None => list.check("institutional", false, None),
        }

        list.into_verdict(ticker, self)
    }
}
