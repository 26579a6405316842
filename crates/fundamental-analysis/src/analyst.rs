use analysis_core::FundamentalSnapshot;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Raw analyst fields the scorer consumes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalystInputs {
    pub target_upside_pct: Option<f64>,
    /// 1 = Strong Buy .. 5 = Sell
    pub recommendation_mean: Option<f64>,
    pub analyst_count: Option<u32>,
    pub upgrades_30d: u32,
    pub downgrades_30d: u32,
}

impl From<&FundamentalSnapshot> for AnalystInputs {
    fn from(s: &FundamentalSnapshot) -> Self {
        Self {
            target_upside_pct: s.analyst_target_upside_pct,
            recommendation_mean: s.analyst_recommendation_mean,
            analyst_count: s.analyst_count,
            upgrades_30d: s.recent_upgrades_30d,
            downgrades_30d: s.recent_downgrades_30d,
        }
    }
}

/// Analyst sub-scores, their blend, and the score multiplier it maps to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystMultiplier {
    pub upside_score: f64,
    pub sentiment_score: f64,
    pub momentum_score: f64,
    pub coverage_score: f64,
    pub composite_score: f64,
    pub multiplier: f64,
    pub analyst_count: u32,
    pub net_upgrades: i64,
    /// False when coverage was below the minimum and the neutral result was returned
    pub has_coverage: bool,
}

/// Converts analyst coverage into a bounded score multiplier.
///
/// Weights are normalized on construction, so only their ratios matter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystScoring {
    pub weight_upside: f64,
    pub weight_sentiment: f64,
    pub weight_momentum: f64,
    pub weight_coverage: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    pub min_analyst_count: u32,
}

impl Default for AnalystScoring {
    fn default() -> Self {
        Self {
            weight_upside: 0.35,
            weight_sentiment: 0.30,
            weight_momentum: 0.20,
            weight_coverage: 0.15,
            min_multiplier: 0.8,
            max_multiplier: 1.2,
            min_analyst_count: 3,
        }
    }
}

impl AnalystScoring {
    pub fn new(
        weights: [f64; 4],
        min_multiplier: f64,
        max_multiplier: f64,
        min_analyst_count: u32,
    ) -> Result<Self> {
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            bail!("analyst weights must be finite and non-negative");
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            bail!("analyst weights must not all be zero");
        }
        if min_multiplier <= 0.0 || min_multiplier > 1.0 {
            bail!("min_multiplier must be in (0, 1]");
        }
        if max_multiplier < 1.0 {
            bail!("max_multiplier must be >= 1");
        }

        Ok(Self {
            weight_upside: weights[0] / total,
            weight_sentiment: weights[1] / total,
            weight_momentum: weights[2] / total,
            weight_coverage: weights[3] / total,
            min_multiplier,
            max_multiplier,
            min_analyst_count,
        })
    }

    fn normalized_weights(&self) -> [f64; 4] {
        let raw = [
            self.weight_upside,
            self.weight_sentiment,
            self.weight_momentum,
            self.weight_coverage,
        ];
        let total: f64 = raw.iter().sum();
        if total <= 0.0 {
            return [0.25; 4];
        }
        raw.map(|w| w / total)
    }

    pub fn calculate(&self, inputs: &AnalystInputs) -> AnalystMultiplier {
        let count = inputs.analyst_count.unwrap_or(0);
        let net_upgrades = inputs.upgrades_30d as i64 - inputs.downgrades_30d as i64;

        // Below minimum coverage: neutral result
        if count < self.min_analyst_count {
            return AnalystMultiplier {
                upside_score: 50.0,
                sentiment_score: 50.0,
                momentum_score: 50.0,
                coverage_score: 0.0,
                composite_score: 50.0,
                multiplier: 1.0,
                analyst_count: count,
                net_upgrades,
                has_coverage: false,
            };
        }

        let upside = upside_score(inputs.target_upside_pct);
        let sentiment = sentiment_score(inputs.recommendation_mean);
        let momentum = momentum_score(net_upgrades);
        let coverage = coverage_score(count);

        let [wu, ws, wm, wc] = self.normalized_weights();
        let composite = (upside * wu + sentiment * ws + momentum * wm + coverage * wc).clamp(0.0, 100.0);

        AnalystMultiplier {
            upside_score: upside,
            sentiment_score: sentiment,
            momentum_score: momentum,
            coverage_score: coverage,
            composite_score: composite,
            multiplier: self.score_to_multiplier(composite),
            analyst_count: count,
            net_upgrades,
            has_coverage: true,
        }
    }

    pub fn calculate_from_fundamentals(&self, snapshot: &FundamentalSnapshot) -> AnalystMultiplier {
        self.calculate(&AnalystInputs::from(snapshot))
    }

    /// 50 maps to 1.0; 100 to `max_multiplier`; 0 to `min_multiplier`.
    pub fn score_to_multiplier(&self, score: f64) -> f64 {
        let normalized = (score - 50.0) / 50.0;
        let multiplier = if normalized >= 0.0 {
            1.0 + normalized * (self.max_multiplier - 1.0)
        } else {
            1.0 + normalized * (1.0 - self.min_multiplier)
        };
        multiplier.clamp(self.min_multiplier, self.max_multiplier)
    }
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

/// Price-target upside: >=50% -> 100, 0..50% -> 50..100, -20..0% -> 0..50.
pub fn upside_score(upside_pct: Option<f64>) -> f64 {
    match finite(upside_pct) {
        None => 50.0,
        Some(u) if u >= 50.0 => 100.0,
        Some(u) if u >= 0.0 => 50.0 + u,
        Some(u) => (50.0 + u / 20.0 * 50.0).max(0.0),
    }
}

/// Recommendation mean clamped to [1, 5]; 1 -> 100, 5 -> 0.
pub fn sentiment_score(recommendation_mean: Option<f64>) -> f64 {
    match finite(recommendation_mean) {
        None => 50.0,
        Some(r) => 100.0 - (r.clamp(1.0, 5.0) - 1.0) / 4.0 * 100.0,
    }
}

/// Net upgrades clamped to [-3, 3]; -3 -> 0, 0 -> 50, 3 -> 100.
pub fn momentum_score(net_upgrades: i64) -> f64 {
    let net = net_upgrades.clamp(-3, 3) as f64;
    50.0 + net / 3.0 * 50.0
}

pub fn coverage_score(analyst_count: u32) -> f64 {
    let n = analyst_count as f64;
    match analyst_count {
        c if c >= 20 => 100.0,
        c if c >= 10 => 75.0 + (n - 10.0) / 10.0 * 25.0,
        c if c >= 5 => 50.0 + (n - 5.0) / 5.0 * 25.0,
        c if c >= 3 => 25.0 + (n - 3.0) / 2.0 * 25.0,
        _ => 0.0,
    }
}
