use analysis_core::{FundamentalSnapshot, StrategyVerdict, TechnicalSnapshot};

/// Criterion name and its weight in the score
pub type CriterionWeight = (&'static str, f64);

/// A screening strategy: a fixed set of weighted boolean criteria and a pass threshold.
pub trait ScreenStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn weights(&self) -> &'static [CriterionWeight];

    /// Criterion names in evaluation order
    fn criteria(&self) -> Vec<&'static str> {
        self.weights().iter().map(|(name, _)| *name).collect()
    }

    /// Thresholds and weights currently in effect
    fn config(&self) -> serde_json::Value;

    /// Minimum score (0-100) to pass
    fn pass_threshold(&self) -> f64;

    fn evaluate(
        &self,
        ticker: &str,
        fundamentals: &FundamentalSnapshot,
        technicals: &TechnicalSnapshot,
    ) -> StrategyVerdict;
}

/// Weighted pass ratio on a 0-100 scale, rounded to 2 decimals so a
/// ratio that lands exactly on a threshold compares equal to it.
///
/// Names not present in `weights` are ignored.
pub fn calculate_score<S: AsRef<str>>(passed: &[S], weights: &[CriterionWeight]) -> f64 {
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let earned: f64 = weights
        .iter()
        .filter(|(name, _)| passed.iter().any(|p| p.as_ref() == *name))
        .map(|(_, w)| w)
        .sum();
    (earned / total * 10_000.0).round() / 100.0
}

/// Collects criterion outcomes and notes while a strategy runs.
#[derive(Debug, Default)]
pub struct Checklist {
    passed: Vec<String>,
    failed: Vec<String>,
    notes: Vec<String>,
}

impl Checklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, criterion: &str, ok: bool, note: Option<String>) {
        if ok {
            self.passed.push(criterion.to_string());
        } else {
            self.failed.push(criterion.to_string());
        }
        if let Some(note) = note {
            self.notes.push(note);
        }
    }

    pub fn into_verdict(self, ticker: &str, strategy: &dyn ScreenStrategy) -> StrategyVerdict {
        let score = calculate_score(&self.passed, strategy.weights());
        StrategyVerdict {
            ticker: ticker.to_string(),
            strategy: strategy.name().to_string(),
            score,
            passed: score >= strategy.pass_threshold(),
            passed_criteria: self.passed,
            failed_criteria: self.failed,
            rationale: self.notes.join(" | "),
        }
    }
}

/// Append a "(needs ...)" hint when a criterion failed.
pub(crate) fn with_need(note: String, ok: bool, need: impl FnOnce() -> String) -> String {
    if ok {
        note
    } else {
        format!("{} (needs {})", note, need())
    }
}
