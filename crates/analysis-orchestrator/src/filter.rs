use analysis_core::{FundamentalSnapshot, MarketCapCategory};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Liquidity, size and sector screen applied before strategies run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseFilter {
    pub min_price: f64,
    /// Applied to the 50-day average volume
    pub min_volume: f64,
    pub min_market_cap: Option<f64>,
    pub max_market_cap: Option<f64>,
    pub cap_categories: Option<Vec<MarketCapCategory>>,
    /// Include lists win over the matching exclude list
    pub sectors: Option<Vec<String>>,
    pub exclude_sectors: Vec<String>,
    pub industries: Option<Vec<String>>,
    pub exclude_industries: Vec<String>,
}

impl Default for UniverseFilter {
    fn default() -> Self {
        Self {
            min_price: 5.0,
            min_volume: 500_000.0,
            min_market_cap: None,
            max_market_cap: None,
            cap_categories: None,
            sectors: None,
            exclude_sectors: Vec::new(),
            industries: None,
            exclude_industries: Vec::new(),
        }
    }
}

fn contains_ci(list: &[String], value: Option<&str>) -> bool {
    match value {
        Some(v) => list.iter().any(|item| item.eq_ignore_ascii_case(v.trim())),
        None => false,
    }
}

/// Include list when given, otherwise the exclude list.
fn passes_lists(include: Option<&[String]>, exclude: &[String], value: Option<&str>) -> bool {
    match include {
        Some(include) if !include.is_empty() => contains_ci(include, value),
        _ => !contains_ci(exclude, value),
    }
}

impl UniverseFilter {
    pub fn new(min_price: f64, min_volume: f64) -> Self {
        Self { min_price, min_volume, ..Default::default() }
    }

    pub fn accepts(&self, data: &FundamentalSnapshot) -> bool {
        if data.current_price < self.min_price || data.avg_volume_50d < self.min_volume {
            return false;
        }

        // Size filters only apply when the market cap is known
        if let Some(cap) = data.market_cap {
            if self.min_market_cap.is_some_and(|min| cap < min) {
                return false;
            }
            if self.max_market_cap.is_some_and(|max| cap > max) {
                return false;
            }
        }
        if let (Some(allowed), Some(category)) = (&self.cap_categories, data.market_cap_category()) {
            if !allowed.is_empty() && !allowed.contains(&category) {
                return false;
            }
        }

        passes_lists(self.sectors.as_deref(), &self.exclude_sectors, data.sector.as_deref())
            && passes_lists(self.industries.as_deref(), &self.exclude_industries, data.industry.as_deref())
    }

    /// Tickers (in input order) whose snapshot passes. Tickers without a snapshot are dropped.
    pub fn filter_tickers(&self, tickers: &[String], fundamentals: &DashMap<String, FundamentalSnapshot>) -> Vec<String> {
        tickers
            .iter()
            .filter(|t| fundamentals.get(t.as_str()).is_some_and(|data| self.accepts(&data)))
            .cloned()
            .collect()
    }
}
