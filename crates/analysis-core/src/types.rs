use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OHLCV bar data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub vwap: Option<f64>,
}

impl Bar {
    /// Trading day this bar belongs to.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Number of trading days covered by a period string ("1mo", "6mo", "1y", ...).
pub fn period_to_days(period: &str) -> usize {
    match period {
        "5d" => 5,
        "1mo" => 21,
        "3mo" => 63,
        "6mo" => 126,
        "1y" => 252,
        "2y" => 504,
        "5y" => 1260,
        _ => 252,
    }
}

/// Market cap bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketCapCategory {
    Mega,
    Large,
    Mid,
    Small,
    Micro,
}

impl MarketCapCategory {
    pub fn from_market_cap(market_cap: f64) -> Self {
        if market_cap >= 200_000_000_000.0 {
            MarketCapCategory::Mega
        } else if market_cap >= 10_000_000_000.0 {
            MarketCapCategory::Large
        } else if market_cap >= 2_000_000_000.0 {
            MarketCapCategory::Mid
        } else if market_cap >= 300_000_000.0 {
            MarketCapCategory::Small
        } else {
            MarketCapCategory::Micro
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCapCategory::Mega => "mega",
            MarketCapCategory::Large => "large",
            MarketCapCategory::Mid => "mid",
            MarketCapCategory::Small => "small",
            MarketCapCategory::Micro => "micro",
        }
    }
}

impl fmt::Display for MarketCapCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketCapCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mega" => Ok(MarketCapCategory::Mega),
            "large" => Ok(MarketCapCategory::Large),
            "mid" => Ok(MarketCapCategory::Mid),
            "small" => Ok(MarketCapCategory::Small),
            "micro" => Ok(MarketCapCategory::Micro),
            other => Err(format!("unknown market cap category: {}", other)),
        }
    }
}

/// Raw analyst coverage as reported by the data source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalystCoverage {
    pub target_mean: Option<f64>,
    pub target_low: Option<f64>,
    pub target_high: Option<f64>,
    /// 1 = Strong Buy .. 5 = Sell
    pub recommendation_mean: Option<f64>,
    pub analyst_count: Option<u32>,
    #[serde(default)]
    pub upgrades_30d: u32,
    #[serde(default)]
    pub downgrades_30d: u32,
}

/// Company metadata and reported ratios
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub ticker: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub forward_pe: Option<f64>,
    pub peg_ratio: Option<f64>,
    pub earnings_growth_qtrly: Option<f64>,
    pub earnings_growth_annual: Option<f64>,
    pub revenue_growth_qtrly: Option<f64>,
    pub revenue_growth_annual: Option<f64>,
    pub profit_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub roe: Option<f64>,
    pub institutional_ownership: Option<f64>,
    pub beta: Option<f64>,
    #[serde(default)]
    pub analyst: AnalystCoverage,
}

/// Point-in-time fundamentals and derived price metrics for one ticker.
///
/// The market cap category is never stored: it is always derived from
/// `market_cap`, so the two cannot disagree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundamentalSnapshot {
    pub ticker: String,

    // Price
    pub current_price: f64,
    pub price_52w_high: f64,
    pub price_52w_low: f64,
    /// Negative when below the high
    pub pct_from_52w_high: f64,
    pub pct_from_52w_low: f64,

    // Volume
    pub avg_volume_10d: f64,
    pub avg_volume_50d: f64,
    pub volume_today: f64,
    pub volume_surge_ratio: f64,

    // Moving averages
    pub ma_50: Option<f64>,
    pub ma_150: Option<f64>,
    pub ma_200: Option<f64>,
    pub price_vs_ma_50: Option<f64>,
    pub price_vs_ma_150: Option<f64>,
    pub price_vs_ma_200: Option<f64>,
    pub ma_50_above_ma_150: bool,
    pub ma_50_above_ma_200: bool,
    pub ma_150_above_ma_200: bool,

    // Valuation and growth
    pub market_cap: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub forward_pe: Option<f64>,
    pub peg_ratio: Option<f64>,
    pub earnings_growth_qtrly: Option<f64>,
    pub earnings_growth_annual: Option<f64>,
    pub revenue_growth_qtrly: Option<f64>,
    pub revenue_growth_annual: Option<f64>,
    pub profit_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub roe: Option<f64>,
    pub institutional_ownership: Option<f64>,

    // Relative strength and momentum
    pub rs_rating: Option<f64>,
    pub momentum_3m: Option<f64>,
    pub momentum_6m: Option<f64>,

    // Volatility
    pub atr_14: Option<f64>,
    pub beta: Option<f64>,

    // Analyst
    pub analyst_target_mean: Option<f64>,
    pub analyst_target_low: Option<f64>,
    pub analyst_target_high: Option<f64>,
    pub analyst_target_upside_pct: Option<f64>,
    pub analyst_recommendation_mean: Option<f64>,
    pub analyst_count: Option<u32>,
    #[serde(default)]
    pub recent_upgrades_30d: u32,
    #[serde(default)]
    pub recent_downgrades_30d: u32,

    pub sector: Option<String>,
    pub industry: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl FundamentalSnapshot {
    pub fn market_cap_category(&self) -> Option<MarketCapCategory> {
        self.market_cap.map(MarketCapCategory::from_market_cap)
    }

    /// ATR(14) as a percentage of the current price
    pub fn atr_pct(&self) -> Option<f64> {
        match self.atr_14 {
            Some(atr) if self.current_price > 0.0 => Some(atr / self.current_price * 100.0),
            _ => None,
        }
    }
}

/// Volatility bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegimeLabel {
    Low,
    Normal,
    Elevated,
    Extreme,
}

impl RegimeLabel {
    pub const ALL: [RegimeLabel; 4] = [
        RegimeLabel::Low,
        RegimeLabel::Normal,
        RegimeLabel::Elevated,
        RegimeLabel::Extreme,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeLabel::Low => "low",
            RegimeLabel::Normal => "normal",
            RegimeLabel::Elevated => "elevated",
            RegimeLabel::Extreme => "extreme",
        }
    }
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current ATR ranked against its own trailing history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityRegime {
    pub current_atr: f64,
    pub historical_mean: f64,
    pub historical_std: f64,
    /// 0-100
    pub percentile: f64,
    pub z_score: f64,
    pub label: RegimeLabel,
    /// Number of ATR values the ranking was computed over
    pub lookback_days: usize,
}

/// Trailing stop anchored to a recent high
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopResult {
    pub ticker: Option<String>,
    pub current_price: f64,
    pub recent_high: f64,
    pub recent_high_date: Option<NaiveDate>,
    pub atr: f64,
    pub atr_period: usize,
    pub multiplier: f64,
    pub stop_level: f64,
    /// current_price - stop_level; negative once price has fallen through the stop
    pub stop_distance: f64,
    pub stop_distance_pct: f64,
    pub risk_per_share: f64,
}

/// Indicator outputs a strategy may use beyond the fundamentals bundle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub regime: Option<VolatilityRegime>,
}

/// Outcome of one strategy against one ticker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyVerdict {
    pub ticker: String,
    pub strategy: String,
    /// 0-100
    pub score: f64,
    pub passed: bool,
    pub passed_criteria: Vec<String>,
    pub failed_criteria: Vec<String>,
    pub rationale: String,
}
