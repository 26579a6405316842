use crate::trailing_stop::{
    compute_trailing_stop, find_recent_high, regime_multiplier, shares_for_risk, RecentHighWindow,
    RegimeAdjustments,
};
use analysis_core::{Bar, MarketDataProvider, ScreenError, VolatilityRegime};
use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use market_regime_detector::{volatility_regime, RegimeThresholds};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use technical_analysis::{atr, AtrMethod};

/// Stop-loss settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConfig {
    pub atr_period: usize,
    pub base_multiplier: f64,
    /// Bars searched for the anchor high when no entry date is given
    pub recent_high_lookback: usize,
    pub regime_lookback_days: usize,
    pub thresholds: RegimeThresholds,
    pub regime_adjustments: RegimeAdjustments,
    pub use_regime_adjustment: bool,
    pub data_period: String,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            base_multiplier: 2.0,
            recent_high_lookback: 20,
            regime_lookback_days: 252,
            thresholds: RegimeThresholds::default(),
            regime_adjustments: RegimeAdjustments::default(),
            use_regime_adjustment: true,
            data_period: "1y".to_string(),
        }
    }
}

impl StopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.atr_period == 0 {
            bail!("atr_period must be positive");
        }
        if self.base_multiplier <= 0.0 {
            bail!("base_multiplier must be positive");
        }
        if self.recent_high_lookback == 0 {
            bail!("recent_high_lookback must be positive");
        }
        Ok(())
    }
}

/// Full stop-loss recommendation for one ticker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRecommendation {
    pub ticker: String,
    pub current_price: f64,
    pub suggested_stop: f64,
    pub stop_distance_pct: f64,

    /// ATR over the configured period; the stop is built from this one
    pub atr: f64,
    pub atr_period: usize,
    pub atr_14: Option<f64>,
    pub atr_7: Option<f64>,
    pub atr_21: Option<f64>,

    pub base_multiplier: f64,
    pub regime_adjusted_multiplier: f64,
    pub volatility_regime: Option<VolatilityRegime>,

    pub recent_high: f64,
    pub recent_high_date: NaiveDate,

    pub entry_price: Option<f64>,
    /// entry_price - multiplier * ATR
    pub initial_stop: Option<f64>,

    pub risk_per_share: f64,
    pub generated_at: DateTime<Utc>,
    pub data_period: String,
}

impl StopRecommendation {
    pub fn shares_for_risk(&self, risk_dollars: f64) -> u64 {
        shares_for_risk(risk_dollars, self.risk_per_share)
    }

    pub fn position_value(&self, risk_dollars: f64) -> f64 {
        self.shares_for_risk(risk_dollars) as f64 * self.current_price
    }
}

/// Builds volatility-aware stop recommendations from price history.
pub struct StopRecommender {
    provider: Arc<dyn MarketDataProvider>,
    config: StopConfig,
}

impl StopRecommender {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self::with_config(provider, StopConfig::default())
    }

    pub fn with_config(provider: Arc<dyn MarketDataProvider>, config: StopConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &StopConfig {
        &self.config
    }

    /// Fetch history for `ticker` and build its recommendation.
    pub async fn analyze(
        &self,
        ticker: &str,
        entry_price: Option<f64>,
        entry_date: Option<NaiveDate>,
    ) -> Result<StopRecommendation, ScreenError> {
        let bars = self
            .provider
            .get_ohlcv(ticker, &self.config.data_period, "1d")
            .await?;
        self.analyze_bars(ticker, &bars, entry_price, entry_date)
    }

    /// Recommendations for several tickers; failures are logged and skipped.
    pub async fn analyze_watchlist(&self, tickers: &[String]) -> Vec<StopRecommendation> {
        let mut results = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            match self.analyze(ticker, None, None).await {
                Ok(rec) => results.push(rec),
                Err(e) => tracing::warn!("Could not analyze {}: {}", ticker, e),
            }
        }
        results
    }

    pub fn analyze_bars(
        &self,
        ticker: &str,
        bars: &[Bar],
        entry_price: Option<f64>,
        entry_date: Option<NaiveDate>,
    ) -> Result<StopRecommendation, ScreenError> {
        let cfg = &self.config;
        let current_price = bars
            .last()
            .map(|b| b.close)
            .ok_or_else(|| ScreenError::DataUnavailable(format!("no bars for {}", ticker)))?;

        let main_atr = atr(bars, cfg.atr_period, AtrMethod::Wilder)?.current_atr;
        // Reference ATRs, absent when the history is too short
        let reference = |period: usize| {
            if period == cfg.atr_period {
                Some(main_atr)
            } else {
                atr(bars, period, AtrMethod::Wilder).ok().map(|r| r.current_atr)
            }
        };

        let regime = match volatility_regime(bars, cfg.atr_period, cfg.regime_lookback_days, &cfg.thresholds) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!("No volatility regime for {}: {}", ticker, e);
                None
            }
        };

        let multiplier = if cfg.use_regime_adjustment {
            regime_multiplier(regime.as_ref(), cfg.base_multiplier, &cfg.regime_adjustments)
        } else {
            cfg.base_multiplier
        };

        let window = match entry_date {
            Some(date) => RecentHighWindow::Since(date),
            None => RecentHighWindow::Lookback(cfg.recent_high_lookback),
        };
        let (recent_high, recent_high_date) = find_recent_high(bars, window)?;

        let stop = compute_trailing_stop(current_price, recent_high, main_atr, multiplier);

        Ok(StopRecommendation {
            ticker: ticker.to_string(),
            current_price,
            suggested_stop: stop.stop_level,
            stop_distance_pct: stop.stop_distance_pct,
            atr: main_atr,
            atr_period: cfg.atr_period,
            atr_14: reference(14),
            atr_7: reference(7),
            atr_21: reference(21),
            base_multiplier: cfg.base_multiplier,
            regime_adjusted_multiplier: multiplier,
            volatility_regime: regime,
            recent_high,
            recent_high_date,
            entry_price,
            initial_stop: entry_price.map(|entry| entry - multiplier * main_atr),
            risk_per_share: stop.risk_per_share,
            generated_at: Utc::now(),
            data_period: cfg.data_period.clone(),
        })
    }
}
