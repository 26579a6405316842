//! Offline market data: reproducible price paths and company metadata.

use analysis_core::{period_to_days, AnalystCoverage, Bar, CompanyInfo, MarketDataProvider, ScreenError};
use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy)]
struct Profile {
    base_price: f64,
    annual_vol: f64,
    drift: f64,
}

const DEFAULT_PROFILE: Profile = Profile { base_price: 100.0, annual_vol: 0.30, drift: 0.05 };

fn profile(ticker: &str) -> Profile {
    let (base_price, annual_vol, drift) = match ticker {
        "NVDA" => (140.0, 0.55, 0.15),
        "TSLA" => (250.0, 0.60, 0.10),
        "AAPL" => (195.0, 0.25, 0.08),
        "AMD" => (120.0, 0.50, 0.12),
        "META" => (520.0, 0.40, 0.10),
        "MSFT" => (420.0, 0.22, 0.07),
        "GOOGL" => (175.0, 0.28, 0.08),
        "AMZN" => (200.0, 0.35, 0.09),
        "SPY" => (590.0, 0.15, 0.06),
        "QQQ" => (510.0, 0.20, 0.08),
        _ => return DEFAULT_PROFILE,
    };
    Profile { base_price, annual_vol, drift }
}

const SECTORS: &[(&str, &str)] = &[
    ("Technology", "Software"),
    ("Technology", "Semiconductors"),
    ("Healthcare", "Biotechnology"),
    ("Financial Services", "Banks"),
    ("Consumer Cyclical", "Restaurants"),
    ("Industrials", "Trucking"),
    ("Energy", "Oil & Gas E&P"),
    ("Real Estate", "REIT"),
];

// FNV-1a, stable across builds
fn ticker_hash(ticker: &str) -> u64 {
    ticker.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

fn standard_normal(rng: &mut StdRng) -> f64 {
    // Box-Muller
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// `days` weekdays ending at `end` (inclusive when it is a weekday)
fn business_days(end: NaiveDate, days: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(days);
    let mut d = end;
    while dates.len() < days {
        if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(d);
        }
        d -= Duration::days(1);
    }
    dates.reverse();
    dates
}

/// Deterministic geometric Brownian motion with volatility clustering.
///
/// The same seed, ticker and period always produce the same bars.
#[derive(Debug, Clone)]
pub struct SyntheticDataProvider {
    seed: u64,
    end_date: Option<NaiveDate>,
}

impl Default for SyntheticDataProvider {
    fn default() -> Self {
        Self::new(42)
    }
}

impl SyntheticDataProvider {
    pub fn new(seed: u64) -> Self {
        Self { seed, end_date: None }
    }

    /// Pin the last bar's date instead of using today.
    pub fn with_end_date(mut self, end: NaiveDate) -> Self {
        self.end_date = Some(end);
        self
    }

    fn rng_for(&self, ticker: &str, stream: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ ticker_hash(ticker) ^ stream)
    }

    pub fn generate(&self, ticker: &str, days: usize) -> Vec<Bar> {
        let ticker = ticker.to_uppercase();
        let p = profile(&ticker);
        let mut rng = self.rng_for(&ticker, 0);

        let daily_vol = p.annual_vol / 252f64.sqrt();
        let daily_drift = p.drift / 252.0;
        let (persistence, shock) = (0.9, 0.3);

        let end = self.end_date.unwrap_or_else(|| Utc::now().date_naive());
        let dates = business_days(end, days.max(1));

        let mut bars = Vec::with_capacity(dates.len());
        let mut vol_state = daily_vol;
        let mut prev_close = p.base_price;

        for (i, date) in dates.into_iter().enumerate() {
            let timestamp = date.and_time(NaiveTime::MIN).and_utc();
            if i == 0 {
                bars.push(Bar {
                    timestamp,
                    open: p.base_price,
                    high: p.base_price * 1.01,
                    low: p.base_price * 0.99,
                    close: p.base_price,
                    volume: (10_000_000.0 * rng.gen_range(0.5f64..1.5)).floor(),
                    vwap: None,
                });
                continue;
            }

            vol_state = persistence * vol_state
                + (1.0 - persistence) * daily_vol
                + shock * daily_vol * standard_normal(&mut rng).abs();
            let ret = daily_drift + vol_state * standard_normal(&mut rng);

            let close = prev_close * (1.0 + ret);
            let open = prev_close * (1.0 + rng.gen_range(-0.005f64..0.005));
            let range = vol_state * 1.5;
            let high = open.max(close) * (1.0 + standard_normal(&mut rng).abs() * range);
            let low = open.min(close) * (1.0 - standard_normal(&mut rng).abs() * range);

            let vol_multiplier = 1.0 + 2.0 * (vol_state / daily_vol - 1.0);
            let volume = (10_000_000.0 * vol_multiplier * rng.gen_range(0.5f64..1.5)).max(0.0).floor();

            bars.push(Bar { timestamp, open, high, low, close, volume, vwap: None });
            prev_close = close;
        }
        bars
    }

    pub fn company_info(&self, ticker: &str) -> CompanyInfo {
        let ticker = ticker.to_uppercase();
        let p = profile(&ticker);
        let mut rng = self.rng_for(&ticker, 0x5eed);

        let (sector, industry) = SECTORS[(ticker_hash(&ticker) % SECTORS.len() as u64) as usize];
        let shares = rng.gen_range(0.05e9f64..16.0e9);
        let analyst_count = rng.gen_range(0..40u32);

        CompanyInfo {
            ticker: ticker.clone(),
            name: Some(format!("{} Synthetic Corp", ticker)),
            sector: Some(sector.to_string()),
            industry: Some(industry.to_string()),
            market_cap: Some(p.base_price * shares),
            pe_ratio: Some(rng.gen_range(8.0f64..60.0)),
            forward_pe: Some(rng.gen_range(8.0f64..45.0)),
            peg_ratio: Some(rng.gen_range(0.5f64..3.0)),
            earnings_growth_qtrly: Some(rng.gen_range(-0.2f64..0.8)),
            earnings_growth_annual: Some(rng.gen_range(-0.1f64..0.6)),
            revenue_growth_qtrly: Some(rng.gen_range(-0.1f64..0.5)),
            revenue_growth_annual: Some(rng.gen_range(-0.05f64..0.4)),
            profit_margin: Some(rng.gen_range(-0.05f64..0.35)),
            operating_margin: Some(rng.gen_range(0.0f64..0.45)),
            roe: Some(rng.gen_range(-0.05f64..0.5)),
            institutional_ownership: Some(rng.gen_range(0.02f64..0.9)),
            beta: Some(0.6 + p.annual_vol * rng.gen_range(1.0f64..3.0)),
            analyst: AnalystCoverage {
                target_mean: Some(p.base_price * rng.gen_range(0.85f64..1.45)),
                target_low: Some(p.base_price * rng.gen_range(0.6f64..0.9)),
                target_high: Some(p.base_price * rng.gen_range(1.2f64..1.9)),
                recommendation_mean: Some(rng.gen_range(1.2f64..3.8)),
                analyst_count: Some(analyst_count),
                upgrades_30d: rng.gen_range(0..4),
                downgrades_30d: rng.gen_range(0..3),
            },
        }
    }
}

#[async_trait]
impl MarketDataProvider for SyntheticDataProvider {
    async fn get_ohlcv(&self, ticker: &str, period: &str, interval: &str) -> Result<Vec<Bar>, ScreenError> {
        if ticker.trim().is_empty() {
            return Err(ScreenError::DataUnavailable("empty ticker".to_string()));
        }
        if interval != "1d" {
            tracing::debug!("Synthetic provider ignores interval {} for {}", interval, ticker);
        }
        Ok(self.generate(ticker, period_to_days(period)))
    }

    async fn get_company_info(&self, ticker: &str) -> Result<CompanyInfo, ScreenError> {
        if ticker.trim().is_empty() {
            return Err(ScreenError::DataUnavailable("empty ticker".to_string()));
        }
        Ok(self.company_info(ticker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> SyntheticDataProvider {
        SyntheticDataProvider::new(7).with_end_date(NaiveDate::from_ymd_opt(2024, 6, 14).unwrap())
    }

    #[test]
    fn test_deterministic_per_seed() {
        let a = fixed().generate("NVDA", 60);
        let b = fixed().generate("nvda", 60);
        assert_eq!(a.len(), 60);
        assert!(a.iter().zip(&b).all(|(x, y)| x.close == y.close && x.volume == y.volume));

        let c = SyntheticDataProvider::new(8)
            .with_end_date(NaiveDate::from_ymd_opt(2024, 6, 14).unwrap())
            .generate("NVDA", 60);
        assert!(a.iter().zip(&c).any(|(x, y)| x.close != y.close));
    }

    #[test]
    fn test_ohlc_consistency() {
        for bar in fixed().generate("TSLA", 252) {
            assert!(bar.high >= bar.open.max(bar.close) - 1e-9);
            assert!(bar.low <= bar.open.min(bar.close) + 1e-9);
            assert!(bar.volume >= 0.0);
        }
    }

    #[test]
    fn test_weekdays_only_ending_on_end_date() {
        let bars = fixed().generate("AAPL", 10);
        assert_eq!(bars.last().unwrap().date(), NaiveDate::from_ymd_opt(2024, 6, 14).unwrap());
        assert!(bars.iter().all(|b| !matches!(b.date().weekday(), Weekday::Sat | Weekday::Sun)));
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_provider_contract() {
        let provider = fixed();
        assert_eq!(provider.get_ohlcv("MSFT", "3mo", "1d").await.unwrap().len(), 63);
        assert!(provider.get_ohlcv("", "1y", "1d").await.is_err());

        let info = provider.get_company_info("MSFT").await.unwrap();
        assert_eq!(info.ticker, "MSFT");
        assert!(info.market_cap.unwrap() > 0.0);
        assert!(provider.get_current_price("MSFT").await.unwrap() > 0.0);
    }
}
