use crate::snapshot::derive_snapshot;
use analysis_core::{Bar, CompanyInfo, FundamentalSnapshot, MarketDataProvider, ScreenError};
use chrono::{NaiveDate, Utc};
use screen_cache::CacheManager;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_FUNDAMENTALS_TTL_HOURS: f64 = 24.0;
pub const BENCHMARK_TICKER: &str = "SPY";
pub const DEFAULT_BENCHMARK_TIMEOUT: Duration = Duration::from_secs(10);

pub fn fundamentals_cache_key(ticker: &str) -> String {
    format!("fundamentals:{}", ticker)
}

/// Fetches bars and company info, derives a [`FundamentalSnapshot`] and
/// caches it.
pub struct FundamentalsProvider {
    data: Arc<dyn MarketDataProvider>,
    cache: Option<Arc<CacheManager>>,
    period: String,
    ttl_hours: f64,
    benchmark_timeout: Duration,
    /// Benchmark outcome for the day; a failed fetch is remembered too
    benchmark: Mutex<Option<BenchmarkMemo>>,
}

#[derive(Clone)]
struct BenchmarkMemo {
    day: NaiveDate,
    bars: Option<Arc<Vec<Bar>>>,
}

impl FundamentalsProvider {
    pub fn new(data: Arc<dyn MarketDataProvider>, cache: Option<Arc<CacheManager>>) -> Self {
        Self {
            data,
            cache,
            period: "1y".to_string(),
            ttl_hours: DEFAULT_FUNDAMENTALS_TTL_HOURS,
            benchmark_timeout: DEFAULT_BENCHMARK_TIMEOUT,
            benchmark: Mutex::new(None),
        }
    }

    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = period.into();
        self
    }

    pub fn with_ttl_hours(mut self, ttl_hours: f64) -> Self {
        self.ttl_hours = ttl_hours;
        self
    }

    pub fn with_benchmark_timeout(mut self, timeout: Duration) -> Self {
        self.benchmark_timeout = timeout;
        self
    }

    pub fn data_provider(&self) -> Arc<dyn MarketDataProvider> {
        Arc::clone(&self.data)
    }

    pub async fn get_fundamentals(
        &self,
        ticker: &str,
        force_refresh: bool,
    ) -> Result<FundamentalSnapshot, ScreenError> {
        let key = fundamentals_cache_key(ticker);
        if let (Some(cache), false) = (&self.cache, force_refresh) {
            if let Some(snapshot) = cache.get::<FundamentalSnapshot>(&key) {
                tracing::debug!("Fundamentals cache hit for {}", ticker);
                return Ok(snapshot);
            }
        }

        let bars = self.data.get_ohlcv(ticker, &self.period, "1d").await?;
        if bars.is_empty() {
            return Err(ScreenError::DataUnavailable(format!("empty history for {}", ticker)));
        }

        let info = match self.data.get_company_info(ticker).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Company info unavailable for {}: {}", ticker, e);
                CompanyInfo { ticker: ticker.to_string(), ..Default::default() }
            }
        };

        let benchmark = self.benchmark().await;
        let snapshot = derive_snapshot(ticker, &bars, &info, benchmark.as_deref().map(|b| b.as_slice()))?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&key, &snapshot, self.ttl_hours) {
                tracing::warn!("Failed to cache fundamentals for {}: {}", ticker, e);
            }
        }

        Ok(snapshot)
    }

    /// Benchmark bars for RS ratings, fetched at most once per day.
    ///
    /// The lock is never held across the fetch, so a slow benchmark only
    /// delays callers up to the benchmark timeout. Calling this once before
    /// fanning out avoids parallel first fetches.
    pub async fn benchmark(&self) -> Option<Arc<Vec<Bar>>> {
        let today = Utc::now().date_naive();
        if let Some(memo) = self.memo_for(today) {
            return memo.bars;
        }

        let fetched = tokio::time::timeout(
            self.benchmark_timeout,
            self.data.get_ohlcv(BENCHMARK_TICKER, &self.period, "1d"),
        )
        .await;
        let bars = match fetched {
            Ok(Ok(bars)) if !bars.is_empty() => Some(Arc::new(bars)),
            Ok(Ok(_)) => {
                tracing::debug!("Empty {} history, RS ratings skipped", BENCHMARK_TICKER);
                None
            }
            Ok(Err(e)) => {
                tracing::debug!("No {} history for RS ratings: {}", BENCHMARK_TICKER, e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "{} fetch timed out after {:?}, RS ratings skipped today",
                    BENCHMARK_TICKER,
                    self.benchmark_timeout
                );
                None
            }
        };

        let mut slot = self.benchmark.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.as_ref() {
            // a concurrent caller already stored bars for today
            Some(memo) if memo.day == today && memo.bars.is_some() => memo.bars.clone(),
            _ => {
                *slot = Some(BenchmarkMemo { day: today, bars: bars.clone() });
                bars
            }
        }
    }

    fn memo_for(&self, day: NaiveDate) -> Option<BenchmarkMemo> {
        let slot = self.benchmark.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.as_ref().filter(|memo| memo.day == day).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingProvider {
        ohlcv_calls: AtomicUsize,
        hang_benchmark: bool,
    }

    fn bars(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Bar {
                timestamp: start + Duration::days(i as i64),
                open: 10.0 + i as f64,
                high: 11.0 + i as f64,
                low: 9.0 + i as f64,
                close: 10.0 + i as f64,
                volume: 1_000_000.0,
                vwap: None,
            })
            .collect()
    }

    #[async_trait]
    impl MarketDataProvider for CountingProvider {
        async fn get_ohlcv(&self, ticker: &str, _period: &str, _interval: &str) -> Result<Vec<Bar>, ScreenError> {
            self.ohlcv_calls.fetch_add(1, Ordering::SeqCst);
            match ticker {
                "EMPTY" => Ok(vec![]),
                "BAD" => Err(ScreenError::DataUnavailable("BAD".to_string())),
                BENCHMARK_TICKER if self.hang_benchmark => {
                    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                    Ok(bars(120))
                }
                _ => Ok(bars(120)),
            }
        }

        async fn get_company_info(&self, ticker: &str) -> Result<CompanyInfo, ScreenError> {
            if ticker == "NOINFO" {
                return Err(ScreenError::Api("boom".to_string()));
            }
            Ok(CompanyInfo {
                ticker: ticker.to_string(),
                market_cap: Some(5.0e9),
                ..Default::default()
            })
        }
    }

    fn provider(cache: Option<Arc<CacheManager>>) -> (Arc<CountingProvider>, FundamentalsProvider) {
        let data = Arc::new(CountingProvider { ohlcv_calls: AtomicUsize::new(0), hang_benchmark: false });
        let fp = FundamentalsProvider::new(data.clone(), cache);
        (data, fp)
    }

    #[tokio::test]
    async fn test_second_fetch_served_from_cache() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(CacheManager::new(dir.path()).unwrap());
        let (data, fp) = provider(Some(cache.clone()));

        let first = fp.get_fundamentals("AAPL", false).await.unwrap();
        let calls_after_first = data.ohlcv_calls.load(Ordering::SeqCst);
        let second = fp.get_fundamentals("AAPL", false).await.unwrap();

        assert_eq!(data.ohlcv_calls.load(Ordering::SeqCst), calls_after_first);
        assert_eq!(first.current_price, second.current_price);
        assert!(cache.entry_info("fundamentals:AAPL").is_some());
        // same bars for ticker and benchmark: never strictly better
        assert_eq!(first.rs_rating, Some(0.0));
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(CacheManager::new(dir.path()).unwrap());
        let (data, fp) = provider(Some(cache));

        fp.get_fundamentals("MSFT", false).await.unwrap();
        let before = data.ohlcv_calls.load(Ordering::SeqCst);
        fp.get_fundamentals("MSFT", true).await.unwrap();
        // ticker refetched, benchmark memoised
        assert_eq!(data.ohlcv_calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_empty_and_failed_fetches() {
        let (_data, fp) = provider(None);
        assert!(matches!(
            fp.get_fundamentals("EMPTY", false).await,
            Err(ScreenError::DataUnavailable(_))
        ));
        assert!(matches!(
            fp.get_fundamentals("BAD", false).await,
            Err(ScreenError::DataUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_company_info_still_yields_price_metrics() {
        let (_data, fp) = provider(None);
        let snap = fp.get_fundamentals("NOINFO", false).await.unwrap();
        assert!(snap.market_cap.is_none());
        assert!(snap.current_price > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_benchmark_does_not_block_tickers() {
        let data = Arc::new(CountingProvider { ohlcv_calls: AtomicUsize::new(0), hang_benchmark: true });
        let fp = Arc::new(
            FundamentalsProvider::new(data.clone(), None).with_benchmark_timeout(std::time::Duration::from_secs(5)),
        );

        let handles: Vec<_> = ["AAPL", "MSFT", "NVDA"]
            .into_iter()
            .map(|ticker| {
                let fp = Arc::clone(&fp);
                tokio::spawn(async move { fp.get_fundamentals(ticker, false).await })
            })
            .collect();
        for handle in handles {
            let snap = handle.await.unwrap().unwrap();
            assert!(snap.rs_rating.is_none());
            assert!(snap.current_price > 0.0);
        }

        // the failure is remembered: no further benchmark fetches today
        let before = data.ohlcv_calls.load(Ordering::SeqCst);
        let snap = fp.get_fundamentals("AMD", false).await.unwrap();
        assert!(snap.rs_rating.is_none());
        assert_eq!(data.ohlcv_calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_benchmark_fetched_once_per_day() {
        let (data, fp) = provider(None);
        assert!(fp.benchmark().await.is_some());
        assert!(fp.benchmark().await.is_some());
        assert_eq!(data.ohlcv_calls.load(Ordering::SeqCst), 1);
    }
}
