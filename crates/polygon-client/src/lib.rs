use analysis_core::{
    period_to_days, AnalystCoverage, Bar, CompanyInfo, MarketDataProvider, ScreenError,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const BASE_URL: &str = "https://api.polygon.io";
const DEFAULT_RATE_LIMIT: usize = 500;
const MAX_RETRIES: u32 = 3;

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            let oldest = match ts.front() {
                Some(&oldest) if ts.len() >= self.max_requests => oldest,
                _ => {
                    ts.push_back(now);
                    return;
                }
            };

            // Wait until the oldest request falls out of the window
            let sleep_dur = (oldest + self.window).saturating_duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!("Rate limiter: waiting {:.1}s for Polygon API slot", sleep_dur.as_secs_f64());
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

fn api_err(e: impl std::fmt::Display) -> ScreenError {
    ScreenError::Api(e.to_string())
}

/// Calendar window covering `period` worth of trading days, ending `today`.
pub fn date_range_for_period(period: &str, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let trading_days = period_to_days(period) as i64;
    // ~5 trading days per 7 calendar days, plus holidays
    let calendar_days = trading_days * 7 / 5 + 7;
    (today - ChronoDuration::days(calendar_days), today)
}

/// Polygon `(multiplier, timespan)` for an interval such as "1d" or "1h".
pub fn interval_to_span(interval: &str) -> Result<(u32, &'static str), ScreenError> {
    match interval {
        "1d" => Ok((1, "day")),
        "1wk" | "1w" => Ok((1, "week")),
        "1mo" => Ok((1, "month")),
        "1h" => Ok((1, "hour")),
        "30m" => Ok((30, "minute")),
        "15m" => Ok((15, "minute")),
        "5m" => Ok((5, "minute")),
        other => Err(ScreenError::InvalidConfig(format!("unsupported interval '{}'", other))),
    }
}

/// 1 (buy) to 5 (sell) from consensus vote counts
pub fn recommendation_mean(buy: u32, hold: u32, sell: u32) -> Option<f64> {
    let total = buy + hold + sell;
    if total == 0 {
        return None;
    }
    Some((buy as f64 + 3.0 * hold as f64 + 5.0 * sell as f64) / total as f64)
}

/// `(upgrades, downgrades)` dated on or after `since`
pub fn count_rating_actions(ratings: &[AnalystRating], since: NaiveDate) -> (u32, u32) {
    ratings
        .iter()
        .filter(|r| {
            r.date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                .is_some_and(|d| d >= since)
        })
        .fold((0, 0), |(up, down), r| {
            let action = r.rating_action.as_deref().unwrap_or_default().to_lowercase();
            if action.starts_with("upgrade") {
                (up + 1, down)
            } else if action.starts_with("downgrade") {
                (up, down + 1)
            } else {
                (up, down)
            }
        })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRating {
    pub consensus_rating: Option<String>,
    pub consensus_price_target: Option<f64>,
    pub high_price_target: Option<f64>,
    pub low_price_target: Option<f64>,
    pub buy_count: Option<u32>,
    pub hold_count: Option<u32>,
    pub sell_count: Option<u32>,
    pub contributors: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystRating {
    pub price_target: Option<f64>,
    pub rating: Option<String>,
    pub rating_action: Option<String>,
    pub firm: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerDetails {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub sic_description: Option<String>,
    #[serde(default)]
    pub primary_exchange: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Polygon REST client implementing [`MarketDataProvider`].
#[derive(Clone)]
pub struct PolygonClient {
    api_key: String,
    client: Client,
    rate_limiter: RateLimiter,
}

impl PolygonClient {
    /// Uses `POLYGON_RATE_LIMIT` requests per minute, default 500.
    /// Free tier users should set POLYGON_RATE_LIMIT=5.
    pub fn new(api_key: String) -> Self {
        let rate_limit: usize = std::env::var("POLYGON_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT);
        Self::with_rate_limit(api_key, rate_limit)
    }

    pub fn with_rate_limit(api_key: String, requests_per_minute: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            client,
            rate_limiter: RateLimiter::new(requests_per_minute, Duration::from_secs(60)),
        }
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ScreenError> {
        let request = builder.build().map_err(api_err)?;

        for attempt in 0..MAX_RETRIES {
            self.rate_limiter.acquire().await;
            let req_clone = request
                .try_clone()
                .ok_or_else(|| ScreenError::Api("Cannot clone request".to_string()))?;
            let response = self.client.execute(req_clone).await.map_err(api_err)?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            let wait_secs = 15u64;
            tracing::warn!(
                "Polygon 429 rate limited, waiting {}s before retry {}/{}",
                wait_secs,
                attempt + 1,
                MAX_RETRIES
            );
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        Err(ScreenError::Api(format!("Rate limited by Polygon after {} retries", MAX_RETRIES)))
    }

    async fn error_body(response: reqwest::Response) -> String {
        let status = response.status();
        format!("HTTP {}: {}", status, response.text().await.unwrap_or_default())
    }

    /// Get aggregates (bars) for a symbol
    pub async fn get_aggregates(
        &self,
        symbol: &str,
        multiplier: u32,
        timespan: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Bar>, ScreenError> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/{}/{}/{}/{}",
            BASE_URL,
            symbol,
            multiplier,
            timespan,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );

        let response = self
            .send_request(self.client.get(&url).query(&[
                ("apiKey", self.api_key.as_str()),
                ("adjusted", "true"),
                ("sort", "asc"),
                ("limit", "50000"),
            ]))
            .await?;

        match response.status().as_u16() {
            404 => return Err(ScreenError::DataUnavailable(format!("unknown ticker {}", symbol))),
            s if !(200..300).contains(&s) => return Err(ScreenError::Api(Self::error_body(response).await)),
            _ => {}
        }

        let body: AggregateResponse = response.json().await.map_err(api_err)?;
        Ok(aggregates_to_bars(body.results))
    }

    pub async fn get_ticker_details(&self, symbol: &str) -> Result<TickerDetails, ScreenError> {
        let url = format!("{}/v3/reference/tickers/{}", BASE_URL, symbol);

        let response = self
            .send_request(self.client.get(&url).query(&[("apiKey", &self.api_key)]))
            .await?;

        match response.status().as_u16() {
            404 => return Err(ScreenError::DataUnavailable(format!("unknown ticker {}", symbol))),
            s if !(200..300).contains(&s) => return Err(ScreenError::Api(Self::error_body(response).await)),
            _ => {}
        }

        let body: TickerDetailsResponse = response.json().await.map_err(api_err)?;
        Ok(body.results)
    }

    /// Benzinga consensus ratings. Ok(None) when the subscription is missing.
    pub async fn get_consensus_ratings(&self, symbol: &str) -> Result<Option<ConsensusRating>, ScreenError> {
        let url = format!("{}/benzinga/v1/consensus-ratings/{}", BASE_URL, symbol);

        let response = self
            .send_request(self.client.get(&url).query(&[("apiKey", &self.api_key)]))
            .await?;

        let status = response.status().as_u16();
        if status == 403 || status == 401 {
            tracing::info!("Benzinga consensus ratings not available (HTTP {}), skipping", status);
            return Ok(None);
        }
        if !response.status().is_success() {
            tracing::warn!("Benzinga consensus HTTP {}: ignoring", status);
            return Ok(None);
        }

        let body: BenzingaConsensusResponse = response.json().await.map_err(api_err)?;
        Ok(body.results.into_iter().next())
    }

    /// Recent Benzinga analyst ratings, newest first. Empty when the subscription is missing.
    pub async fn get_analyst_ratings(&self, symbol: &str, limit: u32) -> Result<Vec<AnalystRating>, ScreenError> {
        let url = format!("{}/benzinga/v1/ratings", BASE_URL);

        let response = self
            .send_request(self.client.get(&url).query(&[
                ("apiKey", self.api_key.as_str()),
                ("ticker", symbol),
                ("sort", "date.desc"),
                ("limit", &limit.to_string()),
            ]))
            .await?;

        let status = response.status().as_u16();
        if status == 403 || status == 401 {
            tracing::info!("Benzinga analyst ratings not available (HTTP {}), skipping", status);
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            tracing::warn!("Benzinga ratings HTTP {}: ignoring", status);
            return Ok(Vec::new());
        }

        let body: BenzingaRatingsResponse = response.json().await.map_err(api_err)?;
        Ok(body.results)
    }

    /// List active US common stock tickers from Polygon reference API.
    /// Paginates automatically. Returns up to `max_tickers` symbols.
    pub async fn list_tickers(&self, max_tickers: usize) -> Result<Vec<String>, ScreenError> {
        let mut tickers = Vec::new();
        let mut cursor: Option<String> = None;
        let page_limit = 1000;

        loop {
            let mut builder = self.client.get(format!("{}/v3/reference/tickers", BASE_URL)).query(&[
                ("apiKey", self.api_key.as_str()),
                ("market", "stocks"),
                ("active", "true"),
                ("type", "CS"),
                ("limit", &page_limit.to_string()),
                ("order", "asc"),
                ("sort", "ticker"),
            ]);

            if let Some(ref c) = cursor {
                builder = builder.query(&[("cursor", c.as_str())]);
            }

            let response = self.send_request(builder).await?;
            if !response.status().is_success() {
                tracing::warn!("Ticker listing stopped: {}", Self::error_body(response).await);
                break;
            }

            let body: TickerListResponse = response.json().await.map_err(api_err)?;

            for t in &body.results {
                // Skip share classes, OTC and other odd symbols
                if t.ticker.contains('.') || t.ticker.contains('-') || t.ticker.len() > 5 {
                    continue;
                }
                tickers.push(t.ticker.clone());
                if tickers.len() >= max_tickers {
                    return Ok(tickers);
                }
            }

            cursor = body.next_url.as_deref().and_then(cursor_from_next_url);
            if cursor.is_none() {
                break;
            }
        }

        Ok(tickers)
    }
}

fn cursor_from_next_url(next: &str) -> Option<String> {
    next.split("cursor=")
        .nth(1)
        .and_then(|s| s.split('&').next())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn aggregates_to_bars(results: Vec<AggregateResult>) -> Vec<Bar> {
    results
        .into_iter()
        .filter_map(|r| {
            let timestamp = DateTime::from_timestamp_millis(r.t)?;
            Some(Bar {
                timestamp,
                open: r.o,
                high: r.h,
                low: r.l,
                close: r.c,
                volume: r.v,
                vwap: r.vw,
            })
        })
        .collect()
}

fn coverage_from(consensus: Option<&ConsensusRating>, upgrades: u32, downgrades: u32) -> AnalystCoverage {
    let Some(c) = consensus else {
        return AnalystCoverage { upgrades_30d: upgrades, downgrades_30d: downgrades, ..Default::default() };
    };
    let (buy, hold, sell) = (c.buy_count.unwrap_or(0), c.hold_count.unwrap_or(0), c.sell_count.unwrap_or(0));
    let votes = buy + hold + sell;
    AnalystCoverage {
        target_mean: c.consensus_price_target,
        target_low: c.low_price_target,
        target_high: c.high_price_target,
        recommendation_mean: recommendation_mean(buy, hold, sell),
        analyst_count: c.contributors.or((votes > 0).then_some(votes)),
        upgrades_30d: upgrades,
        downgrades_30d: downgrades,
    }
}

#[async_trait]
impl MarketDataProvider for PolygonClient {
    async fn get_ohlcv(&self, ticker: &str, period: &str, interval: &str) -> Result<Vec<Bar>, ScreenError> {
        let (multiplier, timespan) = interval_to_span(interval)?;
        let (from, to) = date_range_for_period(period, Utc::now().date_naive());
        let mut bars = self.get_aggregates(ticker, multiplier, timespan, from, to).await?;
        if bars.is_empty() {
            return Err(ScreenError::DataUnavailable(format!("no bars for {}", ticker)));
        }

        if timespan == "day" {
            let keep = period_to_days(period);
            if bars.len() > keep {
                bars.drain(..bars.len() - keep);
            }
        }
        Ok(bars)
    }

    async fn get_company_info(&self, ticker: &str) -> Result<CompanyInfo, ScreenError> {
        let details = self.get_ticker_details(ticker).await?;

        let consensus = self.get_consensus_ratings(ticker).await.unwrap_or_else(|e| {
            tracing::warn!("Consensus ratings failed for {}: {}", ticker, e);
            None
        });
        let ratings = self.get_analyst_ratings(ticker, 50).await.unwrap_or_else(|e| {
            tracing::warn!("Analyst ratings failed for {}: {}", ticker, e);
            Vec::new()
        });
        let since = Utc::now().date_naive() - ChronoDuration::days(30);
        let (upgrades, downgrades) = count_rating_actions(&ratings, since);

        Ok(CompanyInfo {
            ticker: ticker.to_string(),
            name: details.name,
            sector: details.sic_description.clone(),
            industry: details.sic_description,
            market_cap: details.market_cap,
            analyst: coverage_from(consensus.as_ref(), upgrades, downgrades),
            ..Default::default()
        })
    }
}

// Response structures
#[derive(Debug, Deserialize)]
struct TickerListResponse {
    #[serde(default)]
    results: Vec<TickerListEntry>,
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerListEntry {
    ticker: String,
}

#[derive(Debug, Deserialize)]
struct BenzingaConsensusResponse {
    #[serde(default)]
    results: Vec<ConsensusRating>,
}

#[derive(Debug, Deserialize)]
struct BenzingaRatingsResponse {
    #[serde(default)]
    results: Vec<AnalystRating>,
}

#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateResult>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64, // timestamp
    o: f64, // open
    h: f64, // high
    l: f64, // low
    c: f64, // close
    v: f64, // volume
    #[serde(default)]
    vw: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TickerDetailsResponse {
    results: TickerDetails,
}
