use crate::config::ScreenConfig;
use crate::filter::UniverseFilter;
use analysis_core::{
    FundamentalSnapshot, MarketCapCategory, ScreenError, StrategyVerdict, TechnicalSnapshot, UniverseSource,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fundamental_analysis::{AnalystMultiplier, AnalystScoring, FundamentalsProvider};
use position_sizer::{StopConfig, StopRecommendation, StopRecommender};
use screen_strategies::{ScreenStrategy, StrategyRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;

/// `(current, total, message)`; total is always 100
pub type ProgressCallback = Arc<dyn Fn(u32, u32, &str) + Send + Sync>;

/// How verdicts from several strategies merge into one per ticker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    /// Any strategy passes; best score wins
    #[default]
    Union,
    /// Every strategy passes; mean score
    Intersection,
}

impl CombineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CombineMode::Union => "union",
            CombineMode::Intersection => "intersection",
        }
    }
}

impl fmt::Display for CombineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CombineMode {
    type Err = ScreenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "union" | "any" => Ok(CombineMode::Union),
            "intersection" | "all" => Ok(CombineMode::Intersection),
            other => Err(ScreenError::InvalidConfig(format!(
                "unknown combine mode '{}', expected union or intersection",
                other
            ))),
        }
    }
}

/// Merge one ticker's verdicts, given in strategy request order.
///
/// Union keeps the first verdict holding the maximum score. Intersection
/// keeps the first verdict with the mean score. Returns None for no verdicts.
pub fn combine_verdicts(verdicts: &[StrategyVerdict], mode: CombineMode) -> Option<StrategyVerdict> {
    let first = verdicts.first()?;
    let combined = match mode {
        CombineMode::Union => {
            let best = verdicts
                .iter()
                .fold(first, |best, v| if v.score > best.score { v } else { best });
            StrategyVerdict {
                passed: verdicts.iter().any(|v| v.passed),
                ..best.clone()
            }
        }
        CombineMode::Intersection => {
            let mean = verdicts.iter().map(|v| v.score).sum::<f64>() / verdicts.len() as f64;
            StrategyVerdict {
                score: mean,
                passed: verdicts.iter().all(|v| v.passed),
                ..first.clone()
            }
        }
    };
    Some(combined)
}

/// Parameters for one screening run
#[derive(Clone)]
pub struct ScreenRequest {
    pub strategy_names: Vec<String>,
    pub combine_mode: CombineMode,
    /// None or 0 disables the score floor
    pub min_score: Option<f64>,
    pub max_results: Option<usize>,
    pub apply_filters: bool,
    pub calculate_positions: bool,
    /// Keep tickers whose combined verdict failed
    pub include_failing: bool,
    pub force_refresh: bool,
    pub cap_categories: Option<Vec<MarketCapCategory>>,
    pub sectors: Option<Vec<String>>,
    pub exclude_sectors: Vec<String>,
    pub industries: Option<Vec<String>>,
    pub exclude_industries: Vec<String>,
    pub progress: Option<ProgressCallback>,
}

impl ScreenRequest {
    pub fn new<S: Into<String>>(strategy_names: impl IntoIterator<Item = S>) -> Self {
        Self {
            strategy_names: strategy_names.into_iter().map(Into::into).collect(),
            combine_mode: CombineMode::Union,
            min_score: None,
            max_results: None,
            apply_filters: true,
            calculate_positions: true,
            include_failing: false,
            force_refresh: false,
            cap_categories: None,
            sectors: None,
            exclude_sectors: Vec::new(),
            industries: None,
            exclude_industries: Vec::new(),
            progress: None,
        }
    }

    fn report(&self, current: u32, message: &str) {
        tracing::debug!("[{:>3}%] {}", current, message);
        if let Some(callback) = &self.progress {
            callback(current, 100, message);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenCandidate {
    pub ticker: String,
    /// Combined verdict; its score includes the analyst multiplier
    pub verdict: StrategyVerdict,
    pub strategy_scores: BTreeMap<String, f64>,
    pub analyst: Option<AnalystMultiplier>,
    /// Combined score before the analyst multiplier
    pub base_score: f64,
    pub stop: Option<StopRecommendation>,
}

impl ScreenCandidate {
    pub fn score(&self) -> f64 {
        self.verdict.score
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenSummary {
    pub universe: String,
    pub strategy_names: Vec<String>,
    pub combine_mode: CombineMode,
    pub total_universe: usize,
    /// Candidates whose combined verdict passed, before truncation
    pub passed_count: usize,
    /// Candidates with a stop recommendation attached
    pub analyzed_positions: usize,
    pub candidates: Vec<ScreenCandidate>,
    pub execution_time_seconds: f64,
    pub generated_at: DateTime<Utc>,
}

fn by_score_desc(a: &ScreenCandidate, b: &ScreenCandidate) -> std::cmp::Ordering {
    b.score().partial_cmp(&a.score()).unwrap_or(std::cmp::Ordering::Equal)
}

impl ScreenSummary {
    pub fn top_n(&self, n: usize) -> Vec<&ScreenCandidate> {
        let mut sorted: Vec<&ScreenCandidate> = self.candidates.iter().collect();
        sorted.sort_by(|a, b| by_score_desc(a, b));
        sorted.truncate(n);
        sorted
    }

    pub fn passing_only(&self) -> Vec<&ScreenCandidate> {
        self.candidates.iter().filter(|c| c.verdict.passed).collect()
    }
}

/// Runs strategies over a universe: fetch, filter, score, rank, size.
///
/// A single orchestrator must not run overlapping screens concurrently.
pub struct ScreenOrchestrator {
    universe_name: String,
    universe: Arc<dyn UniverseSource>,
    fundamentals: Arc<FundamentalsProvider>,
    registry: Arc<StrategyRegistry>,
    stop_recommender: Arc<StopRecommender>,
    analyst_scoring: Option<AnalystScoring>,
    config: ScreenConfig,
}

impl ScreenOrchestrator {
    pub fn new(
        universe_name: impl Into<String>,
        universe: Arc<dyn UniverseSource>,
        fundamentals: Arc<FundamentalsProvider>,
        config: ScreenConfig,
    ) -> Self {
        let stop_config = StopConfig { data_period: config.data_period.clone(), ..Default::default() };
        let stop_recommender = Arc::new(StopRecommender::with_config(fundamentals.data_provider(), stop_config));
        let analyst_scoring = config.analyst_scoring.then(AnalystScoring::default);
        Self {
            universe_name: universe_name.into(),
            universe,
            fundamentals,
            registry: Arc::new(StrategyRegistry::with_defaults()),
            stop_recommender,
            analyst_scoring,
            config,
        }
    }

    pub fn with_registry(mut self, registry: Arc<StrategyRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_stop_recommender(mut self, recommender: Arc<StopRecommender>) -> Self {
        self.stop_recommender = recommender;
        self
    }

    /// Replace the analyst scorer; None disables the multiplier.
    pub fn with_analyst_scoring(mut self, scoring: Option<AnalystScoring>) -> Self {
        self.analyst_scoring = scoring;
        self
    }

    pub fn universe_name(&self) -> &str {
        &self.universe_name
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub async fn run_screen(&self, request: &ScreenRequest) -> Result<ScreenSummary, ScreenError> {
        let start = Instant::now();

        // Configuration errors fail before any fetch
        if request.strategy_names.is_empty() {
            return Err(ScreenError::InvalidConfig("at least one strategy is required".to_string()));
        }
        let strategies = self.registry.get_many(&request.strategy_names)?;

        request.report(0, &format!("Loading {} universe...", self.universe_name));
        let tickers = self
            .universe
            .get_tickers(&self.universe_name, request.force_refresh)
            .await?;
        let total_universe = tickers.len();
        request.report(5, &format!("Loaded {} tickers", total_universe));
        tracing::info!(
            "Screening {} tickers from {} with {:?} ({})",
            total_universe,
            self.universe_name,
            request.strategy_names,
            request.combine_mode
        );

        let fundamentals = self.fetch_fundamentals(&tickers, request).await;

        let tickers = if request.apply_filters {
            request.report(70, "Applying filters...");
            let filter = UniverseFilter {
                min_price: self.config.min_price,
                min_volume: self.config.min_volume,
                cap_categories: request.cap_categories.clone(),
                sectors: request.sectors.clone(),
                exclude_sectors: request.exclude_sectors.clone(),
                industries: request.industries.clone(),
                exclude_industries: request.exclude_industries.clone(),
                ..Default::default()
            };
            let filtered = filter.filter_tickers(&tickers, &fundamentals);
            request.report(75, &format!("Filtered to {} stocks", filtered.len()));
            filtered
        } else {
            tickers
                .into_iter()
                .filter(|t| fundamentals.contains_key(t))
                .collect()
        };

        request.report(80, &format!("Running {} screener(s)...", strategies.len()));
        let mut candidates = self.score_tickers(&tickers, &fundamentals, &strategies, request);
        let passed_count = candidates.iter().filter(|c| c.verdict.passed).count();
        request.report(90, &format!("Found {} candidates", candidates.len()));

        candidates.sort_by(by_score_desc);
        if let Some(max) = request.max_results {
            candidates.truncate(max);
        }

        if request.calculate_positions {
            request.report(92, "Calculating position sizing...");
            self.attach_stops(&mut candidates).await;
        }

        let analyzed_positions = candidates.iter().filter(|c| c.stop.is_some()).count();
        let execution_time_seconds = start.elapsed().as_secs_f64();
        request.report(100, &format!("Screen complete in {:.1}s", execution_time_seconds));
        tracing::info!(
            "Screen complete: {} passed of {}, returning {} in {:.1}s",
            passed_count,
            total_universe,
            candidates.len(),
            execution_time_seconds
        );

        Ok(ScreenSummary {
            universe: self.universe_name.clone(),
            strategy_names: request.strategy_names.clone(),
            combine_mode: request.combine_mode,
            total_universe,
            passed_count,
            analyzed_positions,
            candidates,
            execution_time_seconds,
            generated_at: Utc::now(),
        })
    }

    /// Bounded-concurrency fetch. Failed, empty and timed-out tickers are
    /// logged and left out of the map.
    async fn fetch_fundamentals(
        &self,
        tickers: &[String],
        request: &ScreenRequest,
    ) -> Arc<DashMap<String, FundamentalSnapshot>> {
        let results: Arc<DashMap<String, FundamentalSnapshot>> = Arc::new(DashMap::new());
        let total = tickers.len();
        let workers = self.config.max_workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        // Fetches hold a read guard; a rate-limit pause takes the write side
        let gate = Arc::new(RwLock::new(()));
        let timeout = self.config.fetch_timeout();
        let mut tasks = JoinSet::new();

        // Resolve the shared benchmark once so workers never wait on it
        if !tickers.is_empty() {
            self.fundamentals.benchmark().await;
        }

        for ticker in tickers {
            let ticker = ticker.clone();
            let provider = Arc::clone(&self.fundamentals);
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let gate = Arc::clone(&gate);
            let force_refresh = request.force_refresh;

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (ticker, Err(ScreenError::DataUnavailable("worker pool closed".to_string())));
                    }
                };
                let _open = gate.read().await;
                let fetched = tokio::time::timeout(timeout, provider.get_fundamentals(&ticker, force_refresh)).await;
                let outcome = match fetched {
                    Ok(Ok(snapshot)) => {
                        results.insert(ticker.clone(), snapshot);
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(ScreenError::DataUnavailable(format!(
                        "fetch timed out after {}s",
                        timeout.as_secs()
                    ))),
                };
                (ticker, outcome)
            });
        }

        let mut completed: usize = 0;
        let mut failed: usize = 0;
        while let Some(joined) = tasks.join_next().await {
            completed += 1;
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((ticker, Err(e))) => {
                    failed += 1;
                    tracing::warn!("Skipping {}: {}", ticker, e);
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!("Fetch task error: {}", e);
                }
            }

            if completed % 10 == 0 {
                let pct = 10 + (completed * 60 / total.max(1)) as u32;
                request.report(pct, &format!("Fetching data: {}/{}", completed, total));
            }

            let pause_every = self.config.pause_every as usize;
            if pause_every > 0 && completed % pause_every == 0 && completed < total {
                let _closed = gate.write().await;
                tracing::debug!("Rate-limit pause after {} fetches", completed);
                tokio::time::sleep(self.config.pause()).await;
            }
        }

        if failed > 0 {
            tracing::info!("Fundamentals fetched for {}/{} tickers ({} skipped)", total - failed, total, failed);
        }
        results
    }

    fn score_tickers(
        &self,
        tickers: &[String],
        fundamentals: &DashMap<String, FundamentalSnapshot>,
        strategies: &[Arc<dyn ScreenStrategy>],
        request: &ScreenRequest,
    ) -> Vec<ScreenCandidate> {
        let technicals = TechnicalSnapshot::default();
        let min_score = request.min_score.filter(|m| *m > 0.0);
        let mut candidates = Vec::new();

        for ticker in tickers {
            let Some(data) = fundamentals.get(ticker) else {
                continue;
            };

            let verdicts: Vec<StrategyVerdict> = strategies
                .iter()
                .map(|s| s.evaluate(ticker, &data, &technicals))
                .collect();
            let Some(mut combined) = combine_verdicts(&verdicts, request.combine_mode) else {
                continue;
            };

            let base_score = combined.score;
            let analyst = self
                .analyst_scoring
                .as_ref()
                .map(|scoring| scoring.calculate_from_fundamentals(&data));
            if let Some(analyst) = &analyst {
                combined.score *= analyst.multiplier;
            }

            if min_score.is_some_and(|min| combined.score < min) {
                continue;
            }
            if !combined.passed && !request.include_failing {
                continue;
            }

            candidates.push(ScreenCandidate {
                ticker: ticker.clone(),
                strategy_scores: verdicts.iter().map(|v| (v.strategy.clone(), v.score)).collect(),
                verdict: combined,
                analyst,
                base_score,
                stop: None,
            });
        }
        candidates
    }

    async fn attach_stops(&self, candidates: &mut [ScreenCandidate]) {
        let timeout = self.config.fetch_timeout();
        for candidate in candidates.iter_mut() {
            let analyzed = tokio::time::timeout(timeout, self.stop_recommender.analyze(&candidate.ticker, None, None)).await;
            match analyzed {
                Ok(Ok(rec)) => candidate.stop = Some(rec),
                Ok(Err(e)) => tracing::warn!("Could not size {}: {}", candidate.ticker, e),
                Err(_) => tracing::warn!("Position sizing timed out for {}", candidate.ticker),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::StaticUniverseSource;
    use analysis_core::{Bar, CompanyInfo, MarketDataProvider};
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn verdict(strategy: &str, score: f64, passed: bool) -> StrategyVerdict {
        StrategyVerdict {
            ticker: "T".to_string(),
            strategy: strategy.to_string(),
            score,
            passed,
            passed_criteria: vec![],
            failed_criteria: vec![],
            rationale: strategy.to_string(),
        }
    }

    #[test]
    fn test_union_takes_max_and_any() {
        let vs = vec![verdict("a", 60.0, false), verdict("b", 80.0, true)];
        let c = combine_verdicts(&vs, CombineMode::Union).unwrap();
        assert_relative_eq!(c.score, 80.0);
        assert!(c.passed);
        assert_eq!(c.strategy, "b");
    }

    #[test]
    fn test_intersection_takes_mean_and_all() {
        let vs = vec![verdict("a", 60.0, false), verdict("b", 80.0, true)];
        let c = combine_verdicts(&vs, CombineMode::Intersection).unwrap();
        assert_relative_eq!(c.score, 70.0);
        assert!(!c.passed);
        assert_eq!(c.strategy, "a");
    }

    #[test]
    fn test_union_tie_keeps_first_requested() {
        let vs = vec![verdict("first", 75.0, true), verdict("second", 75.0, true)];
        assert_eq!(combine_verdicts(&vs, CombineMode::Union).unwrap().rationale, "first");
        assert!(combine_verdicts(&[], CombineMode::Union).is_none());
    }

    #[test]
    fn test_combine_mode_parse() {
        assert_eq!("Intersection".parse::<CombineMode>().unwrap(), CombineMode::Intersection);
        assert_eq!("union".parse::<CombineMode>().unwrap(), CombineMode::Union);
        assert!("both".parse::<CombineMode>().is_err());
    }

    /// Rising stocks against a flat benchmark; growth figures vary by ticker.
    struct FixtureProvider {
        calls: AtomicUsize,
        hang_benchmark: bool,
    }

    fn fixture_bars(rising: bool) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        let n = 260;
        (0..n)
            .map(|i| {
                let close = if rising { 50.0 + 0.2 * i as f64 } else { 400.0 };
                Bar {
                    timestamp: start + Duration::days(i as i64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: if i == n - 1 { 3_000_000.0 } else { 1_000_000.0 },
                    vwap: None,
                }
            })
            .collect()
    }

    #[async_trait]
    impl MarketDataProvider for FixtureProvider {
        async fn get_ohlcv(&self, ticker: &str, _period: &str, _interval: &str) -> Result<Vec<Bar>, ScreenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ticker == "SLOW" || (ticker == "SPY" && self.hang_benchmark) {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
            match ticker {
                "SPY" => Ok(fixture_bars(false)),
                "BROKEN" => Err(ScreenError::DataUnavailable("BROKEN".to_string())),
                _ => Ok(fixture_bars(true)),
            }
        }

        async fn get_company_info(&self, ticker: &str) -> Result<CompanyInfo, ScreenError> {
            // (qtrly growth, annual growth, institutional)
            let (q, a, inst) = match ticker {
                "ALL" => (0.40, 0.40, 0.50),
                "NOQ" => (0.05, 0.40, 0.50),
                "NOINST" => (0.40, 0.40, 0.02),
                "NOEPS" => (0.05, 0.05, 0.50),
                "EDGE" => (0.40, 0.05, 0.02),
                _ => (0.0, 0.0, 0.0),
            };
            Ok(CompanyInfo {
                ticker: ticker.to_string(),
                market_cap: Some(20.0e9),
                sector: Some("Technology".to_string()),
                earnings_growth_qtrly: Some(q),
                earnings_growth_annual: Some(a),
                institutional_ownership: Some(inst),
                ..Default::default()
            })
        }
    }

    fn orchestrator(tickers: &[&str]) -> (Arc<FixtureProvider>, ScreenOrchestrator) {
        orchestrator_with(tickers, ScreenConfig { pause_millis: 0, ..Default::default() }, false)
    }

    fn orchestrator_with(
        tickers: &[&str],
        config: ScreenConfig,
        hang_benchmark: bool,
    ) -> (Arc<FixtureProvider>, ScreenOrchestrator) {
        let data = Arc::new(FixtureProvider { calls: AtomicUsize::new(0), hang_benchmark });
        let fundamentals = Arc::new(FundamentalsProvider::new(data.clone(), None));
        let universe = Arc::new(StaticUniverseSource::with_custom(
            tickers.iter().map(|t| t.to_string()).collect(),
        ));
        let orch = ScreenOrchestrator::new("custom", universe, fundamentals, config);
        (data, orch)
    }

    /// Serves fixture bars except for one ticker that always errors.
    struct SizingProvider {
        failing: &'static str,
    }

    #[async_trait]
    impl MarketDataProvider for SizingProvider {
        async fn get_ohlcv(&self, ticker: &str, _period: &str, _interval: &str) -> Result<Vec<Bar>, ScreenError> {
            if ticker == self.failing {
                return Err(ScreenError::DataUnavailable(ticker.to_string()));
            }
            Ok(fixture_bars(true))
        }

        async fn get_company_info(&self, ticker: &str) -> Result<CompanyInfo, ScreenError> {
            Ok(CompanyInfo { ticker: ticker.to_string(), ..Default::default() })
        }
    }

    const FIVE: &[&str] = &["ALL", "NOQ", "NOINST", "NOEPS", "EDGE"];

    #[tokio::test]
    async fn test_end_to_end_single_strategy() {
        let (_data, orch) = orchestrator(FIVE);
        let mut request = ScreenRequest::new(["canslim"]);
        request.max_results = Some(3);
        request.calculate_positions = false;

        let summary = orch.run_screen(&request).await.unwrap();
        assert_eq!(summary.total_universe, 5);
        // NOEPS scores 60 and fails the 70 threshold
        assert_eq!(summary.passed_count, 4);
        let tickers: Vec<&str> = summary.candidates.iter().map(|c| c.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["ALL", "NOINST", "NOQ"]);

        let scores: Vec<f64> = summary.candidates.iter().map(|c| c.score()).collect();
        assert_relative_eq!(scores[0], 100.0, epsilon = 1e-9);
        assert_relative_eq!(scores[1], 90.0, epsilon = 1e-9);
        assert_relative_eq!(scores[2], 80.0, epsilon = 1e-9);

        // No analyst coverage: neutral multiplier
        let top = &summary.candidates[0];
        assert_relative_eq!(top.base_score, top.score(), epsilon = 1e-9);
        assert_eq!(top.analyst.as_ref().unwrap().multiplier, 1.0);
        assert_eq!(top.strategy_scores.get("canslim").copied(), Some(top.base_score));
        assert_eq!(summary.analyzed_positions, 0);
    }

    #[tokio::test]
    async fn test_min_score_and_positions() {
        let (_data, orch) = orchestrator(FIVE);
        let mut request = ScreenRequest::new(["canslim"]);
        request.min_score = Some(85.0);

        let summary = orch.run_screen(&request).await.unwrap();
        let tickers: Vec<&str> = summary.candidates.iter().map(|c| c.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["ALL", "NOINST"]);
        assert_eq!(summary.analyzed_positions, 2);
        let stop = summary.candidates[0].stop.as_ref().unwrap();
        assert!(stop.suggested_stop < stop.recent_high);
    }

    #[tokio::test]
    async fn test_include_failing_keeps_low_scores() {
        let (_data, orch) = orchestrator(FIVE);
        let mut request = ScreenRequest::new(["canslim"]);
        request.include_failing = true;
        request.calculate_positions = false;

        let summary = orch.run_screen(&request).await.unwrap();
        assert_eq!(summary.candidates.len(), 5);
        assert_eq!(summary.passing_only().len(), 4);
        assert_eq!(summary.top_n(1)[0].ticker, "ALL");
        assert_eq!(summary.candidates.last().unwrap().ticker, "NOEPS");
    }

    #[tokio::test]
    async fn test_failed_fetch_is_isolated() {
        let (_data, orch) = orchestrator(&["ALL", "BROKEN", "NOQ"]);
        let mut request = ScreenRequest::new(["canslim"]);
        request.calculate_positions = false;

        let summary = orch.run_screen(&request).await.unwrap();
        assert_eq!(summary.total_universe, 3);
        assert_eq!(summary.candidates.len(), 2);
        assert!(summary.candidates.iter().all(|c| c.ticker != "BROKEN"));
    }

    #[tokio::test]
    async fn test_unknown_strategy_fails_before_fetch() {
        let (data, orch) = orchestrator(FIVE);
        let request = ScreenRequest::new(["canslim", "astrology"]);
        let err = orch.run_screen(&request).await.err().unwrap();
        assert!(matches!(err, ScreenError::UnknownStrategy { .. }));
        assert_eq!(data.calls.load(Ordering::SeqCst), 0);

        let empty = ScreenRequest::new(Vec::<String>::new());
        assert!(matches!(orch.run_screen(&empty).await, Err(ScreenError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_intersection_run_and_progress() {
        let (_data, orch) = orchestrator(FIVE);
        let seen: Arc<Mutex<Vec<(u32, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut request = ScreenRequest::new(["canslim", "trend_template"]);
        request.combine_mode = CombineMode::Intersection;
        request.include_failing = true;
        request.calculate_positions = false;
        request.progress = Some(Arc::new(move |current, _total, message| {
            sink.lock().unwrap().push((current, message.to_string()));
        }));

        let summary = orch.run_screen(&request).await.unwrap();
        assert_eq!(summary.combine_mode, CombineMode::Intersection);
        for c in &summary.candidates {
            let mean = c.strategy_scores.values().sum::<f64>() / 2.0;
            assert_relative_eq!(c.base_score, mean, epsilon = 1e-9);
            assert_eq!(c.verdict.strategy, "canslim");
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first().unwrap().0, 0);
        assert_eq!(seen.last().unwrap().0, 100);
        assert!(seen.last().unwrap().1.starts_with("Screen complete"));
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[tokio::test]
    async fn test_stops_use_configured_period() {
        let config = ScreenConfig { pause_millis: 0, data_period: "6mo".to_string(), ..Default::default() };
        let (_data, orch) = orchestrator_with(&["ALL"], config, false);
        let summary = orch.run_screen(&ScreenRequest::new(["canslim"])).await.unwrap();
        let stop = summary.candidates[0].stop.as_ref().unwrap();
        assert_eq!(stop.data_period, "6mo");
    }

    #[tokio::test]
    async fn test_sizing_failure_keeps_candidate() {
        let (_data, orch) = orchestrator(FIVE);
        let sizing = Arc::new(StopRecommender::new(Arc::new(SizingProvider { failing: "NOINST" })));
        let orch = orch.with_stop_recommender(sizing);
        let mut request = ScreenRequest::new(["canslim"]);
        request.min_score = Some(85.0);

        let summary = orch.run_screen(&request).await.unwrap();
        let tickers: Vec<&str> = summary.candidates.iter().map(|c| c.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["ALL", "NOINST"]);
        assert!(summary.candidates[0].stop.is_some());
        assert!(summary.candidates[1].stop.is_none());
        assert_eq!(summary.analyzed_positions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_ticker_times_out_alone() {
        let config = ScreenConfig { pause_millis: 0, fetch_timeout_secs: 1, ..Default::default() };
        let (_data, orch) = orchestrator_with(&["ALL", "SLOW", "NOQ"], config, false);
        let mut request = ScreenRequest::new(["canslim"]);
        request.calculate_positions = false;

        let summary = orch.run_screen(&request).await.unwrap();
        assert_eq!(summary.total_universe, 3);
        let tickers: Vec<&str> = summary.candidates.iter().map(|c| c.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["ALL", "NOQ"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_benchmark_does_not_drop_tickers() {
        let config = ScreenConfig { pause_millis: 0, fetch_timeout_secs: 1, ..Default::default() };
        let (_data, orch) = orchestrator_with(&["ALL", "NOQ", "NOEPS"], config, true);
        let mut request = ScreenRequest::new(["canslim"]);
        request.include_failing = true;
        request.apply_filters = false;
        request.calculate_positions = false;

        let summary = orch.run_screen(&request).await.unwrap();
        assert_eq!(summary.candidates.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_pauses_between_batches() {
        let config = ScreenConfig { pause_every: 2, pause_millis: 500, ..Default::default() };
        let (_data, orch) = orchestrator_with(FIVE, config, false);
        let mut request = ScreenRequest::new(["canslim"]);
        request.calculate_positions = false;

        let started = tokio::time::Instant::now();
        let summary = orch.run_screen(&request).await.unwrap();
        let waited = started.elapsed();

        // pauses after fetches 2 and 4, none after the last
        assert!(waited >= std::time::Duration::from_millis(1000), "waited {:?}", waited);
        assert!(waited < std::time::Duration::from_millis(1500), "waited {:?}", waited);
        assert_eq!(summary.passed_count, 4);
    }
}
