//! screener: run one equity screen and print the summary as JSON.
//!
//! Usage:
//!   cargo run -p screener -- --strategies canslim,trend_template --universe sp500
//!   cargo run -p screener -- --tickers NVDA AMD TSLA --mode intersection --min-score 60
//!   cargo run -p screener -- --listed 500 --strategies high_volatility
//!   cargo run -p screener -- --list-strategies
//!   cargo run -p screener -- --cache-stats
//!
//! Without POLYGON_API_KEY the screen runs against synthetic market data.

use analysis_core::{MarketCapCategory, MarketDataProvider};
use analysis_orchestrator::{
    CachedUniverse, CombineMode, ProgressCallback, ScreenConfig, ScreenOrchestrator, ScreenRequest,
    StaticUniverseSource, SyntheticDataProvider,
};
use anyhow::{Context, Result};
use fundamental_analysis::FundamentalsProvider;
use polygon_client::PolygonClient;
use screen_cache::CacheManager;
use std::sync::Arc;

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn comma_list(args: &[String], flag: &str) -> Option<Vec<String>> {
    flag_value(args, flag).map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn parsed<T: std::str::FromStr>(args: &[String], flag: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    flag_value(args, flag)
        .map(|v| v.parse::<T>().map_err(|e| anyhow::anyhow!("{} {}: {}", flag, v, e)))
        .transpose()
}

fn init_logging() {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    if std::env::var("RUST_LOG_FORMAT").is_ok_and(|v| v == "json") {
        tracing_subscriber::fmt().json().with_env_filter(filter()).with_writer(std::io::stderr).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).with_writer(std::io::stderr).init();
    }
}

fn build_request(args: &[String], config: &ScreenConfig) -> Result<ScreenRequest> {
    let strategies = comma_list(args, "--strategies").unwrap_or_else(|| vec!["canslim".to_string()]);
    let mut request = ScreenRequest::new(strategies);

    if let Some(mode) = parsed::<CombineMode>(args, "--mode")? {
        request.combine_mode = mode;
    }
    request.min_score = parsed(args, "--min-score")?;
    request.max_results = Some(parsed(args, "--max-results")?.unwrap_or(20));
    request.apply_filters = !args.iter().any(|a| a == "--no-filters");
    request.calculate_positions = !args.iter().any(|a| a == "--no-positions");
    request.include_failing = args.iter().any(|a| a == "--include-failing");
    request.force_refresh = args.iter().any(|a| a == "--refresh");

    request.sectors = comma_list(args, "--sectors");
    request.exclude_sectors = comma_list(args, "--exclude-sectors").unwrap_or_default();
    request.industries = comma_list(args, "--industries");
    request.exclude_industries = comma_list(args, "--exclude-industries").unwrap_or_default();
    request.cap_categories = comma_list(args, "--cap")
        .map(|caps| {
            caps.iter()
                .map(|c| c.parse::<MarketCapCategory>().map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()
        .context("--cap expects mega,large,mid,small,micro")?;

    let progress: ProgressCallback = Arc::new(|current, total, message| {
        tracing::info!("[{}/{}] {}", current, total, message);
    });
    request.progress = Some(progress);

    tracing::debug!(
        "Request: mode={} min_price={} min_volume={}",
        request.combine_mode,
        config.min_price,
        config.min_volume
    );
    Ok(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let config = ScreenConfig::from_env().context("Invalid screener configuration")?;

    let cache = Arc::new(CacheManager::new(&config.cache_dir).context("Failed to open cache directory")?);

    if args.iter().any(|a| a == "--clear-cache") {
        let removed = cache.clear_all();
        tracing::info!("Removed {} cache entries from {}", removed, cache.cache_dir().display());
        return Ok(());
    }
    if args.iter().any(|a| a == "--cache-stats") {
        println!("{}", serde_json::to_string_pretty(&cache.stats())?);
        return Ok(());
    }

    let expired = cache.clear_expired();
    if expired > 0 {
        tracing::info!("Cleared {} expired cache entries", expired);
    }

    let polygon = config.polygon_api_key.as_ref().map(|key| {
        tracing::info!("Using Polygon market data");
        Arc::new(match config.polygon_rate_limit {
            Some(limit) => PolygonClient::with_rate_limit(key.clone(), limit as usize),
            None => PolygonClient::new(key.clone()),
        })
    });
    let data: Arc<dyn MarketDataProvider> = match &polygon {
        Some(client) => client.clone() as Arc<dyn MarketDataProvider>,
        None => {
            tracing::warn!("POLYGON_API_KEY not set, using synthetic market data");
            Arc::new(SyntheticDataProvider::default())
        }
    };

    // --tickers AAPL MSFT ... screens a custom universe
    let mut custom: Vec<String> = args
        .iter()
        .position(|a| a == "--tickers")
        .map(|idx| {
            args[idx + 1..]
                .iter()
                .take_while(|a| !a.starts_with("--"))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    // --listed N screens the first N active listings from Polygon
    if let Some(limit) = parsed::<usize>(&args, "--listed")? {
        let client = polygon
            .as_ref()
            .context("--listed requires POLYGON_API_KEY")?;
        custom = client.list_tickers(limit).await?;
        tracing::info!("Loaded {} listed tickers from Polygon", custom.len());
    }
    let universe_name = if custom.is_empty() {
        flag_value(&args, "--universe").unwrap_or("sp500").to_string()
    } else {
        "custom".to_string()
    };

    let universe = Arc::new(
        CachedUniverse::new(StaticUniverseSource::with_custom(custom), cache.clone())
            .with_ttl_hours(config.universe_ttl_hours),
    );
    let fundamentals = Arc::new(
        FundamentalsProvider::new(data, Some(cache.clone()))
            .with_period(config.data_period.clone())
            .with_benchmark_timeout(config.fetch_timeout())
            .with_ttl_hours(config.fundamentals_ttl_hours),
    );

    let orchestrator = ScreenOrchestrator::new(universe_name, universe, fundamentals, config.clone());

    if args.iter().any(|a| a == "--list-strategies") {
        for name in orchestrator.registry().names() {
            let strategy = orchestrator.registry().get(&name)?;
            println!("{:<16} {}", name, strategy.description());
        }
        return Ok(());
    }

    let request = build_request(&args, &config)?;
    let summary = orchestrator.run_screen(&request).await?;

    tracing::info!(
        "Screen complete: {} of {} passed, {} candidates in {:.1}s",
        summary.passed_count,
        summary.total_universe,
        summary.candidates.len(),
        summary.execution_time_seconds
    );
    let stats = cache.stats();
    tracing::info!("Cache: {} hits, {} misses ({:.0}% hit rate)", stats.hits, stats.misses, stats.hit_rate);

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
