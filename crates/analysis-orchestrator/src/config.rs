use anyhow::{Context, Result};
use screen_cache::CacheManager;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for a screening process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenConfig {
    pub cache_dir: PathBuf,

    // Fetch pool
    pub max_workers: usize,      // 5
    pub pause_every: u64,        // pause after this many completed fetches
    pub pause_millis: u64,       // 1000
    pub fetch_timeout_secs: u64, // 30

    // Liquidity filter defaults
    pub min_price: f64,  // $5
    pub min_volume: f64, // 500k shares, 50-day average

    pub analyst_scoring: bool,
    pub data_period: String,

    pub fundamentals_ttl_hours: f64, // 24
    pub universe_ttl_hours: f64,     // 168 (7 days)

    pub polygon_api_key: Option<String>,
    pub polygon_rate_limit: Option<u32>,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            cache_dir: CacheManager::default_dir(),
            max_workers: 5,
            pause_every: 50,
            pause_millis: 1000,
            fetch_timeout_secs: 30,
            min_price: 5.0,
            min_volume: 500_000.0,
            analyst_scoring: true,
            data_period: "1y".to_string(),
            fundamentals_ttl_hours: 24.0,
            universe_ttl_hours: 168.0,
            polygon_api_key: None,
            polygon_rate_limit: None,
        }
    }
}

impl ScreenConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            cache_dir: env::var("SCREEN_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            max_workers: env::var("SCREEN_MAX_WORKERS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("SCREEN_MAX_WORKERS must be an integer")?,
            pause_every: env::var("SCREEN_PAUSE_EVERY")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .context("SCREEN_PAUSE_EVERY must be an integer")?,
            pause_millis: env::var("SCREEN_PAUSE_MILLIS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("SCREEN_PAUSE_MILLIS must be an integer")?,
            fetch_timeout_secs: env::var("SCREEN_FETCH_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("SCREEN_FETCH_TIMEOUT_SECS must be an integer")?,
            min_price: env::var("SCREEN_MIN_PRICE")
                .unwrap_or_else(|_| "5.0".to_string())
                .parse()
                .context("SCREEN_MIN_PRICE must be a number")?,
            min_volume: env::var("SCREEN_MIN_VOLUME")
                .unwrap_or_else(|_| "500000".to_string())
                .parse()
                .context("SCREEN_MIN_VOLUME must be a number")?,
            analyst_scoring: env::var("SCREEN_ANALYST_SCORING")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("SCREEN_ANALYST_SCORING must be true or false")?,
            data_period: env::var("SCREEN_DATA_PERIOD").unwrap_or_else(|_| "1y".to_string()),
            fundamentals_ttl_hours: env::var("SCREEN_FUNDAMENTALS_TTL_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .context("SCREEN_FUNDAMENTALS_TTL_HOURS must be a number")?,
            universe_ttl_hours: env::var("SCREEN_UNIVERSE_TTL_HOURS")
                .unwrap_or_else(|_| "168".to_string())
                .parse()
                .context("SCREEN_UNIVERSE_TTL_HOURS must be a number")?,
            polygon_api_key: env::var("POLYGON_API_KEY").ok().filter(|k| !k.is_empty()),
            polygon_rate_limit: env::var("POLYGON_RATE_LIMIT")
                .ok()
                .map(|v| v.parse())
                .transpose()
                .context("POLYGON_RATE_LIMIT must be an integer")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            anyhow::bail!("max_workers must be at least 1");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_millis)
    }
}
