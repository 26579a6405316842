use analysis_core::{ScreenError, UniverseSource};
use async_trait::async_trait;
use screen_cache::CacheManager;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const DEFAULT_UNIVERSE_TTL_HOURS: f64 = 168.0;

pub const UNIVERSES: &[&str] = &["sp500", "nasdaq100", "russell2000", "all", "custom"];

const SP500: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "TSLA", "BRK-B", "UNH", "JNJ",
    "JPM", "V", "PG", "XOM", "HD", "CVX", "MA", "BAC", "ABBV", "PFE",
    "COST", "DIS", "ADBE", "CRM", "CSCO", "ACN", "MRK", "PEP", "TMO", "NFLX",
    "ABT", "LIN", "NKE", "AVGO", "CMCSA", "WMT", "DHR", "TXN", "AMD", "QCOM",
    "NEE", "PM", "UPS", "RTX", "IBM", "ORCL", "HON", "INTC", "INTU", "COP",
];

const NASDAQ100: &[&str] = &[
    "AAPL", "MSFT", "NVDA", "AMZN", "META", "GOOGL", "GOOG", "AVGO", "TSLA", "COST",
    "NFLX", "AMD", "PEP", "ADBE", "CSCO", "TMUS", "QCOM", "INTU", "TXN", "AMGN",
    "ISRG", "CMCSA", "BKNG", "HON", "AMAT", "VRTX", "ADP", "PANW", "SBUX", "GILD",
    "MU", "ADI", "LRCX", "MELI", "REGN", "MDLZ", "KLAC", "SNPS", "CDNS", "PYPL",
    "INTC", "CRWD", "MAR", "CSX", "ORLY", "ASML", "MRVL", "FTNT", "ABNB", "DASH",
];

const RUSSELL2000: &[&str] = &[
    // Technology
    "SSNC", "ZION", "FHN", "COHR", "CIEN", "LITE", "QLYS", "CYBR", "COMM", "SLAB",
    // Healthcare
    "CORT", "LMAT", "HOLX", "NEOG", "XRAY", "ICUI", "GMED", "ALGN", "INSP", "ENSG",
    // Financials
    "UMBF", "BOKF", "WTFC", "SFNC", "PBCT", "IBOC", "BANR", "UCBI", "CCBG", "FBNC",
    // Industrials
    "AIT", "WERN", "GWR", "JBHT", "ATKR", "UFPI", "TREX", "AZEK", "CMCO", "ALG",
    // Consumer
    "TXRH", "PLNT", "JACK", "SHAK", "WING", "CHUY", "BLMN", "DENN", "CAKE", "PLAY",
    // Materials
    "SLGN", "BECN", "RMBS", "ARCH", "CEIX", "AMR", "USLM", "HCC", "IOSP", "MTX",
    // Energy
    "RRC", "CIVI", "VNOM", "REI", "TALO", "ESTE", "NEXT", "MGY", "PR", "CRGY",
    // Real Estate
    "REXR", "CUBE", "ELS", "COLD", "SUI", "TRNO", "SAFE", "EPRT", "GTY", "FCPT",
];

/// Canonical universe name for `name` or one of its aliases.
pub fn canonical_universe(name: &str) -> Option<&'static str> {
    match name.trim().to_lowercase().as_str() {
        "sp500" | "s&p500" => Some("sp500"),
        "nasdaq100" | "nasdaq" => Some("nasdaq100"),
        "russell2000" | "russell" => Some("russell2000"),
        "all" | "all_markets" => Some("all"),
        "custom" => Some("custom"),
        _ => None,
    }
}

fn to_owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn unknown(name: &str) -> ScreenError {
    ScreenError::UnknownUniverse {
        name: name.to_string(),
        available: to_owned(UNIVERSES),
    }
}

/// Built-in membership lists plus an optional caller-supplied custom list.
#[derive(Debug, Clone, Default)]
pub struct StaticUniverseSource {
    custom: Vec<String>,
}

impl StaticUniverseSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_custom(tickers: Vec<String>) -> Self {
        let custom = tickers
            .into_iter()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { custom }
    }

    fn resolve(&self, canonical: &str) -> Vec<String> {
        match canonical {
            "sp500" => to_owned(SP500),
            "nasdaq100" => to_owned(NASDAQ100),
            "russell2000" => to_owned(RUSSELL2000),
            "all" => SP500
                .iter()
                .chain(RUSSELL2000)
                .map(|s| s.to_string())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            _ => self.custom.clone(),
        }
    }
}

#[async_trait]
impl UniverseSource for StaticUniverseSource {
    async fn get_tickers(&self, universe: &str, _force_refresh: bool) -> Result<Vec<String>, ScreenError> {
        let canonical = canonical_universe(universe).ok_or_else(|| unknown(universe))?;
        Ok(self.resolve(canonical))
    }

    fn available(&self) -> Vec<String> {
        to_owned(UNIVERSES)
    }
}

/// Caches another source's membership lists under `universe:<name>`.
///
/// The custom universe is caller-supplied and never cached.
pub struct CachedUniverse<S> {
    inner: S,
    cache: Arc<CacheManager>,
    ttl_hours: f64,
}

impl<S: UniverseSource> CachedUniverse<S> {
    pub fn new(inner: S, cache: Arc<CacheManager>) -> Self {
        Self {
            inner,
            cache,
            ttl_hours: DEFAULT_UNIVERSE_TTL_HOURS,
        }
    }

    pub fn with_ttl_hours(mut self, ttl_hours: f64) -> Self {
        self.ttl_hours = ttl_hours;
        self
    }
}

#[async_trait]
impl<S: UniverseSource> UniverseSource for CachedUniverse<S> {
    async fn get_tickers(&self, universe: &str, force_refresh: bool) -> Result<Vec<String>, ScreenError> {
        let canonical = canonical_universe(universe).ok_or_else(|| unknown(universe))?;
        if canonical == "custom" {
            return self.inner.get_tickers(canonical, force_refresh).await;
        }

        let key = format!("universe:{}", canonical);
        if !force_refresh {
            if let Some(tickers) = self.cache.get::<Vec<String>>(&key) {
                if !tickers.is_empty() {
                    return Ok(tickers);
                }
            }
        }

        let tickers = self.inner.get_tickers(canonical, force_refresh).await?;
        if !tickers.is_empty() {
            if let Err(e) = self.cache.set(&key, &tickers, self.ttl_hours) {
                tracing::warn!("Failed to cache universe {}: {}", canonical, e);
            }
        }
        Ok(tickers)
    }

    fn available(&self) -> Vec<String> {
        self.inner.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UniverseSource for Counting {
        async fn get_tickers(&self, universe: &str, _force_refresh: bool) -> Result<Vec<String>, ScreenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![format!("{}-1", universe)])
        }

        fn available(&self) -> Vec<String> {
            vec![]
        }
    }

    #[tokio::test]
    async fn test_aliases_resolve() {
        let source = StaticUniverseSource::new();
        let a = source.get_tickers("S&P500", false).await.unwrap();
        let b = source.get_tickers("sp500", false).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(
            source.get_tickers("Nasdaq", false).await.unwrap(),
            source.get_tickers("nasdaq100", false).await.unwrap()
        );
        assert_eq!(canonical_universe(" russell "), Some("russell2000"));
        assert_eq!(canonical_universe("all_markets"), Some("all"));
    }

    #[tokio::test]
    async fn test_unknown_universe() {
        let source = StaticUniverseSource::new();
        match source.get_tickers("ftse100", false).await {
            Err(ScreenError::UnknownUniverse { name, available }) => {
                assert_eq!(name, "ftse100");
                assert!(available.contains(&"sp500".to_string()));
            }
            other => panic!("expected UnknownUniverse, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_all_is_sorted_union() {
        let source = StaticUniverseSource::new();
        let all = source.get_tickers("all", false).await.unwrap();
        let mut sorted = all.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(all, sorted);
        assert!(all.contains(&"AAPL".to_string()));
        assert!(all.contains(&"TXRH".to_string()));
    }

    #[tokio::test]
    async fn test_custom_list_normalized() {
        let source = StaticUniverseSource::with_custom(vec![" aapl".to_string(), "".to_string(), "msft".to_string()]);
        assert_eq!(source.get_tickers("custom", false).await.unwrap(), vec!["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn test_cached_universe_hits_and_force_refresh() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(CacheManager::new(dir.path()).unwrap());
        let cached = CachedUniverse::new(Counting { calls: AtomicUsize::new(0) }, cache.clone());

        assert_eq!(cached.get_tickers("nasdaq", false).await.unwrap(), vec!["nasdaq100-1"]);
        cached.get_tickers("nasdaq100", false).await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);

        cached.get_tickers("nasdaq100", true).await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);

        let info = cache.entry_info("universe:nasdaq100").unwrap();
        assert_eq!(info.ttl_hours, 168.0);
    }
}
