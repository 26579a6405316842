use async_trait::async_trait;
use crate::{Bar, CompanyInfo, ScreenError};

/// Source of price history and company metadata for a ticker.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Chronological daily bars. `period` is a span such as "1y" or "6mo".
    async fn get_ohlcv(&self, ticker: &str, period: &str, interval: &str) -> Result<Vec<Bar>, ScreenError>;

    async fn get_current_price(&self, ticker: &str) -> Result<f64, ScreenError> {
        let bars = self.get_ohlcv(ticker, "1mo", "1d").await?;
        bars.last()
            .map(|b| b.close)
            .ok_or_else(|| ScreenError::DataUnavailable(format!("no bars for {}", ticker)))
    }

    async fn get_company_info(&self, ticker: &str) -> Result<CompanyInfo, ScreenError>;
}

/// Resolves a named universe to its ticker symbols.
#[async_trait]
pub trait UniverseSource: Send + Sync {
    async fn get_tickers(&self, universe: &str, force_refresh: bool) -> Result<Vec<String>, ScreenError>;

    fn available(&self) -> Vec<String>;
}
