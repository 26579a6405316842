use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScreenError {
    /// Ticker fetch failed or returned nothing. The ticker is skipped.
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// Not enough bars for the requested indicator period.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// No bars inside a requested high-search window.
    #[error("Empty range: {0}")]
    EmptyRange(String),

    #[error("Unknown strategy '{name}'. Available: {available:?}")]
    UnknownStrategy { name: String, available: Vec<String> },

    #[error("Unknown universe '{name}'. Available: {available:?}")]
    UnknownUniverse { name: String, available: Vec<String> },

    /// Cache read/write failure. Callers treat this as a miss.
    #[error("Cache I/O error: {0}")]
    CacheIo(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("API error: {0}")]
    Api(String),
}

impl ScreenError {
    /// Errors that invalidate the whole run rather than a single ticker.
    pub fn is_run_level(&self) -> bool {
        matches!(
            self,
            ScreenError::UnknownStrategy { .. }
                | ScreenError::UnknownUniverse { .. }
                | ScreenError::InvalidConfig(_)
        )
    }
}

impl From<std::io::Error> for ScreenError {
    fn from(e: std::io::Error) -> Self {
        ScreenError::CacheIo(e.to_string())
    }
}

impl From<serde_json::Error> for ScreenError {
    fn from(e: serde_json::Error) -> Self {
        ScreenError::CacheIo(e.to_string())
    }
}
