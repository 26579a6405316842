pub mod canslim;
pub mod high_volatility;
pub mod registry;
pub mod strategy;
pub mod trend_template;

pub use canslim::CanslimStrategy;
pub use high_volatility::HighVolatilityStrategy;
pub use registry::*;
pub use strategy::*;
pub use trend_template::TrendTemplateStrategy;
