//! Screen orchestration: universe resolution, bounded-concurrency fundamentals
//! fetch, filtering, strategy scoring, ranking and optional stop sizing.

pub mod config;
pub mod filter;
pub mod screen;
pub mod synthetic;
pub mod universe;

pub use config::ScreenConfig;
pub use filter::UniverseFilter;
pub use screen::*;
pub use synthetic::SyntheticDataProvider;
pub use universe::{canonical_universe, CachedUniverse, StaticUniverseSource, UNIVERSES};
