use crate::canslim::CanslimStrategy;
use crate::high_volatility::HighVolatilityStrategy;
use crate::strategy::ScreenStrategy;
use crate::trend_template::TrendTemplateStrategy;
use analysis_core::ScreenError;
use std::collections::BTreeMap;
use std::sync::Arc;

type StrategyFactory = Box<dyn Fn() -> Arc<dyn ScreenStrategy> + Send + Sync>;

/// Name to factory map. Every lookup builds a fresh strategy instance.
#[derive(Default)]
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        register_default_strategies(&mut registry);
        registry
    }

    /// Register `factory` under `name`, replacing any earlier registration.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn ScreenStrategy> + Send + Sync + 'static,
    {
        if self.factories.insert(name.to_string(), Box::new(factory)).is_some() {
            tracing::debug!("Strategy '{}' re-registered", name);
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ScreenStrategy>, ScreenError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ScreenError::UnknownStrategy {
                name: name.to_string(),
                available: self.names(),
            })
    }

    /// Resolve every name, failing on the first unknown one.
    pub fn get_many<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<dyn ScreenStrategy>>, ScreenError> {
        names.iter().map(|n| self.get(n.as_ref())).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

pub fn register_default_strategies(registry: &mut StrategyRegistry) {
    registry.register("canslim", || Arc::new(CanslimStrategy::new()));
    registry.register("trend_template", || Arc::new(TrendTemplateStrategy::new()));
    registry.register("high_volatility", || Arc::new(HighVolatilityStrategy::new()));
}
