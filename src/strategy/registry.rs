use std::collections::BTreeMap;
use std::sync::Arc;

use super::{BbTrend, PatternRsiTrend, RsiReversal, SignalEvaluator};
use crate::error::TraderError;
use crate::Result;

/// Name -> evaluator lookup used to resolve the deployment's `strategy` field
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    evaluators: BTreeMap<String, Arc<dyn SignalEvaluator>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with every built-in evaluator
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PatternRsiTrend));
        registry.register(Arc::new(BbTrend));
        registry.register(Arc::new(RsiReversal));
        registry
    }

    /// Add or replace an evaluator under its own name
    pub fn register(&mut self, evaluator: Arc<dyn SignalEvaluator>) {
        self.evaluators
            .insert(evaluator.name().to_string(), evaluator);
    }

    pub fn names(&self) -> Vec<&str> {
        self.evaluators.keys().map(String::as_str).collect()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn SignalEvaluator>> {
        self.evaluators
            .get(name)
            .cloned()
            .ok_or_else(|| TraderError::UnknownStrategy {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("evaluators", &self.names())
            .finish()
    }
}
