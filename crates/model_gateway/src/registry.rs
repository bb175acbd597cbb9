//! In-memory model registry.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use switchyard_core::{
    types::{Capability, ModelConfig, ModelStatus},
    Error, Result,
};

/// Registered model with its registration position.
#[derive(Debug, Clone)]
struct RegisteredModel {
    config: ModelConfig,
    /// Position used as the final routing tie-break.
    seq: u64,
}

/// Filter for [`ModelRegistry::list`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelFilter {
    pub status: Option<ModelStatus>,
    pub capability: Option<Capability>,
}

impl ModelFilter {
    /// Only active models.
    pub fn active() -> Self {
        Self {
            status: Some(ModelStatus::Active),
            capability: None,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    fn matches(&self, model: &ModelConfig) -> bool {
        self.status.map_or(true, |s| model.status == s)
            && self
                .capability
                .map_or(true, |c| model.capabilities.supports(c))
    }
}

/// Catalog of model configurations keyed by `model_id`.
///
/// Each key is guarded by its own shard lock, so readers of one model never
/// wait on writers of another.
pub struct ModelRegistry {
    models: DashMap<String, RegisteredModel>,
    next_seq: AtomicU64,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            models: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Insert or replace a model. The last writer wins; a replaced model
    /// keeps its original registration position.
    pub fn register(&self, config: ModelConfig) {
        match self.models.entry(config.model_id.clone()) {
            Entry::Occupied(mut entry) => {
                tracing::debug!(model = %config.model_id, "Replacing registered model");
                entry.get_mut().config = config;
            }
            Entry::Vacant(entry) => {
                tracing::debug!(model = %config.model_id, provider = %config.provider, "Registering model");
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                entry.insert(RegisteredModel { config, seq });
            }
        }
    }

    /// Get a model by id.
    pub fn get(&self, model_id: &str) -> Result<ModelConfig> {
        self.models
            .get(model_id)
            .map(|entry| entry.config.clone())
            .ok_or_else(|| Error::not_found(format!("model '{}'", model_id)))
    }

    /// List models matching `filter` in registration order.
    pub fn list(&self, filter: &ModelFilter) -> Vec<ModelConfig> {
        let mut matching: Vec<(u64, ModelConfig)> = self
            .models
            .iter()
            .filter(|entry| filter.matches(&entry.config))
            .map(|entry| (entry.seq, entry.config.clone()))
            .collect();
        matching.sort_by_key(|(seq, _)| *seq);
        matching.into_iter().map(|(_, config)| config).collect()
    }

    /// Change the status of a registered model.
    pub fn set_status(&self, model_id: &str, status: ModelStatus) -> Result<()> {
        let mut entry = self
            .models
            .get_mut(model_id)
            .ok_or_else(|| Error::not_found(format!("model '{}'", model_id)))?;
        if entry.config.status != status {
            tracing::info!(model = model_id, from = ?entry.config.status, to = ?status, "Model status changed");
            entry.config.status = status;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_then_get() {
        let registry = ModelRegistry::new();
        let model = ModelConfig::new("gpt-4o-mini", "openai").with_pricing(0.15, 0.6);
        registry.register(model.clone());

        assert_eq!(registry.get("gpt-4o-mini").unwrap(), model);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let registry = ModelRegistry::new();
        assert!(matches!(registry.get("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_reregister_last_write_wins() {
        let registry = ModelRegistry::new();
        registry.register(ModelConfig::new("a", "p1"));
        registry.register(ModelConfig::new("b", "p1"));
        registry.register(ModelConfig::new("a", "p2").with_limits(128_000, 8192));

        let a = registry.get("a").unwrap();
        assert_eq!(a.provider, "p2");
        assert_eq!(a.context_window, 128_000);
        assert_eq!(registry.len(), 2);

        // Replacement keeps the original position.
        let ids: Vec<_> = registry
            .list(&ModelFilter::default())
            .into_iter()
            .map(|m| m.model_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_list_filters() {
        let registry = ModelRegistry::new();
        registry.register(ModelConfig::new("vision", "p").with_capability(Capability::Vision));
        registry.register(ModelConfig::new("old", "p").with_status(ModelStatus::Deprecated));
        registry.register(ModelConfig::new("plain", "p"));

        let active = registry.list(&ModelFilter::active());
        assert_eq!(active.len(), 2);

        let vision = registry.list(&ModelFilter::active().with_capability(Capability::Vision));
        assert_eq!(vision.len(), 1);
        assert_eq!(vision[0].model_id, "vision");

        let deprecated = registry.list(&ModelFilter {
            status: Some(ModelStatus::Deprecated),
            capability: None,
        });
        assert_eq!(deprecated[0].model_id, "old");
    }

    #[test]
    fn test_set_status() {
        let registry = ModelRegistry::new();
        registry.register(ModelConfig::new("a", "p"));

        registry.set_status("a", ModelStatus::Disabled).unwrap();
        assert_eq!(registry.get("a").unwrap().status, ModelStatus::Disabled);
        assert!(registry.set_status("missing", ModelStatus::Active).is_err());
    }
}
