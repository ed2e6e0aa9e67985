//! Source Registry (§4.3): owns the mapping from source id to capability
//! metadata plus adapter instance. Read-only after construction; disabled or
//! unregistered sources are invisible to the rest of the agent.

use std::collections::HashMap;
use std::sync::Arc;

use recon_core::model::SourceCapability;
use recon_core::source::SourceAdapter;

/// An enabled source: its static capability metadata plus a shared handle to
/// the adapter instance.
#[derive(Clone)]
pub struct RegisteredSource {
    /// Capability metadata.
    pub capability: SourceCapability,
    /// Shared adapter instance.
    pub adapter: Arc<dyn SourceAdapter>,
}

impl std::fmt::Debug for RegisteredSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredSource")
            .field("id", &self.capability.id)
            .finish_non_exhaustive()
    }
}

/// Enumerates available sources and hands out adapter instances, honoring
/// per-source enable/disable (§6.4 `databases.<source_id>.enabled`).
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, RegisteredSource>,
}

impl SourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source. Last registration for a given id wins.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        let capability = adapter.metadata().clone();
        self.sources.insert(
            capability.id.clone(),
            RegisteredSource { capability, adapter },
        );
    }

    /// Removes a source from the registry, making it invisible to the agent
    /// for the rest of the process lifetime (`databases.<id>.enabled = false`).
    pub fn disable(&mut self, source_id: &str) {
        self.sources.remove(source_id);
    }

    /// Capability metadata for every currently enabled source.
    #[must_use]
    pub fn enabled_sources(&self) -> Vec<SourceCapability> {
        let mut caps: Vec<SourceCapability> =
            self.sources.values().map(|s| s.capability.clone()).collect();
        caps.sort_by(|a, b| a.id.cmp(&b.id));
        caps
    }

    /// Looks up an enabled source by id.
    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<RegisteredSource> {
        self.sources.get(source_id).cloned()
    }

    /// Whether `source_id` is currently enabled.
    #[must_use]
    pub fn contains(&self, source_id: &str) -> bool {
        self.sources.contains_key(source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::mock_source;

    #[test]
    fn disabled_sources_are_invisible() {
        let mut registry = SourceRegistry::new();
        registry.register(mock_source("gov", []));
        assert!(registry.contains("gov"));

        registry.disable("gov");
        assert!(!registry.contains("gov"));
        assert!(registry.get("gov").is_none());
        assert!(registry.enabled_sources().is_empty());
    }

    #[test]
    fn enabled_sources_are_sorted_by_id() {
        let mut registry = SourceRegistry::new();
        registry.register(mock_source("zeta", []));
        registry.register(mock_source("alpha", []));
        let ids: Vec<String> = registry.enabled_sources().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
