//! Backend registry mapping backend names to constructors.
//!
//! The [`BackendRegistry`] is populated explicitly at start-up; lookups are
//! case-insensitive.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::BatchBackend;
use crate::error::{SchedError, SchedResult};
use crate::htcondor::{HTCONDOR_BACKEND, HtCondorAdapter, HtCondorConfig};
use crate::lsf::{LSF_BACKEND, LsfAdapter, LsfConfig};
use crate::process::ProcessRunner;

/// Per-backend configuration handed to the factories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub htcondor: HtCondorConfig,
    pub lsf: LsfConfig,
}

/// Factory function type for backends.
type BackendFactory = Box<
    dyn Fn(&BackendSettings, Arc<dyn ProcessRunner>) -> SchedResult<Box<dyn BatchBackend>>
        + Send
        + Sync,
>;

/// Central registry of batch backends.
pub struct BackendRegistry {
    /// Factories keyed by lowercased name.
    factories: FxHashMap<String, (String, BackendFactory)>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: FxHashMap::default(),
        }
    }

    /// Registry with the HTCondor and LSF adapters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_factory(HTCONDOR_BACKEND, |settings, runner| {
            Ok(Box::new(HtCondorAdapter::new(settings.htcondor.clone(), runner)))
        });
        registry.register_factory(LSF_BACKEND, |settings, runner| {
            Ok(Box::new(LsfAdapter::new(settings.lsf.clone(), runner)))
        });
        registry
    }

    /// Register a backend factory.
    pub fn register_factory(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&BackendSettings, Arc<dyn ProcessRunner>) -> SchedResult<Box<dyn BatchBackend>>
        + Send
        + Sync
        + 'static,
    ) {
        let name = name.into();
        debug!("Registering backend: {}", name);
        self.factories
            .insert(name.to_lowercase(), (name, Box::new(factory)));
    }

    /// Create a backend by name.
    pub fn create(
        &self,
        name: &str,
        settings: &BackendSettings,
        runner: Arc<dyn ProcessRunner>,
    ) -> SchedResult<Box<dyn BatchBackend>> {
        match self.factories.get(&name.to_lowercase()) {
            Some((_, factory)) => factory(settings, runner),
            None => Err(SchedError::BackendNotFound(format!(
                "no backend registered with name '{}' (available: {})",
                name,
                self.available_backends().join(", ")
            ))),
        }
    }

    /// Registered backend names, sorted.
    pub fn available_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .values()
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_lowercase())
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ScriptedRunner;

    #[test]
    fn test_builtins() {
        let registry = BackendRegistry::with_builtins();
        assert_eq!(registry.available_backends(), vec!["HTCondor", "LSF"]);
        assert!(registry.has_backend("htcondor"));
        assert!(registry.has_backend("Lsf"));
        assert!(!registry.has_backend("slurm"));
    }

    #[test]
    fn test_create_case_insensitive() {
        let registry = BackendRegistry::default();
        let runner: Arc<dyn ProcessRunner> = Arc::new(ScriptedRunner::new());
        let backend = registry
            .create("HTCONDOR", &BackendSettings::default(), Arc::clone(&runner))
            .unwrap();
        assert_eq!(backend.backend_type(), "HTCondor");
        let backend = registry
            .create("lsf", &BackendSettings::default(), runner)
            .unwrap();
        assert_eq!(backend.backend_type(), "LSF");
    }

    #[test]
    fn test_unknown_backend() {
        let registry = BackendRegistry::with_builtins();
        let runner: Arc<dyn ProcessRunner> = Arc::new(ScriptedRunner::new());
        let err = registry
            .create("PBS", &BackendSettings::default(), runner)
            .err()
            .unwrap();
        assert!(matches!(err, SchedError::BackendNotFound(_)));
        assert!(err.to_string().contains("HTCondor, LSF"));
    }

    #[test]
    fn test_custom_factory() {
        let mut registry = BackendRegistry::new();
        registry.register_factory("Local", |settings, runner| {
            Ok(Box::new(LsfAdapter::new(settings.lsf.clone(), runner)))
        });
        assert_eq!(registry.available_backends(), vec!["Local"]);
    }
}
