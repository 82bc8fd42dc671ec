//! Name-to-extractor registry

use std::collections::BTreeMap;
use std::sync::Arc;

use graphwright_core::RepoType;

use super::{AnsibleExtractor, Extractor, GenericExtractor, PythonExtractor};
use crate::error::{IngestError, Result};

/// Builds a fresh extractor instance
pub type ExtractorFactory = Arc<dyn Fn() -> Arc<dyn Extractor> + Send + Sync>;

/// Explicitly constructed registry of extractor factories.
///
/// Built once at startup and passed to whatever needs to pick an
/// extractor; there is no global lookup.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    factories: BTreeMap<String, ExtractorFactory>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the ansible, python and generic extractors
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(RepoType::Ansible.as_str(), Arc::new(|| Arc::new(AnsibleExtractor::new()) as Arc<dyn Extractor>));
        registry.register(RepoType::Python.as_str(), Arc::new(|| Arc::new(PythonExtractor::new()) as Arc<dyn Extractor>));
        registry.register(RepoType::Generic.as_str(), Arc::new(|| Arc::new(GenericExtractor::new()) as Arc<dyn Extractor>));
        registry
    }

    /// Register a factory, replacing any previous one under the same name
    pub fn register(&mut self, name: impl Into<String>, factory: ExtractorFactory) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            tracing::debug!("Replaced extractor factory '{}'", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<ExtractorFactory> {
        self.factories.get(name).cloned()
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn Extractor>> {
        self.get(name)
            .map(|factory| factory())
            .ok_or_else(|| IngestError::UnknownExtractor(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_registered() {
        let registry = ExtractorRegistry::with_builtins();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["ansible", "generic", "python"]);
        for repo_type in RepoType::ALL {
            let extractor = registry.create(repo_type.as_str()).unwrap();
            assert_eq!(extractor.repo_type(), repo_type);
        }
    }

    #[test]
    fn test_unknown_name() {
        let registry = ExtractorRegistry::with_builtins();
        assert!(matches!(
            registry.create("ruby"),
            Err(IngestError::UnknownExtractor(name)) if name == "ruby"
        ));
    }

    #[test]
    fn test_register_overrides() {
        let mut registry = ExtractorRegistry::new();
        registry.register("python", Arc::new(|| Arc::new(GenericExtractor::new()) as Arc<dyn Extractor>));
        assert_eq!(registry.create("python").unwrap().name(), "generic");
    }
}
