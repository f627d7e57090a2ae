//! Extension contract and the startup catalog
//!
//! Extensions are compiled in. The catalog maps the names used in the root
//! config to factories; the loader looks names up here instead of on disk.

use crate::config::ConfigError;
use crate::context::ExtensionContext;
use crate::registry::RegistryError;
use crate::task::TaskError;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors an extension can fail to register with
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("Extension panicked during registration: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A unit of functionality that registers commands and subscriptions
pub trait Extension: Send + Sync {
    /// Wire the extension into the host
    ///
    /// Called once. Anything the extension needs after this returns must be
    /// captured by the handlers and listeners it registers.
    fn register(&self, ctx: &ExtensionContext) -> Result<(), ExtensionError>;
}

impl<F> Extension for F
where
    F: Fn(&ExtensionContext) -> Result<(), ExtensionError> + Send + Sync,
{
    fn register(&self, ctx: &ExtensionContext) -> Result<(), ExtensionError> {
        self(ctx)
    }
}

/// Builds a fresh extension instance
pub type ExtensionFactory = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Names the host knows how to load
#[derive(Clone, Default)]
pub struct ExtensionCatalog {
    factories: HashMap<String, ExtensionFactory>,
}

impl ExtensionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory, builder style
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        self.insert(name, factory);
        self
    }

    /// Add a factory; a later entry for the same name wins
    pub fn insert<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            tracing::warn!(extension = %name, "Extension already in catalog, overwriting");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// The factory for `name`
    pub fn factory(&self, name: &str) -> Option<ExtensionFactory> {
        self.factories.get(name).cloned()
    }

    /// Sorted names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for ExtensionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionCatalog")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Box<dyn Extension> {
        Box::new(|_: &ExtensionContext| Ok::<(), ExtensionError>(()))
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = ExtensionCatalog::new()
            .with("navigator", noop)
            .with("core-commands", noop);

        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("navigator"));
        assert!(!catalog.contains("Navigator"));
        assert!(catalog.factory("missing").is_none());
        assert_eq!(catalog.names(), vec!["core-commands", "navigator"]);
    }
}
