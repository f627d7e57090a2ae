//! Extension loading
//!
//! Loads the configured extensions in order. Each one is isolated: a missing
//! entry, a broken config file or a failing `register` is logged and the
//! next extension still loads.

use crate::audit::{record_quietly, AuditEvent, AuditEventType};
use crate::config::ExtensionConfig;
use crate::context::{ExtensionContext, Services};
use crate::extension::{Extension, ExtensionCatalog, ExtensionError};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

/// File holding an extension's private config, inside its directory
pub const EXTENSION_CONFIG_FILE: &str = "config.json";

/// Why an extension was not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Listed more than once; only the first entry loads
    Duplicate,
    /// No factory registered under this name
    NoEntryPoint,
}

/// An extension that registered successfully
pub struct LoadedExtension {
    pub name: String,
    pub instance: Box<dyn Extension>,
}

impl std::fmt::Debug for LoadedExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedExtension")
            .field("name", &self.name)
            .finish()
    }
}

/// Result of loading a list of extensions
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Registered successfully, in load order
    pub loaded: Vec<LoadedExtension>,

    /// Never attempted
    pub skipped: Vec<(String, SkipReason)>,

    /// Attempted and failed
    pub failed: Vec<(String, ExtensionError)>,
}

impl LoadReport {
    /// Returns true if nothing was skipped or failed
    pub fn is_success(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }

    /// Number of names processed
    pub fn total(&self) -> usize {
        self.loaded.len() + self.skipped.len() + self.failed.len()
    }

    /// Names of the loaded extensions
    pub fn loaded_names(&self) -> Vec<&str> {
        self.loaded.iter().map(|e| e.name.as_str()).collect()
    }
}

/// Loads extensions from a catalog
#[derive(Debug, Clone)]
pub struct ExtensionLoader {
    extensions_dir: PathBuf,
    catalog: ExtensionCatalog,
}

impl ExtensionLoader {
    /// `extensions_dir` holds one directory per extension for its config
    pub fn new(extensions_dir: impl Into<PathBuf>, catalog: ExtensionCatalog) -> Self {
        Self {
            extensions_dir: extensions_dir.into(),
            catalog,
        }
    }

    pub fn extensions_dir(&self) -> &Path {
        &self.extensions_dir
    }

    pub fn catalog(&self) -> &ExtensionCatalog {
        &self.catalog
    }

    /// Config path for extension `name`
    pub fn config_path(&self, name: &str) -> PathBuf {
        self.extensions_dir.join(name).join(EXTENSION_CONFIG_FILE)
    }

    /// Load `names` in order against `services`
    pub fn load_all<I, S>(&self, names: I, services: &Services) -> LoadReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = LoadReport::default();
        let mut seen = HashSet::new();

        for name in names {
            let name = name.as_ref();

            if !seen.insert(name.to_string()) {
                tracing::warn!(extension = %name, "Extension listed more than once, skipping");
                report.skipped.push((name.to_string(), SkipReason::Duplicate));
                continue;
            }

            let Some(factory) = self.catalog.factory(name) else {
                tracing::warn!(extension = %name, "No such extension, skipping");
                report.skipped.push((name.to_string(), SkipReason::NoEntryPoint));
                continue;
            };

            let config = ExtensionConfig::load(self.config_path(name));
            if !config.is_empty() {
                tracing::debug!(extension = %name, "Extension config loaded");
            }
            let ctx = ExtensionContext::new(name, config, services.clone());

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let instance = factory();
                instance.register(&ctx).map(|()| instance)
            }));

            match result {
                Ok(Ok(instance)) => {
                    tracing::info!(extension = %name, "Extension loaded");
                    record_quietly(
                        services.audit.as_ref(),
                        AuditEvent::new(AuditEventType::ExtensionLoaded).with_extension(name),
                    );
                    report.loaded.push(LoadedExtension {
                        name: name.to_string(),
                        instance,
                    });
                }
                Ok(Err(e)) => self.record_failure(services, &mut report, name, e),
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    self.record_failure(services, &mut report, name, ExtensionError::Panicked(message));
                }
            }
        }

        tracing::info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Extension loading finished"
        );
        report
    }

    fn record_failure(
        &self,
        services: &Services,
        report: &mut LoadReport,
        name: &str,
        error: ExtensionError,
    ) {
        tracing::error!(extension = %name, error = %error, "Failed to load extension");
        record_quietly(
            services.audit.as_ref(),
            AuditEvent::new(AuditEventType::ExtensionFailed)
                .with_extension(name)
                .with_detail(error.to_string()),
        );
        report.failed.push((name.to_string(), error));
    }
}
