//! Services shared with extensions
//!
//! The framework root owns one [`Services`] bundle. Each extension gets an
//! [`ExtensionContext`] that adds its own name and private config on top.

use crate::audit::{AuditSink, NullAuditSink};
use crate::command::CommandDescriptor;
use crate::config::{ExtensionConfig, DEFAULT_PREFIX};
use crate::lifecycle::LifecycleBus;
use crate::permission::PermissionStore;
use crate::registry::{CommandRegistry, RegisterOutcome, RegistryError};
use herald_api::Environment;
use std::sync::Arc;

/// Everything the host exposes to extensions
#[derive(Clone)]
pub struct Services {
    pub environment: Arc<dyn Environment>,
    /// Prefix chat lines need to be treated as commands
    pub prefix: String,
    pub commands: CommandRegistry,
    pub permissions: Arc<PermissionStore>,
    pub lifecycle: LifecycleBus,
    pub audit: Arc<dyn AuditSink>,
}

impl Services {
    /// Fresh registry and bus, no auditing
    pub fn new(environment: Arc<dyn Environment>, permissions: Arc<PermissionStore>) -> Self {
        Self::with_audit(environment, permissions, Arc::new(NullAuditSink))
    }

    /// Fresh registry and bus recording to `audit`
    pub fn with_audit(
        environment: Arc<dyn Environment>,
        permissions: Arc<PermissionStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            environment,
            prefix: DEFAULT_PREFIX.to_string(),
            commands: CommandRegistry::with_audit(audit.clone()),
            permissions,
            lifecycle: LifecycleBus::new(),
            audit,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("username", &self.environment.username())
            .field("prefix", &self.prefix)
            .field("commands", &self.commands)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

/// What one extension sees while registering
#[derive(Debug, Clone)]
pub struct ExtensionContext {
    name: String,
    config: ExtensionConfig,
    services: Services,
}

impl ExtensionContext {
    pub fn new(name: impl Into<String>, config: ExtensionConfig, services: Services) -> Self {
        Self {
            name: name.into(),
            config,
            services,
        }
    }

    /// The name the extension was loaded under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This extension's private config
    pub fn config(&self) -> &ExtensionConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.services.environment
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.services.commands
    }

    pub fn permissions(&self) -> &Arc<PermissionStore> {
        &self.services.permissions
    }

    pub fn lifecycle(&self) -> &LifecycleBus {
        &self.services.lifecycle
    }

    /// Register a command on behalf of this extension
    pub fn register(&self, descriptor: CommandDescriptor) -> Result<RegisterOutcome, RegistryError> {
        let name = descriptor.name().to_string();
        let outcome = self.services.commands.register(descriptor)?;
        tracing::debug!(extension = %self.name, command = %name, ?outcome, "Extension registered command");
        Ok(outcome)
    }
}
