//! Framework root
//!
//! Owns the permission store, the command registry and the lifecycle bus,
//! loads the configured extensions and then consumes environment events one
//! at a time: chat lines go to the dispatcher in arrival order, everything
//! else is relayed on the lifecycle bus.

use crate::audit::{AuditSink, FileAuditSink, NullAuditSink};
use crate::config::RootConfig;
use crate::context::Services;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::extension::ExtensionCatalog;
use crate::lifecycle::{
    LifecycleBus, ENVIRONMENT_CONNECTED, ENVIRONMENT_DISCONNECTED, ENVIRONMENT_FAULT,
    ENVIRONMENT_JOINED, ENVIRONMENT_KICKED, FRAMEWORK_READY,
};
use crate::loader::{ExtensionLoader, LoadReport};
use crate::permission::PermissionStore;
use herald_api::{Environment, EnvironmentEvent};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Why `run` returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shutdown {
    /// The environment reported the connection closed
    Disconnected(String),
    /// The event channel closed without a disconnect
    ChannelClosed,
}

/// Wires the host together and drives it
pub struct Framework {
    services: Services,
    dispatcher: Dispatcher,
    extensions: LoadReport,
    extensions_loaded: bool,
    joined: bool,
    ready_emitted: bool,
}

impl Framework {
    /// Bare framework around `services`, no extensions loaded yet
    pub fn new(services: Services) -> Self {
        let dispatcher = Dispatcher::new(
            services.prefix.clone(),
            services.commands.clone(),
            services.permissions.clone(),
            services.environment.clone(),
        )
        .with_audit(services.audit.clone());

        Self {
            services,
            dispatcher,
            extensions: LoadReport::default(),
            extensions_loaded: false,
            joined: false,
            ready_emitted: false,
        }
    }

    /// Build everything `config` describes and load its extensions
    ///
    /// Nothing here is fatal: an unreadable permission file or audit log
    /// falls back to a default and is logged.
    pub fn from_config(
        config: &RootConfig,
        environment: Arc<dyn Environment>,
        catalog: ExtensionCatalog,
    ) -> Self {
        let (permissions, _status) = PermissionStore::load(&config.permissions_file);
        let audit = open_audit(config);
        let services = Services::with_audit(environment, Arc::new(permissions), audit)
            .with_prefix(config.command_prefix.clone());

        let mut framework = Self::new(services);
        let loader = ExtensionLoader::new(&config.extensions_dir, catalog);
        framework.load_extensions(&loader, &config.extensions);
        framework
    }

    /// Load `names` through `loader`
    ///
    /// Only the first call has an effect.
    pub fn load_extensions<S: AsRef<str>>(&mut self, loader: &ExtensionLoader, names: &[S]) {
        if self.extensions_loaded {
            tracing::warn!("Extensions already loaded, ignoring");
            return;
        }
        self.extensions = loader.load_all(names, &self.services);
        self.extensions_loaded = true;
        self.maybe_ready();
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn lifecycle(&self) -> &LifecycleBus {
        &self.services.lifecycle
    }

    pub fn extensions(&self) -> &LoadReport {
        &self.extensions
    }

    /// Whether `framework:ready` has been emitted
    pub fn is_ready(&self) -> bool {
        self.ready_emitted
    }

    /// Handle one environment event
    ///
    /// Returns the dispatch outcome for chat lines.
    pub fn handle_event(&mut self, event: EnvironmentEvent) -> Option<DispatchOutcome> {
        let bus = &self.services.lifecycle;
        match event {
            EnvironmentEvent::Chat { actor, text } => {
                return Some(self.dispatcher.dispatch(&actor, &text));
            }
            EnvironmentEvent::Connected => {
                let username = self.services.environment.username();
                tracing::info!(username = %username, "Logged in");
                bus.emit(ENVIRONMENT_CONNECTED, json!({ "username": username }));
            }
            EnvironmentEvent::Joined => {
                let first = !self.joined;
                self.joined = true;
                bus.emit(ENVIRONMENT_JOINED, json!({ "first": first }));
                self.maybe_ready();
            }
            EnvironmentEvent::Kicked { reason } => {
                tracing::error!(reason = %reason, "Kicked from the environment");
                bus.emit(ENVIRONMENT_KICKED, json!({ "reason": reason }));
            }
            EnvironmentEvent::Disconnected { reason } => {
                tracing::info!(reason = %reason, "Connection closed");
                bus.emit(ENVIRONMENT_DISCONNECTED, json!({ "reason": reason }));
            }
            EnvironmentEvent::Fault { message } => {
                tracing::error!(error = %message, "Environment fault");
                bus.emit(ENVIRONMENT_FAULT, json!({ "message": message }));
            }
        }
        None
    }

    /// Consume events until the connection closes
    pub async fn run(mut self, mut events: mpsc::Receiver<EnvironmentEvent>) -> Shutdown {
        while let Some(event) = events.recv().await {
            let disconnect = match &event {
                EnvironmentEvent::Disconnected { reason } => Some(reason.clone()),
                _ => None,
            };
            self.handle_event(event);
            if let Some(reason) = disconnect {
                self.flush_audit();
                return Shutdown::Disconnected(reason);
            }
        }
        self.flush_audit();
        Shutdown::ChannelClosed
    }

    fn maybe_ready(&mut self) {
        if self.ready_emitted || !self.joined || !self.extensions_loaded {
            return;
        }
        self.ready_emitted = true;
        tracing::info!(
            extensions = self.extensions.loaded.len(),
            commands = self.services.commands.len(),
            "Framework ready"
        );
        self.services.lifecycle.emit(FRAMEWORK_READY, json!({}));
    }

    fn flush_audit(&self) {
        if let Err(e) = self.services.audit.flush() {
            tracing::warn!(error = %e, "Failed to flush audit log");
        }
    }
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("dispatcher", &self.dispatcher)
            .field("extensions", &self.extensions.loaded_names())
            .field("ready", &self.ready_emitted)
            .finish()
    }
}

fn open_audit(config: &RootConfig) -> Arc<dyn AuditSink> {
    let Some(path) = config.audit_log.as_ref() else {
        return Arc::new(NullAuditSink);
    };
    match FileAuditSink::open(path) {
        Ok(sink) => {
            tracing::info!(path = %path.display(), "Audit log opened");
            Arc::new(sink)
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to open audit log, auditing disabled");
            Arc::new(NullAuditSink)
        }
    }
}
