//! Command registry
//!
//! Maps command names to descriptors. Extensions write to it while they are
//! being loaded; after that the dispatcher only reads. Names are stored
//! lowercased so lookup is case-insensitive.

use crate::audit::{record_quietly, AuditEvent, AuditEventType, AuditSink, NullAuditSink};
use crate::command::CommandDescriptor;
use crate::permission::Level;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A shared registry of commands
#[derive(Clone)]
pub struct CommandRegistry {
    commands: Arc<RwLock<HashMap<String, CommandDescriptor>>>,
    audit: Arc<dyn AuditSink>,
}

/// What `register` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The name was free
    Added,
    /// An earlier descriptor under the same name was overwritten
    Replaced,
}

impl CommandRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::with_audit(Arc::new(NullAuditSink))
    }

    /// Create an empty registry that records registrations to `audit`
    pub fn with_audit(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            commands: Arc::new(RwLock::new(HashMap::new())),
            audit,
        }
    }

    /// Register a command, overwriting any previous one with the same name
    pub fn register(
        &self,
        mut descriptor: CommandDescriptor,
    ) -> Result<RegisterOutcome, RegistryError> {
        descriptor.normalize_name();
        let name = descriptor.name().to_string();

        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if name.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidName(name));
        }

        let level = descriptor.required_level();
        let previous = self
            .commands
            .write()
            .unwrap()
            .insert(name.clone(), descriptor);

        let outcome = match previous {
            Some(old) => {
                tracing::warn!(
                    command = %name,
                    old_level = old.required_level(),
                    new_level = level,
                    "Command already registered, overwriting"
                );
                record_quietly(
                    self.audit.as_ref(),
                    AuditEvent::new(AuditEventType::CommandReplaced).with_command(&name),
                );
                RegisterOutcome::Replaced
            }
            None => {
                record_quietly(
                    self.audit.as_ref(),
                    AuditEvent::new(AuditEventType::CommandRegistered).with_command(&name),
                );
                RegisterOutcome::Added
            }
        };

        tracing::info!(command = %name, required_level = level, "Command registered");
        Ok(outcome)
    }

    /// Look up a command by name, ignoring case
    pub fn get(&self, name: &str) -> Option<CommandDescriptor> {
        self.commands
            .read()
            .unwrap()
            .get(&name.to_lowercase())
            .cloned()
    }

    /// Check if a command exists
    pub fn contains(&self, name: &str) -> bool {
        self.commands
            .read()
            .unwrap()
            .contains_key(&name.to_lowercase())
    }

    /// All commands, sorted by name
    pub fn list(&self) -> Vec<CommandDescriptor> {
        let mut commands: Vec<CommandDescriptor> =
            self.commands.read().unwrap().values().cloned().collect();
        commands.sort_by(|a, b| a.name().cmp(b.name()));
        commands
    }

    /// Commands an actor at `level` may run, sorted by name
    pub fn visible_to(&self, level: Level) -> Vec<CommandDescriptor> {
        self.list()
            .into_iter()
            .filter(|cmd| cmd.required_level() <= level)
            .collect()
    }

    /// Sorted command names
    pub fn names(&self) -> Vec<String> {
        self.list().iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.read().unwrap().is_empty()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

/// Errors that can occur during registration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Command name must not be empty")]
    EmptyName,

    #[error("Command name must not contain whitespace: '{0}'")]
    InvalidName(String),
}
