//! Command descriptors and the handler contract
//!
//! A handler runs synchronously on the dispatch path. Work that has to wait on
//! the environment is handed back as [`CommandOutcome::Pending`] and driven by
//! the dispatcher on the runtime, so the next message is not held up.

use crate::permission::{Level, GUEST};
use futures::future::BoxFuture;
use herald_api::EnvironmentError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Errors a handler can fail with
///
/// These are unexpected faults. Expected negative outcomes (bad arguments,
/// missing target) are reported through [`CommandOutcome::Rejected`].
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Environment action failed: {0}")]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Asynchronous continuation of a handler
pub type PendingAction = BoxFuture<'static, Result<(), CommandError>>;

/// What a handler did with a call
pub enum CommandOutcome {
    /// Finished; any replies were already sent
    Done,
    /// Refused with a user-facing reason, sent back as a notice
    Rejected(String),
    /// Accepted; the continuation runs in the background
    Pending(PendingAction),
}

impl CommandOutcome {
    pub fn rejected(reason: impl Into<String>) -> Self {
        CommandOutcome::Rejected(reason.into())
    }

    pub fn pending<F>(action: F) -> Self
    where
        F: Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        CommandOutcome::Pending(Box::pin(action))
    }
}

impl fmt::Debug for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Done => f.write_str("Done"),
            CommandOutcome::Rejected(reason) => f.debug_tuple("Rejected").field(reason).finish(),
            CommandOutcome::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// A parsed invocation: who called, with which arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCall {
    pub actor: String,
    pub args: Vec<String>,
}

impl CommandCall {
    pub fn new(actor: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            actor: actor.into(),
            args,
        }
    }

    /// The `index`-th argument
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

/// Handler behind a command name
pub trait CommandHandler: Send + Sync {
    fn execute(&self, call: CommandCall) -> Result<CommandOutcome, CommandError>;
}

impl<F> CommandHandler for F
where
    F: Fn(CommandCall) -> Result<CommandOutcome, CommandError> + Send + Sync,
{
    fn execute(&self, call: CommandCall) -> Result<CommandOutcome, CommandError> {
        self(call)
    }
}

/// A registered command
#[derive(Clone)]
pub struct CommandDescriptor {
    name: String,
    required_level: Level,
    description: String,
    handler: Arc<dyn CommandHandler>,
}

impl CommandDescriptor {
    /// Create a descriptor open to everyone (level 0) with no description
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CommandCall) -> Result<CommandOutcome, CommandError> + Send + Sync + 'static,
    {
        Self::with_handler(name, handler)
    }

    /// Create a descriptor around any [`CommandHandler`] implementation
    pub fn with_handler(name: impl Into<String>, handler: impl CommandHandler + 'static) -> Self {
        Self {
            name: name.into(),
            required_level: GUEST,
            description: String::new(),
            handler: Arc::new(handler),
        }
    }

    /// Set the minimum level needed to run the command
    pub fn level(mut self, level: Level) -> Self {
        self.required_level = level;
        self
    }

    /// Set the help text
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required_level(&self) -> Level {
        self.required_level
    }

    pub fn about(&self) -> &str {
        &self.description
    }

    pub fn handler(&self) -> &Arc<dyn CommandHandler> {
        &self.handler
    }

    pub(crate) fn normalize_name(&mut self) {
        self.name = self.name.trim().to_lowercase();
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("required_level", &self.required_level)
            .field("description", &self.description)
            .finish()
    }
}
