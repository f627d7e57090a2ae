//! Chat command dispatcher
//!
//! Turns one incoming chat line into at most one handler invocation:
//!
//! 1. drop the agent's own lines and lines without the prefix
//! 2. split the rest on whitespace; the first token (lowercased) is the name
//! 3. unknown name: one notice
//! 4. caller below the required level: one notice with both levels
//! 5. otherwise run the handler, containing any error or panic
//!
//! Every decision is returned as a [`DispatchOutcome`] so callers and tests
//! can tell the cases apart without parsing chat text.

use crate::audit::{record_quietly, AuditEvent, AuditEventType, AuditSink, NullAuditSink};
use crate::command::{CommandCall, CommandError, CommandOutcome, PendingAction};
use crate::permission::{Level, PermissionStore};
use crate::registry::CommandRegistry;
use futures::FutureExt;
use herald_api::Environment;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Notice sent for names nobody registered
pub const UNKNOWN_COMMAND_NOTICE: &str = "> Unknown command.";

/// Notice sent when a handler fails unexpectedly
pub const EXECUTION_FAILED_NOTICE: &str = "> Command execution failed.";

/// Notice sent when the caller's level is too low
pub fn denied_notice(required: Level, actual: Level) -> String {
    format!(
        "> Permission denied: need level {}, you have level {}.",
        required, actual
    )
}

/// Why a line was not treated as a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Sent by the agent itself
    OwnMessage,
    /// Does not start with the command prefix
    NoPrefix,
    /// Nothing but the prefix
    Empty,
}

/// Result of dispatching one line
#[derive(Debug)]
pub enum DispatchOutcome {
    Ignored(IgnoreReason),
    UnknownCommand {
        name: String,
    },
    Denied {
        command: String,
        required: Level,
        actual: Level,
    },
    /// Handler finished synchronously
    Completed {
        command: String,
    },
    /// Handler refused the call with a user-facing reason
    Rejected {
        command: String,
        reason: String,
    },
    /// Handler accepted the call; its continuation runs on `task`
    Spawned {
        command: String,
        task: JoinHandle<()>,
    },
    /// Handler returned an error or panicked
    Failed {
        command: String,
    },
}

impl DispatchOutcome {
    /// Whether a handler was called
    pub fn invoked(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Completed { .. }
                | DispatchOutcome::Rejected { .. }
                | DispatchOutcome::Spawned { .. }
                | DispatchOutcome::Failed { .. }
        )
    }

    /// Wait for a spawned continuation, if any
    pub async fn finish(self) {
        if let DispatchOutcome::Spawned { task, .. } = self {
            let _ = task.await;
        }
    }
}

/// A command line split into name and arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
}

/// Split `raw` into a command if it starts with `prefix`
pub fn parse_command(prefix: &str, raw: &str) -> Result<ParsedCommand, IgnoreReason> {
    let body = raw.strip_prefix(prefix).ok_or(IgnoreReason::NoPrefix)?;
    let mut tokens = body.split_whitespace();
    let name = tokens.next().ok_or(IgnoreReason::Empty)?.to_lowercase();
    Ok(ParsedCommand {
        name,
        args: tokens.map(str::to_string).collect(),
    })
}

/// Routes chat lines to registered commands
#[derive(Clone)]
pub struct Dispatcher {
    prefix: String,
    registry: CommandRegistry,
    permissions: Arc<PermissionStore>,
    environment: Arc<dyn Environment>,
    audit: Arc<dyn AuditSink>,
}

impl Dispatcher {
    pub fn new(
        prefix: impl Into<String>,
        registry: CommandRegistry,
        permissions: Arc<PermissionStore>,
        environment: Arc<dyn Environment>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            registry,
            permissions,
            environment,
            audit: Arc::new(NullAuditSink),
        }
    }

    /// Record dispatch decisions to `audit`
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Dispatch one chat line from `actor`
    ///
    /// The synchronous part of the handler runs before this returns. A
    /// `Pending` continuation is spawned on the current tokio runtime and not
    /// awaited.
    pub fn dispatch(&self, actor: &str, raw: &str) -> DispatchOutcome {
        if actor == self.environment.username() {
            return DispatchOutcome::Ignored(IgnoreReason::OwnMessage);
        }

        let parsed = match parse_command(&self.prefix, raw) {
            Ok(parsed) => parsed,
            Err(reason) => return DispatchOutcome::Ignored(reason),
        };
        let ParsedCommand { name, args } = parsed;

        let Some(command) = self.registry.get(&name) else {
            tracing::debug!(actor = %actor, command = %name, "Unknown command");
            record_quietly(
                self.audit.as_ref(),
                AuditEvent::new(AuditEventType::UnknownCommand)
                    .with_actor(actor)
                    .with_command(&name),
            );
            self.environment.send_message(UNKNOWN_COMMAND_NOTICE);
            return DispatchOutcome::UnknownCommand { name };
        };

        let actual = self.permissions.level(actor);
        let required = command.required_level();
        if actual < required {
            record_quietly(
                self.audit.as_ref(),
                AuditEvent::denied(actor, &name, required, actual),
            );
            self.environment
                .send_message(&denied_notice(required, actual));
            return DispatchOutcome::Denied {
                command: name,
                required,
                actual,
            };
        }

        tracing::info!(actor = %actor, command = %name, args = ?args, "Executing command");
        record_quietly(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventType::CommandInvoked)
                .with_actor(actor)
                .with_command(&name),
        );

        let handler = command.handler().clone();
        let call = CommandCall::new(actor, args);
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.execute(call)));

        match result {
            Ok(Ok(CommandOutcome::Done)) => DispatchOutcome::Completed { command: name },
            Ok(Ok(CommandOutcome::Rejected(reason))) => {
                self.environment.send_message(&format!("> {}", reason));
                DispatchOutcome::Rejected {
                    command: name,
                    reason,
                }
            }
            Ok(Ok(CommandOutcome::Pending(action))) => self.spawn_pending(name, actor, action),
            Ok(Err(e)) => {
                report_failure(
                    self.environment.as_ref(),
                    self.audit.as_ref(),
                    &name,
                    actor,
                    &e.to_string(),
                );
                DispatchOutcome::Failed { command: name }
            }
            Err(payload) => {
                report_failure(
                    self.environment.as_ref(),
                    self.audit.as_ref(),
                    &name,
                    actor,
                    &panic_message(payload.as_ref()),
                );
                DispatchOutcome::Failed { command: name }
            }
        }
    }

    fn spawn_pending(&self, command: String, actor: &str, action: PendingAction) -> DispatchOutcome {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                report_failure(
                    self.environment.as_ref(),
                    self.audit.as_ref(),
                    &command,
                    actor,
                    &format!("no async runtime: {}", e),
                );
                return DispatchOutcome::Failed { command };
            }
        };

        let environment = self.environment.clone();
        let audit = self.audit.clone();
        let task_command = command.clone();
        let task_actor = actor.to_string();

        let task = runtime.spawn(async move {
            let result: Result<Result<(), CommandError>, Box<dyn Any + Send>> =
                AssertUnwindSafe(action).catch_unwind().await;
            let failure = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(panic_message(payload.as_ref())),
            };
            match failure {
                Some(reason) => report_failure(
                    environment.as_ref(),
                    audit.as_ref(),
                    &task_command,
                    &task_actor,
                    &reason,
                ),
                None => {
                    tracing::debug!(actor = %task_actor, command = %task_command, "Command finished")
                }
            }
        });

        DispatchOutcome::Spawned { command, task }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("prefix", &self.prefix)
            .field("registry", &self.registry)
            .finish()
    }
}

fn report_failure(
    environment: &dyn Environment,
    audit: &dyn AuditSink,
    command: &str,
    actor: &str,
    reason: &str,
) {
    tracing::error!(actor = %actor, command = %command, error = %reason, "Command execution failed");
    record_quietly(
        audit,
        AuditEvent::new(AuditEventType::ExecutionFailed)
            .with_actor(actor)
            .with_command(command)
            .with_detail(reason),
    );
    environment.send_message(EXECUTION_FAILED_NOTICE);
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::command::CommandDescriptor;
    use crate::permission::{PermissionSnapshot, UserRecord};
    use herald_api::testing::RecordingEnvironment;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        env: Arc<RecordingEnvironment>,
        audit: Arc<MemoryAuditSink>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let env = Arc::new(RecordingEnvironment::new("herald"));
        let audit = Arc::new(MemoryAuditSink::new());
        let permissions = Arc::new(PermissionStore::from_snapshot(
            PermissionSnapshot::empty()
                .with_admin("alice")
                .with_user("bob", UserRecord::with_level(1)),
        ));
        let registry = CommandRegistry::new();
        let dispatcher = Dispatcher::new("!", registry, permissions, env.clone())
            .with_audit(audit.clone());
        Fixture {
            env,
            audit,
            dispatcher,
        }
    }

    fn counting(name: &str, level: Level, hits: Arc<AtomicUsize>) -> CommandDescriptor {
        CommandDescriptor::new(name, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutcome::Done)
        })
        .level(level)
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command("!", "!LoopClick   left  200"),
            Ok(ParsedCommand {
                name: "loopclick".to_string(),
                args: vec!["left".to_string(), "200".to_string()],
            })
        );
        assert_eq!(parse_command("!", "hello"), Err(IgnoreReason::NoPrefix));
        assert_eq!(parse_command("!", "!   "), Err(IgnoreReason::Empty));
        assert_eq!(
            parse_command("::", "::ping").unwrap().name,
            "ping".to_string()
        );
    }

    #[test]
    fn test_own_messages_never_dispatch() {
        let f = fixture();
        let hits = Arc::new(AtomicUsize::new(0));
        f.dispatcher
            .registry()
            .register(counting("ping", 0, hits.clone()))
            .unwrap();

        let outcome = f.dispatcher.dispatch("herald", "!ping");
        assert!(matches!(
            outcome,
            DispatchOutcome::Ignored(IgnoreReason::OwnMessage)
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(f.env.messages().is_empty());
    }

    #[test]
    fn test_unknown_command_sends_one_notice() {
        let f = fixture();
        let outcome = f.dispatcher.dispatch("bob", "!unknowncmd");

        assert!(matches!(outcome, DispatchOutcome::UnknownCommand { ref name } if name == "unknowncmd"));
        assert_eq!(f.env.messages(), vec![UNKNOWN_COMMAND_NOTICE.to_string()]);
        assert_eq!(f.audit.of_type(AuditEventType::UnknownCommand).len(), 1);
    }

    #[test]
    fn test_denied_reports_both_levels() {
        let f = fixture();
        let hits = Arc::new(AtomicUsize::new(0));
        f.dispatcher
            .registry()
            .register(counting("loopclick", 2, hits.clone()))
            .unwrap();

        let outcome = f.dispatcher.dispatch("stranger", "!loopclick left");
        assert!(matches!(
            outcome,
            DispatchOutcome::Denied {
                required: 2,
                actual: 0,
                ..
            }
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let messages = f.env.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("need level 2, you have level 0"));
    }

    #[test]
    fn test_admin_passes_any_level() {
        let f = fixture();
        let hits = Arc::new(AtomicUsize::new(0));
        f.dispatcher
            .registry()
            .register(counting("shutdown", 50, hits.clone()))
            .unwrap();

        assert!(matches!(
            f.dispatcher.dispatch("alice", "!SHUTDOWN"),
            DispatchOutcome::Completed { .. }
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_receives_actor_and_args() {
        let f = fixture();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = seen.clone();
        f.dispatcher
            .registry()
            .register(CommandDescriptor::new("echo", move |call: CommandCall| {
                *sink.lock().unwrap() = Some(call);
                Ok(CommandOutcome::Done)
            }))
            .unwrap();

        f.dispatcher.dispatch("bob", "!echo  a   b");
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(CommandCall::new("bob", vec!["a".to_string(), "b".to_string()]))
        );
    }

    #[test]
    fn test_rejected_outcome_becomes_notice() {
        let f = fixture();
        f.dispatcher
            .registry()
            .register(CommandDescriptor::new("click", |_| {
                Ok(CommandOutcome::rejected("Not facing any block."))
            }))
            .unwrap();

        let outcome = f.dispatcher.dispatch("bob", "!click");
        assert!(matches!(outcome, DispatchOutcome::Rejected { .. }));
        assert_eq!(f.env.messages(), vec!["> Not facing any block.".to_string()]);
    }

    #[test]
    fn test_handler_error_is_contained() {
        let f = fixture();
        f.dispatcher
            .registry()
            .register(CommandDescriptor::new("broken", |_| {
                Err(CommandError::Other(anyhow::anyhow!("boom")))
            }))
            .unwrap();

        let outcome = f.dispatcher.dispatch("bob", "!broken");
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
        assert_eq!(f.env.messages(), vec![EXECUTION_FAILED_NOTICE.to_string()]);

        let failures = f.audit.of_type(AuditEventType::ExecutionFailed);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].detail.as_deref(), Some("boom"));
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let f = fixture();
        f.dispatcher
            .registry()
            .register(CommandDescriptor::new("explode", |_| panic!("kaboom")))
            .unwrap();

        let outcome = f.dispatcher.dispatch("bob", "!explode");
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
        assert_eq!(f.env.messages(), vec![EXECUTION_FAILED_NOTICE.to_string()]);

        // Dispatcher is still usable afterwards
        assert!(matches!(
            f.dispatcher.dispatch("bob", "!nothing"),
            DispatchOutcome::UnknownCommand { .. }
        ));
    }

    #[tokio::test]
    async fn test_pending_continuation_runs_in_background() {
        let f = fixture();
        let env = f.env.clone();
        f.dispatcher
            .registry()
            .register(CommandDescriptor::new("later", move |_| {
                let env = env.clone();
                Ok(CommandOutcome::pending(async move {
                    tokio::task::yield_now().await;
                    env.send_message("> done");
                    Ok(())
                }))
            }))
            .unwrap();

        let outcome = f.dispatcher.dispatch("bob", "!later");
        assert!(matches!(outcome, DispatchOutcome::Spawned { .. }));
        outcome.finish().await;
        assert_eq!(f.env.messages(), vec!["> done".to_string()]);
    }

    #[tokio::test]
    async fn test_pending_failure_is_reported() {
        let f = fixture();
        f.dispatcher
            .registry()
            .register(CommandDescriptor::new("later", |_| {
                Ok(CommandOutcome::pending(async {
                    Err(CommandError::Environment(
                        herald_api::EnvironmentError::Disconnected,
                    ))
                }))
            }))
            .unwrap();

        f.dispatcher.dispatch("bob", "!later").finish().await;
        assert_eq!(f.env.messages(), vec![EXECUTION_FAILED_NOTICE.to_string()]);
    }

    #[test]
    fn test_pending_without_runtime_fails_cleanly() {
        let f = fixture();
        f.dispatcher
            .registry()
            .register(CommandDescriptor::new("later", |_| {
                Ok(CommandOutcome::pending(async { Ok(()) }))
            }))
            .unwrap();

        assert!(matches!(
            f.dispatcher.dispatch("bob", "!later"),
            DispatchOutcome::Failed { .. }
        ));
    }
}
