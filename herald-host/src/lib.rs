//! herald-host: Command dispatch and extension runtime for herald agents
//!
//! This crate turns chat lines into permission-checked command invocations,
//! loads extensions that contribute commands, and runs their background
//! tasks.

pub mod audit;
pub mod command;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod extension;
pub mod framework;
pub mod lifecycle;
pub mod loader;
pub mod permission;
pub mod registry;
pub mod task;

pub use audit::{AuditEvent, AuditEventType, AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
pub use command::{CommandCall, CommandDescriptor, CommandError, CommandHandler, CommandOutcome};
pub use config::{ConfigError, ConnectionConfig, ExtensionConfig, RootConfig};
pub use context::{ExtensionContext, Services};
pub use dispatcher::{DispatchOutcome, Dispatcher, IgnoreReason};
pub use extension::{Extension, ExtensionCatalog, ExtensionError};
pub use framework::{Framework, Shutdown};
pub use lifecycle::{LifecycleBus, LifecycleEvent, SubscriptionId};
pub use loader::{ExtensionLoader, LoadReport, SkipReason};
pub use permission::{Level, PermissionSnapshot, PermissionStore};
pub use registry::{CommandRegistry, RegisterOutcome, RegistryError};
pub use task::{Tick, TaskError, TaskSlot};

pub use herald_api;
