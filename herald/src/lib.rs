//! # herald
//!
//! The agent binary's building blocks: command-line parsing, tracing setup
//! and the line-protocol [`Environment`](herald_api::Environment) client.
//! `main` wires them to [`herald_host::Framework`] with the built-in
//! extension catalog.

pub mod cli;
pub mod line_env;
pub mod tracing_support;

pub use cli::Cli;
pub use line_env::{LineEnvironment, LineError};
pub use tracing_support::{init_subscriber, TracingConfig, TracingFormat};
