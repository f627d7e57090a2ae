//! Tracing subscriber setup for the agent binary.
//!
//! Level filtering follows `RUST_LOG` (default `info`) unless a level is
//! given explicitly.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Tracing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TracingFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,

    /// One line per event.
    Compact,

    /// JSON lines.
    Json,
}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level filter.
    ///
    /// If None, uses RUST_LOG environment variable or defaults to "info".
    pub level: Option<tracing::Level>,

    pub format: TracingFormat,

    /// Include target module names in output.
    pub target: bool,

    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: TracingFormat::Pretty,
            target: true,
            thread_ids: false,
        }
    }
}

fn filter(level: Option<tracing::Level>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_subscriber(config: &TracingConfig) -> anyhow::Result<()> {
    let output = match config.format {
        TracingFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(config.target)
            .with_thread_ids(config.thread_ids)
            .boxed(),
        TracingFormat::Compact => fmt::layer()
            .compact()
            .with_target(config.target)
            .with_thread_ids(config.thread_ids)
            .boxed(),
        TracingFormat::Json => fmt::layer()
            .json()
            .with_target(config.target)
            .with_thread_ids(config.thread_ids)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter(config.level))
        .try_init()?;
    Ok(())
}
