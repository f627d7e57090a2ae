use anyhow::Context;
use clap::Parser;
use herald::{init_subscriber, Cli, LineEnvironment};
use herald_extensions::builtin_catalog;
use herald_host::{Framework, RootConfig, Shutdown};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_subscriber(&cli.tracing_config())?;

    let config_path = cli.config_path();
    let config = RootConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::info!(
        config = %config_path.display(),
        extensions = config.extensions.len(),
        "Starting herald"
    );

    let address = config.connection.address();
    let (environment, events) =
        LineEnvironment::connect(&address, &config.connection.username).await?;

    let framework = Framework::from_config(&config, environment, builtin_catalog());
    match framework.run(events).await {
        Shutdown::Disconnected(reason) => tracing::info!(reason = %reason, "Disconnected"),
        Shutdown::ChannelClosed => tracing::warn!("Event stream closed"),
    }
    Ok(())
}
