// toolbridged: exposes local workspace tools to a remote client over WebSocket.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use toolbridge_daemon::config::{BridgeConfig, TOKEN_ENV_VAR};
use toolbridge_daemon::runtime::{self, BridgeSettings};
use tracing::info;

#[derive(Parser)]
#[command(name = "toolbridged", about = "Bridge local workspace tools to a remote tool-calling client")]
struct Cli {
    /// WebSocket endpoint of the remote client (wss://, or ws:// for localhost).
    #[arg(long)]
    url: Option<String>,

    /// Workspace root the tools operate on (defaults to the current directory).
    #[arg(long, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Config file to use instead of ~/.toolbridge/config.toml.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Credential for the endpoint. Falls back to TOOLBRIDGE_TOKEN.
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => BridgeConfig::load_from(path)
            .with_context(|| format!("failed to load config from `{}`", path.display()))?,
        None => BridgeConfig::load(),
    };
    let token = cli.token.or_else(|| std::env::var(TOKEN_ENV_VAR).ok());
    let settings = BridgeSettings::resolve(config, cli.url, cli.workspace, token)?;

    info!("starting toolbridge daemon");
    runtime::run(settings).await.context("bridge terminated unexpectedly")
}
