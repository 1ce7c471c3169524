// Thin lifecycle controller: wires config, host, dispatcher and transport
// together, then keeps the bridge up until shutdown or terminal failure.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::dispatch::Dispatcher;
use crate::host::LocalHost;
use crate::transport::ws::WsConnector;
use crate::transport::{Connector, Transport, TransportConfig, TransportEvent};

/// Everything needed to start one bridge session.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub config: BridgeConfig,
    pub url: String,
    pub token: String,
    pub workspace_root: PathBuf,
}

impl BridgeSettings {
    /// Merges file config with command-line values. Explicit values win.
    pub fn resolve(
        mut config: BridgeConfig,
        url: Option<String>,
        workspace: Option<PathBuf>,
        token: Option<String>,
    ) -> Result<Self> {
        let url = url
            .or_else(|| config.connection.url.clone())
            .ok_or_else(|| anyhow!("no endpoint configured; pass --url or set connection.url"))?;
        let token = token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| anyhow!("no credential supplied; pass --token or set TOOLBRIDGE_TOKEN"))?;
        let workspace_root = match workspace.or_else(|| config.workspace_root.clone()) {
            Some(root) => root,
            None => std::env::current_dir().context("failed to resolve current directory")?,
        };

        config.connection.url = Some(url.clone());
        config.workspace_root = Some(workspace_root.clone());
        Ok(Self { config, url, token, workspace_root })
    }
}

/// A started bridge.
pub struct BridgeHandle {
    transport: Transport,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

pub async fn start_bridge(settings: BridgeSettings) -> Result<BridgeHandle> {
    start_with_connector(settings, Arc::new(WsConnector)).await
}

pub async fn start_with_connector(
    settings: BridgeSettings,
    connector: Arc<dyn Connector>,
) -> Result<BridgeHandle> {
    let host = LocalHost::new(&settings.workspace_root)
        .with_context(|| format!("workspace `{}` is not usable", settings.workspace_root.display()))?;
    let context = BridgeContext::new(Arc::new(host));
    let dispatcher = Arc::new(Dispatcher::new(context, &settings.config));

    let transport_config = TransportConfig::new(&settings.url, settings.token)?
        .with_policy(settings.config.reconnect.into());
    let endpoint = transport_config.display_url();

    let mut transport = Transport::with_connector(transport_config, connector);
    let events = transport.take_events().context("transport events already taken")?;
    transport
        .start(dispatcher)
        .await
        .with_context(|| format!("failed to connect to {endpoint}"))?;

    info!(
        url = %endpoint,
        workspace = %settings.workspace_root.display(),
        "bridge started"
    );
    Ok(BridgeHandle { transport, events })
}

impl BridgeHandle {
    /// Runs until `shutdown` resolves or the transport gives up.
    ///
    /// Terminal transport failure is logged once and returned as an error.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested; closing bridge");
                    self.transport.shutdown().await;
                    return Ok(());
                }
                event = self.events.recv() => match event {
                    Some(TransportEvent::Connected) => info!("bridge connected"),
                    Some(TransportEvent::Reconnecting { attempt, delay }) => {
                        warn!(attempt, delay_ms = delay.as_millis() as u64, "bridge disconnected; reconnecting");
                    }
                    Some(TransportEvent::Error(reason)) => warn!(%reason, "bridge transport error"),
                    Some(TransportEvent::SendFailed { id, reason }) => {
                        warn!(?id, %reason, "outbound message lost");
                    }
                    Some(TransportEvent::Failed { attempts }) => {
                        error!(attempts, "bridge connection lost permanently; disabling bridge");
                        bail!("bridge connection lost after {attempts} reconnect attempts");
                    }
                    Some(TransportEvent::Closed) | None => return Ok(()),
                },
            }
        }
    }
}

/// Starts the bridge and serves it until ctrl-c.
pub async fn run(settings: BridgeSettings) -> Result<()> {
    let handle = start_bridge(settings).await?;
    handle
        .run_until(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
}
