// Outbound bridge transport: one logical WebSocket connection with queueing
// and reconnection.
//
// The connection task owns the socket and the pending-send queue. Callers talk
// to it through an unbounded command channel, so `send` never blocks and never
// fails while the link is down. Messages reach the wire in enqueue order.
//
// The socket is abstracted via `Connector`/`Socket` for testability. The
// tokio-tungstenite implementation lives in `ws`.

mod connection;
pub mod ws;

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use toolbridge_common::protocol::jsonrpc::{Message, RequestId};
use tracing::info;
use url::Url;

use crate::config::ReconnectConfig;
use connection::{Command, Connection};

/// Query parameter carrying the credential on the handshake URL.
pub const TOKEN_QUERY_PARAM: &str = "token";

const MASK: &str = "***";

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid endpoint url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("socket error: {0}")]
    Socket(String),

    #[error("transport already started")]
    AlreadyStarted,

    #[error("transport was closed")]
    Closed,
}

// ── Configuration ───────────────────────────────────────────────────

/// Reconnection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(ReconnectConfig::default())
    }
}

impl From<ReconnectConfig> for ReconnectPolicy {
    fn from(config: ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }
}

/// Endpoint, credential and reconnect policy for one transport.
#[derive(Clone)]
pub struct TransportConfig {
    endpoint: Url,
    token: String,
    policy: ReconnectPolicy,
}

impl TransportConfig {
    pub fn new(endpoint: &str, token: impl Into<String>) -> Result<Self, TransportError> {
        let endpoint = validate_ws_url(endpoint)?;
        Ok(Self { endpoint, token: token.into(), policy: ReconnectPolicy::default() })
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Handshake URL with the credential attached. Never log this directly.
    pub fn connect_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, &self.token);
        url
    }

    /// Handshake URL with the credential masked, safe for logs.
    pub fn display_url(&self) -> String {
        mask_credential(&self.connect_url())
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("token", &MASK)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Replaces the credential query value with `***`.
pub fn mask_credential(url: &Url) -> String {
    if !url.query_pairs().any(|(key, _)| key == TOKEN_QUERY_PARAM) {
        return url.to_string();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == TOKEN_QUERY_PARAM { MASK.to_string() } else { value.into_owned() };
            (key.into_owned(), value)
        })
        .collect();

    let mut masked = url.clone();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

fn validate_ws_url(value: &str) -> Result<Url, TransportError> {
    let invalid = |reason: String| TransportError::InvalidUrl { url: value.to_string(), reason };
    let parsed = Url::parse(value).map_err(|error| invalid(error.to_string()))?;
    match parsed.scheme() {
        "wss" => Ok(parsed),
        "ws" if is_loopback_host(parsed.host_str()) => Ok(parsed),
        _ => Err(invalid("must use wss (ws is allowed only for localhost)".to_string())),
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|addr| addr.is_loopback())
}

// ── Socket abstraction ──────────────────────────────────────────────

/// One established connection.
#[async_trait]
pub trait Socket: Send {
    /// Transmit one text frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Next data frame. Returns `None` once the connection is closed.
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, TransportError>>;

    async fn close(&mut self);
}

/// Opens sockets to the endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Socket>, TransportError>;
}

/// Consumer of decoded inbound messages. A returned message is sent back
/// through the transport.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message) -> anyhow::Result<Option<Message>>;
}

// ── State and events ────────────────────────────────────────────────

/// Current state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Notifications for the owning controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection reached Open (initially or after a reconnect).
    Connected,
    /// Non-fatal socket error while Open.
    Error(String),
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// A message written while Open was lost.
    SendFailed { id: Option<RequestId>, reason: String },
    /// Reconnection gave up. Emitted at most once; the transport is finished.
    Failed { attempts: u32 },
    /// Closed on request.
    Closed,
}

// ── Transport handle ────────────────────────────────────────────────

/// Cheap handle for enqueueing outbound messages.
#[derive(Clone)]
pub struct Outbound {
    commands: mpsc::UnboundedSender<Command>,
}

impl Outbound {
    /// Queue a message. Transmitted immediately when Open, otherwise held
    /// until the connection opens.
    pub fn send(&self, message: Message) {
        // The receiver only disappears once the transport is finished.
        let _ = self.commands.send(Command::Send(message));
    }
}

/// Parts handed to the connection task by `start`.
struct Idle {
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

/// Owner of the single logical connection.
pub struct Transport {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    outbound: Outbound,
    state: watch::Receiver<ConnectionState>,
    close_requested: Arc<AtomicBool>,
    idle: Option<Idle>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    task: Option<JoinHandle<()>>,
}

impl Transport {
    pub fn new(config: TransportConfig, connector: impl Connector) -> Self {
        Self::with_connector(config, Arc::new(connector))
    }

    pub fn with_connector(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            connector,
            outbound: Outbound { commands: commands_tx },
            state: state_rx,
            close_requested: Arc::new(AtomicBool::new(false)),
            idle: Some(Idle { commands: commands_rx, state: state_tx, events: events_tx }),
            events: Some(events_rx),
            task: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Event stream for the controller. Available once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    pub fn send(&self, message: Message) {
        self.outbound.send(message);
    }

    /// Open the connection and start serving it.
    ///
    /// Resolves once the socket is open. A failed first attempt is returned
    /// to the caller and does not schedule reconnects.
    pub async fn start(&mut self, handler: Arc<dyn InboundHandler>) -> Result<(), TransportError> {
        if self.close_requested.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let idle = self.idle.take().ok_or(TransportError::AlreadyStarted)?;

        idle.state.send_replace(ConnectionState::Connecting);
        info!(url = %self.config.display_url(), "connecting bridge transport");

        let socket = match self.connector.connect(&self.config.connect_url()).await {
            Ok(socket) => socket,
            Err(error) => {
                idle.state.send_replace(ConnectionState::Disconnected);
                self.idle = Some(idle);
                return Err(error);
            }
        };

        idle.state.send_replace(ConnectionState::Open);
        let connection = Connection::new(
            self.config.clone(),
            Arc::clone(&self.connector),
            idle.commands,
            self.outbound.clone(),
            idle.state,
            idle.events,
            handler,
            Arc::clone(&self.close_requested),
        );
        self.task = Some(tokio::spawn(connection.run(socket)));
        Ok(())
    }

    /// Close the connection and suppress reconnection.
    pub fn close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
        let _ = self.outbound.commands.send(Command::Close);
    }

    /// Close and wait for the connection task to finish.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests;
