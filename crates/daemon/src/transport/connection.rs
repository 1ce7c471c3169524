// Connection task: serves one open socket at a time and reconnects with
// exponential backoff when the peer goes away.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use toolbridge_common::protocol::jsonrpc::{decode_frame, Message};
use tracing::{debug, error, info, warn};

use super::{
    ConnectionState, Connector, InboundHandler, Outbound, ReconnectPolicy, Socket,
    TransportConfig, TransportEvent,
};

pub(super) enum Command {
    Send(Message),
    Close,
}

/// Why the open phase ended.
enum OpenExit {
    /// Close was requested; the socket has been shut down.
    Closed,
    /// The peer closed or the socket ended unexpectedly.
    Dropped,
}

pub(super) struct Connection {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    replies: Outbound,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<TransportEvent>,
    handler: Arc<dyn InboundHandler>,
    close_requested: Arc<AtomicBool>,
    /// Messages accepted while not Open, in enqueue order.
    pending: VecDeque<Message>,
    attempts: u32,
    delay: Duration,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        replies: Outbound,
        state: watch::Sender<ConnectionState>,
        events: mpsc::UnboundedSender<TransportEvent>,
        handler: Arc<dyn InboundHandler>,
        close_requested: Arc<AtomicBool>,
    ) -> Self {
        let delay = config.policy().base_delay;
        Self {
            config,
            connector,
            commands,
            replies,
            state,
            events,
            handler,
            close_requested,
            pending: VecDeque::new(),
            attempts: 0,
            delay,
        }
    }

    pub(super) async fn run(mut self, mut socket: Box<dyn Socket>) {
        loop {
            match self.serve(&mut socket).await {
                OpenExit::Closed => {
                    self.finish_closed();
                    return;
                }
                OpenExit::Dropped => {}
            }

            match self.reconnect().await {
                Some(next) => socket = next,
                None => return,
            }
        }
    }

    async fn serve(&mut self, socket: &mut Box<dyn Socket>) -> OpenExit {
        self.state.send_replace(ConnectionState::Open);
        self.emit(TransportEvent::Connected);

        while let Some(message) = self.pending.pop_front() {
            let Some(frame) = encode(&message) else {
                continue;
            };
            if let Err(error) = socket.send(frame).await {
                warn!(%error, "flush interrupted; keeping message queued");
                self.pending.push_front(message);
                return OpenExit::Dropped;
            }
        }

        loop {
            tokio::select! {
                frame = socket.next_frame() => match frame {
                    Some(Ok(bytes)) => self.dispatch_inbound(&bytes),
                    Some(Err(error)) => {
                        warn!(%error, "socket error");
                        self.emit(TransportEvent::Error(error.to_string()));
                    }
                    None => {
                        info!("connection closed by peer");
                        return OpenExit::Dropped;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => self.write(socket, message).await,
                    Some(Command::Close) | None => {
                        self.state.send_replace(ConnectionState::Closing);
                        socket.close().await;
                        return OpenExit::Closed;
                    }
                },
            }
        }
    }

    async fn write(&mut self, socket: &mut Box<dyn Socket>, message: Message) {
        let Some(frame) = encode(&message) else {
            return;
        };
        if let Err(error) = socket.send(frame).await {
            let id = message.id().cloned();
            warn!(%error, ?id, "outbound message lost");
            self.emit(TransportEvent::SendFailed { id, reason: error.to_string() });
        }
    }

    fn dispatch_inbound(&self, bytes: &[u8]) {
        let Some(message) = decode_frame(bytes) else {
            debug!(len = bytes.len(), "discarding non-protocol frame");
            return;
        };

        let handler = Arc::clone(&self.handler);
        let replies = self.replies.clone();
        tokio::spawn(async move {
            let method = message.method().map(str::to_string);
            match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
                Ok(Ok(Some(reply))) => replies.send(reply),
                Ok(Ok(None)) => {}
                Ok(Err(error)) => warn!(?method, error = %format!("{error:#}"), "inbound handler failed"),
                Err(_) => error!(?method, "inbound handler panicked"),
            }
        });
    }

    /// Reconnect loop. Returns `None` once the transport is finished, either
    /// because close was requested or the attempt budget ran out.
    async fn reconnect(&mut self) -> Option<Box<dyn Socket>> {
        let policy: ReconnectPolicy = self.config.policy();
        self.state.send_replace(ConnectionState::Disconnected);

        loop {
            if self.close_requested.load(Ordering::SeqCst) {
                self.finish_closed();
                return None;
            }

            self.attempts += 1;
            if self.attempts > policy.max_attempts {
                let attempts = policy.max_attempts;
                error!(attempts, dropped = self.pending.len(), "reconnection abandoned");
                self.emit(TransportEvent::Failed { attempts });
                return None;
            }

            let attempt = self.attempts;
            let delay = self.delay;
            self.delay = delay.saturating_mul(2).min(policy.max_delay);
            info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            self.emit(TransportEvent::Reconnecting { attempt, delay });

            if !self.wait_queueing(delay).await || self.close_requested.load(Ordering::SeqCst) {
                self.finish_closed();
                return None;
            }

            self.state.send_replace(ConnectionState::Connecting);
            match self.connector.connect(&self.config.connect_url()).await {
                Ok(mut socket) => {
                    if self.close_requested.load(Ordering::SeqCst) {
                        socket.close().await;
                        self.finish_closed();
                        return None;
                    }
                    info!(attempt, "reconnected");
                    self.attempts = 0;
                    self.delay = policy.base_delay;
                    return Some(socket);
                }
                Err(error) => {
                    warn!(%error, attempt, "reconnect attempt failed");
                    self.state.send_replace(ConnectionState::Disconnected);
                }
            }
        }
    }

    /// Sleeps for `delay` while moving sends into the pending queue.
    /// Returns `false` when close is requested.
    async fn wait_queueing(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => self.pending.push_back(message),
                    Some(Command::Close) | None => return false,
                },
            }
        }
    }

    fn finish_closed(&mut self) {
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "discarding queued messages on close");
            self.pending.clear();
        }
        self.state.send_replace(ConnectionState::Disconnected);
        info!("bridge transport closed");
        self.emit(TransportEvent::Closed);
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

fn encode(message: &Message) -> Option<String> {
    match message.to_frame() {
        Ok(frame) => Some(frame),
        Err(error) => {
            warn!(%error, "dropping unserializable message");
            None
        }
    }
}
