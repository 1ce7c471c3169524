use super::*;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex;

use serde_json::json;
use tokio::time::timeout;
use toolbridge_common::protocol::jsonrpc::decode_frame;

const WAIT: Duration = Duration::from_secs(30);

// ── Mock socket ─────────────────────────────────────────────────────

type PeerFrame = Result<Vec<u8>, TransportError>;

struct MockSocket {
    written: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<PeerFrame>,
    closed: Arc<AtomicBool>,
}

/// Remote end of a `MockSocket`. Dropping it closes the connection.
struct Peer {
    written: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<PeerFrame>,
    closed: Arc<AtomicBool>,
}

fn mock_pair() -> (MockSocket, Peer) {
    let (written_tx, written_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        MockSocket { written: written_tx, inbound: inbound_rx, closed: Arc::clone(&closed) },
        Peer { written: written_rx, inbound: inbound_tx, closed },
    )
}

impl Peer {
    fn push(&self, message: &Message) {
        self.push_raw(message.to_frame().unwrap().as_bytes());
    }

    fn push_raw(&self, bytes: &[u8]) {
        self.inbound.send(Ok(bytes.to_vec())).unwrap();
    }

    fn push_error(&self, reason: &str) {
        self.inbound.send(Err(TransportError::Socket(reason.to_string()))).unwrap();
    }

    async fn next_written(&mut self) -> Message {
        let frame = timeout(WAIT, self.written.recv())
            .await
            .expect("timed out waiting for outbound frame")
            .expect("socket dropped");
        decode_frame(frame.as_bytes()).expect("outbound frame should be a protocol message")
    }
}

#[async_trait]
impl Socket for MockSocket {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.written.send(frame).map_err(|_| TransportError::Socket("peer gone".to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out scripted sockets; refuses once the script is empty.
#[derive(Clone, Default)]
struct MockConnector {
    script: Arc<Mutex<VecDeque<MockSocket>>>,
    calls: Arc<AtomicUsize>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    fn push(&self, socket: MockSocket) {
        self.script.lock().unwrap().push_back(socket);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Socket>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        let socket = self.script.lock().unwrap().pop_front();
        match socket {
            Some(socket) => Ok(Box::new(socket)),
            None => Err(TransportError::Connect("connection refused".to_string())),
        }
    }
}

// ── Mock handler ────────────────────────────────────────────────────

/// Answers requests with their method and params. `boom` panics, `fail`
/// returns an error.
struct EchoHandler;

#[async_trait]
impl InboundHandler for EchoHandler {
    async fn handle(&self, message: Message) -> anyhow::Result<Option<Message>> {
        match message {
            Message::Request { id, method, params } => match method.as_str() {
                "boom" => panic!("handler exploded"),
                "fail" => anyhow::bail!("handler failed"),
                _ => Ok(Some(Message::response(id, json!({ "method": method, "params": params })))),
            },
            _ => Ok(None),
        }
    }
}

fn handler() -> Arc<dyn InboundHandler> {
    Arc::new(EchoHandler)
}

fn test_config() -> TransportConfig {
    TransportConfig::new("ws://127.0.0.1:9/bridge", "s3cret").unwrap().with_policy(
        ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            max_attempts: 3,
        },
    )
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event stream ended")
}

async fn started(connector: &MockConnector) -> (Transport, Peer, mpsc::UnboundedReceiver<TransportEvent>) {
    let (socket, peer) = mock_pair();
    connector.push(socket);
    let mut transport = Transport::new(test_config(), connector.clone());
    let mut events = transport.take_events().expect("events available once");
    transport.start(handler()).await.expect("start should succeed");
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    (transport, peer, events)
}

// ── Startup ─────────────────────────────────────────────────────────

#[tokio::test]
async fn messages_sent_before_start_flush_in_order() {
    let connector = MockConnector::default();
    let (socket, mut peer) = mock_pair();
    connector.push(socket);

    let mut transport = Transport::new(test_config(), connector.clone());
    transport.send(Message::notification("first", None));
    transport.send(Message::notification("second", None));
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    transport.start(handler()).await.expect("start should succeed");
    assert_eq!(transport.state(), ConnectionState::Open);
    transport.send(Message::notification("third", None));

    for expected in ["first", "second", "third"] {
        assert_eq!(peer.next_written().await.method(), Some(expected));
    }
}

#[tokio::test]
async fn start_reports_initial_connect_failure_without_retrying() {
    let connector = MockConnector::default();
    let mut transport = Transport::new(test_config(), connector.clone());

    let error = transport.start(handler()).await.expect_err("start should fail");
    assert!(matches!(error, TransportError::Connect(_)));
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connector.calls(), 1);

    // The transport stays usable for another explicit attempt.
    let (socket, _peer) = mock_pair();
    connector.push(socket);
    transport.start(handler()).await.expect("second start should succeed");
    assert_eq!(transport.state(), ConnectionState::Open);
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let connector = MockConnector::default();
    let (mut transport, _peer, _events) = started(&connector).await;
    assert_eq!(transport.start(handler()).await, Err(TransportError::AlreadyStarted));
}

#[tokio::test]
async fn handshake_carries_token_but_logs_mask_it() {
    let connector = MockConnector::default();
    let (transport, _peer, _events) = started(&connector).await;

    let urls = connector.urls.lock().unwrap().clone();
    assert_eq!(urls, vec!["ws://127.0.0.1:9/bridge?token=s3cret".to_string()]);

    let config = test_config();
    assert_eq!(config.display_url(), "ws://127.0.0.1:9/bridge?token=***");
    assert!(!format!("{config:?}").contains("s3cret"));
    drop(transport);
}

// ── Inbound ─────────────────────────────────────────────────────────

#[tokio::test]
async fn inbound_requests_are_answered_through_the_transport() {
    let connector = MockConnector::default();
    let (_transport, mut peer, _events) = started(&connector).await;

    peer.push(&Message::request(1, "tools/list", None));
    let reply = peer.next_written().await;
    assert_eq!(reply, Message::response(1.into(), json!({ "method": "tools/list", "params": null })));
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let connector = MockConnector::default();
    let (transport, mut peer, _events) = started(&connector).await;

    peer.push_raw(b"not json at all");
    peer.push_raw(br#"{"hello":"world"}"#);
    peer.push_raw(br#"{"jsonrpc":"1.0","id":5,"method":"ping"}"#);
    peer.push(&Message::request(2, "ping", None));

    let reply = peer.next_written().await;
    assert_eq!(reply.id(), Some(&RequestId::Number(2)));
    assert_eq!(transport.state(), ConnectionState::Open);
}

#[tokio::test]
async fn handler_failures_do_not_end_the_session() {
    let connector = MockConnector::default();
    let (transport, mut peer, _events) = started(&connector).await;

    peer.push(&Message::request(1, "boom", None));
    peer.push(&Message::request(2, "fail", None));
    peer.push(&Message::request(3, "ping", Some(json!({ "n": 3 }))));

    let reply = peer.next_written().await;
    assert_eq!(reply.id(), Some(&RequestId::Number(3)));
    assert_eq!(transport.state(), ConnectionState::Open);
}

#[tokio::test]
async fn socket_error_while_open_is_reported_without_closing() {
    let connector = MockConnector::default();
    let (transport, mut peer, mut events) = started(&connector).await;

    peer.push_error("frame too large");
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Error("socket error: frame too large".to_string())
    );

    peer.push(&Message::request(7, "ping", None));
    assert_eq!(peer.next_written().await.id(), Some(&RequestId::Number(7)));
    assert_eq!(transport.state(), ConnectionState::Open);
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn send_failure_while_open_reports_lost_message() {
    let connector = MockConnector::default();
    let (transport, peer, mut events) = started(&connector).await;

    let Peer { written, inbound: _inbound, closed: _closed } = peer;
    drop(written);

    transport.send(Message::request(9, "notify", None));
    match next_event(&mut events).await {
        TransportEvent::SendFailed { id, .. } => assert_eq!(id, Some(RequestId::Number(9))),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(transport.state(), ConnectionState::Open);
}

// ── Reconnection ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unexpected_close_reconnects_and_flushes_queue_in_order() {
    let connector = MockConnector::default();
    let (transport, peer, mut events) = started(&connector).await;

    drop(peer);
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Reconnecting { attempt: 1, delay: Duration::from_millis(100) }
    );
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    transport.send(Message::notification("a", None));
    transport.send(Message::notification("b", None));
    let (socket, mut peer) = mock_pair();
    connector.push(socket);

    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    assert_eq!(peer.next_written().await.method(), Some("a"));
    assert_eq!(peer.next_written().await.method(), Some("b"));
    assert_eq!(connector.calls(), 2);
    assert_eq!(transport.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_to_cap_and_failure_fires_once() {
    let connector = MockConnector::default();
    let (transport, peer, mut events) = started(&connector).await;

    drop(peer);
    let delays: Vec<TransportEvent> = vec![
        next_event(&mut events).await,
        next_event(&mut events).await,
        next_event(&mut events).await,
    ];
    assert_eq!(
        delays,
        vec![
            TransportEvent::Reconnecting { attempt: 1, delay: Duration::from_millis(100) },
            TransportEvent::Reconnecting { attempt: 2, delay: Duration::from_millis(200) },
            TransportEvent::Reconnecting { attempt: 3, delay: Duration::from_millis(250) },
        ]
    );
    assert_eq!(next_event(&mut events).await, TransportEvent::Failed { attempts: 3 });

    // The connection task is gone, so the stream ends with no further events.
    assert_eq!(timeout(WAIT, events.recv()).await.expect("stream should end"), None);
    assert_eq!(connector.calls(), 4);
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_resets_backoff() {
    let connector = MockConnector::default();
    let (_transport, peer, mut events) = started(&connector).await;

    drop(peer);
    assert!(matches!(next_event(&mut events).await, TransportEvent::Reconnecting { attempt: 1, .. }));
    assert!(matches!(next_event(&mut events).await, TransportEvent::Reconnecting { attempt: 2, .. }));
    let (socket, peer) = mock_pair();
    connector.push(socket);
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    drop(peer);
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Reconnecting { attempt: 1, delay: Duration::from_millis(100) }
    );
}

// ── Close ───────────────────────────────────────────────────────────

#[tokio::test]
async fn close_suppresses_reconnect() {
    let connector = MockConnector::default();
    let (transport, peer, mut events) = started(&connector).await;

    transport.close();
    assert_eq!(next_event(&mut events).await, TransportEvent::Closed);
    assert_eq!(timeout(WAIT, events.recv()).await.expect("stream should end"), None);

    assert!(peer.closed.load(Ordering::SeqCst));
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert_eq!(connector.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn close_during_backoff_stops_reconnecting() {
    let connector = MockConnector::default();
    let (transport, peer, mut events) = started(&connector).await;

    drop(peer);
    assert!(matches!(next_event(&mut events).await, TransportEvent::Reconnecting { attempt: 1, .. }));
    transport.close();

    assert_eq!(next_event(&mut events).await, TransportEvent::Closed);
    assert_eq!(connector.calls(), 1);
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn start_after_close_is_rejected() {
    let connector = MockConnector::default();
    let mut transport = Transport::new(test_config(), connector.clone());
    transport.close();
    assert_eq!(transport.start(handler()).await, Err(TransportError::Closed));
    assert_eq!(connector.calls(), 0);
}

// ── Endpoint validation ─────────────────────────────────────────────

#[test]
fn endpoint_requires_wss_except_on_loopback() {
    assert!(TransportConfig::new("wss://bridge.example.com/ws", "t").is_ok());
    assert!(TransportConfig::new("ws://localhost:8080/ws", "t").is_ok());
    assert!(TransportConfig::new("ws://127.0.0.1:8080/ws", "t").is_ok());
    assert!(TransportConfig::new("ws://[::1]:8080/ws", "t").is_ok());

    for rejected in ["ws://bridge.example.com/ws", "https://bridge.example.com", "not a url"] {
        let error = TransportConfig::new(rejected, "t").expect_err("should reject");
        assert!(matches!(error, TransportError::InvalidUrl { .. }), "{rejected}: {error}");
    }
}

#[test]
fn mask_credential_keeps_other_query_params() {
    let url = Url::parse("wss://h/ws?client=cli&token=abc&v=2").unwrap();
    assert_eq!(mask_credential(&url), "wss://h/ws?client=cli&token=***&v=2");

    let plain = Url::parse("wss://h/ws?v=2").unwrap();
    assert_eq!(mask_credential(&plain), "wss://h/ws?v=2");
}

#[test]
fn reconnect_policy_from_config() {
    let policy = ReconnectPolicy::from(ReconnectConfig {
        base_delay_ms: 250,
        max_delay_ms: 4_000,
        max_attempts: 7,
    });
    assert_eq!(policy.base_delay, Duration::from_millis(250));
    assert_eq!(policy.max_delay, Duration::from_secs(4));
    assert_eq!(policy.max_attempts, 7);
    assert_eq!(ReconnectPolicy::default().max_attempts, 5);
}
