//! Live push channel.
//!
//! A persistent duplex connection delivering incremental update frames. The
//! channel owns its reconnect policy: fixed backoff with a bounded attempt
//! count, 401 routed to the coordinator (which owns the credential-refresh
//! decision), 403 terminal until an explicit reconnect.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use snipsync_protocol::{decode_frame, UpdateAction};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Status of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// The connection is established.
    Open,
    /// The connection was closed deliberately.
    Closed,
    /// The connection failed, optionally with a status code.
    Failed {
        /// Failure code (HTTP-style), when the transport knows one.
        code: Option<u16>,
    },
}

/// Lifecycle state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection and none wanted.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Frames are flowing.
    Open,
    /// Closed deliberately; reconnect requires an explicit `connect`.
    Closed,
    /// The last attempt failed; a retry or an explicit `connect` may follow.
    Failed,
}

/// Events produced by a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A raw frame payload.
    Frame(String),
    /// A connection status transition.
    Status(ConnectionStatus),
}

/// An open duplex connection: a stream of transport events. Dropping the
/// receiver tears the connection down.
pub struct LiveConnection {
    /// Event stream; ends when the connection drops.
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens live connections to an endpoint.
///
/// Implement this to plug in the actual duplex transport (WebSocket, SSE,
/// a long-polling shim). The channel only consumes the event stream.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Opens a connection to the given endpoint.
    async fn open(&self, endpoint: &str) -> SyncResult<LiveConnection>;
}

/// Events surfaced by the channel to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A decoded update action.
    Action(UpdateAction),
    /// The connection status changed.
    StatusChanged(ConnectionStatus),
    /// The server rejected our credentials; the owner should refresh them
    /// and reconnect.
    Unauthorized,
}

/// The live channel: connection lifecycle plus reconnect policy.
pub struct LiveChannel {
    shared: Arc<ChannelShared>,
    control: Mutex<ChannelControl>,
}

struct ChannelShared {
    transport: Arc<dyn LiveTransport>,
    retry: RetryConfig,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: Mutex<ChannelState>,
    frames_dropped: AtomicU64,
}

#[derive(Default)]
struct ChannelControl {
    endpoint: Option<String>,
    task: Option<JoinHandle<()>>,
}

impl LiveChannel {
    /// Creates an idle channel emitting events on the given sender.
    pub fn new(
        transport: Arc<dyn LiveTransport>,
        retry: RetryConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                transport,
                retry,
                events,
                state: Mutex::new(ChannelState::Idle),
                frames_dropped: AtomicU64::new(0),
            }),
            control: Mutex::new(ChannelControl::default()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        *self.shared.state.lock()
    }

    /// Number of malformed frames dropped so far.
    pub fn frames_dropped(&self) -> u64 {
        self.shared.frames_dropped.load(Ordering::SeqCst)
    }

    /// Connects to the given endpoint.
    ///
    /// No-op when already connected (or connecting) to the same endpoint.
    /// When connected elsewhere, the old connection is closed first. Calling
    /// `connect` always resets the retry budget.
    pub fn connect(&self, endpoint: &str) {
        let mut control = self.control.lock();
        let state = self.state();
        if control.endpoint.as_deref() == Some(endpoint)
            && matches!(state, ChannelState::Connecting | ChannelState::Open)
        {
            debug!(%endpoint, "already connected, ignoring connect");
            return;
        }

        if let Some(task) = control.task.take() {
            task.abort();
        }
        control.endpoint = Some(endpoint.to_string());
        *self.shared.state.lock() = ChannelState::Connecting;

        info!(%endpoint, "opening live channel");
        let shared = Arc::clone(&self.shared);
        let endpoint = endpoint.to_string();
        control.task = Some(tokio::spawn(run_channel(shared, endpoint)));
    }

    /// Closes the channel and forgets the endpoint. Idempotent; a later
    /// `connect` is treated as fresh.
    pub fn close(&self) {
        let mut control = self.control.lock();
        control.endpoint = None;
        if let Some(task) = control.task.take() {
            task.abort();
        }

        let mut state = self.shared.state.lock();
        if matches!(*state, ChannelState::Connecting | ChannelState::Open | ChannelState::Failed) {
            *state = ChannelState::Closed;
            drop(state);
            self.shared.emit(ChannelEvent::StatusChanged(ConnectionStatus::Closed));
            info!("live channel closed");
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        if let Some(task) = self.control.lock().task.take() {
            task.abort();
        }
    }
}

impl ChannelShared {
    fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }
}

/// How a connection ended.
enum Disposition {
    Closed,
    Failed(Option<u16>),
}

async fn run_channel(shared: Arc<ChannelShared>, endpoint: String) {
    let mut attempts: u32 = 0;
    loop {
        shared.set_state(ChannelState::Connecting);
        let disposition = match shared.transport.open(&endpoint).await {
            Ok(mut connection) => {
                attempts = 0;
                shared.set_state(ChannelState::Open);
                shared.emit(ChannelEvent::StatusChanged(ConnectionStatus::Open));
                pump(&shared, &mut connection).await
            }
            Err(error) => {
                warn!(%endpoint, %error, "live connection failed to open");
                Disposition::Failed(match error {
                    SyncError::Unauthorized => Some(401),
                    SyncError::Forbidden => Some(403),
                    _ => None,
                })
            }
        };

        match disposition {
            Disposition::Closed => {
                shared.set_state(ChannelState::Closed);
                shared.emit(ChannelEvent::StatusChanged(ConnectionStatus::Closed));
                info!(%endpoint, "live channel closed by server");
                return;
            }
            Disposition::Failed(code) => {
                shared.set_state(ChannelState::Failed);
                shared.emit(ChannelEvent::StatusChanged(ConnectionStatus::Failed { code }));
                match code {
                    // Credential refresh is the coordinator's call; a 401
                    // never consumes retry budget.
                    Some(401) => {
                        info!(%endpoint, "live channel unauthorized");
                        shared.emit(ChannelEvent::Unauthorized);
                        return;
                    }
                    // Terminal until an explicit connect.
                    Some(403) => {
                        warn!(%endpoint, "live channel forbidden");
                        shared.set_state(ChannelState::Idle);
                        return;
                    }
                    _ => {
                        attempts += 1;
                        if attempts > shared.retry.max_attempts {
                            warn!(
                                %endpoint,
                                attempts = attempts - 1,
                                "live channel retry budget exhausted"
                            );
                            shared.set_state(ChannelState::Idle);
                            return;
                        }
                        debug!(%endpoint, attempt = attempts, "reconnecting after backoff");
                        tokio::time::sleep(shared.retry.delay).await;
                    }
                }
            }
        }
    }
}

async fn pump(shared: &Arc<ChannelShared>, connection: &mut LiveConnection) -> Disposition {
    while let Some(event) = connection.events.recv().await {
        match event {
            TransportEvent::Frame(text) => match decode_frame(&text) {
                Ok(action) => shared.emit(ChannelEvent::Action(action)),
                Err(error) => {
                    shared.frames_dropped.fetch_add(1, Ordering::SeqCst);
                    warn!(%error, "dropping malformed live frame");
                }
            },
            TransportEvent::Status(ConnectionStatus::Open) => {}
            TransportEvent::Status(ConnectionStatus::Closed) => return Disposition::Closed,
            TransportEvent::Status(ConnectionStatus::Failed { code }) => {
                return Disposition::Failed(code)
            }
        }
    }
    // Stream ended without a status: the connection dropped.
    Disposition::Failed(None)
}

/// A scripted transport for tests. Each `open` consumes the next queued
/// connection script; its events are replayed, then the connection stays
/// open until dropped (end a script with a `Status` event to simulate a
/// failure or close).
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Vec<TransportEvent>>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    /// Creates a transport with no scripted connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one connection script.
    pub fn push_connection(&self, events: Vec<TransportEvent>) {
        self.scripts.lock().push_back(events);
    }

    /// Endpoints passed to `open`, in order.
    pub fn opened_endpoints(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    /// Number of `open` calls made so far.
    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }
}

#[async_trait]
impl LiveTransport for ScriptedTransport {
    async fn open(&self, endpoint: &str) -> SyncResult<LiveConnection> {
        self.opened.lock().push(endpoint.to_string());
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| SyncError::transport_retryable("no scripted connection"))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for event in script {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            // Keep the connection open until the receiver is dropped.
            tx.closed().await;
        });
        Ok(LiveConnection { events: rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipsync_protocol::ActionKind;
    use std::time::Duration;

    fn failed(code: u16) -> Vec<TransportEvent> {
        vec![TransportEvent::Status(ConnectionStatus::Failed { code: Some(code) })]
    }

    fn channel_with(
        transport: &Arc<ScriptedTransport>,
        retry: RetryConfig,
    ) -> (LiveChannel, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = LiveChannel::new(
            Arc::clone(transport) as Arc<dyn LiveTransport>,
            retry,
            tx,
        );
        (channel, rx)
    }

    /// Collects failure events until the channel settles out of its
    /// retry loop.
    async fn collect_failures(
        rx: &mut mpsc::UnboundedReceiver<ChannelEvent>,
        channel: &LiveChannel,
    ) -> usize {
        let mut failures = 0;
        loop {
            match tokio::time::timeout(Duration::from_secs(600), rx.recv()).await {
                Ok(Some(ChannelEvent::StatusChanged(ConnectionStatus::Failed { .. }))) => {
                    failures += 1;
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
            if matches!(channel.state(), ChannelState::Idle | ChannelState::Closed) {
                // Count whatever is already queued, then stop.
                while let Ok(event) = rx.try_recv() {
                    if matches!(
                        event,
                        ChannelEvent::StatusChanged(ConnectionStatus::Failed { .. })
                    ) {
                        failures += 1;
                    }
                }
                break;
            }
        }
        failures
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_budget_bounds_attempts() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..8 {
            transport.push_connection(failed(500));
        }
        let (channel, mut rx) = channel_with(
            &transport,
            RetryConfig::new(5).with_delay(Duration::from_secs(3)),
        );

        channel.connect("wss://live.example.com/a");
        let failures = collect_failures(&mut rx, &channel).await;

        // One initial attempt plus exactly five reconnects.
        assert_eq!(failures, 6);
        assert_eq!(transport.open_count(), 6);
        assert_eq!(channel.state(), ChannelState::Idle);

        // The budget stays exhausted until an explicit connect.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.open_count(), 6);

        channel.connect("wss://live.example.com/a");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.open_count(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_is_terminal_without_retries() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_connection(failed(403));
        transport.push_connection(failed(403));
        let (channel, mut rx) = channel_with(&transport, RetryConfig::default());

        channel.connect("wss://live.example.com/a");
        let failures = collect_failures(&mut rx, &channel).await;

        assert_eq!(failures, 1);
        assert_eq!(transport.open_count(), 1);
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_defers_to_owner_without_spending_budget() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_connection(failed(401));
        let (channel, mut rx) = channel_with(&transport, RetryConfig::default());

        channel.connect("wss://live.example.com/a");

        let mut saw_unauthorized = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(60), rx.recv()).await
        {
            if event == ChannelEvent::Unauthorized {
                saw_unauthorized = true;
                break;
            }
        }

        assert!(saw_unauthorized);
        assert_eq!(transport.open_count(), 1);
        assert_eq!(channel.state(), ChannelState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_to_same_endpoint_is_noop() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_connection(vec![]);
        transport.push_connection(vec![]);
        let (channel, mut rx) = channel_with(&transport, RetryConfig::default());

        channel.connect("wss://live.example.com/a");
        assert!(matches!(
            rx.recv().await,
            Some(ChannelEvent::StatusChanged(ConnectionStatus::Open))
        ));
        channel.connect("wss://live.example.com/a");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.open_count(), 1);

        // A different endpoint closes the old connection and opens fresh.
        channel.connect("wss://live.example.com/b");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.open_count(), 2);
        assert_eq!(
            transport.opened_endpoints(),
            vec!["wss://live.example.com/a", "wss://live.example.com/b"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_forgets_endpoint() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_connection(vec![]);
        transport.push_connection(vec![]);
        let (channel, mut rx) = channel_with(&transport, RetryConfig::default());

        channel.connect("wss://live.example.com/a");
        assert!(matches!(
            rx.recv().await,
            Some(ChannelEvent::StatusChanged(ConnectionStatus::Open))
        ));

        channel.close();
        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);

        // Reconnecting to the same endpoint is treated as fresh.
        channel.connect("wss://live.example.com/a");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_dropped_not_fatal() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_connection(vec![
            TransportEvent::Frame("{not json".into()),
            TransportEvent::Frame(
                r#"{"type":"created","data":{"id":"s-1","target":"https://example.com"}}"#.into(),
            ),
        ]);
        let (channel, mut rx) = channel_with(&transport, RetryConfig::default());

        channel.connect("wss://live.example.com/a");

        loop {
            match rx.recv().await {
                Some(ChannelEvent::Action(action)) => {
                    assert_eq!(action.kind, ActionKind::Created);
                    assert_eq!(action.id(), "s-1");
                    break;
                }
                Some(_) => {}
                None => panic!("channel event stream ended early"),
            }
        }
        assert_eq!(channel.frames_dropped(), 1);
        assert_eq!(channel.state(), ChannelState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn server_close_stops_reconnects() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_connection(vec![TransportEvent::Status(ConnectionStatus::Closed)]);
        transport.push_connection(vec![]);
        let (channel, mut rx) = channel_with(&transport, RetryConfig::default());

        channel.connect("wss://live.example.com/a");
        let mut saw_closed = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(60), rx.recv()).await
        {
            if event == ChannelEvent::StatusChanged(ConnectionStatus::Closed) {
                saw_closed = true;
                break;
            }
        }

        assert!(saw_closed);
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(transport.open_count(), 1);
    }
}
