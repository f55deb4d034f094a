//! Connectivity monitoring contract.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Network reachability as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    /// The network is reachable.
    Connected,
    /// The network is unreachable.
    Disconnected,
}

/// Emits connectivity transitions.
///
/// Subscribers receive the current status first, then every transition. The
/// coordinator ignores an initial `Connected` (the subscribe-time refresh
/// already covers it) and refreshes on every later `Connected`.
pub trait ConnectivityMonitor: Send + Sync {
    /// Subscribes to status emissions.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectivityStatus>;
}

/// A scriptable monitor for tests: emits an initial status on subscribe and
/// whatever `emit` is called with afterwards.
pub struct ScriptedConnectivity {
    initial: ConnectivityStatus,
    senders: Mutex<Vec<mpsc::UnboundedSender<ConnectivityStatus>>>,
}

impl ScriptedConnectivity {
    /// Creates a monitor whose subscribers first see the given status.
    pub fn new(initial: ConnectivityStatus) -> Self {
        Self {
            initial,
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Emits a transition to every subscriber.
    pub fn emit(&self, status: ConnectivityStatus) {
        self.senders
            .lock()
            .retain(|sender| sender.send(status).is_ok());
    }
}

impl ConnectivityMonitor for ScriptedConnectivity {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectivityStatus> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(self.initial);
        self.senders.lock().push(tx);
        rx
    }
}
