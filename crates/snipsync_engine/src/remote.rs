//! Cold-start/refresh loader contract.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use snipsync_protocol::Snippet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of a full load from the server.
#[derive(Debug, Clone)]
pub struct RemoteSnapshot {
    /// The complete snippet list.
    pub snippets: Vec<Snippet>,
    /// Endpoint for the live push channel.
    pub live_endpoint: String,
    /// The server's response timestamp, epoch milliseconds. Used to compute
    /// the local/server clock offset.
    pub server_timestamp: i64,
}

impl RemoteSnapshot {
    /// Creates a snapshot.
    pub fn new(
        snippets: Vec<Snippet>,
        live_endpoint: impl Into<String>,
        server_timestamp: i64,
    ) -> Self {
        Self {
            snippets,
            live_endpoint: live_endpoint.into(),
            server_timestamp,
        }
    }
}

/// Performs the cold-start/refresh fetch.
///
/// Implementations own transport details (HTTP client, auth headers).
/// Network and full-response decode problems both surface as `SyncError`.
#[async_trait]
pub trait RemoteLoader: Send + Sync {
    /// Loads the complete snippet list plus live-channel coordinates.
    async fn load(&self) -> SyncResult<RemoteSnapshot>;
}

/// A scripted loader for tests. Each `load` call consumes the next queued
/// response.
#[derive(Default)]
pub struct MockRemoteLoader {
    responses: Mutex<VecDeque<SyncResult<RemoteSnapshot>>>,
    calls: AtomicU64,
}

impl MockRemoteLoader {
    /// Creates a loader with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful response.
    pub fn push_snapshot(&self, snapshot: RemoteSnapshot) {
        self.responses.lock().push_back(Ok(snapshot));
    }

    /// Queues a failure.
    pub fn push_error(&self, error: SyncError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Number of `load` calls made so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteLoader for MockRemoteLoader {
    async fn load(&self) -> SyncResult<RemoteSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::transport_fatal("no mock load response set")))
    }
}
