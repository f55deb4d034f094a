//! Auth and campaign collaborator contracts.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use snipsync_protocol::Snippet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Supplies bearer credentials to transports and refreshes them on demand.
///
/// A 401 anywhere triggers `refresh_token` before the operation is retried.
#[async_trait]
pub trait Auth: Send + Sync {
    /// Current bearer token.
    async fn token(&self) -> SyncResult<String>;

    /// Obtains fresh credentials. Subsequent `token` calls return the new
    /// value.
    async fn refresh_token(&self) -> SyncResult<()>;
}

/// Campaign event sink. Best-effort: failures mean "no campaign snippets".
#[async_trait]
pub trait Campaign: Send + Sync {
    /// Records an event and returns any snippets the campaign service wants
    /// shown in response.
    async fn log_event_and_get_snippets(&self, event: &str) -> SyncResult<Vec<Snippet>>;
}

/// A fixed-token auth double for tests.
#[derive(Default)]
pub struct StaticAuth {
    token: RwLock<String>,
    refreshes: AtomicU64,
    fail_refresh: AtomicBool,
}

impl StaticAuth {
    /// Creates an auth double with the given starting token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(token.into()),
            refreshes: AtomicU64::new(0),
            fail_refresh: AtomicBool::new(false),
        }
    }

    /// Number of refreshes performed.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Makes subsequent refreshes fail.
    pub fn set_fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Auth for StaticAuth {
    async fn token(&self) -> SyncResult<String> {
        Ok(self.token.read().clone())
    }

    async fn refresh_token(&self) -> SyncResult<()> {
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(SyncError::Unauthorized);
        }
        let count = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        *self.token.write() = format!("token-{count}");
        Ok(())
    }
}

/// A recording campaign double for tests.
#[derive(Default)]
pub struct RecordingCampaign {
    events: Mutex<Vec<String>>,
    snippets: RwLock<Vec<Snippet>>,
    fail: AtomicBool,
}

impl RecordingCampaign {
    /// Creates an empty campaign double.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the snippets returned for every logged event.
    pub fn set_snippets(&self, snippets: Vec<Snippet>) {
        *self.snippets.write() = snippets;
    }

    /// Makes subsequent calls fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Events logged so far.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl Campaign for RecordingCampaign {
    async fn log_event_and_get_snippets(&self, event: &str) -> SyncResult<Vec<Snippet>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("campaign unavailable"));
        }
        self.events.lock().push(event.to_string());
        Ok(self.snippets.read().clone())
    }
}
