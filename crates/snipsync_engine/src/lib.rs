//! # snipsync Engine
//!
//! Client-local snippet synchronization core.
//!
//! This crate provides:
//! - [`SyncCoordinator`]: single-writer reconciliation of all update sources
//! - [`LiveChannel`]: persistent push connection with reconnect policy
//! - [`ExpirySchedule`]: timer-driven visibility-window expiry
//! - Contracts for the external collaborators (loader, cache, connectivity,
//!   clock, auth, campaign) plus in-memory doubles for each
//! - [`SyncRegistry`]: one coordinator per consumer tag
//!
//! ## Architecture
//!
//! Three producers run as cooperative tokio tasks: the one-shot refresh
//! load, the live channel's receive loop, and the expiry timer. All of them
//! feed one message queue owned by a single writer task, which applies
//! changes to the canonical snippet list, persists a snapshot, and fans the
//! result out to observers as [`SyncOutcome`] values.
//!
//! ## Key Invariants
//!
//! - Canonical state has exactly one writer
//! - Actions from one producer apply in production order
//! - Observers see every published outcome, in order
//! - The last good snippet list survives every failure
//! - Correctness never depends on cache availability

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod channel;
mod clock;
mod collaborators;
mod config;
mod connectivity;
mod coordinator;
mod error;
mod expiry;
mod merge;
mod overlay;
mod registry;
mod remote;

pub use cache::{CacheStore, FileCacheStore, MemoryCacheStore};
pub use channel::{
    ChannelEvent, ChannelState, ConnectionStatus, LiveChannel, LiveConnection, LiveTransport,
    ScriptedTransport, TransportEvent,
};
pub use clock::{ManualClock, SystemTimeProvider, TimeProvider};
pub use collaborators::{Auth, Campaign, RecordingCampaign, StaticAuth};
pub use config::{RetryConfig, SyncConfig};
pub use connectivity::{ConnectivityMonitor, ConnectivityStatus, ScriptedConnectivity};
pub use coordinator::{SnippetObserver, SyncCoordinator, SyncDeps, SyncStats};
pub use error::{SyncError, SyncResult};
pub use expiry::ExpirySchedule;
pub use merge::apply_action;
pub use overlay::LocalOverlay;
pub use registry::{CoordinatorFactory, SyncRegistry};
pub use remote::{MockRemoteLoader, RemoteLoader, RemoteSnapshot};

pub use snipsync_protocol::{SyncFailure, SyncOutcome};
