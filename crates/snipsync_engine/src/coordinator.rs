//! The sync coordinator: single-writer reconciliation of all update sources.
//!
//! One actor task owns the canonical snippet list. Refresh results, live
//! actions, expiry deletions, overlay edits, and lifecycle changes all arrive
//! as messages on one queue and are applied strictly in arrival order, so no
//! update is lost or applied against stale state.

use crate::cache::CacheStore;
use crate::channel::{ChannelEvent, ChannelState, LiveChannel, LiveTransport};
use crate::clock::{SystemTimeProvider, TimeProvider};
use crate::collaborators::{Auth, Campaign};
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityStatus};
use crate::error::SyncResult;
use crate::expiry::ExpirySchedule;
use crate::merge::apply_action;
use crate::overlay::LocalOverlay;
use crate::remote::{RemoteLoader, RemoteSnapshot};
use snipsync_protocol::{
    PropMap, Snippet, SnippetDelta, SyncFailure, SyncOutcome, UpdateAction,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// External collaborators consumed by a coordinator.
pub struct SyncDeps {
    /// Cold-start/refresh loader.
    pub remote: Arc<dyn RemoteLoader>,
    /// Snapshot cache.
    pub cache: Arc<dyn CacheStore>,
    /// Live-channel transport.
    pub transport: Arc<dyn LiveTransport>,
    /// Credential supplier.
    pub auth: Arc<dyn Auth>,
    /// Clock; defaults to the system clock.
    pub clock: Arc<dyn TimeProvider>,
    /// Optional connectivity monitor.
    pub connectivity: Option<Arc<dyn ConnectivityMonitor>>,
    /// Optional campaign collaborator.
    pub campaign: Option<Arc<dyn Campaign>>,
}

impl SyncDeps {
    /// Creates the dependency set from the required collaborators.
    pub fn new(
        remote: Arc<dyn RemoteLoader>,
        cache: Arc<dyn CacheStore>,
        transport: Arc<dyn LiveTransport>,
        auth: Arc<dyn Auth>,
    ) -> Self {
        Self {
            remote,
            cache,
            transport,
            auth,
            clock: Arc::new(SystemTimeProvider),
            connectivity: None,
            campaign: None,
        }
    }

    /// Overrides the clock.
    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// Attaches a connectivity monitor.
    pub fn with_connectivity(mut self, monitor: Arc<dyn ConnectivityMonitor>) -> Self {
        self.connectivity = Some(monitor);
        self
    }

    /// Attaches a campaign collaborator.
    pub fn with_campaign(mut self, campaign: Arc<dyn Campaign>) -> Self {
        self.campaign = Some(campaign);
        self
    }
}

/// Counters exposed by [`SyncCoordinator::stats`].
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Refreshes started.
    pub refreshes_started: u64,
    /// Refreshes that surfaced an error.
    pub refreshes_failed: u64,
    /// Update actions that changed canonical state.
    pub actions_applied: u64,
    /// Campaign events logged.
    pub events_logged: u64,
    /// Malformed live frames dropped.
    pub frames_dropped: u64,
}

#[derive(Debug, Default)]
struct StatsCells {
    refreshes_started: AtomicU64,
    refreshes_failed: AtomicU64,
    actions_applied: AtomicU64,
    events_logged: AtomicU64,
}

/// A subscription to the coordinator's outcome stream.
///
/// Receives every published outcome in order; dropping the handle
/// unsubscribes.
pub struct SnippetObserver {
    id: u64,
    rx: mpsc::UnboundedReceiver<SyncOutcome<Vec<Snippet>>>,
    coordinator: mpsc::UnboundedSender<Msg>,
}

impl SnippetObserver {
    /// Receives the next outcome; `None` once the coordinator is gone.
    pub async fn recv(&mut self) -> Option<SyncOutcome<Vec<Snippet>>> {
        self.rx.recv().await
    }
}

impl Drop for SnippetObserver {
    fn drop(&mut self) {
        let _ = self.coordinator.send(Msg::Unobserve(self.id));
    }
}

enum Msg {
    Observe(oneshot::Sender<SnippetObserver>),
    Unobserve(u64),
    Refresh,
    LoadFinished(SyncResult<RemoteSnapshot>),
    Channel(ChannelEvent),
    Expiry(UpdateAction),
    SetLocalProperty(String, PropMap),
    LogEvent(String),
    CampaignSnippets(Vec<Snippet>),
    Connectivity(ConnectivityStatus),
    AuthRefreshed(SyncResult<()>),
    GraceElapsed(u64),
    Shutdown,
}

/// Owns canonical state and drives all producers. One instance per consumer
/// tag; see [`crate::registry::SyncRegistry`].
///
/// Must be created inside a tokio runtime.
pub struct SyncCoordinator {
    tx: mpsc::UnboundedSender<Msg>,
    channel: Arc<LiveChannel>,
    stats: Arc<StatsCells>,
}

impl SyncCoordinator {
    /// Spawns a coordinator for the given configuration and collaborators.
    pub fn new(config: SyncConfig, deps: SyncDeps) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(StatsCells::default());

        let (channel_tx, mut channel_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(LiveChannel::new(
            Arc::clone(&deps.transport),
            config.retry,
            channel_tx,
        ));
        {
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(event) = channel_rx.recv().await {
                    if tx.send(Msg::Channel(event)).is_err() {
                        break;
                    }
                }
            });
        }

        let (expiry_tx, mut expiry_rx) = mpsc::unbounded_channel();
        let expiry = Arc::new(ExpirySchedule::new(Arc::clone(&deps.clock), expiry_tx));
        {
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(action) = expiry_rx.recv().await {
                    if tx.send(Msg::Expiry(action)).is_err() {
                        break;
                    }
                }
            });
        }

        if let Some(monitor) = &deps.connectivity {
            let mut status_rx = monitor.subscribe();
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(status) = status_rx.recv().await {
                    if tx.send(Msg::Connectivity(status)).is_err() {
                        break;
                    }
                }
            });
        }

        let actor = Actor {
            config,
            remote: deps.remote,
            cache: deps.cache,
            clock: deps.clock,
            auth: deps.auth,
            campaign: deps.campaign,
            channel: Arc::clone(&channel),
            expiry,
            overlay: LocalOverlay::new(),
            tx: tx.clone(),
            stats: Arc::clone(&stats),
            observers: HashMap::new(),
            next_observer_id: 1,
            snippets: None,
            phase: Phase::Progress,
            loaded: false,
            started: false,
            endpoint: None,
            seen_connectivity: false,
            grace_generation: 0,
            grace_task: None,
        };
        tokio::spawn(actor.run(rx));

        Self { tx, channel, stats }
    }

    /// Subscribes to the outcome stream.
    ///
    /// The first subscription ever makes the coordinator emit the cached
    /// snapshot as `Progress` and drive a refresh; later subscriptions replay
    /// the current outcome immediately.
    pub async fn observe(&self) -> SnippetObserver {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Msg::Observe(reply_tx));
        match reply_rx.await {
            Ok(observer) => observer,
            // The coordinator is shut down: hand back a closed stream.
            Err(_) => {
                let (_, rx) = mpsc::unbounded_channel();
                SnippetObserver {
                    id: 0,
                    rx,
                    coordinator: self.tx.clone(),
                }
            }
        }
    }

    /// Triggers a refresh. Idempotent and re-entrant-safe: overlapping
    /// refreshes are fine, the latest completion wins.
    pub fn refresh(&self) {
        let _ = self.tx.send(Msg::Refresh);
    }

    /// Merges properties into the local overlay for one snippet and
    /// re-publishes the projection. Never persisted, never sent upstream.
    pub fn set_local_property(&self, id: impl Into<String>, props: PropMap) {
        let _ = self.tx.send(Msg::SetLocalProperty(id.into(), props));
    }

    /// Fire-and-forget campaign event. Failures are logged, never surfaced.
    pub fn log_event(&self, name: impl Into<String>) {
        let _ = self.tx.send(Msg::LogEvent(name.into()));
    }

    /// Tears the coordinator down immediately: closes the live channel,
    /// cancels the expiry timer, ends the outcome stream.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Msg::Shutdown);
    }

    /// Current live-channel state, for operator introspection.
    pub fn live_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Snapshot of the coordinator's counters.
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            refreshes_started: self.stats.refreshes_started.load(Ordering::SeqCst),
            refreshes_failed: self.stats.refreshes_failed.load(Ordering::SeqCst),
            actions_applied: self.stats.actions_applied.load(Ordering::SeqCst),
            events_logged: self.stats.events_logged.load(Ordering::SeqCst),
            frames_dropped: self.channel.frames_dropped(),
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        let _ = self.tx.send(Msg::Shutdown);
    }
}

/// Outcome phase of the canonical state.
enum Phase {
    Progress,
    Success,
    Error(SyncFailure),
}

struct Actor {
    config: SyncConfig,
    remote: Arc<dyn RemoteLoader>,
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn TimeProvider>,
    auth: Arc<dyn Auth>,
    campaign: Option<Arc<dyn Campaign>>,
    channel: Arc<LiveChannel>,
    expiry: Arc<ExpirySchedule>,
    overlay: LocalOverlay,
    tx: mpsc::UnboundedSender<Msg>,
    stats: Arc<StatsCells>,
    observers: HashMap<u64, mpsc::UnboundedSender<SyncOutcome<Vec<Snippet>>>>,
    next_observer_id: u64,
    /// Last known snippet list: the cached snapshot until the first load
    /// replaces it, canonical state afterwards.
    snippets: Option<Vec<Snippet>>,
    phase: Phase,
    /// Whether a load has ever succeeded.
    loaded: bool,
    /// Whether the first subscription already drove a refresh.
    started: bool,
    /// Live endpoint from the last successful load.
    endpoint: Option<String>,
    seen_connectivity: bool,
    grace_generation: u64,
    grace_task: Option<JoinHandle<()>>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>) {
        // Preload the cached snapshot so the first observer sees it. Cache
        // failures never matter for correctness.
        match self.cache.load(&self.config.cache_key).await {
            Ok(Some(snapshot)) => {
                debug!(count = snapshot.len(), "loaded cached snapshot");
                self.snippets = Some(snapshot);
            }
            Ok(None) => {}
            Err(error) => warn!(%error, "cache load failed"),
        }

        while let Some(msg) = rx.recv().await {
            match msg {
                Msg::Observe(reply) => self.on_observe(reply),
                Msg::Unobserve(id) => self.on_unobserve(id),
                Msg::Refresh => self.do_refresh(),
                Msg::LoadFinished(result) => self.on_load_finished(result),
                Msg::Channel(event) => self.on_channel_event(event),
                Msg::Expiry(action) => self.apply(action),
                Msg::SetLocalProperty(id, props) => {
                    self.overlay.set(&id, props);
                    self.emit_all();
                }
                Msg::LogEvent(name) => self.on_log_event(name),
                Msg::CampaignSnippets(snippets) => self.on_campaign_snippets(snippets),
                Msg::Connectivity(status) => self.on_connectivity(status),
                Msg::AuthRefreshed(result) => self.on_auth_refreshed(result),
                Msg::GraceElapsed(generation) => self.on_grace_elapsed(generation),
                Msg::Shutdown => break,
            }
        }

        info!(tag = %self.config.tag, "sync coordinator shutting down");
        self.channel.close();
        self.expiry.release();
    }

    fn on_observe(&mut self, reply: oneshot::Sender<SnippetObserver>) {
        let id = self.next_observer_id;
        self.next_observer_id += 1;

        // A returning observer cancels a pending teardown.
        self.grace_generation += 1;
        if let Some(task) = self.grace_task.take() {
            task.abort();
        }

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let first_ever = !self.started;
        if !first_ever {
            // Replay the current outcome so late subscribers catch up.
            let _ = outcome_tx.send(self.current_outcome());
        }
        self.observers.insert(id, outcome_tx);

        let _ = reply.send(SnippetObserver {
            id,
            rx: outcome_rx,
            coordinator: self.tx.clone(),
        });

        if first_ever {
            // The refresh below emits the cached snapshot as Progress.
            self.started = true;
            self.do_refresh();
        }
    }

    fn on_unobserve(&mut self, id: u64) {
        self.observers.remove(&id);
        if !self.observers.is_empty() {
            return;
        }

        self.grace_generation += 1;
        let generation = self.grace_generation;
        let grace = self.config.grace_period;
        let tx = self.tx.clone();
        debug!(grace_ms = grace.as_millis() as u64, "last observer gone, starting grace timer");
        self.grace_task = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(Msg::GraceElapsed(generation));
        }));
    }

    fn on_grace_elapsed(&mut self, generation: u64) {
        if generation != self.grace_generation || !self.observers.is_empty() {
            return;
        }
        self.grace_task = None;
        info!(tag = %self.config.tag, "grace period elapsed, stopping producers");
        self.channel.close();
        self.expiry.release();
    }

    /// Producers stay down once the last observer has left and the grace
    /// period ran out; late load results still update state but must not
    /// restart them.
    fn torn_down(&self) -> bool {
        self.started && self.observers.is_empty() && self.grace_task.is_none()
    }

    fn do_refresh(&mut self) {
        self.stats.refreshes_started.fetch_add(1, Ordering::SeqCst);
        self.phase = Phase::Progress;
        self.emit_all();

        let remote = Arc::clone(&self.remote);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = remote.load().await;
            let _ = tx.send(Msg::LoadFinished(result));
        });
    }

    fn on_load_finished(&mut self, result: SyncResult<RemoteSnapshot>) {
        match result {
            Ok(snapshot) => {
                info!(
                    count = snapshot.snippets.len(),
                    endpoint = %snapshot.live_endpoint,
                    "refresh succeeded"
                );
                let offset = self.clock.now_millis() - snapshot.server_timestamp;
                self.loaded = true;
                self.snippets = Some(snapshot.snippets);
                self.phase = Phase::Success;
                self.persist();
                self.emit_all();

                if self.torn_down() {
                    debug!("coordinator torn down, leaving producers stopped");
                    return;
                }
                self.endpoint = Some(snapshot.live_endpoint.clone());
                self.channel.connect(&snapshot.live_endpoint);
                self.expiry
                    .rebase(offset, self.snippets.as_deref().unwrap_or(&[]));
            }
            Err(error) => {
                warn!(%error, "refresh failed");
                self.stats.refreshes_failed.fetch_add(1, Ordering::SeqCst);
                // The existing channel and schedule stay untouched; stale
                // data keeps flowing to observers.
                self.phase = Phase::Error(error.to_failure());
                self.emit_all();
            }
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Action(action) => self.apply(action),
            ChannelEvent::StatusChanged(status) => {
                debug!(?status, "live channel status changed");
            }
            ChannelEvent::Unauthorized => {
                let auth = Arc::clone(&self.auth);
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = auth.refresh_token().await;
                    let _ = tx.send(Msg::AuthRefreshed(result));
                });
            }
        }
    }

    fn on_auth_refreshed(&mut self, result: SyncResult<()>) {
        match result {
            Ok(()) => {
                if self.torn_down() {
                    return;
                }
                if let Some(endpoint) = self.endpoint.clone() {
                    info!("credentials refreshed, reconnecting live channel");
                    self.channel.connect(&endpoint);
                }
            }
            Err(error) => {
                warn!(%error, "credential refresh failed");
                self.phase = Phase::Error(error.to_failure());
                self.emit_all();
            }
        }
    }

    fn on_connectivity(&mut self, status: ConnectivityStatus) {
        if !self.seen_connectivity {
            // The subscribe-time refresh already covers an initial
            // Connected; reacting again would refresh twice.
            self.seen_connectivity = true;
            if status == ConnectivityStatus::Disconnected {
                self.channel.close();
            }
            return;
        }
        match status {
            ConnectivityStatus::Connected => {
                info!("network back, refreshing");
                self.do_refresh();
            }
            ConnectivityStatus::Disconnected => {
                info!("network gone, closing live channel");
                self.channel.close();
            }
        }
    }

    fn on_log_event(&mut self, name: String) {
        self.stats.events_logged.fetch_add(1, Ordering::SeqCst);
        let Some(campaign) = self.campaign.as_ref().map(Arc::clone) else {
            debug!(event = %name, "no campaign collaborator, dropping event");
            return;
        };
        let tx = self.tx.clone();
        tokio::spawn(async move {
            match campaign.log_event_and_get_snippets(&name).await {
                Ok(snippets) if !snippets.is_empty() => {
                    let _ = tx.send(Msg::CampaignSnippets(snippets));
                }
                Ok(_) => {}
                Err(error) => warn!(event = %name, %error, "campaign event failed"),
            }
        });
    }

    fn on_campaign_snippets(&mut self, snippets: Vec<Snippet>) {
        if !self.loaded {
            debug!("ignoring campaign snippets before first load");
            return;
        }
        let Some(canonical) = self.snippets.as_mut() else {
            return;
        };
        let mut changed = false;
        for snippet in &snippets {
            let action = UpdateAction::created(SnippetDelta::from_snippet(snippet));
            changed |= apply_action(canonical, &action);
        }
        if changed {
            self.stats.actions_applied.fetch_add(1, Ordering::SeqCst);
            self.phase = Phase::Success;
            self.persist();
            self.emit_all();
            self.expiry.update(self.snippets.as_deref().unwrap_or(&[]));
        }
    }

    /// Applies one update action from the live channel or the expiry
    /// schedule against canonical state.
    fn apply(&mut self, action: UpdateAction) {
        let Some(snippets) = self.snippets.as_mut() else {
            debug!(id = %action.id(), "dropping action before any data");
            return;
        };
        if !apply_action(snippets, &action) {
            return;
        }
        self.stats.actions_applied.fetch_add(1, Ordering::SeqCst);
        self.phase = Phase::Success;
        self.persist();
        self.emit_all();
        self.expiry.update(self.snippets.as_deref().unwrap_or(&[]));
    }

    /// Best-effort persistence of the canonical list; failures are logged
    /// and swallowed.
    fn persist(&self) {
        let Some(snippets) = self.snippets.clone() else {
            return;
        };
        let cache = Arc::clone(&self.cache);
        let key = self.config.cache_key.clone();
        tokio::spawn(async move {
            if let Err(error) = cache.save(&key, &snippets).await {
                warn!(%error, "cache save failed");
            }
        });
    }

    /// The outcome as observers see it: canonical state in the current
    /// phase, overlay properties merged in.
    fn current_outcome(&self) -> SyncOutcome<Vec<Snippet>> {
        let projected = self.snippets.as_deref().map(|s| self.overlay.project(s));
        match &self.phase {
            Phase::Progress => SyncOutcome::progress(projected),
            Phase::Success => SyncOutcome::success(projected.unwrap_or_default()),
            Phase::Error(failure) => SyncOutcome::failure(failure.clone(), projected),
        }
    }

    fn emit_all(&mut self) {
        let outcome = self.current_outcome();
        self.observers
            .retain(|_, observer| observer.send(outcome.clone()).is_ok());
    }
}
