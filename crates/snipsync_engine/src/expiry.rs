//! Timer-driven expiry of snippets with a visibility window.
//!
//! The schedule tracks the canonical set plus the local/server clock offset,
//! emits synthetic `Deleted` actions for elapsed windows, and keeps at most
//! one timer pending for the nearest future window.

use crate::clock::TimeProvider;
use parking_lot::Mutex;
use snipsync_protocol::{Snippet, UpdateAction};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Computes wake times from visibility windows and emits synthetic deletes.
pub struct ExpirySchedule {
    shared: Arc<ExpiryShared>,
}

struct ExpiryShared {
    clock: Arc<dyn TimeProvider>,
    actions: mpsc::UnboundedSender<UpdateAction>,
    inner: Mutex<ExpiryInner>,
}

#[derive(Default)]
struct ExpiryInner {
    /// `local_now − server_timestamp` from the last load.
    offset_millis: i64,
    /// `(id, until_utc)` for every tracked snippet with a window.
    entries: Vec<(String, i64)>,
    timer: Option<JoinHandle<()>>,
    /// Invalidates timers from superseded schedules.
    generation: u64,
    scheduled: Option<i64>,
}

impl ExpirySchedule {
    /// Creates a schedule emitting deletes on the given channel.
    pub fn new(
        clock: Arc<dyn TimeProvider>,
        actions: mpsc::UnboundedSender<UpdateAction>,
    ) -> Self {
        Self {
            shared: Arc::new(ExpiryShared {
                clock,
                actions,
                inner: Mutex::new(ExpiryInner::default()),
            }),
        }
    }

    /// Stores a new clock offset and snippet set, emits deletes for every
    /// already-elapsed window, and schedules the next wake.
    pub fn rebase(&self, offset_millis: i64, snippets: &[Snippet]) {
        let mut inner = self.shared.inner.lock();
        inner.offset_millis = offset_millis;
        inner.entries = collect_windows(snippets);
        ExpiryShared::sweep_locked(&self.shared, &mut inner, None);
    }

    /// Replaces the tracked set, keeping the stored offset.
    pub fn update(&self, snippets: &[Snippet]) {
        let mut inner = self.shared.inner.lock();
        inner.entries = collect_windows(snippets);
        ExpiryShared::sweep_locked(&self.shared, &mut inner, None);
    }

    /// Cancels any pending timer. Idempotent.
    pub fn release(&self) {
        let mut inner = self.shared.inner.lock();
        inner.generation += 1;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.scheduled = None;
    }

    /// The instant the pending timer will fire at, if any. Server time.
    pub fn pending_deadline(&self) -> Option<i64> {
        self.shared.inner.lock().scheduled
    }
}

impl Drop for ExpirySchedule {
    fn drop(&mut self) {
        self.release();
    }
}

fn collect_windows(snippets: &[Snippet]) -> Vec<(String, i64)> {
    snippets
        .iter()
        .filter_map(|s| s.visibility.map(|w| (s.id.clone(), w.until_utc)))
        .collect()
}

impl ExpiryShared {
    /// Emits deletes for elapsed windows and (re)schedules the single timer
    /// for the nearest future one.
    ///
    /// `floor` is the deadline a just-fired timer was scheduled for; sweeping
    /// against it rather than only the fresh clock read means a due snippet
    /// can never be stranded behind a re-schedule loop.
    fn sweep_locked(shared: &Arc<Self>, inner: &mut ExpiryInner, floor: Option<i64>) {
        let mut server_now = shared.clock.now_millis() - inner.offset_millis;
        if let Some(floor) = floor {
            server_now = server_now.max(floor);
        }

        let (expired, remaining): (Vec<_>, Vec<_>) = inner
            .entries
            .drain(..)
            .partition(|(_, until)| *until <= server_now);
        inner.entries = remaining;

        for (id, until) in expired {
            debug!(%id, until, server_now, "visibility window elapsed");
            let _ = shared.actions.send(UpdateAction::deleted(id));
        }

        inner.generation += 1;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.scheduled = None;

        let Some(next) = inner.entries.iter().map(|(_, until)| *until).min() else {
            return;
        };
        let delay = Duration::from_millis((next - server_now).max(0) as u64);
        let generation = inner.generation;
        inner.scheduled = Some(next);

        let task_shared = Arc::clone(shared);
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task_shared.on_timer(generation, next);
        }));
    }

    fn on_timer(self: &Arc<Self>, generation: u64, target: i64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        inner.timer = None;
        inner.scheduled = None;
        Self::sweep_locked(self, &mut inner, Some(target));
    }
}
