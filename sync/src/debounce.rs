//! Trailing-edge debounce for the search box.
//!
//! Every raw update bumps a generation counter and cancels the pending timer.
//! A timer only publishes if its generation is still current and neither it
//! nor the owning debouncer has been cancelled, so a torn-down view never sees
//! a late emission. An empty query is published immediately.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Default)]
struct DebounceState {
    raw: String,
    generation: u64,
    pending: Option<CancellationToken>,
}

fn lock(state: &Mutex<DebounceState>) -> MutexGuard<'_, DebounceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publishes the settled value only when it differs from the current one.
fn publish(settled: &watch::Sender<String>, value: String) {
    settled.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}

/// Must be used from within a tokio runtime; timers are spawned tasks.
#[derive(Debug)]
pub struct QueryDebouncer {
    interval: Duration,
    state: Arc<Mutex<DebounceState>>,
    settled: Arc<watch::Sender<String>>,
    alive: CancellationToken,
}

impl QueryDebouncer {
    pub fn new(interval: Duration) -> Self {
        let (settled, _rx) = watch::channel(String::new());
        Self {
            interval,
            state: Arc::new(Mutex::new(DebounceState::default())),
            settled: Arc::new(settled),
            alive: CancellationToken::new(),
        }
    }

    pub fn update(&self, raw: impl Into<String>) {
        let raw = raw.into();
        let mut state = lock(&self.state);
        if self.alive.is_cancelled() {
            return;
        }
        state.generation += 1;
        if let Some(pending) = state.pending.take() {
            pending.cancel();
        }
        state.raw.clone_from(&raw);

        if raw.is_empty() {
            drop(state);
            publish(&self.settled, raw);
            return;
        }

        let generation = state.generation;
        let token = self.alive.child_token();
        state.pending = Some(token.clone());
        drop(state);

        let state = Arc::clone(&self.state);
        let settled = Arc::clone(&self.settled);
        let interval = self.interval;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    trace!(generation, "debounce timer superseded");
                }
                _ = tokio::time::sleep(interval) => {
                    let mut state = lock(&state);
                    if state.generation == generation && !token.is_cancelled() {
                        state.pending = None;
                        drop(state);
                        publish(&settled, raw);
                    }
                }
            }
        });
    }

    /// Latest raw input, settled or not.
    pub fn raw(&self) -> String {
        lock(&self.state).raw.clone()
    }

    pub fn settled(&self) -> String {
        self.settled.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.settled.subscribe()
    }

    /// Abandons any pending emission and ignores further updates.
    pub fn cancel(&self) {
        self.alive.cancel();
    }
}

impl Drop for QueryDebouncer {
    fn drop(&mut self) {
        self.alive.cancel();
    }
}
