//! Search overlay on top of the paged note list.
//!
//! A settled query owns the scope `Scope::Search(q)` in the shared cache.
//! Changing the query discards the previous search scope outright; results are
//! never merged across queries. A response is committed only if its query is
//! still the settled one when it arrives. The outgoing request is not
//! cancelled; late responses are simply ignored.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::context::SyncContext;
use crate::debounce::QueryDebouncer;
use crate::error::Result;
use crate::paged_cache::CollectionSnapshot;
use crate::paged_cache::FetchOutcome;
use crate::paged_cache::Scope;
use crate::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The query is empty; the overlay falls back to the main list.
    Cleared,
    /// The query was already active, or its first page is still in flight.
    Unchanged,
    Committed { added: usize, exhausted: bool },
    /// The query was superseded (or the overlay torn down) before the
    /// response arrived.
    Stale,
}

#[derive(Debug, Default)]
struct OverlayState {
    visible: bool,
    settled: String,
    torn_down: bool,
    /// Failure of the latest request for the settled query, until the next
    /// selection or a successful page.
    last_error: Option<String>,
}

enum Selection {
    Cleared,
    Unchanged,
    Fetch(String),
}

pub struct SearchOverlay {
    ctx: Arc<SyncContext>,
    state: Mutex<OverlayState>,
    changes: Signal,
}

impl SearchOverlay {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            ctx,
            state: Mutex::new(OverlayState::default()),
            changes: Signal::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OverlayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn activate(&self, settled: impl Into<String>) -> Result<SearchOutcome> {
        match self.select(settled.into()) {
            Selection::Cleared => Ok(SearchOutcome::Cleared),
            Selection::Unchanged => Ok(SearchOutcome::Unchanged),
            Selection::Fetch(query) => self.run_search(query).await,
        }
    }

    /// Records `settled` as the current query and reports whether a request is
    /// needed. Never awaits, so callers can order selections deterministically.
    fn select(&self, settled: String) -> Selection {
        let previous = {
            let mut state = self.lock();
            if state.torn_down {
                return Selection::Unchanged;
            }
            state.last_error = None;
            std::mem::replace(&mut state.settled, settled.clone())
        };

        if previous != settled && !previous.is_empty() {
            self.ctx.cache.discard(&Scope::Search(previous.clone()));
        }
        if settled.is_empty() {
            self.changes.notify();
            return Selection::Cleared;
        }

        let scope = Scope::Search(settled.clone());
        if previous == settled && self.ctx.cache.contains(&scope) {
            return Selection::Unchanged;
        }
        self.ctx.cache.reset(&scope);
        self.changes.notify();
        Selection::Fetch(settled)
    }

    async fn run_search(&self, query: String) -> Result<SearchOutcome> {
        let scope = Scope::Search(query.clone());
        let result = self.ctx.cache.fetch_next(&scope).await;

        if !self.is_current(&query) {
            debug!(query, "discarding stale search response");
            return Ok(SearchOutcome::Stale);
        }
        let outcome = match self.record(result)? {
            FetchOutcome::Merged { added, exhausted } => SearchOutcome::Committed { added, exhausted },
            FetchOutcome::Skipped => SearchOutcome::Unchanged,
            FetchOutcome::Stale => SearchOutcome::Stale,
        };
        Ok(outcome)
    }

    /// Stores the failure (or clears it on success) and notifies observers.
    fn record(&self, result: Result<FetchOutcome>) -> Result<FetchOutcome> {
        self.lock().last_error = match &result {
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };
        self.changes.notify();
        result
    }

    fn is_current(&self, query: &str) -> bool {
        let state = self.lock();
        !state.torn_down && state.settled == query
    }

    pub fn show(&self) {
        self.set_visible(true);
    }

    pub fn hide(&self) {
        self.set_visible(false);
    }

    fn set_visible(&self, visible: bool) {
        let changed = {
            let mut state = self.lock();
            std::mem::replace(&mut state.visible, visible) != visible
        };
        if changed {
            self.changes.notify();
        }
    }

    pub fn is_visible(&self) -> bool {
        self.lock().visible
    }

    pub fn settled_query(&self) -> String {
        self.lock().settled.clone()
    }

    /// Scope the presentation layer should render right now.
    pub fn display_scope(&self) -> Scope {
        let state = self.lock();
        if state.visible && !state.settled.is_empty() {
            Scope::Search(state.settled.clone())
        } else {
            Scope::All
        }
    }

    pub fn displayed(&self) -> CollectionSnapshot {
        self.ctx.cache.snapshot(&self.display_scope())
    }

    /// Fetches the next page of whatever is displayed. Also the retry path
    /// after a failed page.
    pub async fn fetch_more(&self) -> Result<FetchOutcome> {
        let scope = self.display_scope();
        let result = self.ctx.cache.fetch_next(&scope).await;
        if scope.query().is_some_and(|q| self.is_current(q)) {
            self.record(result)
        } else {
            result
        }
    }

    /// Error from the latest request for the settled query. Searches started by
    /// [`SearchController`] report failures only here.
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Overlay-level changes (visibility, query). Collection contents are
    /// published by the cache's own subscription.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn teardown(&self) {
        let settled = {
            let mut state = self.lock();
            state.torn_down = true;
            std::mem::take(&mut state.settled)
        };
        if !settled.is_empty() {
            self.ctx.cache.discard(&Scope::Search(settled));
        }
        self.changes.notify();
    }
}

/// Binds a [`QueryDebouncer`] to a [`SearchOverlay`]: raw edits go in through
/// [`SearchController::on_query_change`], settled values drive the overlay.
pub struct SearchController {
    overlay: Arc<SearchOverlay>,
    debouncer: QueryDebouncer,
    pump: JoinHandle<()>,
}

impl SearchController {
    /// Must be called from within a tokio runtime.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        let debouncer = QueryDebouncer::new(ctx.config.debounce);
        let overlay = Arc::new(SearchOverlay::new(ctx));
        let pump = tokio::spawn(pump_settled(Arc::clone(&overlay), debouncer.subscribe()));
        Self {
            overlay,
            debouncer,
            pump,
        }
    }

    pub fn query(&self) -> String {
        self.debouncer.raw()
    }

    pub fn on_query_change(&self, raw: impl Into<String>) {
        self.debouncer.update(raw);
    }

    pub fn overlay(&self) -> &Arc<SearchOverlay> {
        &self.overlay
    }

    pub fn teardown(&self) {
        self.debouncer.cancel();
        self.pump.abort();
        self.overlay.teardown();
    }
}

impl Drop for SearchController {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn pump_settled(overlay: Arc<SearchOverlay>, mut settled: watch::Receiver<String>) {
    while settled.changed().await.is_ok() {
        let query = settled.borrow_and_update().clone();
        // Selection happens here, in settle order; only the request is spawned
        // so a slow response never holds up the next query.
        if let Selection::Fetch(query) = overlay.select(query) {
            let overlay = Arc::clone(&overlay);
            tokio::spawn(async move {
                if let Err(e) = overlay.run_search(query.clone()).await {
                    warn!(query, "search failed: {e}");
                }
            });
        }
    }
}
