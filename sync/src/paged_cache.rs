//! Per-scope, cursor-paginated note collections.
//!
//! Every scope ("all notes" or "search results for `q`") owns one
//! [`Collection`] and one [`FetchCursor`]. [`PagedCollectionCache::fetch_next`]
//! is the only operation that grows a collection, and it does so only while
//! holding the cursor's `in_flight` claim:
//!
//! 1. A call that finds the cursor exhausted or claimed returns
//!    [`FetchOutcome::Skipped`] immediately. Nothing is queued.
//! 2. A successful response is merged, the offset advances by one page, and the
//!    claim is released, all under one lock.
//! 3. A failed response releases the claim and leaves the offset untouched.
//! 4. A response for a scope that was discarded or reset in the meantime is
//!    dropped as [`FetchOutcome::Stale`]. This includes failed responses: the
//!    error belongs to a collection nobody displays any more and is only
//!    logged.
//!
//! The state mutex is never held across an `.await`.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tokio::sync::watch;
use tracing::debug;
use tracing::warn;

use crate::cursor::FetchCursor;
use crate::error::Result;
use crate::models::Note;
use crate::signal::Signal;
use crate::transport::NotesTransport;
use crate::transport::PageRequest;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    All,
    Search(String),
}

impl Scope {
    pub fn query(&self) -> Option<&str> {
        match self {
            Scope::All => None,
            Scope::Search(q) => Some(q),
        }
    }
}

/// Insertion-ordered notes with no repeated `note_id`.
#[derive(Debug, Default, Clone)]
pub struct Collection {
    items: Vec<Note>,
    ids: HashSet<String>,
}

impl Collection {
    pub fn items(&self) -> &[Note] {
        &self.items
    }

    /// Appends the notes not seen before, in page order, and returns how many
    /// were added.
    pub fn merge(&mut self, page: Vec<Note>) -> usize {
        let before = self.items.len();
        for note in page {
            if self.ids.insert(note.note_id.clone()) {
                self.items.push(note);
            }
        }
        self.items.len() - before
    }
}

/// Read-only view handed to renderers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSnapshot {
    pub items: Vec<Note>,
    pub has_more: bool,
    pub in_flight: bool,
}

impl CollectionSnapshot {
    /// Id of the last rendered note, used as the viewport sentinel.
    pub fn sentinel(&self) -> Option<&str> {
        self.items.last().map(Note::id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// One page was merged.
    Merged { added: usize, exhausted: bool },
    /// The cursor was exhausted or another fetch was in flight.
    Skipped,
    /// The scope was discarded or reset while the request was outstanding.
    Stale,
}

#[derive(Debug)]
struct ScopeEntry {
    collection: Collection,
    cursor: FetchCursor,
    /// Identifies this incarnation of the scope. A response is merged only if
    /// the entry it was issued for is still the current one.
    epoch: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    scopes: HashMap<Scope, ScopeEntry>,
    next_epoch: u64,
}

impl CacheState {
    fn fresh_entry(&mut self) -> ScopeEntry {
        self.next_epoch += 1;
        ScopeEntry {
            collection: Collection::default(),
            cursor: FetchCursor::new(),
            epoch: self.next_epoch,
        }
    }

    fn current(&mut self, scope: &Scope, epoch: u64) -> Option<&mut ScopeEntry> {
        self.scopes
            .get_mut(scope)
            .filter(|entry| entry.epoch == epoch)
    }
}

pub struct PagedCollectionCache {
    transport: Arc<dyn NotesTransport>,
    page_size: usize,
    state: Mutex<CacheState>,
    changes: Signal,
}

impl PagedCollectionCache {
    pub fn new(transport: Arc<dyn NotesTransport>, page_size: usize) -> Self {
        Self {
            transport,
            page_size: page_size.max(1),
            state: Mutex::new(CacheState::default()),
            changes: Signal::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests the next page for `scope` unless one is already outstanding or
    /// the scope is exhausted.
    pub async fn fetch_next(&self, scope: &Scope) -> Result<FetchOutcome> {
        let (offset, epoch) = {
            let mut state = self.lock();
            if !state.scopes.contains_key(scope) {
                let entry = state.fresh_entry();
                state.scopes.insert(scope.clone(), entry);
            }
            let Some(entry) = state.scopes.get_mut(scope) else {
                return Ok(FetchOutcome::Skipped);
            };
            match entry.cursor.try_begin() {
                Some(offset) => (offset, entry.epoch),
                None => return Ok(FetchOutcome::Skipped),
            }
        };
        self.changes.notify();

        let mut claim = InFlightClaim {
            cache: self,
            scope,
            epoch,
            armed: true,
        };
        let request = PageRequest {
            offset,
            limit: self.page_size,
            query: scope.query().map(str::to_string),
        };
        let result = self.transport.list_notes(&request).await;
        claim.armed = false;

        let outcome = {
            let mut state = self.lock();
            let Some(entry) = state.current(scope, epoch) else {
                match &result {
                    Ok(items) => debug!(?scope, offset, received = items.len(), "dropping page for discarded scope"),
                    Err(e) => debug!(?scope, offset, "dropping failure for discarded scope: {e}"),
                }
                return Ok(FetchOutcome::Stale);
            };
            match result {
                Ok(items) => {
                    let received = items.len();
                    let added = entry.collection.merge(items);
                    debug!(?scope, offset, received, added, "merged page");
                    entry.cursor.complete(received, self.page_size);
                    Ok(FetchOutcome::Merged {
                        added,
                        exhausted: entry.cursor.exhausted,
                    })
                }
                Err(e) => {
                    entry.cursor.fail();
                    warn!(?scope, offset, "page fetch failed: {e}");
                    Err(e)
                }
            }
        };
        self.changes.notify();
        outcome
    }

    pub fn snapshot(&self, scope: &Scope) -> CollectionSnapshot {
        let state = self.lock();
        match state.scopes.get(scope) {
            Some(entry) => CollectionSnapshot {
                items: entry.collection.items().to_vec(),
                has_more: entry.cursor.has_more(),
                in_flight: entry.cursor.in_flight,
            },
            None => CollectionSnapshot {
                items: Vec::new(),
                has_more: true,
                in_flight: false,
            },
        }
    }

    /// Cursor of `scope`; a scope never requested reports the initial cursor.
    pub fn cursor(&self, scope: &Scope) -> FetchCursor {
        self.lock()
            .scopes
            .get(scope)
            .map(|entry| entry.cursor)
            .unwrap_or_default()
    }

    pub fn has_more(&self, scope: &Scope) -> bool {
        self.cursor(scope).has_more()
    }

    pub fn contains(&self, scope: &Scope) -> bool {
        self.lock().scopes.contains_key(scope)
    }

    /// Replaces the collection of `scope` with an empty one. Any response still
    /// outstanding for the old collection will be dropped.
    pub fn reset(&self, scope: &Scope) {
        {
            let mut state = self.lock();
            let entry = state.fresh_entry();
            state.scopes.insert(scope.clone(), entry);
        }
        self.changes.notify();
    }

    pub fn discard(&self, scope: &Scope) {
        let removed = self.lock().scopes.remove(scope).is_some();
        if removed {
            self.changes.notify();
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn release(&self, scope: &Scope, epoch: u64) {
        let mut state = self.lock();
        if let Some(entry) = state.current(scope, epoch) {
            entry.cursor.fail();
        }
    }
}

/// Releases the in-flight claim if the fetch future is dropped mid-request.
struct InFlightClaim<'a> {
    cache: &'a PagedCollectionCache,
    scope: &'a Scope,
    epoch: u64,
    armed: bool,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(scope = ?self.scope, "page fetch abandoned; releasing cursor");
            self.cache.release(self.scope, self.epoch);
            self.cache.changes.notify();
        }
    }
}
