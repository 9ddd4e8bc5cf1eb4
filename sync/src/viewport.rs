use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::trace;

use crate::context::SyncContext;
use crate::error::Result;
use crate::paged_cache::CollectionSnapshot;
use crate::paged_cache::FetchOutcome;
use crate::paged_cache::Scope;

/// Vertical extents in a shared coordinate space, for environments that can
/// only report scroll offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportBounds {
    pub viewport_top: f64,
    pub viewport_bottom: f64,
    pub sentinel_top: f64,
    pub sentinel_bottom: f64,
}

impl ViewportBounds {
    pub fn sentinel_visible(&self) -> bool {
        self.sentinel_top <= self.viewport_bottom && self.sentinel_bottom >= self.viewport_top
    }
}

/// Turns sentinel visibility into at most one `fetch_next` per
/// not-visible → visible edge.
pub struct ViewportFetchTrigger {
    ctx: Arc<SyncContext>,
    scope: Scope,
    sentinel: Option<String>,
    visible: bool,
}

impl ViewportFetchTrigger {
    pub fn new(ctx: Arc<SyncContext>, scope: Scope) -> Self {
        Self {
            ctx,
            scope,
            sentinel: None,
            visible: false,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn sentinel(&self) -> Option<&str> {
        self.sentinel.as_deref()
    }

    /// Points the trigger at a different collection; the sensor detaches until
    /// the next [`Self::attach`].
    pub fn retarget(&mut self, scope: Scope) {
        if self.scope != scope {
            self.scope = scope;
            self.sentinel = None;
            self.visible = false;
        }
    }

    /// Re-attaches the sensor when the sentinel identity changes. A fresh
    /// sensor starts out not visible. Returns whether it re-attached.
    pub fn attach(&mut self, sentinel: Option<&str>) -> bool {
        if self.sentinel.as_deref() == sentinel {
            return false;
        }
        trace!(old = ?self.sentinel, new = ?sentinel, "re-attaching viewport sensor");
        self.sentinel = sentinel.map(str::to_string);
        self.visible = false;
        true
    }

    pub fn sync_with(&mut self, snapshot: &CollectionSnapshot) -> bool {
        self.attach(snapshot.sentinel())
    }

    /// Feeds one visibility observation. Spawns a fetch on a rising edge when
    /// the cursor allows one.
    pub fn on_visibility(&mut self, visible: bool) -> Option<JoinHandle<Result<FetchOutcome>>> {
        let was_visible = std::mem::replace(&mut self.visible, visible);
        if !visible || was_visible || self.sentinel.is_none() {
            return None;
        }
        if !self.ctx.cache.cursor(&self.scope).can_fetch() {
            trace!(scope = ?self.scope, "sentinel visible but cursor busy or exhausted");
            return None;
        }

        let ctx = Arc::clone(&self.ctx);
        let scope = self.scope.clone();
        Some(tokio::spawn(async move { ctx.cache.fetch_next(&scope).await }))
    }

    pub fn observe_bounds(
        &mut self,
        bounds: ViewportBounds,
    ) -> Option<JoinHandle<Result<FetchOutcome>>> {
        self.on_visibility(bounds.sentinel_visible())
    }
}
