//! Coalescing delivery of state change events.
//!
//! Each state has at most one pending fire. A new update inside the window
//! aborts the pending timer and starts a fresh one, so a burst of updates
//! collapses into one delivery. When the timer expires the state's listeners
//! are called, then the listeners of every state it superseded, walking the
//! graph breadth first.

use super::graph::{StateGraph, StateId};
use super::{ResourceId, StateCore};
use crate::metrics::ReloadMetrics;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

struct PendingFire {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Suspension {
    depth: usize,
    deferred: IndexMap<StateId, Arc<StateCore>>,
}

struct NotifierInner {
    handle: Handle,
    window: Duration,
    graph: Arc<StateGraph>,
    metrics: Arc<ReloadMetrics>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<StateId, PendingFire>>,
    suspended: Mutex<HashMap<ResourceId, Suspension>>,
}

#[derive(Clone)]
pub(crate) struct Notifier {
    inner: Arc<NotifierInner>,
}

impl Notifier {
    pub(crate) fn new(
        handle: Handle,
        window: Duration,
        graph: Arc<StateGraph>,
        metrics: Arc<ReloadMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                handle,
                window,
                graph,
                metrics,
                next_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                suspended: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn graph(&self) -> &Arc<StateGraph> {
        &self.inner.graph
    }

    /// Queue a change event for `core`, restarting its coalescing window.
    pub(crate) fn schedule(&self, core: &Arc<StateCore>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let key = core.id();
        let inner = Arc::clone(&self.inner);
        let core = Arc::clone(core);
        let window = self.inner.window;

        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.remove(&key) {
            previous.handle.abort();
            self.inner.metrics.record_event_coalesced();
        }
        let handle = self.inner.handle.spawn(async move {
            tokio::time::sleep(window).await;
            inner.expire(key, id, core);
        });
        pending.insert(key, PendingFire { id, handle });
    }

    /// Hold back deliveries for `resource` until the guard is dropped.
    pub(crate) fn suspend(&self, resource: &ResourceId) -> SuspendGuard {
        let mut suspended = self
            .inner
            .suspended
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        suspended.entry(resource.clone()).or_default().depth += 1;
        SuspendGuard {
            notifier: self.clone(),
            resource: resource.clone(),
        }
    }

    /// Number of states with a delivery queued.
    pub(crate) fn pending(&self) -> usize {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn resume(&self, resource: &ResourceId) {
        let released = {
            let mut suspended = self
                .inner
                .suspended
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = suspended.get_mut(resource) else {
                return;
            };
            entry.depth = entry.depth.saturating_sub(1);
            if entry.depth > 0 {
                return;
            }
            suspended.remove(resource).map(|s| s.deferred).unwrap_or_default()
        };
        if !released.is_empty() {
            tracing::debug!(
                "Releasing {} deferred change event(s) for {}",
                released.len(),
                resource
            );
        }
        for core in released.values() {
            self.schedule(core);
        }
    }
}

impl NotifierInner {
    fn expire(&self, key: StateId, id: u64, core: Arc<StateCore>) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.get(&key) {
                Some(current) if current.id == id => {
                    pending.remove(&key);
                }
                _ => return,
            }
        }
        {
            let mut suspended = self.suspended.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = suspended.get_mut(core.resource()) {
                entry.deferred.insert(key, core);
                return;
            }
        }
        self.fire(&core);
    }

    fn fire(&self, origin: &Arc<StateCore>) {
        let mut visited = HashSet::from([origin.id()]);
        let mut queue = VecDeque::from([Arc::clone(origin)]);

        while let Some(core) = queue.pop_front() {
            // Snapshot taken under the state's own lock; listeners run unlocked.
            let (event, listeners) = core.event_for(origin.id());
            for listener in listeners {
                listener(&event);
                self.metrics.record_event_delivered();
            }
            for previous in self.graph.predecessors(core.id()) {
                if visited.insert(previous)
                    && let Some(previous) = self.graph.core(previous)
                {
                    queue.push_back(previous);
                }
            }
        }
        tracing::trace!("Delivered change event from {}", origin.id());
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("window", &self.inner.window)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Releases a [`Notifier::suspend`] hold; deferred events are rescheduled.
pub(crate) struct SuspendGuard {
    notifier: Notifier,
    resource: ResourceId,
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        self.notifier.resume(&self.resource);
    }
}
