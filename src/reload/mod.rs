//! Reload orchestration.
//!
//! [`ReloadManager`] owns the last-known [`ProjectState`] of every resource it
//! has seen and decides, per request, whether that state is good enough or
//! whether the loaders have to run. Loads are serialized per resource by a
//! sequencer task (see `pipeline`); callers get a [`PendingState`] future
//! that is already complete on the fast path.
//!
//! # Related Types
//!
//! - [`StateRequest`]: what the caller needs
//! - [`Collaborators`]: loaders, editor and confirmation handle
//! - [`OperationError`]: typed failure taxonomy

pub mod error;
pub mod pending;
mod pipeline;

pub use error::{ErrorState, LoadError, OperationError, SaveError};
pub use pending::{Canceller, PendingState, StateResult};

use crate::metrics::ReloadMetrics;
use crate::models::{Quality, ReloadSettings, StateRequest};
use crate::services::Collaborators;
use crate::state::graph::StateGraph;
use crate::state::notifier::Notifier;
use crate::state::{FileRef, ProjectState, ResourceId, StateId};
use pipeline::{Job, PipelineEnv, SlotShared};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Manager-level notifications, independent of per-state listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadEvent {
    /// A new state replaced the cached one.
    Published {
        resource: ResourceId,
        state: StateId,
        quality: Quality,
    },
    /// A request failed with something other than cancellation.
    Failed {
        resource: ResourceId,
        state: ErrorState,
    },
    Cancelled {
        resource: ResourceId,
    },
}

struct ResourceSlot {
    shared: Arc<SlotShared>,
    /// Set once the first job is queued; lookups alone never spawn.
    jobs: Option<mpsc::UnboundedSender<Job>>,
}

struct ManagerInner {
    env: Arc<PipelineEnv>,
    handle: Handle,
    slots: Mutex<HashMap<ResourceId, ResourceSlot>>,
}

/// Cache of project states with single-flight reloads.
///
/// Cheap to clone; clones share the cache. Dropping the last clone stops
/// every sequencer once its queue drains.
#[derive(Clone)]
pub struct ReloadManager {
    inner: Arc<ManagerInner>,
}

impl ReloadManager {
    /// `handle` is the runtime the sequencers and notifier timers run on.
    pub fn new(collaborators: Collaborators, settings: ReloadSettings, handle: Handle) -> Self {
        let metrics = Arc::new(ReloadMetrics::new());
        let graph = Arc::new(StateGraph::new());
        let notifier = Notifier::new(
            handle.clone(),
            settings.coalesce_window(),
            graph,
            Arc::clone(&metrics),
        );
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));

        tracing::debug!(
            "Reload manager created: window={}ms, max_retries={}, loaders={:?}",
            settings.coalesce_window_ms,
            settings.max_retries,
            collaborators
        );

        Self {
            inner: Arc::new(ManagerInner {
                env: Arc::new(PipelineEnv {
                    collaborators,
                    settings,
                    notifier,
                    metrics,
                    events,
                }),
                handle,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Manager on the runtime of the calling task.
    ///
    /// # Panics
    /// Outside of a tokio runtime.
    pub fn on_current_runtime(collaborators: Collaborators, settings: ReloadSettings) -> Self {
        Self::new(collaborators, settings, Handle::current())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ResourceId, ResourceSlot>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, resource: &ResourceId) -> Arc<SlotShared> {
        let mut slots = self.slots();
        let slot = slots.entry(resource.clone()).or_insert_with(|| {
            let stub = ProjectState::stub(resource.clone(), &self.inner.env.notifier);
            ResourceSlot {
                shared: Arc::new(SlotShared::new(stub)),
                jobs: None,
            }
        });
        Arc::clone(&slot.shared)
    }

    /// Queue `job` on the sequencer of `resource`, starting it if needed.
    fn enqueue(&self, resource: &ResourceId, job: Job) -> Result<(), Job> {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(resource) else {
            return Err(job);
        };
        let shared = Arc::clone(&slot.shared);
        let jobs = slot.jobs.get_or_insert_with(|| {
            tracing::debug!("Starting sequencer for {}", resource);
            let (jobs, queue) = mpsc::unbounded_channel();
            self.inner
                .handle
                .spawn(pipeline::sequence(Arc::clone(&self.inner.env), shared, queue));
            jobs
        });
        jobs.send(job).map_err(|rejected| rejected.0)
    }

    fn existing(&self, resource: &ResourceId) -> Option<Arc<SlotShared>> {
        self.slots()
            .get(resource)
            .map(|slot| Arc::clone(&slot.shared))
    }

    /// Last-known state, or the `NONE` placeholder. Never loads.
    pub fn get_state(&self, resource: &ResourceId) -> Arc<ProjectState> {
        self.slot(resource).current()
    }

    /// The cached state if anything was ever loaded for `resource`.
    pub fn loaded_state(&self, resource: &ResourceId) -> Result<Arc<ProjectState>, OperationError> {
        let state = self.get_state(resource);
        if state.quality() == Quality::None {
            return Err(OperationError::Uninitialized {
                resource: resource.clone(),
            });
        }
        Ok(state)
    }

    /// Blocking lookup with an optional best-effort load at the lowest
    /// quality.
    ///
    /// The load is only attempted from threads outside of any tokio runtime
    /// context. Inside one, including `spawn_blocking` threads and loader
    /// or listener code run by a sequencer, it is skipped and the unloaded
    /// placeholder is returned: a loader blocking on its own resource would
    /// wait for itself, and async code should await
    /// [`request_state`](Self::request_state) instead. The manager's
    /// runtime must be multi-threaded.
    pub fn get_state_blocking(
        &self,
        resource: &ResourceId,
        attempt_load: bool,
    ) -> Result<Arc<ProjectState>, OperationError> {
        let current = self.get_state(resource);
        if !attempt_load || current.quality() != Quality::None {
            return Ok(current);
        }
        if Handle::try_current().is_ok() {
            tracing::warn!(
                "Refusing blocking load of {} from inside the runtime; returning the unloaded state",
                resource
            );
            return Ok(current);
        }
        let request = StateRequest::load().try_quality(Quality::None);
        self.inner
            .handle
            .block_on(self.request_state(resource, request))
    }

    /// Get a state satisfying `request`, loading it if needed.
    ///
    /// On success the state's quality is at least the request's minimum.
    /// A load that publishes a state below that minimum still advances the
    /// cache; the caller gets `BROKEN` or `OFFLINE` while
    /// [`get_state`](Self::get_state) returns the new state.
    pub fn request_state(
        &self,
        resource: &ResourceId,
        request: impl Into<StateRequest>,
    ) -> PendingState {
        let request = request.into();
        let metrics = Arc::clone(&self.inner.env.metrics);
        metrics.record_request();

        let shared = self.slot(resource);
        let current = shared.current();
        if !request.is_forced() && current.satisfies(&request) {
            metrics.record_fast_path();
            return PendingState::ready(resource.clone(), Ok(current));
        }

        tracing::debug!(
            "Queueing {} request for {} (min {}, target {})",
            request.reason(),
            resource,
            request.min_quality(),
            request.target_quality()
        );
        let cancel = CancellationToken::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            request,
            cancel: cancel.child_token(),
            reply: reply_tx,
        };
        if self.enqueue(resource, job).is_err() {
            return PendingState::ready(
                resource.clone(),
                Err(OperationError::Uninitialized {
                    resource: resource.clone(),
                }),
            );
        }

        let owner = resource.clone();
        let token = cancel.clone();
        let waiter = async move {
            tokio::select! {
                biased;
                reply = reply_rx => reply.unwrap_or_else(|_| {
                    Err(OperationError::Uninitialized { resource: owner.clone() })
                }),
                _ = token.cancelled() => {
                    metrics.record_cancellation();
                    Err(OperationError::Cancelled { resource: owner.clone() })
                }
            }
        };
        PendingState::waiting(resource.clone(), Box::pin(waiter), cancel)
    }

    /// A file of `resource` changed on disk.
    pub fn file_changed(&self, resource: &ResourceId, file: FileRef) {
        let Some(shared) = self.existing(resource) else {
            return;
        };
        tracing::debug!("{} changed in {}", file, resource);
        shared.record_change(&file);
        shared.current().mark_file_changed(file);
    }

    /// A file of `resource` gained (`edited = true`) or lost unsaved edits.
    pub fn file_edited(&self, resource: &ResourceId, file: FileRef, edited: bool) {
        let Some(shared) = self.existing(resource) else {
            return;
        };
        shared.current().set_file_edited(file, edited);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.inner.env.events.subscribe()
    }

    pub fn metrics(&self) -> &ReloadMetrics {
        &self.inner.env.metrics
    }

    pub fn settings(&self) -> &ReloadSettings {
        &self.inner.env.settings
    }

    /// Resources with a cache slot.
    pub fn resources(&self) -> Vec<ResourceId> {
        self.slots().keys().cloned().collect()
    }

    /// Resources whose sequencer task has been started.
    pub fn active_sequencers(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| slot.jobs.is_some())
            .count()
    }

    /// Drop the cache slot of `resource`.
    ///
    /// Requests already queued are still served; the sequencer stops once
    /// they are done. Returns false if the resource had no slot.
    pub fn forget(&self, resource: &ResourceId) -> bool {
        let removed = self.slots().remove(resource).is_some();
        if removed {
            tracing::debug!("Forgot cached state of {}", resource);
        }
        removed
    }
}

impl fmt::Debug for ReloadManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloadManager")
            .field("resources", &self.resources())
            .field("settings", &self.inner.env.settings)
            .finish_non_exhaustive()
    }
}
