//! The per-resource reload pipeline.
//!
//! Every resource gets one sequencer task that pulls jobs off an unbounded
//! queue and runs them one at a time, so at most one load is in flight per
//! resource and queued requests run in arrival order. A job re-checks the
//! cached state before doing anything, which is how a request queued behind
//! a load reuses that load's result.

use super::error::{LoadError, OperationError};
use super::pending::StateResult;
use super::ReloadEvent;
use crate::metrics::ReloadMetrics;
use crate::models::{Quality, ReloadSettings, StateRequest};
use crate::services::{Collaborators, LoadContext, Loader};
use crate::state::notifier::Notifier;
use crate::state::{FileRef, LoaderKey, ProjectState, ResourceId, StatePart};
use indexmap::{IndexMap, IndexSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared by all sequencers of one manager.
pub(crate) struct PipelineEnv {
    pub(crate) collaborators: Collaborators,
    pub(crate) settings: ReloadSettings,
    pub(crate) notifier: Notifier,
    pub(crate) metrics: Arc<ReloadMetrics>,
    pub(crate) events: broadcast::Sender<ReloadEvent>,
}

/// The cache slot of one resource.
pub(crate) struct SlotShared {
    resource: ResourceId,
    last: Mutex<Arc<ProjectState>>,
    /// Files reported changed while a load attempt runs; `None` when idle.
    changes: Mutex<Option<IndexSet<FileRef>>>,
}

impl SlotShared {
    pub(crate) fn new(stub: ProjectState) -> Self {
        Self {
            resource: stub.resource().clone(),
            last: Mutex::new(Arc::new(stub)),
            changes: Mutex::new(None),
        }
    }

    pub(crate) fn current(&self) -> Arc<ProjectState> {
        Arc::clone(&self.last.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn replace(&self, state: Arc<ProjectState>) -> Arc<ProjectState> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *last, state)
    }

    pub(crate) fn record_change(&self, file: &FileRef) {
        let mut changes = self.changes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(changes) = changes.as_mut() {
            changes.insert(file.clone());
        }
    }

    fn track(&self) -> Tracking<'_> {
        *self.changes.lock().unwrap_or_else(PoisonError::into_inner) = Some(IndexSet::new());
        Tracking { shared: self }
    }
}

/// Change tracking for one load. Stays on until the result is published so
/// a change reported in between still reaches the new state.
struct Tracking<'a> {
    shared: &'a SlotShared,
}

impl Tracking<'_> {
    /// Changes recorded since the last drain; tracking stays on.
    fn drain(&self) -> IndexSet<FileRef> {
        self.shared
            .changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Stop tracking; returns what arrived since the last drain.
    fn finish(self) -> IndexSet<FileRef> {
        self.shared
            .changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default()
    }
}

impl Drop for Tracking<'_> {
    fn drop(&mut self) {
        *self
            .shared
            .changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

pub(crate) struct Job {
    pub(crate) request: StateRequest,
    pub(crate) cancel: CancellationToken,
    pub(crate) reply: oneshot::Sender<StateResult>,
}

/// Serve the jobs of one resource until every sender is gone.
pub(crate) async fn sequence(
    env: Arc<PipelineEnv>,
    shared: Arc<SlotShared>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    debug!("Sequencer started for {}", shared.resource);
    while let Some(job) = jobs.recv().await {
        if job.reply.is_closed() {
            debug!("Skipping abandoned request for {}", shared.resource);
            continue;
        }
        let result = run(&env, &shared, &job.request, &job.cancel).await;
        match &result {
            Ok(_) => {}
            Err(error) if error.is_cancelled() => {
                let _ = env.events.send(ReloadEvent::Cancelled {
                    resource: shared.resource.clone(),
                });
            }
            Err(error) => {
                env.metrics.record_failure();
                warn!("Request for {} failed: {}", shared.resource, error);
                let _ = env.events.send(ReloadEvent::Failed {
                    resource: shared.resource.clone(),
                    state: error.state(),
                });
            }
        }
        // The caller may have detached; the result is already published.
        let _ = job.reply.send(result);
    }
    debug!("Sequencer stopped for {}", shared.resource);
}

/// One job: CHECK, optional bootstrap, SAVE_NEGOTIATION, LOAD, PUBLISH.
pub(crate) async fn run(
    env: &PipelineEnv,
    shared: &SlotShared,
    request: &StateRequest,
    cancel: &CancellationToken,
) -> StateResult {
    let resource = &shared.resource;
    // Listener calls wait until the job is over.
    let _hold = env.notifier.suspend(resource);
    let cancelled = || OperationError::Cancelled {
        resource: resource.clone(),
    };

    if cancel.is_cancelled() {
        return Err(cancelled());
    }

    let mut current = shared.current();
    if !request.is_forced() && current.satisfies(request) {
        env.metrics.record_queued_reuse();
        debug!("{} already satisfies the request", resource);
        return Ok(current);
    }

    let loaders = env.collaborators.loaders_for(resource);
    if loaders.is_empty() {
        if request.min_quality() == Quality::None {
            return Ok(current);
        }
        return Err(OperationError::Unsupported {
            resource: resource.clone(),
        });
    }

    // Nothing is known about the files yet, so there is nothing to check
    // for unsaved edits. Discover them with a quick offline load first; the
    // bootstrap state never answers the request itself.
    if current.quality() == Quality::None && request.require_consistency() {
        env.metrics.record_bootstrap();
        let bootstrap = request
            .to_builder()
            .to_quality(Quality::None)
            .consistent(false)
            .offline()
            .reason("bootstrap")
            .build();
        debug!("Bootstrapping {} to discover its files", resource);
        match load(env, shared, &bootstrap, cancel, &loaders).await {
            Ok(_) => {}
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => warn!("Bootstrap of {} failed: {}", resource, error),
        }
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        current = shared.current();
    }

    if request.require_consistency() {
        negotiate_save(env, &current, request, cancel).await?;
    }

    let state = load(env, shared, request, cancel, &loaders).await?;
    if state.quality().worse_than(request.min_quality()) {
        let (achieved, required) = (state.quality(), request.min_quality());
        let resource = resource.clone();
        return Err(if request.is_offline() {
            OperationError::Offline {
                resource,
                achieved,
                required,
            }
        } else {
            OperationError::Broken {
                resource,
                achieved,
                required,
            }
        });
    }
    Ok(state)
}

async fn negotiate_save(
    env: &PipelineEnv,
    current: &ProjectState,
    request: &StateRequest,
    cancel: &CancellationToken,
) -> Result<(), OperationError> {
    let resource = current.resource();
    let edited = env
        .collaborators
        .editor()
        .edited_files(current.loaded_files());
    if edited.is_empty() {
        return Ok(());
    }
    let files: Vec<FileRef> = edited.into_iter().collect();
    let out_of_sync = |failed: Option<FileRef>| OperationError::OutOfSync {
        resource: resource.clone(),
        files: files.clone(),
        failed,
    };

    if !request.save_modifications() {
        warn!("{} has {} unsaved file(s), not reloading", resource, files.len());
        return Err(out_of_sync(None));
    }

    let message = format!(
        "{} has {} unsaved file(s). Save them before reloading?",
        resource,
        files.len()
    );
    let accepted = tokio::select! {
        accepted = env.collaborators.confirm().ask(message) => accepted,
        _ = cancel.cancelled() => {
            return Err(OperationError::Cancelled { resource: resource.clone() });
        }
    };
    if !accepted {
        info!("Saving declined for {}", resource);
        return Err(out_of_sync(None));
    }

    match env.collaborators.editor().save(files.clone()).await {
        Ok(()) => {
            debug!("Saved {} file(s) of {}", files.len(), resource);
            Ok(())
        }
        Err(error) => {
            warn!("{}", error);
            Err(out_of_sync(Some(error.file)))
        }
    }
}

struct Collected {
    parts: IndexMap<LoaderKey, Arc<StatePart>>,
    all_declined: bool,
    retry: bool,
}

/// LOAD followed by PUBLISH, repeating the attempt while retries are allowed.
async fn load(
    env: &PipelineEnv,
    shared: &SlotShared,
    request: &StateRequest,
    cancel: &CancellationToken,
    loaders: &[Arc<dyn Loader>],
) -> StateResult {
    let resource = &shared.resource;
    let previous = shared.current();
    let tracking = shared.track();
    let mut attempts: u32 = 0;

    let collected = loop {
        attempts += 1;
        let collected = collect(env, resource, request, cancel, loaders, &previous).await?;
        let changed = tracking.drain();

        let touched = collected
            .parts
            .values()
            .any(|part| part.files().iter().any(|f| changed.contains(f)));
        if !collected.retry && !touched {
            break collected;
        }
        if attempts > env.settings.max_retries {
            return Err(OperationError::Error {
                resource: resource.clone(),
                source: Arc::new(LoadError::RetriesExhausted { attempts }),
            });
        }
        env.metrics.record_retry();
        debug!(
            "Restarting load of {} (attempt {}, retry requested: {}, files changed: {})",
            resource,
            attempts + 1,
            collected.retry,
            touched
        );
    };

    if collected.all_declined
        && previous.is_valid()
        && previous.is_consistent()
        && previous.quality() != Quality::None
    {
        debug!("No loader had news for {}, keeping {}", resource, previous.id());
        previous.raise_target(request.target_quality());
        return Ok(previous);
    }

    Ok(publish(
        env,
        shared,
        request,
        collected.parts,
        &previous,
        tracking,
    ))
}

async fn collect(
    env: &PipelineEnv,
    resource: &ResourceId,
    request: &StateRequest,
    cancel: &CancellationToken,
    loaders: &[Arc<dyn Loader>],
    previous: &ProjectState,
) -> Result<Collected, OperationError> {
    let retry = Arc::new(AtomicBool::new(false));
    let mut parts: IndexMap<LoaderKey, Arc<StatePart>> = IndexMap::new();
    let mut declined = 0;

    for loader in loaders {
        let key = loader.key();
        let previous_part = previous.part(&key);
        let ctx = LoadContext::new(
            resource.clone(),
            request.clone(),
            previous_part.clone(),
            parts.clone(),
            cancel.clone(),
            Arc::clone(&retry),
        );
        env.metrics.record_loader_invocation();
        debug!("Running loader {} for {}", key, resource);

        let future = loader.load(ctx);
        let result = if loader.cancellable() {
            tokio::select! {
                result = future => result,
                _ = cancel.cancelled() => {
                    debug!("Abandoned loader {} for {}", key, resource);
                    return Err(OperationError::Cancelled { resource: resource.clone() });
                }
            }
        } else {
            future.await
        };

        match result {
            Ok(Some(part)) => {
                parts.insert(key, Arc::new(part));
            }
            Ok(None) => {
                declined += 1;
                if let Some(part) = previous_part {
                    parts.insert(key, part);
                }
            }
            Err(error) => {
                warn!("Loader {} failed for {}: {}", key, resource, error);
                return Err(OperationError::Error {
                    resource: resource.clone(),
                    source: Arc::new(error),
                });
            }
        }
    }

    Ok(Collected {
        parts,
        all_declined: declined == loaders.len(),
        retry: retry.load(Ordering::SeqCst),
    })
}

fn publish(
    env: &PipelineEnv,
    shared: &SlotShared,
    request: &StateRequest,
    parts: IndexMap<LoaderKey, Arc<StatePart>>,
    previous: &ProjectState,
    tracking: Tracking<'_>,
) -> Arc<ProjectState> {
    let resource = &shared.resource;
    let quality = parts
        .values()
        .map(|part| part.quality())
        .reduce(Quality::worse)
        .unwrap_or(Quality::None);
    let target = request
        .target_quality()
        .better(quality)
        .better(previous.target());

    let state = Arc::new(ProjectState::assemble(
        resource.clone(),
        &env.notifier,
        quality,
        target,
        request.context().clone(),
        parts,
        Some(previous.id()),
        |loaded| env.collaborators.editor().edited_files(loaded),
    ));
    let replaced = shared.replace(Arc::clone(&state));
    replaced.invalidate();
    // Reported after the last drain but before the swap above.
    for file in tracking.finish() {
        debug!("{} changed while {} was published", file, state.id());
        state.mark_file_changed(file);
    }

    env.metrics.record_publication();
    info!(
        "Published {} for {} at {} (target {}, {} file(s))",
        state.id(),
        resource,
        quality,
        target,
        state.loaded_files().len()
    );
    let _ = env.events.send(ReloadEvent::Published {
        resource: resource.clone(),
        state: state.id(),
        quality,
    });
    state
}
