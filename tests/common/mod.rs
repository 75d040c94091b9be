//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use project_reload::reload::LoadError;
use project_reload::services::BoxFuture;
use project_reload::state::LoaderKey;
use project_reload::{
    Collaborators, FileRef, LoadContext, Loader, Quality, ReloadManager, ReloadSettings,
    ResourceId, StatePart, StateRequest,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Duration;

pub const WINDOW_MS: u64 = 20;
pub const SETTLE: Duration = Duration::from_millis(200);
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn settings() -> ReloadSettings {
    ReloadSettings {
        coalesce_window_ms: WINDOW_MS,
        ..ReloadSettings::default()
    }
}

pub fn resource() -> ResourceId {
    ResourceId::new("/workspace/demo")
}

pub fn manager(collaborators: Collaborators) -> ReloadManager {
    ReloadManager::new(collaborators, settings(), Handle::current())
}

struct Inner {
    key: String,
    quality: Mutex<Quality>,
    files: Vec<FileRef>,
    calls: AtomicUsize,
    retries: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    started: Notify,
    cancellable: bool,
    failure: Mutex<Option<String>>,
    decline: AtomicBool,
    seen_partial: Mutex<Vec<Vec<LoaderKey>>>,
    seen_requests: Mutex<Vec<StateRequest>>,
}

/// Scriptable loader. Clones share counters and settings.
#[derive(Clone)]
pub struct TestLoader {
    inner: Arc<Inner>,
}

impl TestLoader {
    pub fn new(key: &str, quality: Quality) -> Self {
        Self::build(key, quality, None, false)
    }

    /// Every load waits for a permit from `gate`.
    pub fn gated(key: &str, quality: Quality, gate: Arc<Semaphore>, cancellable: bool) -> Self {
        Self::build(key, quality, Some(gate), cancellable)
    }

    fn build(key: &str, quality: Quality, gate: Option<Arc<Semaphore>>, cancellable: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                key: key.to_string(),
                quality: Mutex::new(quality),
                files: vec![FileRef::new("pom.xml"), FileRef::new("src/main.rs")],
                calls: AtomicUsize::new(0),
                retries: AtomicUsize::new(0),
                gate,
                started: Notify::new(),
                cancellable,
                failure: Mutex::new(None),
                decline: AtomicBool::new(false),
                seen_partial: Mutex::new(Vec::new()),
                seen_requests: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn set_quality(&self, quality: Quality) {
        *self.inner.quality.lock().unwrap() = quality;
    }

    /// Ask for a retry on the next `count` loads.
    pub fn request_retries(&self, count: usize) {
        self.inner.retries.store(count, Ordering::SeqCst);
    }

    pub fn fail_with(&self, message: &str) {
        *self.inner.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn decline(&self, decline: bool) {
        self.inner.decline.store(decline, Ordering::SeqCst);
    }

    /// Resolves once a load has started (or had started before).
    pub async fn started(&self) {
        self.inner.started.notified().await;
    }

    pub fn seen_partial(&self) -> Vec<Vec<LoaderKey>> {
        self.inner.seen_partial.lock().unwrap().clone()
    }

    pub fn seen_requests(&self) -> Vec<StateRequest> {
        self.inner.seen_requests.lock().unwrap().clone()
    }
}

impl Loader for TestLoader {
    fn key(&self) -> LoaderKey {
        LoaderKey::new(self.inner.key.clone())
    }

    fn cancellable(&self) -> bool {
        self.inner.cancellable
    }

    fn load(&self, ctx: LoadContext) -> BoxFuture<Result<Option<StatePart>, LoadError>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            inner.calls.fetch_add(1, Ordering::SeqCst);
            inner
                .seen_partial
                .lock()
                .unwrap()
                .push(ctx.partial().keys().cloned().collect());
            inner
                .seen_requests
                .lock()
                .unwrap()
                .push(ctx.request().clone());
            inner.started.notify_one();

            if let Some(gate) = &inner.gate {
                gate.acquire().await.unwrap().forget();
            }
            if inner
                .retries
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                ctx.request_retry();
            }
            if let Some(message) = inner.failure.lock().unwrap().clone() {
                return Err(LoadError::failed(message));
            }
            if inner.decline.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let quality = *inner.quality.lock().unwrap();
            Ok(Some(
                StatePart::builder(quality)
                    .files(inner.files.iter().cloned())
                    .build(),
            ))
        })
    }
}
