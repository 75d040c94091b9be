use crate::models::StateRequest;
use crate::reload::LoadError;
use crate::state::{LoaderKey, ResourceId, StatePart};
use indexmap::IndexMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Extracts project metadata for a resource.
///
/// Loaders run one after another inside a reload attempt. Returning
/// `Ok(None)` means the loader has nothing new to contribute; its part from
/// the replaced state is carried over unchanged.
pub trait Loader: Send + Sync {
    fn key(&self) -> LoaderKey;

    fn supports(&self, _resource: &ResourceId) -> bool {
        true
    }

    /// Whether an in-flight load may be abandoned when its caller cancels.
    /// Non-cancellable loads run to completion and publish their result.
    fn cancellable(&self) -> bool {
        false
    }

    fn load(&self, ctx: LoadContext) -> BoxFuture<Result<Option<StatePart>, LoadError>>;
}

/// Everything a loader gets to see during one reload attempt.
#[derive(Clone)]
pub struct LoadContext {
    resource: ResourceId,
    request: StateRequest,
    previous: Option<Arc<StatePart>>,
    partial: IndexMap<LoaderKey, Arc<StatePart>>,
    cancel: CancellationToken,
    retry: Arc<AtomicBool>,
}

impl LoadContext {
    pub(crate) fn new(
        resource: ResourceId,
        request: StateRequest,
        previous: Option<Arc<StatePart>>,
        partial: IndexMap<LoaderKey, Arc<StatePart>>,
        cancel: CancellationToken,
        retry: Arc<AtomicBool>,
    ) -> Self {
        Self {
            resource,
            request,
            previous,
            partial,
            cancel,
            retry,
        }
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    /// The request being served; read offline, trust and context from it.
    pub fn request(&self) -> &StateRequest {
        &self.request
    }

    /// This loader's part in the state being replaced.
    pub fn previous(&self) -> Option<&Arc<StatePart>> {
        self.previous.as_ref()
    }

    /// Parts produced by the loaders that already ran in this attempt.
    pub fn partial(&self) -> &IndexMap<LoaderKey, Arc<StatePart>> {
        &self.partial
    }

    /// Ask for the whole attempt to be repeated once all loaders finished.
    pub fn request_retry(&self) {
        self.retry.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the caller cancels. Never resolves otherwise.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn context(cancel: CancellationToken) -> LoadContext {
        LoadContext::new(
            ResourceId::new("/projects/demo"),
            StateRequest::load().build(),
            None,
            IndexMap::new(),
            cancel,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_signal() {
        let token = CancellationToken::new();
        let ctx = context(token.child_token());
        assert!(!ctx.is_cancelled());

        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.cancelled().await }
        });
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_token_never_cancels() {
        let token = CancellationToken::new();
        let ctx = context(token.child_token());
        drop(token);
        let outcome = tokio::time::timeout(Duration::from_millis(50), ctx.cancelled()).await;
        assert!(outcome.is_err());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_retry_flag_is_shared() {
        let ctx = context(CancellationToken::new());
        let retry = Arc::clone(&ctx.retry);
        ctx.clone().request_retry();
        assert!(retry.load(Ordering::SeqCst));
    }
}
