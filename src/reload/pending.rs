use super::OperationError;
use crate::state::{ProjectState, ResourceId};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;

pub type StateResult = Result<Arc<ProjectState>, OperationError>;

enum Pending {
    Ready(Option<StateResult>),
    Waiting(Pin<Box<dyn Future<Output = StateResult> + Send>>),
}

/// Result of [`ReloadManager::request_state`](super::ReloadManager::request_state).
///
/// Already completed when the cached state satisfied the request; otherwise
/// it resolves once the resource's sequencer has served the request.
pub struct PendingState {
    resource: ResourceId,
    inner: Pending,
    cancel: Option<CancellationToken>,
}

impl PendingState {
    pub(crate) fn ready(resource: ResourceId, result: StateResult) -> Self {
        Self {
            resource,
            inner: Pending::Ready(Some(result)),
            cancel: None,
        }
    }

    pub(crate) fn waiting(
        resource: ResourceId,
        future: Pin<Box<dyn Future<Output = StateResult> + Send>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resource,
            inner: Pending::Waiting(future),
            cancel: Some(cancel),
        }
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    /// True if the request was answered without queueing.
    pub fn is_ready(&self) -> bool {
        matches!(self.inner, Pending::Ready(_))
    }

    /// Ask for the request to be abandoned. The future then completes with
    /// [`OperationError::Cancelled`] even if the load itself keeps running.
    pub fn cancel(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }

    /// Handle for cancelling from elsewhere while this future is awaited.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            cancel: self.cancel.clone(),
        }
    }
}

impl Future for PendingState {
    type Output = StateResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            Pending::Ready(result) => {
                Poll::Ready(result.take().expect("PendingState polled after completion"))
            }
            Pending::Waiting(future) => future.as_mut().poll(cx),
        }
    }
}

impl fmt::Debug for PendingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingState")
            .field("resource", &self.resource)
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Canceller {
    cancel: Option<CancellationToken>,
}

impl Canceller {
    pub fn cancel(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}
