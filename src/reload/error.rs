use crate::models::Quality;
use crate::state::{FileRef, ResourceId};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Category of an [`OperationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorState {
    /// A loader failed unexpectedly.
    Error,
    /// Nothing has been loaded and no load was attempted.
    Uninitialized,
    /// Loaded, but below the requested quality because the project is broken.
    Broken,
    /// Below the requested quality because network access was denied.
    Offline,
    /// Unsaved edits blocked a reload that required consistency.
    OutOfSync,
    /// The caller cancelled the request.
    Cancelled,
    /// No registered loader handles the resource.
    Unsupported,
}

impl fmt::Display for ErrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorState::Error => "ERROR",
            ErrorState::Uninitialized => "UNINITIALIZED",
            ErrorState::Broken => "BROKEN",
            ErrorState::Offline => "OFFLINE",
            ErrorState::OutOfSync => "OUT_OF_SYNC",
            ErrorState::Cancelled => "CANCELLED",
            ErrorState::Unsupported => "UNSUPPORTED",
        };
        f.write_str(name)
    }
}

/// Failure of a `request_state` call.
#[derive(Debug, Clone, Error)]
pub enum OperationError {
    #[error("loading {resource} failed: {source}")]
    Error {
        resource: ResourceId,
        source: Arc<LoadError>,
    },

    #[error("{resource} has not been loaded")]
    Uninitialized { resource: ResourceId },

    #[error("{resource} loaded at {achieved}, {required} was required")]
    Broken {
        resource: ResourceId,
        achieved: Quality,
        required: Quality,
    },

    #[error("{resource} loaded offline at {achieved}, {required} was required")]
    Offline {
        resource: ResourceId,
        achieved: Quality,
        required: Quality,
    },

    #[error("{resource} has {} unsaved file(s){}", .files.len(), failed_suffix(.failed))]
    OutOfSync {
        resource: ResourceId,
        files: Vec<FileRef>,
        /// The file whose save failed, if saving was attempted.
        failed: Option<FileRef>,
    },

    #[error("request for {resource} was cancelled")]
    Cancelled { resource: ResourceId },

    #[error("no loader supports {resource}")]
    Unsupported { resource: ResourceId },
}

fn failed_suffix(failed: &Option<FileRef>) -> String {
    match failed {
        Some(file) => format!("; saving {file} failed"),
        None => String::new(),
    }
}

impl OperationError {
    pub fn state(&self) -> ErrorState {
        match self {
            OperationError::Error { .. } => ErrorState::Error,
            OperationError::Uninitialized { .. } => ErrorState::Uninitialized,
            OperationError::Broken { .. } => ErrorState::Broken,
            OperationError::Offline { .. } => ErrorState::Offline,
            OperationError::OutOfSync { .. } => ErrorState::OutOfSync,
            OperationError::Cancelled { .. } => ErrorState::Cancelled,
            OperationError::Unsupported { .. } => ErrorState::Unsupported,
        }
    }

    pub fn resource(&self) -> &ResourceId {
        match self {
            OperationError::Error { resource, .. }
            | OperationError::Uninitialized { resource }
            | OperationError::Broken { resource, .. }
            | OperationError::Offline { resource, .. }
            | OperationError::OutOfSync { resource, .. }
            | OperationError::Cancelled { resource }
            | OperationError::Unsupported { resource } => resource,
        }
    }

    /// Cancellation is not a failure and should not be logged as one.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OperationError::Cancelled { .. })
    }

    /// True for errors a caller can get past by relaxing its request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OperationError::OutOfSync { .. } | OperationError::Offline { .. }
        )
    }
}

/// Failure reported by a loader.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("load restarted too often ({attempts} attempts)")]
    RetriesExhausted { attempts: u32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LoadError {
    pub fn failed(message: impl Into<String>) -> Self {
        LoadError::Failed(message.into())
    }
}

/// A file could not be saved.
#[derive(Debug, Clone, Error)]
#[error("could not save {file}: {reason}")]
pub struct SaveError {
    pub file: FileRef,
    pub reason: String,
}

impl SaveError {
    pub fn new(file: FileRef, reason: impl Into<String>) -> Self {
        Self {
            file,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn resource() -> ResourceId {
        ResourceId::new("/projects/demo")
    }

    #[test]
    fn test_state_mapping() {
        let cancelled = OperationError::Cancelled {
            resource: resource(),
        };
        assert_eq!(cancelled.state(), ErrorState::Cancelled);
        assert!(cancelled.is_cancelled());

        let broken = OperationError::Broken {
            resource: resource(),
            achieved: Quality::Broken,
            required: Quality::Simple,
        };
        assert_eq!(broken.state(), ErrorState::Broken);
        assert!(!broken.is_cancelled());
        assert!(!broken.is_recoverable());
        assert_eq!(broken.resource(), &resource());
    }

    #[test]
    fn test_loader_cause_is_preserved() {
        let error = OperationError::Error {
            resource: resource(),
            source: Arc::new(LoadError::failed("pom.xml is malformed")),
        };
        let source = error.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("pom.xml is malformed"));
        assert_eq!(error.state().to_string(), "ERROR");
    }

    #[test]
    fn test_out_of_sync_message_names_failed_file() {
        let error = OperationError::OutOfSync {
            resource: resource(),
            files: vec![FileRef::new("pom.xml")],
            failed: Some(FileRef::new("pom.xml")),
        };
        let message = error.to_string();
        assert!(message.contains("1 unsaved file(s)"));
        assert!(message.contains("saving pom.xml failed"));
        assert!(error.is_recoverable());
    }
}
