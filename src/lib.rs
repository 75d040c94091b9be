// project-reload - quality-graded project state cache
//
// This is the library crate: project state snapshots, the coalescing change
// notifier and the single-flight reload manager. The binary crate (main.rs)
// is a small demo that reloads a directory.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod reload;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use metrics::ReloadMetrics;
pub use models::{Quality, ReloadConfig, ReloadSettings, RequestContext, StateRequest};
pub use reload::{ErrorState, OperationError, PendingState, ReloadEvent, ReloadManager};
pub use services::{Collaborators, Confirm, EditorState, LoadContext, Loader};
pub use state::{FileRef, ProjectState, ResourceId, StateChangeEvent, StatePart};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
