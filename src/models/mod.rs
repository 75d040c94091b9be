//! Value types shared across the crate.
//!
//! - [`Quality`]: the ordered grade of a loaded project state
//! - [`StateRequest`]: what a caller needs from the reload manager
//! - [`ReloadConfig`]: settings loaded from `reload.yaml` and the environment

pub mod config;
pub mod quality;
pub mod request;

pub use config::{LoggingSettings, ReloadConfig, ReloadSettings};
pub use quality::Quality;
pub use request::{RequestContext, StateRequest, StateRequestBuilder};
