//! project-reload demo
//!
//! Loads a directory as a "project" through the reload manager and logs what
//! happened. The only loader lists the directory's files.
//!
//! # Execution Flow
//!
//! 1. Load `config/reload.yaml` (plus `PROJECT_RELOAD__*` overrides)
//! 2. Initialize logging from the `logging` section
//! 3. Create a multi-threaded tokio runtime for the sequencers
//! 4. Blocking lookup from the main thread, which is allowed to load
//! 5. Async `refresh` (fast path) and forced `reload` requests
//! 6. Log the metrics summary and shut down

use anyhow::Result;
use project_reload::services::BoxFuture;
use project_reload::state::{LoaderKey, PartData};
use project_reload::{
    APP_NAME, Collaborators, ConfigManager, FileRef, LoadContext, Loader, Quality, ReloadManager,
    ResourceId, StatePart, StateRequest, VERSION, logging, reload::LoadError,
};
use std::time::Duration;

/// Lists the files directly inside the resource directory.
struct DirectoryLoader;

impl Loader for DirectoryLoader {
    fn key(&self) -> LoaderKey {
        LoaderKey::new("directory")
    }

    fn supports(&self, resource: &ResourceId) -> bool {
        resource.path().is_dir()
    }

    fn load(&self, ctx: LoadContext) -> BoxFuture<Result<Option<StatePart>, LoadError>> {
        let dir = ctx.resource().path().to_owned();
        Box::pin(async move {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            let mut files = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file()
                    && let Some(name) = entry.file_name().to_str()
                {
                    files.push(FileRef::new(dir.join(name)));
                }
            }
            files.sort();

            let quality = if files.is_empty() {
                Quality::Broken
            } else {
                Quality::Loaded
            };
            Ok(Some(
                StatePart::builder(quality)
                    .files(files.iter().cloned())
                    .data(PartData::Text(format!("{} file(s)", files.len())))
                    .data(PartData::Artifacts(files))
                    .build(),
            ))
        })
    }
}

fn main() -> Result<()> {
    let config_manager = ConfigManager::new("config")?;
    let config = config_manager.load_config()?;
    let _log_guard = logging::setup_from_settings(&config.logging)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("reload-worker")
        .build()?;

    let resource = ResourceId::new(std::env::args().nth(1).unwrap_or_else(|| ".".to_string()));
    let manager = ReloadManager::new(
        Collaborators::new().with_loader(DirectoryLoader),
        config.reload.clone(),
        runtime.handle().clone(),
    );

    // Not on a runtime thread, so the blocking lookup may load.
    let initial = manager.get_state_blocking(&resource, true)?;
    tracing::info!("Initial state of {}: {:?}", resource, initial);

    runtime.block_on(async {
        let mut events = manager.subscribe();

        match manager.request_state(&resource, StateRequest::refresh()).await {
            Ok(state) => tracing::info!("refresh -> {} ({})", state.id(), state.quality()),
            Err(error) => tracing::warn!("refresh failed: {}", error),
        }

        match manager.request_state(&resource, StateRequest::reload()).await {
            Ok(state) => {
                let caps = state.capabilities();
                tracing::info!(
                    "reload -> {} ({}), {} artifact(s): {:?}",
                    state.id(),
                    state.quality(),
                    caps.artifacts().len(),
                    caps.texts()
                );
            }
            Err(error) if error.is_cancelled() => tracing::info!("reload cancelled"),
            Err(error) => tracing::warn!("reload failed: {} ({})", error, error.state()),
        }

        while let Ok(event) = events.try_recv() {
            tracing::info!("Reload event: {:?}", event);
        }
    });

    manager.metrics().log_summary();
    drop(manager);
    runtime.shutdown_timeout(Duration::from_secs(5));

    tracing::info!("Shutdown complete");
    Ok(())
}
