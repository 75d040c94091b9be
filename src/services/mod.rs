//! Collaborators the reload manager depends on.
//!
//! The manager never extracts metadata, saves files or talks to the user by
//! itself. It is handed a [`Collaborators`] context at construction that
//! bundles:
//!
//! - [`Loader`]s: produce [`StatePart`](crate::state::StatePart)s for a
//!   resource. Several loaders may serve the same resource; they run in
//!   registration order.
//! - an [`EditorState`]: reports and saves unsaved in-memory edits.
//! - a [`Confirm`] handle: asks the user whether edits may be saved.
//!
//! Tests substitute doubles for any of them.

pub mod confirm;
pub mod editor;
pub mod loader;

pub use confirm::{Confirm, FixedAnswer};
pub use editor::{EditorState, NoEditor};
pub use loader::{BoxFuture, LoadContext, Loader};

use crate::state::ResourceId;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Collaborators {
    loaders: Vec<Arc<dyn Loader>>,
    editor: Arc<dyn EditorState>,
    confirm: Arc<dyn Confirm>,
}

impl Collaborators {
    /// No loaders, no editor, and a confirmation that always declines.
    pub fn new() -> Self {
        Self {
            loaders: Vec::new(),
            editor: Arc::new(NoEditor),
            confirm: Arc::new(FixedAnswer::default()),
        }
    }

    pub fn with_loader(self, loader: impl Loader + 'static) -> Self {
        self.with_shared_loader(Arc::new(loader))
    }

    pub fn with_shared_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn with_editor(mut self, editor: impl EditorState + 'static) -> Self {
        self.editor = Arc::new(editor);
        self
    }

    pub fn with_confirm(mut self, confirm: impl Confirm + 'static) -> Self {
        self.confirm = Arc::new(confirm);
        self
    }

    /// Loaders that handle `resource`, in registration order.
    pub fn loaders_for(&self, resource: &ResourceId) -> Vec<Arc<dyn Loader>> {
        self.loaders
            .iter()
            .filter(|loader| loader.supports(resource))
            .cloned()
            .collect()
    }

    pub fn editor(&self) -> &dyn EditorState {
        self.editor.as_ref()
    }

    pub fn confirm(&self) -> &dyn Confirm {
        self.confirm.as_ref()
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.loaders.iter().map(|l| l.key().to_string()).collect();
        f.debug_struct("Collaborators")
            .field("loaders", &keys)
            .finish_non_exhaustive()
    }
}
