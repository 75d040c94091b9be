use super::BoxFuture;
use crate::reload::SaveError;
use crate::state::FileRef;
use indexmap::IndexSet;

/// Access to in-memory edits of project files.
#[cfg_attr(test, mockall::automock)]
pub trait EditorState: Send + Sync {
    /// Which of `loaded` currently have unsaved modifications.
    fn edited_files(&self, loaded: &IndexSet<FileRef>) -> IndexSet<FileRef>;

    /// Save the given files; fails with the first file that could not be saved.
    fn save(&self, files: Vec<FileRef>) -> BoxFuture<Result<(), SaveError>>;
}

/// Editor for headless use: nothing is ever edited.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEditor;

impl EditorState for NoEditor {
    fn edited_files(&self, _loaded: &IndexSet<FileRef>) -> IndexSet<FileRef> {
        IndexSet::new()
    }

    fn save(&self, _files: Vec<FileRef>) -> BoxFuture<Result<(), SaveError>> {
        Box::pin(async { Ok(()) })
    }
}
