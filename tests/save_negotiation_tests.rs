//! Integration tests for saving unsaved edits before a reload
//!
//! These tests verify:
//! - OUT_OF_SYNC when saving is not allowed, declined, or fails
//! - A confirmed save lets the reload go ahead
//! - Requests without a consistency requirement skip the negotiation
//! - Edits found by the bootstrap of a fresh resource are negotiated too

mod common;

use common::{TestLoader, manager, resource};
use indexmap::IndexSet;
use mockall::mock;
use mockall::predicate::eq;
use project_reload::reload::SaveError;
use project_reload::services::BoxFuture;
use project_reload::{
    Collaborators, Confirm, EditorState, ErrorState, FileRef, OperationError, Quality,
    ReloadManager, ReloadMetrics, StateRequest,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

mock! {
    pub Editor {}

    impl EditorState for Editor {
        fn edited_files(&self, loaded: &IndexSet<FileRef>) -> IndexSet<FileRef>;
        fn save(&self, files: Vec<FileRef>) -> BoxFuture<Result<(), SaveError>>;
    }
}

mock! {
    pub Prompt {}

    impl Confirm for Prompt {
        fn ask(&self, message: String) -> BoxFuture<bool>;
    }
}

fn pom() -> FileRef {
    FileRef::new("pom.xml")
}

/// Editor reporting `pom.xml` as edited whenever it was loaded.
fn editor_with_pom_edited() -> MockEditor {
    let mut editor = MockEditor::new();
    editor.expect_edited_files().returning(|loaded| {
        loaded
            .iter()
            .filter(|file| file.path().as_str() == "pom.xml")
            .cloned()
            .collect()
    });
    editor
}

/// Editor holding unsaved edits to `pom.xml` until `save` succeeds.
fn editor_saving_pom() -> MockEditor {
    let saved = Arc::new(AtomicBool::new(false));
    let mut editor = MockEditor::new();
    let seen = Arc::clone(&saved);
    editor.expect_edited_files().returning(move |loaded| {
        if seen.load(Ordering::SeqCst) {
            return IndexSet::new();
        }
        loaded
            .iter()
            .filter(|file| file.path().as_str() == "pom.xml")
            .cloned()
            .collect()
    });
    editor
        .expect_save()
        .with(eq(vec![pom()]))
        .times(1)
        .returning(move |_| {
            saved.store(true, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        });
    editor
}

async fn loaded_manager(
    loader: &TestLoader,
    editor: MockEditor,
    prompt: MockPrompt,
) -> ReloadManager {
    let manager = manager(
        Collaborators::new()
            .with_loader(loader.clone())
            .with_editor(editor)
            .with_confirm(prompt),
    );
    manager
        .request_state(&resource(), StateRequest::load())
        .await
        .unwrap();
    manager.file_edited(&resource(), pom(), true);
    manager
}

#[tokio::test]
async fn test_edited_file_blocks_consistent_reload() {
    let loader = TestLoader::new("maven", Quality::Loaded);
    let mut editor = editor_with_pom_edited();
    editor.expect_save().never();
    let mut prompt = MockPrompt::new();
    prompt.expect_ask().never();
    let manager = loaded_manager(&loader, editor, prompt).await;
    let before = manager.get_state(&resource());

    let error = manager
        .request_state(&resource(), StateRequest::refresh())
        .await
        .unwrap_err();

    assert_eq!(error.state(), ErrorState::OutOfSync);
    match error {
        OperationError::OutOfSync { files, failed, .. } => {
            assert_eq!(files, vec![pom()]);
            assert!(failed.is_none());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let after = manager.get_state(&resource());
    assert_eq!(after.id(), before.id());
    assert_eq!(after.quality(), before.quality());
    assert_eq!(after.target(), before.target());
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_declined_confirmation_is_out_of_sync() {
    let loader = TestLoader::new("maven", Quality::Loaded);
    let mut editor = editor_with_pom_edited();
    editor.expect_save().never();
    let mut prompt = MockPrompt::new();
    prompt
        .expect_ask()
        .times(1)
        .returning(|_| Box::pin(async { false }));
    let manager = loaded_manager(&loader, editor, prompt).await;

    let error = manager
        .request_state(&resource(), StateRequest::refresh().save_modifications())
        .await
        .unwrap_err();

    assert_eq!(error.state(), ErrorState::OutOfSync);
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_failed_save_names_the_file() {
    let loader = TestLoader::new("maven", Quality::Loaded);
    let mut editor = editor_with_pom_edited();
    editor
        .expect_save()
        .with(eq(vec![pom()]))
        .times(1)
        .returning(|files| {
            let file = files[0].clone();
            Box::pin(async move { Err(SaveError::new(file, "permission denied")) })
        });
    let mut prompt = MockPrompt::new();
    prompt
        .expect_ask()
        .times(1)
        .returning(|_| Box::pin(async { true }));
    let manager = loaded_manager(&loader, editor, prompt).await;

    let error = manager
        .request_state(&resource(), StateRequest::refresh().save_modifications())
        .await
        .unwrap_err();

    match error {
        OperationError::OutOfSync { failed, .. } => assert_eq!(failed, Some(pom())),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_confirmed_save_continues_to_load() {
    let loader = TestLoader::new("maven", Quality::Loaded);
    let editor = editor_saving_pom();
    let mut prompt = MockPrompt::new();
    prompt
        .expect_ask()
        .withf(|message| message.contains("1 unsaved file"))
        .times(1)
        .returning(|_| Box::pin(async { true }));
    let manager = loaded_manager(&loader, editor, prompt).await;
    let before = manager.get_state(&resource());

    let state = manager
        .request_state(&resource(), StateRequest::refresh().save_modifications())
        .await
        .unwrap();

    assert_ne!(state.id(), before.id());
    assert!(state.is_consistent());
    assert!(state.edited_files().is_empty());
    assert!(!before.is_valid());
    assert_eq!(loader.calls(), 2);
}

#[tokio::test]
async fn test_inconsistent_load_skips_negotiation() {
    let loader = TestLoader::new("maven", Quality::Loaded);
    let mut editor = editor_with_pom_edited();
    editor.expect_save().never();
    let mut prompt = MockPrompt::new();
    prompt.expect_ask().never();
    let manager = loaded_manager(&loader, editor, prompt).await;

    let state = manager
        .request_state(&resource(), StateRequest::load().force_reload())
        .await
        .unwrap();
    assert_eq!(state.quality(), Quality::Loaded);
    assert!(!state.is_consistent());
    assert_eq!(state.edited_files(), IndexSet::from([pom()]));
    assert_eq!(loader.calls(), 2);
}

#[tokio::test]
async fn test_bootstrap_edits_block_first_refresh() {
    let loader = TestLoader::new("maven", Quality::Loaded);
    let mut editor = editor_with_pom_edited();
    editor.expect_save().never();
    let mut prompt = MockPrompt::new();
    prompt.expect_ask().never();
    let manager = manager(
        Collaborators::new()
            .with_loader(loader.clone())
            .with_editor(editor)
            .with_confirm(prompt),
    );

    let error = manager
        .request_state(&resource(), StateRequest::refresh())
        .await
        .unwrap_err();

    match error {
        OperationError::OutOfSync { files, failed, .. } => {
            assert_eq!(files, vec![pom()]);
            assert!(failed.is_none());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Only the bootstrap ran; its state is cached and knows about the edit.
    assert_eq!(loader.calls(), 1);
    let cached = manager.get_state(&resource());
    assert_eq!(cached.quality(), Quality::Loaded);
    assert!(!cached.is_consistent());
    assert_eq!(cached.edited_files(), IndexSet::from([pom()]));
    assert_eq!(ReloadMetrics::get(&manager.metrics().bootstraps), 1);
}

#[tokio::test]
async fn test_bootstrap_edits_saved_before_first_refresh() {
    let loader = TestLoader::new("maven", Quality::Loaded);
    let mut prompt = MockPrompt::new();
    prompt
        .expect_ask()
        .times(1)
        .returning(|_| Box::pin(async { true }));
    let manager = manager(
        Collaborators::new()
            .with_loader(loader.clone())
            .with_editor(editor_saving_pom())
            .with_confirm(prompt),
    );

    let state = manager
        .request_state(&resource(), StateRequest::refresh().save_modifications())
        .await
        .unwrap();

    assert!(state.is_consistent());
    assert_eq!(state.quality(), Quality::Loaded);
    assert_eq!(loader.calls(), 2);
}
