//! Project state snapshots.
//!
//! A [`ProjectState`] is what the reload manager hands out: a quality-graded
//! record of the metadata loaded for one resource plus a few flags that keep
//! changing after the snapshot was published (validity, consistency, the
//! files known to be modified or edited, the target quality).
//!
//! The mutable flags live in a [`StateCore`] shared with the state graph and
//! the change notifier, so invalidation can reach a state without going
//! through the `ProjectState` itself. Each core has its own lock; no code path
//! ever holds two of them.

pub mod graph;
pub(crate) mod notifier;
pub mod part;

pub use graph::StateId;
pub use part::{
    Capabilities, CapabilityKind, LoaderKey, PartData, PartSignal, StatePart, StatePartBuilder,
};

use crate::models::{Quality, RequestContext, StateRequest};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use notifier::Notifier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::SystemTime;

/// Identity of a reloadable resource, typically a project directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(Utf8PathBuf);

impl ResourceId {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Utf8Path {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// A file a project state depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileRef(Utf8PathBuf);

impl FileRef {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Utf8Path {
        &self.0
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FileRef {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<Utf8PathBuf> for FileRef {
    fn from(path: Utf8PathBuf) -> Self {
        Self(path)
    }
}

/// Delivered to the listeners of a state when it changes, or when a state it
/// superseded was followed by a change further down the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeEvent {
    /// The state the listener is registered on.
    pub state: StateId,
    /// The state whose update triggered the delivery.
    pub origin: StateId,
    pub resource: ResourceId,
    pub valid: bool,
    pub consistent: bool,
}

impl StateChangeEvent {
    /// True when the event was forwarded from a newer state.
    pub fn is_forwarded(&self) -> bool {
        self.state != self.origin
    }
}

pub type ChangeListener = Arc<dyn Fn(&StateChangeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct StateFlags {
    valid: bool,
    consistent: bool,
    target: Quality,
    disk_modified: IndexSet<FileRef>,
    edited: IndexSet<FileRef>,
    part_inconsistent: bool,
    listeners: Vec<(ListenerId, ChangeListener)>,
    next_listener: u64,
}

/// Shared, lock-protected part of a project state.
pub(crate) struct StateCore {
    id: StateId,
    resource: ResourceId,
    quality: Quality,
    flags: Mutex<StateFlags>,
}

impl StateCore {
    pub(crate) fn new(
        id: StateId,
        resource: ResourceId,
        quality: Quality,
        target: Quality,
        edited: IndexSet<FileRef>,
    ) -> Self {
        Self {
            id,
            resource,
            quality,
            flags: Mutex::new(StateFlags {
                valid: true,
                consistent: edited.is_empty(),
                target: target.better(quality),
                disk_modified: IndexSet::new(),
                edited,
                part_inconsistent: false,
                listeners: Vec::new(),
                next_listener: 0,
            }),
        }
    }

    pub(crate) fn id(&self) -> StateId {
        self.id
    }

    pub(crate) fn resource(&self) -> &ResourceId {
        &self.resource
    }

    fn flags(&self) -> MutexGuard<'_, StateFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.flags().valid
    }

    /// Returns true if the state was valid before the call.
    pub(crate) fn invalidate(&self) -> bool {
        let mut flags = self.flags();
        std::mem::replace(&mut flags.valid, false)
    }

    pub(crate) fn mark_file_changed(&self, file: FileRef) -> bool {
        let mut flags = self.flags();
        if !flags.valid {
            return false;
        }
        let was_consistent = std::mem::replace(&mut flags.consistent, false);
        let added = flags.disk_modified.insert(file);
        was_consistent || added
    }

    pub(crate) fn set_file_edited(&self, file: FileRef, edited: bool) -> bool {
        let mut flags = self.flags();
        if !flags.valid {
            return false;
        }
        if edited {
            let was_consistent = std::mem::replace(&mut flags.consistent, false);
            let added = flags.edited.insert(file);
            return was_consistent || added;
        }
        if !flags.edited.shift_remove(&file) {
            return false;
        }
        if flags.edited.is_empty() && flags.disk_modified.is_empty() && !flags.part_inconsistent {
            flags.consistent = true;
        }
        true
    }

    pub(crate) fn mark_part_inconsistent(&self) -> bool {
        let mut flags = self.flags();
        if !flags.valid {
            return false;
        }
        let was_consistent = std::mem::replace(&mut flags.consistent, false);
        flags.part_inconsistent = true;
        was_consistent
    }

    pub(crate) fn raise_target(&self, quality: Quality) -> bool {
        let mut flags = self.flags();
        if !flags.valid || flags.target.at_least(quality) {
            return false;
        }
        flags.target = quality;
        true
    }

    pub(crate) fn add_listener(&self, listener: ChangeListener) -> ListenerId {
        let mut flags = self.flags();
        let id = ListenerId(flags.next_listener);
        flags.next_listener += 1;
        flags.listeners.push((id, listener));
        id
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        let mut flags = self.flags();
        let before = flags.listeners.len();
        flags.listeners.retain(|(l, _)| *l != id);
        flags.listeners.len() != before
    }

    /// Event for this state plus a copy of its listener list.
    pub(crate) fn event_for(&self, origin: StateId) -> (StateChangeEvent, Vec<ChangeListener>) {
        let flags = self.flags();
        let event = StateChangeEvent {
            state: self.id,
            origin,
            resource: self.resource.clone(),
            valid: flags.valid,
            consistent: flags.consistent,
        };
        let listeners = flags.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
        (event, listeners)
    }
}

/// A snapshot of the metadata loaded for one resource.
///
/// Quality, loaded files, parts and resource never change. Validity,
/// consistency, the modified/edited file sets and the target quality are
/// updated by the reload manager and delivered to listeners through the
/// coalescing notifier.
pub struct ProjectState {
    core: Arc<StateCore>,
    timestamp: Option<SystemTime>,
    context: RequestContext,
    loaded_files: IndexSet<FileRef>,
    parts: IndexMap<LoaderKey, Arc<StatePart>>,
    capabilities: OnceLock<Capabilities>,
    notifier: Notifier,
}

impl ProjectState {
    /// The "nothing loaded yet" placeholder.
    pub(crate) fn stub(resource: ResourceId, notifier: &Notifier) -> Self {
        let core = notifier.graph().insert(Vec::new(), |id| {
            StateCore::new(id, resource, Quality::None, Quality::None, IndexSet::new())
        });
        Self {
            core,
            timestamp: None,
            context: RequestContext::default(),
            loaded_files: IndexSet::new(),
            parts: IndexMap::new(),
            capabilities: OnceLock::new(),
            notifier: notifier.clone(),
        }
    }

    /// Build a freshly loaded state that supersedes `previous`.
    ///
    /// `edited_of` reports which of the loaded files carry unsaved edits
    /// right now; the state starts out inconsistent if any do.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        resource: ResourceId,
        notifier: &Notifier,
        quality: Quality,
        target: Quality,
        context: RequestContext,
        parts: IndexMap<LoaderKey, Arc<StatePart>>,
        previous: Option<StateId>,
        edited_of: impl FnOnce(&IndexSet<FileRef>) -> IndexSet<FileRef>,
    ) -> Self {
        let loaded_files: IndexSet<FileRef> = parts
            .values()
            .flat_map(|part| part.files().iter().cloned())
            .collect();
        let edited: IndexSet<FileRef> = edited_of(&loaded_files)
            .into_iter()
            .filter(|file| loaded_files.contains(file))
            .collect();
        let core = notifier.graph().insert(previous.into_iter().collect(), |id| {
            StateCore::new(id, resource, quality, target, edited)
        });
        for part in parts.values() {
            part.signal().attach(notifier, core.id());
        }
        Self {
            core,
            timestamp: Some(SystemTime::now()),
            context,
            loaded_files,
            parts,
            capabilities: OnceLock::new(),
            notifier: notifier.clone(),
        }
    }

    pub fn id(&self) -> StateId {
        self.core.id
    }

    pub fn resource(&self) -> &ResourceId {
        &self.core.resource
    }

    /// Creation time; `None` for the placeholder of a never-loaded resource.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    pub fn quality(&self) -> Quality {
        self.core.quality
    }

    pub fn target(&self) -> Quality {
        self.core.flags().target
    }

    pub fn is_valid(&self) -> bool {
        self.core.flags().valid
    }

    pub fn is_consistent(&self) -> bool {
        self.core.flags().consistent
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn loaded_files(&self) -> &IndexSet<FileRef> {
        &self.loaded_files
    }

    /// Files known to be stale on disk plus the ones edited in memory.
    pub fn modified_files(&self) -> IndexSet<FileRef> {
        let flags = self.core.flags();
        flags
            .disk_modified
            .iter()
            .chain(flags.edited.iter())
            .cloned()
            .collect()
    }

    pub fn edited_files(&self) -> IndexSet<FileRef> {
        self.core.flags().edited.clone()
    }

    pub fn parts(&self) -> &IndexMap<LoaderKey, Arc<StatePart>> {
        &self.parts
    }

    pub fn part(&self, key: &LoaderKey) -> Option<Arc<StatePart>> {
        self.parts.get(key).cloned()
    }

    /// Aggregated view over all parts, built on first use.
    pub fn capabilities(&self) -> &Capabilities {
        self.capabilities
            .get_or_init(|| Capabilities::collect(&self.parts))
    }

    /// States this one directly superseded and that are still alive.
    pub fn previous(&self) -> Vec<StateId> {
        self.notifier.graph().predecessors(self.core.id)
    }

    /// Whether this state can be handed out for `request` without loading.
    pub fn satisfies(&self, request: &StateRequest) -> bool {
        let flags = self.core.flags();
        flags.valid
            && (!request.require_consistency() || flags.consistent)
            && self.core.quality.at_least(request.min_quality())
            && flags.target.at_least(request.target_quality())
            && &self.context == request.context()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateChangeEvent) + Send + Sync + 'static,
    {
        self.core.add_listener(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.remove_listener(id)
    }

    pub(crate) fn invalidate(&self) {
        if self.core.invalidate() {
            self.notifier.schedule(&self.core);
        }
    }

    pub(crate) fn mark_file_changed(&self, file: FileRef) {
        if self.core.mark_file_changed(file) {
            self.notifier.schedule(&self.core);
        }
    }

    pub(crate) fn set_file_edited(&self, file: FileRef, edited: bool) {
        if self.core.set_file_edited(file, edited) {
            self.notifier.schedule(&self.core);
        }
    }

    pub(crate) fn raise_target(&self, quality: Quality) {
        if self.core.raise_target(quality) {
            self.notifier.schedule(&self.core);
        }
    }
}

impl Drop for ProjectState {
    fn drop(&mut self) {
        for part in self.parts.values() {
            part.signal().detach(self.core.id);
        }
        self.notifier.graph().remove(self.core.id);
    }
}

impl fmt::Debug for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = self.core.flags();
        f.debug_struct("ProjectState")
            .field("id", &self.core.id)
            .field("resource", &self.core.resource)
            .field("quality", &self.core.quality)
            .field("target", &flags.target)
            .field("valid", &flags.valid)
            .field("consistent", &flags.consistent)
            .field("loaded_files", &self.loaded_files.len())
            .field("parts", &self.parts.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ReloadMetrics;
    use graph::StateGraph;
    use std::time::Duration;
    use tokio::runtime::Handle;

    fn notifier() -> Notifier {
        Notifier::new(
            Handle::current(),
            Duration::from_millis(10),
            Arc::new(StateGraph::new()),
            Arc::new(ReloadMetrics::new()),
        )
    }

    fn loaded(notifier: &Notifier, quality: Quality) -> ProjectState {
        let part = StatePart::builder(quality)
            .files(["pom.xml", "src/lib.rs"])
            .build();
        ProjectState::assemble(
            ResourceId::new("/projects/demo"),
            notifier,
            quality,
            quality,
            RequestContext::default(),
            IndexMap::from([(LoaderKey::new("base"), Arc::new(part))]),
            None,
            |_| IndexSet::new(),
        )
    }

    #[tokio::test]
    async fn test_stub_defaults() {
        let notifier = notifier();
        let stub = ProjectState::stub(ResourceId::new("/projects/demo"), &notifier);
        assert_eq!(stub.quality(), Quality::None);
        assert_eq!(stub.target(), Quality::None);
        assert!(stub.is_valid());
        assert!(stub.is_consistent());
        assert!(stub.loaded_files().is_empty());
        assert!(stub.timestamp().is_none());
    }

    #[tokio::test]
    async fn test_invalidation_is_one_way() {
        let notifier = notifier();
        let state = loaded(&notifier, Quality::Loaded);
        state.invalidate();
        assert!(!state.is_valid());

        state.mark_file_changed(FileRef::new("pom.xml"));
        state.set_file_edited(FileRef::new("pom.xml"), true);
        state.raise_target(Quality::Consistent);
        assert!(!state.is_valid());
        assert!(state.is_consistent());
        assert_eq!(state.target(), Quality::Loaded);
    }

    #[tokio::test]
    async fn test_modified_includes_edited() {
        let notifier = notifier();
        let state = loaded(&notifier, Quality::Loaded);
        state.set_file_edited(FileRef::new("src/lib.rs"), true);
        state.mark_file_changed(FileRef::new("pom.xml"));

        let modified = state.modified_files();
        for file in state.edited_files() {
            assert!(modified.contains(&file));
        }
        assert_eq!(modified.len(), 2);
        assert!(!state.is_consistent());
    }

    #[tokio::test]
    async fn test_discarded_edit_restores_consistency() {
        let notifier = notifier();
        let state = loaded(&notifier, Quality::Loaded);
        let file = FileRef::new("src/lib.rs");

        state.set_file_edited(file.clone(), true);
        assert!(!state.is_consistent());
        state.set_file_edited(file.clone(), false);
        assert!(state.is_consistent());

        state.mark_file_changed(FileRef::new("pom.xml"));
        state.set_file_edited(file.clone(), true);
        state.set_file_edited(file, false);
        assert!(!state.is_consistent());
    }

    #[tokio::test]
    async fn test_target_only_increases() {
        let notifier = notifier();
        let state = loaded(&notifier, Quality::Simple);
        state.raise_target(Quality::Resolved);
        assert_eq!(state.target(), Quality::Resolved);
        state.raise_target(Quality::Loaded);
        assert_eq!(state.target(), Quality::Resolved);
        assert!(state.target().at_least(state.quality()));
    }

    #[tokio::test]
    async fn test_satisfies_checks_every_dimension() {
        let notifier = notifier();
        let state = loaded(&notifier, Quality::Loaded);

        assert!(state.satisfies(&StateRequest::load().build()));
        assert!(state.satisfies(&StateRequest::refresh().build()));
        assert!(!state.satisfies(&StateRequest::load().to_quality(Quality::Resolved).build()));
        assert!(!state.satisfies(
            &StateRequest::load()
                .target_quality(Quality::Resolved)
                .build()
        ));
        let other = RequestContext::new().with("profile", "release");
        assert!(!state.satisfies(&StateRequest::load().context(other).build()));

        state.mark_file_changed(FileRef::new("pom.xml"));
        assert!(state.satisfies(&StateRequest::load().build()));
        assert!(!state.satisfies(&StateRequest::refresh().build()));
    }

    #[tokio::test]
    async fn test_loaded_files_and_capabilities() {
        let notifier = notifier();
        let state = loaded(&notifier, Quality::Loaded);
        assert!(state.loaded_files().contains(&FileRef::new("pom.xml")));
        assert!(state.capabilities().is_empty());
        assert!(state.part(&LoaderKey::new("base")).is_some());
    }

    #[tokio::test]
    async fn test_part_signal_marks_states() {
        let notifier = notifier();
        let state = loaded(&notifier, Quality::Loaded);
        let signal = state.parts()[0].signal().clone();
        assert_eq!(signal.attached(), 1);

        signal.fire_changed(false, true);
        assert!(!state.is_consistent());
        assert!(state.is_valid());

        signal.fire_changed(true, false);
        assert!(!state.is_valid());

        drop(state);
        assert_eq!(signal.attached(), 0);
    }

    #[tokio::test]
    async fn test_assemble_seeds_edited_files() {
        let notifier = notifier();
        let part = StatePart::builder(Quality::Loaded)
            .files(["pom.xml", "src/lib.rs"])
            .build();
        let state = ProjectState::assemble(
            ResourceId::new("/projects/demo"),
            &notifier,
            Quality::Loaded,
            Quality::Loaded,
            RequestContext::default(),
            IndexMap::from([(LoaderKey::new("base"), Arc::new(part))]),
            None,
            |loaded| {
                assert_eq!(loaded.len(), 2);
                IndexSet::from([FileRef::new("pom.xml"), FileRef::new("README.md")])
            },
        );
        assert!(!state.is_consistent());
        assert_eq!(state.edited_files(), IndexSet::from([FileRef::new("pom.xml")]));
        assert!(!state.satisfies(&StateRequest::refresh().build()));

        state.set_file_edited(FileRef::new("pom.xml"), false);
        assert!(state.is_consistent());
    }

    #[tokio::test]
    async fn test_dropped_state_leaves_graph() {
        let notifier = notifier();
        let state = loaded(&notifier, Quality::Loaded);
        let id = state.id();
        assert!(notifier.graph().core(id).is_some());
        drop(state);
        assert!(notifier.graph().core(id).is_none());
    }
}
