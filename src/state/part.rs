//! Loader contributions and the typed capability map built from them.

use super::notifier::Notifier;
use super::{FileRef, StateId};
use crate::models::Quality;
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Identifies the loader that produced a [`StatePart`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderKey(String);

impl LoaderKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LoaderKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// One piece of metadata a loader extracted.
#[derive(Debug, Clone, PartialEq)]
pub enum PartData {
    /// Free-form text, e.g. a display name or a description.
    Text(String),
    /// Key/value properties.
    Properties(IndexMap<String, String>),
    /// Files the project produces or references.
    Artifacts(Vec<FileRef>),
    /// Arbitrary structured metadata.
    Structured(serde_yaml_ng::Value),
}

impl PartData {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            PartData::Text(_) => CapabilityKind::Text,
            PartData::Properties(_) => CapabilityKind::Properties,
            PartData::Artifacts(_) => CapabilityKind::Artifacts,
            PartData::Structured(_) => CapabilityKind::Structured,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Text,
    Properties,
    Artifacts,
    Structured,
}

/// Lets a loader report, after the fact, that data it produced went stale.
///
/// Every project state that aggregates the part is registered with the
/// signal. Clones share the same registration list.
#[derive(Clone, Default)]
pub struct PartSignal {
    inner: Arc<Mutex<SignalTargets>>,
}

#[derive(Default)]
struct SignalTargets {
    notifier: Option<Notifier>,
    states: Vec<StateId>,
}

impl PartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, notifier: &Notifier, state: StateId) {
        let mut targets = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if targets.notifier.is_none() {
            targets.notifier = Some(notifier.clone());
        }
        if !targets.states.contains(&state) {
            targets.states.push(state);
        }
    }

    pub(crate) fn detach(&self, state: StateId) {
        let mut targets = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        targets.states.retain(|s| *s != state);
    }

    /// Number of live states currently aggregating the part.
    pub fn attached(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .states
            .len()
    }

    /// Propagate a change of the part to every state that holds it.
    ///
    /// `invalidate` makes the states invalid; `inconsistent` marks them as no
    /// longer matching their sources. With neither flag set the states only
    /// get a plain change event.
    pub fn fire_changed(&self, invalidate: bool, inconsistent: bool) {
        let (notifier, states) = {
            let targets = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            (targets.notifier.clone(), targets.states.clone())
        };
        let Some(notifier) = notifier else {
            return;
        };
        for id in states {
            let Some(core) = notifier.graph().core(id) else {
                continue;
            };
            let changed = if invalidate {
                core.invalidate()
            } else if inconsistent {
                core.mark_part_inconsistent()
            } else {
                core.is_valid()
            };
            if changed {
                notifier.schedule(&core);
            }
        }
    }
}

impl fmt::Debug for PartSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartSignal")
            .field("attached", &self.attached())
            .finish()
    }
}

/// A single loader's contribution to a project state.
#[derive(Debug)]
pub struct StatePart {
    quality: Quality,
    files: IndexSet<FileRef>,
    data: Vec<PartData>,
    signal: PartSignal,
}

impl StatePart {
    pub fn builder(quality: Quality) -> StatePartBuilder {
        StatePartBuilder {
            quality,
            files: IndexSet::new(),
            data: Vec::new(),
            signal: PartSignal::new(),
        }
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Files this part was loaded from.
    pub fn files(&self) -> &IndexSet<FileRef> {
        &self.files
    }

    pub fn data(&self) -> &[PartData] {
        &self.data
    }

    pub fn signal(&self) -> &PartSignal {
        &self.signal
    }
}

pub struct StatePartBuilder {
    quality: Quality,
    files: IndexSet<FileRef>,
    data: Vec<PartData>,
    signal: PartSignal,
}

impl StatePartBuilder {
    pub fn file(mut self, file: impl Into<FileRef>) -> Self {
        self.files.insert(file.into());
        self
    }

    pub fn files<I, F>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FileRef>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn data(mut self, data: PartData) -> Self {
        self.data.push(data);
        self
    }

    /// Share an existing signal, e.g. one kept by the loader between loads.
    pub fn signal(mut self, signal: PartSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn build(self) -> StatePart {
        StatePart {
            quality: self.quality,
            files: self.files,
            data: self.data,
            signal: self.signal,
        }
    }
}

/// Typed view over the data of all parts of a state.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    entries: IndexMap<LoaderKey, Vec<PartData>>,
}

impl Capabilities {
    pub(crate) fn collect(parts: &IndexMap<LoaderKey, Arc<StatePart>>) -> Self {
        let entries = parts
            .iter()
            .map(|(key, part)| (key.clone(), part.data().to_vec()))
            .collect();
        Self { entries }
    }

    pub fn from_loader(&self, key: &LoaderKey) -> &[PartData] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// All data of one kind, in loader order.
    pub fn of_kind(&self, kind: CapabilityKind) -> impl Iterator<Item = &PartData> {
        self.entries
            .values()
            .flatten()
            .filter(move |data| data.kind() == kind)
    }

    pub fn has(&self, kind: CapabilityKind) -> bool {
        self.of_kind(kind).next().is_some()
    }

    /// Properties merged across loaders; later loaders win on conflicts.
    pub fn properties(&self) -> IndexMap<String, String> {
        let mut merged = IndexMap::new();
        for data in self.of_kind(CapabilityKind::Properties) {
            if let PartData::Properties(props) = data {
                merged.extend(props.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        merged
    }

    pub fn artifacts(&self) -> IndexSet<FileRef> {
        let mut files = IndexSet::new();
        for data in self.of_kind(CapabilityKind::Artifacts) {
            if let PartData::Artifacts(list) = data {
                files.extend(list.iter().cloned());
            }
        }
        files
    }

    pub fn texts(&self) -> Vec<&str> {
        self.of_kind(CapabilityKind::Text)
            .filter_map(|data| match data {
                PartData::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(Vec::is_empty)
    }
}
