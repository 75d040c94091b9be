use crate::models::Quality;
use indexmap::IndexMap;

/// Free-form key/value bag travelling with a request.
///
/// Loaders may read it to select a variant of the project (a profile, a
/// configuration, ...). A state loaded with one context never satisfies a
/// request carrying a different one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    entries: IndexMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any previous value for `key`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Describes what the caller needs from a project state.
///
/// Build one with [`StateRequest::builder`] or one of the presets
/// ([`load`](Self::load), [`refresh`](Self::refresh), [`reload`](Self::reload)).
/// The request is immutable once built; the reload manager keeps its own copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRequest {
    min_quality: Quality,
    target_quality: Quality,
    require_consistency: bool,
    force: bool,
    save_modifications: bool,
    offline: bool,
    grant_trust: bool,
    reason: String,
    context: RequestContext,
}

impl StateRequest {
    /// Builder with the defaults: `SIMPLE` quality, consistency required,
    /// online, no forcing, no saving, no trust grant.
    pub fn builder() -> StateRequestBuilder {
        StateRequestBuilder {
            inner: StateRequest {
                min_quality: Quality::Simple,
                target_quality: Quality::Simple,
                require_consistency: true,
                force: false,
                save_modifications: false,
                offline: false,
                grant_trust: false,
                reason: String::new(),
                context: RequestContext::default(),
            },
        }
    }

    /// Accept any state of at least `SIMPLE` quality, even a stale one.
    pub fn load() -> StateRequestBuilder {
        Self::builder().consistent(false).reason("load")
    }

    /// Like [`load`](Self::load), but the state must match the files on disk.
    pub fn refresh() -> StateRequestBuilder {
        Self::builder().consistent(true).reason("refresh")
    }

    /// Always run the loaders, even if the current state would do.
    pub fn reload() -> StateRequestBuilder {
        Self::refresh().force_reload().reason("reload")
    }

    pub fn min_quality(&self) -> Quality {
        self.min_quality
    }

    pub fn target_quality(&self) -> Quality {
        self.target_quality
    }

    pub fn require_consistency(&self) -> bool {
        self.require_consistency
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    pub fn save_modifications(&self) -> bool {
        self.save_modifications
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn grants_trust(&self) -> bool {
        self.grant_trust
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Start a new builder from this request.
    pub fn to_builder(&self) -> StateRequestBuilder {
        StateRequestBuilder {
            inner: self.clone(),
        }
    }
}

impl Default for StateRequest {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Fluent builder for [`StateRequest`].
#[derive(Debug, Clone)]
pub struct StateRequestBuilder {
    inner: StateRequest,
}

impl StateRequestBuilder {
    /// Require exactly `quality`: sets both the minimum and the target.
    pub fn to_quality(mut self, quality: Quality) -> Self {
        self.inner.min_quality = quality;
        self.inner.target_quality = quality;
        self
    }

    /// Lower the minimum to `quality` if it is worse than the current one.
    /// The target is left alone.
    pub fn try_quality(mut self, quality: Quality) -> Self {
        if quality.worse_than(self.inner.min_quality) {
            self.inner.min_quality = quality;
        }
        self
    }

    /// Set the minimum; the target is raised if it would fall below it.
    pub fn min_quality(mut self, quality: Quality) -> Self {
        self.inner.min_quality = quality;
        self.inner.target_quality = self.inner.target_quality.better(quality);
        self
    }

    /// Set the quality the loaders should aim for. Never below the minimum.
    pub fn target_quality(mut self, quality: Quality) -> Self {
        self.inner.target_quality = quality.better(self.inner.min_quality);
        self
    }

    pub fn consistent(mut self, required: bool) -> Self {
        self.inner.require_consistency = required;
        self
    }

    pub fn force_reload(mut self) -> Self {
        self.inner.force = true;
        self
    }

    /// Allow the manager to save in-memory edits (after confirmation).
    pub fn save_modifications(mut self) -> Self {
        self.inner.save_modifications = true;
        self
    }

    pub fn offline(mut self) -> Self {
        self.inner.offline = true;
        self
    }

    pub fn online(mut self) -> Self {
        self.inner.offline = false;
        self
    }

    pub fn grant_trust(mut self) -> Self {
        self.inner.grant_trust = true;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.inner.reason = reason.into();
        self
    }

    pub fn context(mut self, context: RequestContext) -> Self {
        self.inner.context = context;
        self
    }

    pub fn build(self) -> StateRequest {
        self.inner
    }
}

impl From<StateRequestBuilder> for StateRequest {
    fn from(builder: StateRequestBuilder) -> Self {
        builder.build()
    }
}
