use serde::{Deserialize, Serialize};
use std::fmt;

/// Grade of how complete and trustworthy a loaded project state is.
///
/// Levels are totally ordered from [`Quality::None`] (nothing loaded) to
/// [`Quality::Consistent`]. Always compare through [`at_least`](Self::at_least)
/// and [`worse_than`](Self::worse_than); the ordinal is the only basis for
/// "is this good enough" decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quality {
    /// Nothing has been loaded.
    #[default]
    None,
    /// Loaded without a trust grant; only safe, static data is present.
    Untrusted,
    /// Synthesized by a fallback when the real loader could not run.
    Fallback,
    /// Some parts of the metadata are missing.
    Incomplete,
    /// Loaded, but the project has structural problems.
    Broken,
    /// Project files were parsed, no external resolution happened.
    Simple,
    /// Fully loaded from local data.
    Loaded,
    /// Loaded and all external references resolved.
    Resolved,
    /// Resolved and verified against the sources it was loaded from.
    Consistent,
}

impl Quality {
    /// All levels in ascending order.
    pub const ALL: [Quality; 9] = [
        Quality::None,
        Quality::Untrusted,
        Quality::Fallback,
        Quality::Incomplete,
        Quality::Broken,
        Quality::Simple,
        Quality::Loaded,
        Quality::Resolved,
        Quality::Consistent,
    ];

    /// Position of the level in the lattice.
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// True if `self` is the same level as `other` or better.
    pub const fn at_least(self, other: Quality) -> bool {
        self.ordinal() >= other.ordinal()
    }

    /// True if `self` is strictly below `other`.
    pub const fn worse_than(self, other: Quality) -> bool {
        self.ordinal() < other.ordinal()
    }

    /// The better of the two levels.
    pub const fn better(self, other: Quality) -> Quality {
        if self.at_least(other) { self } else { other }
    }

    /// The worse of the two levels.
    pub const fn worse(self, other: Quality) -> Quality {
        if self.worse_than(other) { self } else { other }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Quality::None => "NONE",
            Quality::Untrusted => "UNTRUSTED",
            Quality::Fallback => "FALLBACK",
            Quality::Incomplete => "INCOMPLETE",
            Quality::Broken => "BROKEN",
            Quality::Simple => "SIMPLE",
            Quality::Loaded => "LOADED",
            Quality::Resolved => "RESOLVED",
            Quality::Consistent => "CONSISTENT",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
