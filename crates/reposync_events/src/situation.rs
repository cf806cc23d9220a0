//! Situation classification results.

use std::fmt;

/// What happened to one side of an object since it was last synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Situation {
    /// Nothing changed.
    None,
    /// Object exists but was never synchronized.
    Added,
    /// Object was synchronized but no longer exists.
    Removed,
    /// Content or version changed in place.
    Changed,
    /// Parent changed (the name may have changed too).
    Moved,
    /// Name changed under the same parent.
    Renamed,
}

impl Situation {
    /// All situations, in declaration order.
    pub const ALL: [Situation; 6] = [
        Situation::None,
        Situation::Added,
        Situation::Removed,
        Situation::Changed,
        Situation::Moved,
        Situation::Renamed,
    ];

    /// Returns true for `Moved` and `Renamed`.
    pub fn is_relocation(&self) -> bool {
        matches!(self, Situation::Moved | Situation::Renamed)
    }
}

impl fmt::Display for Situation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Situation::None => "NONE",
            Situation::Added => "ADDED",
            Situation::Removed => "REMOVED",
            Situation::Changed => "CHANGED",
            Situation::Moved => "MOVED",
            Situation::Renamed => "RENAMED",
        };
        f.write_str(name)
    }
}

/// Key of the solver matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SituationPair {
    /// Local side.
    pub local: Situation,
    /// Remote side.
    pub remote: Situation,
}

impl SituationPair {
    /// Creates a pair.
    pub const fn new(local: Situation, remote: Situation) -> Self {
        Self { local, remote }
    }

    /// Returns true if neither side changed.
    pub fn is_unchanged(&self) -> bool {
        self.local == Situation::None && self.remote == Situation::None
    }
}

impl fmt::Display for SituationPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.local, self.remote)
    }
}
