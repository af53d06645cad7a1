use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-document version counter.
///
/// A document starts at revision 1 and every commit advances it by exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    pub const INIT: Revision = Revision(1);

    #[must_use]
    pub const fn new(major: u64) -> Self {
        Self(major)
    }

    #[must_use]
    pub const fn major(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn forward(self, n: u64) -> Revision {
        Revision(self.0 + n)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
