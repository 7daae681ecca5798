use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the sentinel level standing for "some sampled value within range"
/// inside the partial orders of an integer option.
pub const SENTINEL: &str = "i";
/// Sentinel used for the smaller of two colliding integer levels.
pub const SENTINEL_PREDECESSOR: &str = "i-1";

/// One concrete setting of one option.
///
/// For integer options the `name` is either a literal integer or one of the
/// sentinels (`i`, `i-1`) that only appear on partial-order edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Level {
    pub option_name: String,
    pub level_name: String,
}

impl Level {
    pub fn new(option_name: impl Into<String>, level_name: impl Into<String>) -> Self {
        Self {
            option_name: option_name.into(),
            level_name: level_name.into(),
        }
    }

    /// Returns the literal integer value of this level, if it has one.
    pub fn as_int(&self) -> Option<i64> {
        self.level_name.parse().ok()
    }

    pub fn is_numeric(&self) -> bool {
        self.as_int().is_some()
    }

    /// True for the `i` / `i-1` placeholders used inside integer orders.
    pub fn is_sentinel(&self) -> bool {
        matches!(LevelRef::parse(&self.level_name), LevelRef::NumericSentinel { .. })
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.option_name, self.level_name)
    }
}

/// A level after resolution against an option's order graphs.
///
/// Queries about concrete integers that are not themselves graph nodes are
/// answered through the sentinel nodes, so a single order over the shape of
/// the range covers every value in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LevelRef {
    Exact(String),
    /// `offset` 0 is `i`, 1 is `i-1`.
    NumericSentinel { offset: u8 },
}

impl LevelRef {
    pub fn parse(node: &str) -> Self {
        match node {
            SENTINEL => LevelRef::NumericSentinel { offset: 0 },
            SENTINEL_PREDECESSOR => LevelRef::NumericSentinel { offset: 1 },
            other => LevelRef::Exact(other.to_string()),
        }
    }

    /// The graph node name this reference points at.
    pub fn node(&self) -> &str {
        match self {
            LevelRef::Exact(name) => name,
            LevelRef::NumericSentinel { offset: 0 } => SENTINEL,
            LevelRef::NumericSentinel { .. } => SENTINEL_PREDECESSOR,
        }
    }
}
