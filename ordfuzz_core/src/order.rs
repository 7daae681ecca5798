use crate::level::Level;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// The two relations an order can declare between levels of one option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "MST")]
    MoreSoundThan,
    #[serde(rename = "MPT")]
    MorePreciseThan,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::MoreSoundThan => f.write_str("MORE_SOUND_THAN"),
            OrderType::MorePreciseThan => f.write_str("MORE_PRECISE_THAN"),
        }
    }
}

/// `left` stands in `order_type` relation to `right`.
///
/// Instances are built by [`ConfigOption::order`](crate::option::ConfigOption::order),
/// which records whether the relation is anchored on explicit edges and
/// whether it needed more than one hop. Equality and hashing only look at
/// the levels, the relation and the option.
#[derive(Debug, Clone)]
pub struct PartialOrder {
    pub left: Level,
    pub order_type: OrderType,
    pub right: Level,
    pub option_name: String,
    explicit: bool,
    transitive: bool,
}

impl PartialOrder {
    pub(crate) fn new(
        left: Level,
        order_type: OrderType,
        right: Level,
        option_name: String,
        explicit: bool,
        transitive: bool,
    ) -> Self {
        Self {
            left,
            order_type,
            right,
            option_name,
            explicit,
            transitive,
        }
    }

    /// Whether the relation is reachable through explicit edges only.
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    /// Whether the relation was only established through multi-hop reachability.
    pub fn is_transitive(&self) -> bool {
        self.transitive
    }

    /// True when this order reads `left_level <order_type> right_level` literally.
    pub fn matches(&self, left_level: &Level, right_level: &Level) -> bool {
        &self.left == left_level && &self.right == right_level
    }
}

impl PartialEq for PartialOrder {
    fn eq(&self, other: &Self) -> bool {
        self.left == other.left
            && self.order_type == other.order_type
            && self.right == other.right
            && self.option_name == other.option_name
    }
}

impl Eq for PartialOrder {}

impl Hash for PartialOrder {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.left.hash(state);
        self.order_type.hash(state);
        self.right.hash(state);
        self.option_name.hash(state);
    }
}

impl fmt::Display for PartialOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.order_type, self.right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equality_ignores_provenance_flags() {
        let direct = PartialOrder::new(
            Level::new("cg", "CHA"),
            OrderType::MoreSoundThan,
            Level::new("cg", "RTA"),
            "cg".to_string(),
            true,
            false,
        );
        let derived = PartialOrder::new(
            Level::new("cg", "CHA"),
            OrderType::MoreSoundThan,
            Level::new("cg", "RTA"),
            "cg".to_string(),
            false,
            true,
        );
        assert_eq!(direct, derived);
        let set: HashSet<_> = [direct, derived].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn display_reads_left_to_right() {
        let order = PartialOrder::new(
            Level::new("k", "2"),
            OrderType::MorePreciseThan,
            Level::new("k", "1"),
            "k".to_string(),
            true,
            false,
        );
        assert_eq!(order.to_string(), "k=2 MORE_PRECISE_THAN k=1");
    }
}
