//! The circular 64-bit identifier space.
//!
//! Node identifiers and content targets live on the same ring. Ordering is
//! ring distance, never numeric magnitude: the space wraps, and the distance
//! between two ids is the shorter way around.

use serde::{Deserialize, Serialize};

/// Identifier of a node (or a content target) on the ring.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Ring distance to `other`: the shorter arc between the two ids.
    pub fn distance(&self, other: NodeId) -> u64 {
        let forward = other.0.wrapping_sub(self.0);
        let backward = self.0.wrapping_sub(other.0);
        forward.min(backward)
    }

    /// Which side of `self` the other id sits on.
    ///
    /// An id exactly opposite (offset 2^63) counts as a successor; the ties
    /// do not matter for routing, only that the classification is stable.
    pub fn side_of(&self, other: NodeId) -> Side {
        let forward = other.0.wrapping_sub(self.0);
        if forward <= u64::MAX / 2 + 1 {
            Side::Successor
        } else {
            Side::Predecessor
        }
    }

    /// True if `candidate` is strictly closer to `target` than `self` is.
    pub fn is_closer(&self, candidate: NodeId, target: NodeId) -> bool {
        candidate.distance(target) < self.distance(target)
    }
}

/// Ring side relative to a reference id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Clockwise from the reference (right neighbours).
    Successor,
    /// Counter-clockwise from the reference (left neighbours).
    Predecessor,
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric_and_wraps() {
        let a = NodeId(10);
        let b = NodeId(u64::MAX - 5);
        // 10 -> MAX-5 is 16 steps backwards around the origin
        assert_eq!(a.distance(b), 16);
        assert_eq!(b.distance(a), 16);
        assert_eq!(a.distance(a), 0);
    }

    #[test]
    fn distance_prefers_shorter_arc() {
        let a = NodeId(0);
        // one past the opposite point: the backward arc is exactly 2^63 - 1
        let b = NodeId(u64::MAX / 2 + 2);
        assert_eq!(a.distance(b), u64::MAX / 2);
        // the opposite point itself is the largest possible distance
        assert_eq!(a.distance(NodeId(u64::MAX / 2 + 1)), u64::MAX / 2 + 1);
        // further along, the backward arc keeps shrinking
        assert_eq!(a.distance(NodeId(u64::MAX / 2 + 3)), u64::MAX / 2 - 1);
    }

    #[test]
    fn side_classification_wraps() {
        let origin = NodeId(u64::MAX - 10);
        assert_eq!(origin.side_of(NodeId(5)), Side::Successor);
        assert_eq!(origin.side_of(NodeId(u64::MAX - 20)), Side::Predecessor);
    }

    #[test]
    fn closer_comparison() {
        let node = NodeId(100);
        let target = NodeId(200);
        assert!(node.is_closer(NodeId(190), target));
        assert!(!node.is_closer(NodeId(301), target));
        // equal distance is not strictly closer
        assert!(!node.is_closer(NodeId(300), target));
    }

    #[test]
    fn serde_round_trip() {
        let id = NodeId(0xdead_beef_0000_0001);
        let json = serde_json::to_string(&id).unwrap();
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
