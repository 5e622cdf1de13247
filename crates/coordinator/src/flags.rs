//! Routing findings attached to AST nodes by id.
//!
//! The parsed statement is never mutated while routing; everything the
//! router learns about a node lives here and is dropped with the routing
//! pass.

use shardgate_sql::NodeId;
use std::collections::HashMap;

/// A comparison, BETWEEN or IN that restricts a shard key.
pub const SHARD_COND: u8 = 0x01;
/// `a.key = b.key` correlating two sharded tables; never restricts partitions.
pub const JOIN_LINK: u8 = 0x02;
/// The shard key sits on the right side; read the operator flipped.
pub const FLIPPED: u8 = 0x04;
/// Select-list column already named by ORDER BY.
pub const ORDER_BY: u8 = 0x08;

#[derive(Debug, Clone, Default)]
pub struct RoutingFlags {
    nodes: HashMap<NodeId, u8>,
    /// Synthetic ORDER BY columns are needed before fan-out.
    pub rewrite_order_by: bool,
}

impl RoutingFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: NodeId, flag: u8) {
        *self.nodes.entry(id).or_insert(0) |= flag;
    }

    pub fn unset(&mut self, id: NodeId, flag: u8) {
        if let Some(bits) = self.nodes.get_mut(&id) {
            *bits &= !flag;
        }
    }

    pub fn has(&self, id: NodeId, flag: u8) -> bool {
        self.nodes.get(&id).is_some_and(|bits| bits & flag != 0)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.rewrite_order_by = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_independent_bits() {
        let mut flags = RoutingFlags::new();
        flags.set(7, SHARD_COND);
        flags.set(7, FLIPPED);
        assert!(flags.has(7, SHARD_COND) && flags.has(7, FLIPPED));
        flags.unset(7, FLIPPED);
        assert!(!flags.has(7, FLIPPED));
        assert!(!flags.has(8, SHARD_COND));
        flags.clear();
        assert!(!flags.has(7, SHARD_COND));
    }
}
