use std::collections::HashMap;
use std::net::SocketAddrV4;

use krpc_encoding::NodeID;

/// The node's transient view of "neighbours heard from since the last
/// tick". A flat, size-capped map, not a Kademlia bucket tree: the node
/// never ages entries or splits by XOR distance, it just clears the whole
/// table at the end of every tick (spec's data model, not a routing table
/// in the DHT-citizen sense).
pub struct RoutingTable {
    nodes: HashMap<NodeID, SocketAddrV4>,
    cap: usize,
}

impl RoutingTable {
    pub fn new(cap: usize) -> RoutingTable {
        RoutingTable {
            nodes: HashMap::new(),
            cap,
        }
    }

    /// Adds `(id, addr)`, replacing any existing entry for `id`. A no-op
    /// once the table is at cap and `id` is not already present.
    pub fn insert(&mut self, id: NodeID, addr: SocketAddrV4) {
        if self.nodes.len() >= self.cap && !self.nodes.contains_key(&id) {
            return;
        }
        self.nodes.insert(id, addr);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn set_cap(&mut self, cap: usize) {
        self.cap = cap;
    }

    /// Removes and returns every entry, leaving the table empty. Called
    /// at the end of every tick.
    pub fn drain(&mut self) -> Vec<(NodeID, SocketAddrV4)> {
        self.nodes.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(n: u8) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(n, n, n, n), 6881)
    }

    #[test]
    fn refuses_new_entries_once_at_cap() {
        let mut table = RoutingTable::new(1);
        table.insert([1u8; 20], addr(1));
        table.insert([2u8; 20], addr(2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn allows_updating_an_existing_entry_at_cap() {
        let mut table = RoutingTable::new(1);
        table.insert([1u8; 20], addr(1));
        table.insert([1u8; 20], addr(9));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn drain_empties_the_table() {
        let mut table = RoutingTable::new(10);
        table.insert([1u8; 20], addr(1));
        table.insert([2u8; 20], addr(2));
        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
