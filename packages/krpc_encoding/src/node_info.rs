use byteorder::{BigEndian, ByteOrder};
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::ids::{NodeID, NODE_ID_LEN};

/// Size in bytes of a single compact node-info record: a 20-byte node id,
/// a 4-byte big-endian IPv4 address, and a 2-byte big-endian port.
pub const COMPACT_NODE_LEN: usize = 26;

/// A node id paired with the address it was last seen at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeID,
    pub addr: SocketAddrV4,
}

/// Encodes a list of nodes as the concatenation of their compact records.
pub fn encode(nodes: &[NodeInfo]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nodes.len() * COMPACT_NODE_LEN);
    for node in nodes {
        out.extend_from_slice(&node.id);
        out.extend_from_slice(&node.addr.ip().octets());
        let mut port = [0u8; 2];
        BigEndian::write_u16(&mut port, node.addr.port());
        out.extend_from_slice(&port);
    }
    out
}

/// Decodes a `nodes` byte string into compact records. Returns `None` if
/// its length is not a multiple of [`COMPACT_NODE_LEN`] — callers must
/// drop the enclosing message silently in that case, per BEP-5.
///
/// Records whose port decodes to 0 are still returned; it is the caller's
/// responsibility to never act on them.
pub fn decode(bytes: &[u8]) -> Option<Vec<NodeInfo>> {
    if bytes.len() % COMPACT_NODE_LEN != 0 {
        return None;
    }

    Some(
        bytes
            .chunks_exact(COMPACT_NODE_LEN)
            .map(|record| {
                let mut id = [0u8; NODE_ID_LEN];
                id.copy_from_slice(&record[..20]);
                let ip = Ipv4Addr::new(record[20], record[21], record[22], record[23]);
                let port = BigEndian::read_u16(&record[24..26]);
                NodeInfo {
                    id,
                    addr: SocketAddrV4::new(ip, port),
                }
            })
            .collect(),
    )
}
