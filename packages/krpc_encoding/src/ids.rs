use rand::RngCore;

/// Length in bytes of a node id, an info-hash, and of the Sybil identity
/// synthesized from the two.
pub const NODE_ID_LEN: usize = 20;

/// 20 opaque bytes identifying a DHT node.
pub type NodeID = [u8; NODE_ID_LEN];

/// 20-byte SHA-1 identifier of a torrent's info dictionary.
pub type InfoHash = [u8; NODE_ID_LEN];

/// Synthesizes the identity a Sybil node presents for messages aimed at
/// `target`: `target`'s own 15-byte prefix followed by our last 5 true-id
/// bytes.
///
/// Sharing `target`'s prefix makes `target` believe we are one of *its*
/// closest neighbours, so it inserts us into its own routing table. This
/// construction must stay bit-exact: remote nodes classify neighbours by
/// prefix distance.
pub fn sybil_id(target: &NodeID, true_id: &NodeID) -> NodeID {
    let mut id = [0u8; NODE_ID_LEN];
    id[..15].copy_from_slice(&target[..15]);
    id[15..].copy_from_slice(&true_id[15..]);
    id
}

/// `n` fresh random bytes, used for the true identity, the token secret,
/// and `find_node`'s `target` argument.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
