use rand::RngCore;
use serde_bencode::value::Value;
use std::collections::BTreeMap;

use crate::ids::{NodeID, NODE_ID_LEN};
use crate::node_info::{self, NodeInfo};

/// Transaction id used on every outbound `find_node` query.
///
/// The Sybil node never correlates a `find_node` response back to the
/// request that prompted it — it just harvests whatever `nodes` a peer
/// returns — so the transaction id does not need to be unique, and the
/// original implementation hard-codes it for speed.
const FIND_NODE_TRANSACTION_ID: &[u8] = b"aa";

/// Builds the pre-bencoded `find_node` query described in BEP-5:
/// `d1:ad2:id20:<id>6:target20:<random>e1:q9:find_node1:t2:aa1:y1:qe`.
///
/// `id` is either the Sybil node's true id (bootstrap queries) or a
/// synthesized Sybil identity (neighbour-refresh queries); see
/// [`crate::ids::sybil_id`].
pub fn build_find_node_query(id: &NodeID) -> Vec<u8> {
    let mut target = [0u8; NODE_ID_LEN];
    rand::thread_rng().fill_bytes(&mut target);

    let mut out = Vec::with_capacity(12 + NODE_ID_LEN + 11 + NODE_ID_LEN + 27);
    out.extend_from_slice(b"d1:ad2:id20:");
    out.extend_from_slice(id);
    out.extend_from_slice(b"6:target20:");
    out.extend_from_slice(&target);
    out.extend_from_slice(b"e1:q9:find_node1:t2:");
    out.extend_from_slice(FIND_NODE_TRANSACTION_ID);
    out.extend_from_slice(b"1:y1:qe");
    out
}

/// Builds the response to a `get_peers` query. `nodes` is always empty:
/// a truthful answer would hand the asker real peers, so instead we
/// return none while echoing the info-hash's prefix, which keeps us
/// looking like a useful neighbour without leaking real routing data.
pub fn build_get_peers_response(
    transaction_id: &[u8],
    info_hash: &NodeID,
    true_id: &NodeID,
    token: u32,
) -> Vec<u8> {
    let id = crate::ids::sybil_id(info_hash, true_id);

    let mut r = BTreeMap::new();
    r.insert(b"id".to_vec(), Value::Bytes(id.to_vec()));
    r.insert(b"nodes".to_vec(), Value::Bytes(Vec::new()));
    r.insert(b"token".to_vec(), Value::Int(token as i64));

    encode_envelope(transaction_id, r)
}

/// Builds the response to an `announce_peer` query.
pub fn build_announce_peer_response(transaction_id: &[u8], requester_id: &NodeID, true_id: &NodeID) -> Vec<u8> {
    let id = crate::ids::sybil_id(requester_id, true_id);

    let mut r = BTreeMap::new();
    r.insert(b"id".to_vec(), Value::Bytes(id.to_vec()));

    encode_envelope(transaction_id, r)
}

fn encode_envelope(transaction_id: &[u8], r: BTreeMap<Vec<u8>, Value>) -> Vec<u8> {
    let mut top = BTreeMap::new();
    top.insert(b"r".to_vec(), Value::Dict(r));
    top.insert(b"t".to_vec(), Value::Bytes(transaction_id.to_vec()));
    top.insert(b"y".to_vec(), Value::Bytes(b"r".to_vec()));

    serde_bencode::to_bytes(&Value::Dict(top))
        .expect("bencode encoding of a well-formed KRPC dict cannot fail")
}

/// A successfully parsed and validated inbound KRPC message. Anything
/// that does not match one of these shapes — wrong types, missing
/// fields, an unrecognised method — is dropped silently by [`parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    FindNodeResponse {
        nodes: Vec<NodeInfo>,
    },
    GetPeers {
        transaction_id: Vec<u8>,
        info_hash: NodeID,
    },
    AnnouncePeer {
        transaction_id: Vec<u8>,
        requester_id: NodeID,
        info_hash: NodeID,
        port: u16,
        implied_port: bool,
    },
}

/// Parses and validates a raw datagram against the shapes this node
/// recognises, returning `None` for anything malformed or uninteresting.
pub fn parse(data: &[u8]) -> Option<Inbound> {
    let value: Value = serde_bencode::de::from_bytes(data).ok()?;
    let top = as_dict(&value)?;

    if let Some(r) = field(top, "r").and_then(as_dict) {
        let nodes_bytes = field(r, "nodes").and_then(as_bytes)?;
        let nodes = node_info::decode(nodes_bytes)?;
        return Some(Inbound::FindNodeResponse { nodes });
    }

    let method = field(top, "q").and_then(as_bytes)?;
    let args = field(top, "a").and_then(as_dict)?;
    let transaction_id = field(top, "t").and_then(as_bytes)?;
    if transaction_id.is_empty() {
        return None;
    }

    match method {
        b"get_peers" => {
            let info_hash = node_id(field(args, "info_hash").and_then(as_bytes)?)?;
            Some(Inbound::GetPeers {
                transaction_id: transaction_id.to_vec(),
                info_hash,
            })
        }
        b"announce_peer" => {
            let requester_id = node_id(field(args, "id").and_then(as_bytes)?)?;
            let info_hash = node_id(field(args, "info_hash").and_then(as_bytes)?)?;
            // Content is never validated, only its presence and type.
            let _token = field(args, "token").and_then(as_bytes)?;
            let port = field(args, "port").and_then(as_int)?;
            if port <= 0 || port >= 65536 {
                return None;
            }
            let implied_port = match field(args, "implied_port") {
                None => false,
                Some(Value::Int(0)) => false,
                Some(Value::Int(1)) => true,
                _ => return None,
            };

            Some(Inbound::AnnouncePeer {
                transaction_id: transaction_id.to_vec(),
                requester_id,
                info_hash,
                port: port as u16,
                implied_port,
            })
        }
        _ => None,
    }
}

fn node_id(bytes: &[u8]) -> Option<NodeID> {
    if bytes.len() != NODE_ID_LEN {
        return None;
    }
    let mut id = [0u8; NODE_ID_LEN];
    id.copy_from_slice(bytes);
    Some(id)
}

fn field<'a>(dict: &'a BTreeMap<Vec<u8>, Value>, key: &str) -> Option<&'a Value> {
    dict.get(key.as_bytes())
}

fn as_dict(value: &Value) -> Option<&BTreeMap<Vec<u8>, Value>> {
    match value {
        Value::Dict(d) => Some(d),
        _ => None,
    }
}

fn as_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::Bytes(b) => Some(b),
        _ => None,
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        _ => None,
    }
}
