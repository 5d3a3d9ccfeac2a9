//! Wire encoding for the Sybil crawler: compact node-info records, the
//! KRPC envelopes it sends and recognises, the deterministic `get_peers`
//! token, and the Sybil identity-synthesis primitive they all share.

pub mod ids;
pub mod messages;
pub mod node_info;
pub mod token;

pub use ids::{sybil_id, InfoHash, NodeID, NODE_ID_LEN};
pub use messages::{
    build_announce_peer_response, build_find_node_query, build_get_peers_response, parse, Inbound,
};
pub use node_info::NodeInfo;
