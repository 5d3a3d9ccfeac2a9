use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use krpc_encoding::InfoHash;

use crate::constants::DEFAULT_MAX_METADATA_SIZE;

/// Construction-time configuration for a [`crate::node::SybilNode`]. No
/// CLI parsing lives here; the embedder builds this directly.
#[derive(Clone)]
pub struct SybilConfig {
    pub bind_addr: SocketAddr,

    /// Info-hashes the embedder already has metadata for. Read to skip
    /// redundant fetches, written by the node on every successful fetch.
    pub complete_info_hashes: Arc<Mutex<HashSet<InfoHash>>>,

    /// Upper bound on a single torrent's assembled metadata size.
    pub max_metadata_size: usize,
}

impl SybilConfig {
    pub fn new(bind_addr: SocketAddr, complete_info_hashes: Arc<Mutex<HashSet<InfoHash>>>) -> SybilConfig {
        SybilConfig {
            bind_addr,
            complete_info_hashes,
            max_metadata_size: DEFAULT_MAX_METADATA_SIZE,
        }
    }
}
