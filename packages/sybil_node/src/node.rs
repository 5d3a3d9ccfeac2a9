use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time;

use krpc_encoding::{self as krpc, sybil_id, token, InfoHash, NodeID};
use metadata_peer::DisposablePeer;

use crate::config::SybilConfig;
use crate::constants::*;
use crate::errors::Result;
use crate::routing::RoutingTable;
use crate::transport::{SendOutcome, Transport};

/// The Sybil crawler node: a single UDP endpoint impersonating a shifting
/// crowd of DHT neighbours, driving a per-info-hash fan-out of Disposable
/// Peer metadata fetches.
pub struct SybilNode {
    true_id: NodeID,
    token_secret: token::Secret,
    config: SybilConfig,
    transport: Transport,
    bootstrap_addrs: Vec<SocketAddr>,
    routing: Mutex<RoutingTable>,
    neighbour_cap: Mutex<usize>,
    peers: Mutex<HashMap<InfoHash, Vec<(u64, AbortHandle)>>>,
    pending_sessions: Mutex<usize>,
    next_session_id: AtomicU64,
    metadata_tx: mpsc::UnboundedSender<(InfoHash, Vec<u8>)>,
}

/// A handle to a running node; dropping it does not stop the node, only
/// [`SybilNodeHandle::shutdown`] does.
pub struct SybilNodeHandle {
    node: Arc<SybilNode>,
    shutdown_tx: watch::Sender<bool>,
}

impl SybilNodeHandle {
    /// Stops the datagram, tick and growth loops, aborts every live
    /// Disposable Peer session, and closes the UDP transport. Does not
    /// drain the metadata queue; the embedder owns that.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let sessions: Vec<(u64, AbortHandle)> = self.node.peers.lock().unwrap().drain().flat_map(|(_, sessions)| sessions).collect();
        release_pending_sessions(&self.node, sessions.len());
        for (_, abort_handle) in sessions {
            abort_handle.abort();
        }

        self.node.transport.close();
    }
}

impl SybilNode {
    /// Binds the UDP socket, resolves the bootstrap hosts, and spawns the
    /// node's three cooperating tasks (datagram, tick, growth).
    pub async fn launch(config: SybilConfig) -> Result<(SybilNodeHandle, mpsc::UnboundedReceiver<(InfoHash, Vec<u8>)>)> {
        let transport = Transport::bind(config.bind_addr).await?;
        let bootstrap_addrs = resolve_bootstrap_addrs().await;
        let (metadata_tx, metadata_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let node = Arc::new(SybilNode {
            true_id: krpc::ids::random_bytes(),
            token_secret: krpc::ids::random_bytes(),
            config,
            transport,
            bootstrap_addrs,
            routing: Mutex::new(RoutingTable::new(INITIAL_NEIGHBOUR_CAP)),
            neighbour_cap: Mutex::new(INITIAL_NEIGHBOUR_CAP),
            peers: Mutex::new(HashMap::new()),
            pending_sessions: Mutex::new(0),
            next_session_id: AtomicU64::new(0),
            metadata_tx,
        });

        tokio::spawn(datagram_loop(node.clone(), shutdown_rx.clone()));
        tokio::spawn(tick_loop(node.clone(), shutdown_rx.clone()));
        tokio::spawn(growth_loop(node.clone(), shutdown_rx));

        Ok((SybilNodeHandle { node, shutdown_tx }, metadata_rx))
    }

    async fn send(&self, addr: SocketAddr, bytes: &[u8]) {
        match self.transport.send(addr, bytes).await {
            SendOutcome::Congested => self.shrink_neighbour_cap(),
            SendOutcome::Sent | SendOutcome::Failed => {}
        }
    }

    fn shrink_neighbour_cap(&self) {
        let cap = {
            let mut cap = self.neighbour_cap.lock().unwrap();
            *cap = (*cap * 9) / 10;
            *cap
        };
        if cap < CONGESTION_CAP_FLOOR_WARNING {
            log::warn!("neighbour cap shrank to {}, below the {} floor warning", cap, CONGESTION_CAP_FLOOR_WARNING);
        }
        self.routing.lock().unwrap().set_cap(cap);
    }

    fn grow_neighbour_cap(&self) {
        let cap = {
            let mut cap = self.neighbour_cap.lock().unwrap();
            *cap = (*cap * 101) / 100;
            *cap
        };
        self.routing.lock().unwrap().set_cap(cap);
    }

    async fn tick(&self) {
        for addr in &self.bootstrap_addrs {
            let bytes = krpc::build_find_node_query(&self.true_id);
            self.send(*addr, &bytes).await;
        }

        let entries = self.routing.lock().unwrap().drain();
        for (node_id, addr) in entries {
            let id = sybil_id(&node_id, &self.true_id);
            let bytes = krpc::build_find_node_query(&id);
            self.send(SocketAddr::V4(addr), &bytes).await;
        }
    }

    fn ingest_nodes(&self, nodes: Vec<krpc::NodeInfo>) {
        let mut routing = self.routing.lock().unwrap();
        for node in nodes {
            if node.addr.port() == 0 {
                continue;
            }
            routing.insert(node.id, node.addr);
        }
    }

    async fn reply_get_peers(&self, remote: SocketAddrV4, transaction_id: &[u8], info_hash: &InfoHash) {
        let token = token::calculate(&self.token_secret, *remote.ip(), remote.port(), info_hash);
        let bytes = krpc::build_get_peers_response(transaction_id, info_hash, &self.true_id, token);
        self.send(SocketAddr::V4(remote), &bytes).await;
    }

    async fn reply_announce_peer(&self, remote: SocketAddrV4, transaction_id: &[u8], requester_id: &NodeID) {
        let bytes = krpc::build_announce_peer_response(transaction_id, requester_id, &self.true_id);
        self.send(SocketAddr::V4(remote), &bytes).await;
    }

    async fn handle_datagram(self: &Arc<Self>, data: &[u8], remote: SocketAddr) {
        let remote = match as_ipv4(remote) {
            Some(remote) => remote,
            None => return,
        };

        match krpc::parse(data) {
            Some(krpc::Inbound::FindNodeResponse { nodes }) => self.ingest_nodes(nodes),
            Some(krpc::Inbound::GetPeers { transaction_id, info_hash }) => {
                self.reply_get_peers(remote, &transaction_id, &info_hash).await;
            }
            Some(krpc::Inbound::AnnouncePeer {
                transaction_id,
                requester_id,
                info_hash,
                port,
                implied_port,
            }) => {
                self.reply_announce_peer(remote, &transaction_id, &requester_id).await;

                let peer_addr = if implied_port {
                    SocketAddr::V4(remote)
                } else {
                    SocketAddr::V4(SocketAddrV4::new(*remote.ip(), port))
                };
                spawn_peer_session(self, info_hash, peer_addr);
            }
            None => {}
        }
    }
}

fn as_ipv4(addr: SocketAddr) -> Option<SocketAddrV4> {
    match addr {
        SocketAddr::V4(addr) => Some(addr),
        SocketAddr::V6(_) => None,
    }
}

async fn resolve_bootstrap_addrs() -> Vec<SocketAddr> {
    let mut addrs = Vec::with_capacity(BOOTSTRAP_HOSTS.len());
    for host in BOOTSTRAP_HOSTS {
        match tokio::net::lookup_host(host).await {
            Ok(resolved) => addrs.extend(resolved),
            Err(err) => log::warn!("failed to resolve bootstrap host {}: {}", host, err),
        }
    }
    addrs
}

async fn datagram_loop(node: Arc<SybilNode>, mut shutdown_rx: watch::Receiver<bool>) {
    let socket = match node.transport.socket() {
        Some(socket) => socket,
        None => return,
    };
    let mut buf = [0u8; 2048];
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, remote)) => node.handle_datagram(&buf[..len], remote).await,
                    Err(err) => log::debug!("recv_from failed: {}", err),
                }
            }
        }
    }
}

async fn tick_loop(node: Arc<SybilNode>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => node.tick().await,
        }
    }
}

async fn growth_loop(node: Arc<SybilNode>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = time::interval(GROWTH_INTERVAL);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => node.grow_neighbour_cap(),
        }
    }
}

/// Spawns a Disposable Peer session against `peer_addr` for `info_hash`,
/// unless the info-hash is already complete or either fan-out cap
/// (per-info-hash or global) is at capacity.
fn spawn_peer_session(node: &Arc<SybilNode>, info_hash: InfoHash, peer_addr: SocketAddr) {
    if node.config.complete_info_hashes.lock().unwrap().contains(&info_hash) {
        return;
    }

    {
        let peers = node.peers.lock().unwrap();
        if peers.get(&info_hash).map_or(0, |sessions| sessions.len()) >= MAX_ACTIVE_PEERS_PER_INFO_HASH {
            return;
        }
    }

    {
        let mut pending = node.pending_sessions.lock().unwrap();
        if *pending >= MAX_PENDING_PEER_SESSIONS {
            log::debug!("global pending session cap ({}) reached, dropping announce", MAX_PENDING_PEER_SESSIONS);
            return;
        }
        *pending += 1;
    }

    let session_id = node.next_session_id.fetch_add(1, Ordering::Relaxed);
    let task_node = node.clone();
    let max_metadata_size = node.config.max_metadata_size;

    let join_handle = tokio::spawn(async move {
        let peer = DisposablePeer::new(peer_addr, info_hash, max_metadata_size);
        let result = peer.fetch().await;

        match result {
            Some((info_hash, metadata)) => complete_info_hash(&task_node, info_hash, metadata),
            None => remove_peer_session(&task_node, info_hash, session_id),
        }
    });

    let mut peers = node.peers.lock().unwrap();
    peers.entry(info_hash).or_insert_with(Vec::new).push((session_id, join_handle.abort_handle()));
}

/// Releases `count` global pending-session slots. Every removal of a
/// session from `peers` — whether the session finished on its own or was
/// aborted as someone else's sibling — must go through here exactly once,
/// or the cap in `spawn_peer_session` ratchets shut over time.
fn release_pending_sessions(node: &Arc<SybilNode>, count: usize) {
    let mut pending = node.pending_sessions.lock().unwrap();
    *pending = pending.saturating_sub(count);
}

/// Called when a Disposable Peer session succeeds: closes every sibling
/// session for this info-hash, enqueues the result, and marks the
/// info-hash complete so no further sessions are spawned for it.
fn complete_info_hash(node: &Arc<SybilNode>, info_hash: InfoHash, metadata: Vec<u8>) {
    let siblings = node.peers.lock().unwrap().remove(&info_hash).unwrap_or_default();
    release_pending_sessions(node, siblings.len());
    for (_, abort_handle) in siblings {
        abort_handle.abort();
    }

    node.config.complete_info_hashes.lock().unwrap().insert(info_hash);

    if node.metadata_tx.send((info_hash, metadata)).is_err() {
        log::debug!("metadata queue receiver dropped, discarding a completed fetch");
    }
}

fn remove_peer_session(node: &Arc<SybilNode>, info_hash: InfoHash, session_id: u64) {
    let mut peers = node.peers.lock().unwrap();
    if let Some(sessions) = peers.get_mut(&info_hash) {
        let before = sessions.len();
        sessions.retain(|(id, _)| *id != session_id);
        if sessions.len() < before {
            release_pending_sessions(node, 1);
        }
        if sessions.is_empty() {
            peers.remove(&info_hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};

    async fn test_node() -> Arc<SybilNode> {
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let complete_info_hashes = Arc::new(Mutex::new(HashSet::new()));
        let config = SybilConfig::new(bind_addr, complete_info_hashes);
        let transport = Transport::bind(bind_addr).await.unwrap();

        Arc::new(SybilNode {
            true_id: [0x11u8; 20],
            token_secret: [1, 2, 3, 4],
            config,
            transport,
            bootstrap_addrs: Vec::new(),
            routing: Mutex::new(RoutingTable::new(INITIAL_NEIGHBOUR_CAP)),
            neighbour_cap: Mutex::new(INITIAL_NEIGHBOUR_CAP),
            peers: Mutex::new(HashMap::new()),
            pending_sessions: Mutex::new(0),
            next_session_id: AtomicU64::new(0),
            metadata_tx: mpsc::unbounded_channel().0,
        })
    }

    #[tokio::test]
    async fn fan_out_cap_stops_the_sixth_session() {
        let node = test_node().await;
        let info_hash = [0x42u8; 20];
        let unreachable = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1);

        for _ in 0..6 {
            spawn_peer_session(&node, info_hash, unreachable);
        }

        let active = node.peers.lock().unwrap().get(&info_hash).map_or(0, |sessions| sessions.len());
        assert_eq!(active, MAX_ACTIVE_PEERS_PER_INFO_HASH);
    }

    #[tokio::test]
    async fn global_pending_cap_stops_spawns_across_info_hashes() {
        let node = test_node().await;
        let unreachable = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1);

        for i in 0..(MAX_PENDING_PEER_SESSIONS + 5) {
            let mut info_hash = [0u8; 20];
            info_hash[0] = i as u8;
            spawn_peer_session(&node, info_hash, unreachable);
        }

        assert_eq!(*node.pending_sessions.lock().unwrap(), MAX_PENDING_PEER_SESSIONS);
    }

    #[tokio::test]
    async fn already_complete_info_hash_is_never_spawned() {
        let node = test_node().await;
        let info_hash = [0x77u8; 20];
        node.config.complete_info_hashes.lock().unwrap().insert(info_hash);

        spawn_peer_session(&node, info_hash, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1));

        assert!(node.peers.lock().unwrap().get(&info_hash).is_none());
    }

    #[tokio::test]
    async fn neighbour_cap_shrinks_then_recovers() {
        let node = test_node().await;
        node.shrink_neighbour_cap();
        let shrunk = (INITIAL_NEIGHBOUR_CAP * 9) / 10;
        assert_eq!(*node.neighbour_cap.lock().unwrap(), shrunk);

        node.grow_neighbour_cap();
        assert_eq!(*node.neighbour_cap.lock().unwrap(), (shrunk * 101) / 100);
    }

    #[tokio::test]
    async fn tick_clears_the_routing_table() {
        let node = test_node().await;
        node.ingest_nodes(vec![krpc::NodeInfo {
            id: [0x11u8; 20],
            addr: SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881),
        }]);
        assert_eq!(node.routing.lock().unwrap().len(), 1);

        node.tick().await;

        assert!(node.routing.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn routing_table_ignores_port_zero_nodes() {
        let node = test_node().await;
        node.ingest_nodes(vec![krpc::NodeInfo {
            id: [0x11u8; 20],
            addr: SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 0),
        }]);
        assert!(node.routing.lock().unwrap().is_empty());
    }
}
