use std::time::Duration;

/// How often the tick loop fires (soft: a tick that runs long just delays
/// the next one, nothing is skipped or queued).
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How often the neighbour cap is allowed to recover after congestion.
pub const GROWTH_INTERVAL: Duration = Duration::from_secs(10);

/// Starting size of the routing table / neighbour population.
pub const INITIAL_NEIGHBOUR_CAP: usize = 2000;

/// Below this, a cap shrink logs a warning; congestion is otherwise left
/// to keep shrinking the cap with no floor.
pub const CONGESTION_CAP_FLOOR_WARNING: usize = 200;

/// Maximum simultaneously live Disposable Peer sessions per info-hash.
pub const MAX_ACTIVE_PEERS_PER_INFO_HASH: usize = 5;

/// Maximum simultaneously live Disposable Peer sessions across all
/// info-hashes, independent of the per-info-hash cap above.
pub const MAX_PENDING_PEER_SESSIONS: usize = 10;

/// Fixed DHT bootstrap hosts, resolved once at node startup.
pub const BOOTSTRAP_HOSTS: [&str; 2] = ["router.bittorrent.com:6881", "dht.transmissionbt.com:6881"];

/// Default cap on a single torrent's assembled metadata size.
pub const DEFAULT_MAX_METADATA_SIZE: usize = 10 * 1024 * 1024;
