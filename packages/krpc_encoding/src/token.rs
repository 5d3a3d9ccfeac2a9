use adler32::RollingAdler32;
use std::net::Ipv4Addr;

use crate::ids::InfoHash;

/// 4 random bytes, fixed for the lifetime of a Sybil node, mixed into
/// every token it hands out.
pub type Secret = [u8; 4];

/// Deterministic `get_peers` token: Adler-32 over `secret ++ ip ++
/// ascii(port) ++ info_hash`, matching the original implementation's
/// `zlib.adler32(b"%s%s%d%s" % (secret, inet_aton(ip), port, info_hash))`
/// byte-for-byte (`%d` on a bytes format renders the port as decimal
/// ASCII digits, not two raw bytes).
///
/// Tokens are issued but never checked back on `announce_peer` — the
/// Sybil node is deliberately permissive, trading verification for a
/// higher capture rate of announces.
pub fn calculate(secret: &Secret, ip: Ipv4Addr, port: u16, info_hash: &InfoHash) -> u32 {
    let mut buf = Vec::with_capacity(secret.len() + 4 + 5 + info_hash.len());
    buf.extend_from_slice(secret);
    buf.extend_from_slice(&ip.octets());
    buf.extend_from_slice(port.to_string().as_bytes());
    buf.extend_from_slice(info_hash);
    RollingAdler32::from_buffer(&buf).hash()
}
