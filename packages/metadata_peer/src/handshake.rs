use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use krpc_encoding::InfoHash;

/// Protocol string every BitTorrent handshake starts with.
pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// Total length in bytes of a handshake message.
pub const HANDSHAKE_LEN: usize = 68;

/// Index, within the 8 reserved bytes, of the byte carrying the
/// extension-protocol bit (BEP-10).
const EXTENSION_RESERVED_BYTE: usize = 5;

/// The extension-protocol bit within [`EXTENSION_RESERVED_BYTE`].
const EXTENSION_BIT: u8 = 0x10;

/// The 68-byte handshake exchanged at the start of every peer wire
/// connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Builds the handshake this crawler sends: extension protocol bit
    /// set, nothing else.
    pub fn new(info_hash: InfoHash, peer_id: [u8; 20]) -> Handshake {
        let mut reserved = [0u8; 8];
        reserved[EXTENSION_RESERVED_BYTE] |= EXTENSION_BIT;
        Handshake {
            reserved,
            info_hash,
            peer_id,
        }
    }

    pub fn supports_extension_protocol(&self) -> bool {
        self.reserved[EXTENSION_RESERVED_BYTE] & EXTENSION_BIT != 0
    }

    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    pub fn parse(buf: &[u8; HANDSHAKE_LEN]) -> Option<Handshake> {
        if buf[0] != 19 || &buf[1..20] != &PROTOCOL[..] {
            return None;
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Some(Handshake {
            reserved,
            info_hash,
            peer_id,
        })
    }

    pub async fn write(&self, stream: &mut TcpStream) -> std::io::Result<()> {
        stream.write_all(&self.serialize()).await
    }

    pub async fn read(stream: &mut TcpStream) -> std::io::Result<Option<Handshake>> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut buf).await?;
        Ok(Handshake::parse(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_serialize_and_parse() {
        let handshake = Handshake::new([0xABu8; 20], [0x11u8; 20]);
        let serialized = handshake.serialize();
        assert_eq!(Handshake::parse(&serialized), Some(handshake));
    }

    #[test]
    fn advertises_extension_protocol() {
        let handshake = Handshake::new([0; 20], [0; 20]);
        assert!(handshake.supports_extension_protocol());
        assert_eq!(handshake.reserved[5], 0x10);
    }

    #[test]
    fn rejects_wrong_protocol_string() {
        let mut buf = Handshake::new([0; 20], [0; 20]).serialize();
        buf[1] = b'x';
        assert_eq!(Handshake::parse(&buf), None);
    }

    #[test]
    fn rejects_wrong_protocol_length() {
        let mut buf = Handshake::new([0; 20], [0; 20]).serialize();
        buf[0] = 18;
        assert_eq!(Handshake::parse(&buf), None);
    }
}
