use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::errors::{Error, ErrorKind, Result};

/// BitTorrent wire message id reserved for BEP-10 extension messages.
pub const EXTENDED_MESSAGE_ID: u8 = 20;

/// Extended-message id reserved, within the extension namespace, for the
/// extended handshake itself (BEP-10 §2).
pub const HANDSHAKE_EXTENDED_ID: u8 = 0;

/// Name `ut_metadata` registers itself under in an extended handshake's
/// `m` dictionary (BEP-9 §3.1).
pub const UT_METADATA_NAME: &str = "ut_metadata";

/// Size of a metadata piece, fixed by BEP-9.
pub const PIECE_LENGTH: usize = 16384;

/// Extended-message id we advertise for `ut_metadata` in our own
/// handshake. Arbitrary and local to this connection; BEP-10 only
/// requires it be nonzero.
pub const LOCAL_UT_METADATA_ID: u8 = 1;

pub const MSG_TYPE_REQUEST: i64 = 0;
pub const MSG_TYPE_DATA: i64 = 1;
pub const MSG_TYPE_REJECT: i64 = 2;

/// The `m`/`metadata_size` payload of a BEP-10 extended handshake. We
/// only advertise and look for `ut_metadata`; unrelated extensions a peer
/// lists are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedHandshake {
    #[serde(rename = "m")]
    pub message_ids: BTreeMap<String, u8>,
    #[serde(rename = "metadata_size", skip_serializing_if = "Option::is_none")]
    pub metadata_size: Option<i64>,
}

impl ExtendedHandshake {
    /// The handshake this crawler sends: we advertise `ut_metadata` and
    /// a `metadata_size` of 0 since we don't have the metadata yet.
    pub fn advertising_ut_metadata() -> ExtendedHandshake {
        let mut message_ids = BTreeMap::new();
        message_ids.insert(UT_METADATA_NAME.to_string(), LOCAL_UT_METADATA_ID);
        ExtendedHandshake {
            message_ids,
            metadata_size: Some(0),
        }
    }

    pub fn peer_ut_metadata_id(&self) -> Option<u8> {
        self.message_ids.get(UT_METADATA_NAME).copied()
    }
}

/// A `ut_metadata` request/data/reject message, per BEP-9 §3.2. `data`
/// messages carry the piece's raw bytes immediately after this bencoded
/// header in the same extended-message payload, with no delimiter
/// between the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtMetadataMessage {
    pub msg_type: i64,
    pub piece: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<i64>,
}

impl UtMetadataMessage {
    pub fn request(piece: i64) -> UtMetadataMessage {
        UtMetadataMessage {
            msg_type: MSG_TYPE_REQUEST,
            piece,
            total_size: None,
        }
    }
}

/// A decoded BEP-10 extended-message frame: which extension it targets,
/// and its raw payload (still bencoded for anything but raw piece data).
pub struct ExtendedMessage {
    pub extended_id: u8,
    pub payload: Vec<u8>,
}

/// Sends a length-prefixed extended message: `[len:4][20][extended_id][bencoded_payload]`.
pub async fn send_extended(stream: &mut TcpStream, extended_id: u8, bencoded_payload: &[u8]) -> std::io::Result<()> {
    let body_len = 2 + bencoded_payload.len();
    let mut frame = Vec::with_capacity(4 + body_len);
    frame.extend_from_slice(&(body_len as u32).to_be_bytes());
    frame.push(EXTENDED_MESSAGE_ID);
    frame.push(extended_id);
    frame.extend_from_slice(bencoded_payload);
    stream.write_all(&frame).await
}

/// Reads wire messages until an extended-protocol one arrives, silently
/// skipping keep-alives and ordinary BitTorrent messages (bitfield,
/// have, choke, ...) that a normal peer sends but this one-shot session
/// has no use for.
pub async fn recv_extended(stream: &mut TcpStream) -> Result<ExtendedMessage> {
    loop {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.map_err(|_| ErrorKind::MalformedExtendedMessage)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 {
            continue; // keep-alive
        }

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.map_err(|_| ErrorKind::MalformedExtendedMessage)?;

        if body[0] != EXTENDED_MESSAGE_ID {
            continue;
        }
        if body.len() < 2 {
            return Err(Error::from(ErrorKind::MalformedExtendedMessage));
        }

        return Ok(ExtendedMessage {
            extended_id: body[1],
            payload: body[2..].to_vec(),
        });
    }
}

/// Splits a `ut_metadata` data message's raw piece bytes off the end of
/// its payload. The payload is a bencoded [`UtMetadataMessage`] header
/// immediately followed by the piece's raw bytes with no delimiter
/// between the two, so the header's re-encoded length is the offset
/// where the raw bytes begin.
pub fn split_data_payload<'a>(msg: &UtMetadataMessage, payload: &'a [u8]) -> Result<&'a [u8]> {
    let header_len = serde_bencode::to_bytes(msg)
        .map_err(|_| ErrorKind::MalformedExtendedMessage)?
        .len();
    if header_len > payload.len() {
        return Err(Error::from(ErrorKind::MalformedExtendedMessage));
    }
    Ok(&payload[header_len..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_handshake_advertises_ut_metadata() {
        let handshake = ExtendedHandshake::advertising_ut_metadata();
        assert_eq!(handshake.peer_ut_metadata_id(), Some(LOCAL_UT_METADATA_ID));
        assert_eq!(handshake.metadata_size, Some(0));
    }

    #[test]
    fn extended_handshake_round_trips_through_bencode() {
        let handshake = ExtendedHandshake::advertising_ut_metadata();
        let encoded = serde_bencode::to_bytes(&handshake).unwrap();
        let decoded: ExtendedHandshake = serde_bencode::de::from_bytes(&encoded).unwrap();
        assert_eq!(decoded.peer_ut_metadata_id(), Some(LOCAL_UT_METADATA_ID));
    }

    #[test]
    fn splits_piece_data_from_its_bencoded_header() {
        let msg = UtMetadataMessage {
            msg_type: MSG_TYPE_DATA,
            piece: 0,
            total_size: Some(42),
        };
        let mut payload = serde_bencode::to_bytes(&msg).unwrap();
        let piece_bytes = b"hello metadata piece";
        payload.extend_from_slice(piece_bytes);

        let split = split_data_payload(&msg, &payload).unwrap();
        assert_eq!(split, piece_bytes);
    }
}
