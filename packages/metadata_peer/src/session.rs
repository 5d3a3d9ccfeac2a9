use sha1::{Digest, Sha1};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use krpc_encoding::InfoHash;

use crate::errors::{Error, ErrorKind, Result};
use crate::extension::{
    self, ExtendedHandshake, ExtendedMessage, UtMetadataMessage, HANDSHAKE_EXTENDED_ID,
    MSG_TYPE_DATA, MSG_TYPE_REJECT, PIECE_LENGTH,
};
use crate::handshake::Handshake;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IO_TIMEOUT: Duration = Duration::from_secs(15);

/// A one-shot fetch of a single torrent's metadata from a single peer,
/// per BEP-9/BEP-10. Created fresh for each `(info_hash, peer)` attempt;
/// every protocol violation or size overflow aborts the session and
/// yields no result rather than propagating an error to the crawler.
pub struct DisposablePeer {
    addr: SocketAddr,
    info_hash: InfoHash,
    max_metadata_size: usize,
    local_peer_id: [u8; 20],
}

impl DisposablePeer {
    pub fn new(addr: SocketAddr, info_hash: InfoHash, max_metadata_size: usize) -> DisposablePeer {
        DisposablePeer {
            addr,
            info_hash,
            max_metadata_size,
            local_peer_id: krpc_encoding::ids::random_bytes(),
        }
    }

    /// Runs the handshake/negotiate/download/verify sequence to
    /// completion, returning the torrent's raw info dictionary on
    /// success and logging (never propagating) anything that goes
    /// wrong.
    pub async fn fetch(self) -> Option<(InfoHash, Vec<u8>)> {
        let info_hash = self.info_hash;
        let addr = self.addr;
        match self.try_fetch().await {
            Ok(metadata) => Some((info_hash, metadata)),
            Err(err) => {
                log::debug!("metadata session with {} for {:02x?} aborted: {}", addr, &info_hash[..4], err);
                None
            }
        }
    }

    async fn try_fetch(&self) -> Result<Vec<u8>> {
        let mut stream = self.connect().await?;
        self.handshake(&mut stream).await?;
        let (peer_ut_metadata_id, metadata_size) = self.extended_handshake(&mut stream).await?;
        self.download(&mut stream, peer_ut_metadata_id, metadata_size).await
    }

    async fn connect(&self) -> Result<TcpStream> {
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(self.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(_)) => Err(ErrorKind::ConnectFailed { addr: self.addr }.into()),
            Err(_) => Err(ErrorKind::ConnectTimeout { addr: self.addr }.into()),
        }
    }

    async fn handshake(&self, stream: &mut TcpStream) -> Result<()> {
        let ours = Handshake::new(self.info_hash, self.local_peer_id);
        self.with_io_timeout(ours.write(stream)).await?;

        let theirs = self
            .with_io_timeout(Handshake::read(stream))
            .await?
            .ok_or(ErrorKind::InvalidHandshake)?;

        if !theirs.supports_extension_protocol() {
            return Err(ErrorKind::ExtensionProtocolUnsupported.into());
        }
        if theirs.info_hash != self.info_hash {
            return Err(ErrorKind::InfoHashMismatch.into());
        }
        Ok(())
    }

    async fn extended_handshake(&self, stream: &mut TcpStream) -> Result<(u8, usize)> {
        let ours = ExtendedHandshake::advertising_ut_metadata();
        let encoded = serde_bencode::to_bytes(&ours).map_err(|_| ErrorKind::MalformedExtendedMessage)?;
        self.send(stream, HANDSHAKE_EXTENDED_ID, &encoded).await?;

        let message = self.recv(stream).await?;
        if message.extended_id != HANDSHAKE_EXTENDED_ID {
            return Err(ErrorKind::UtMetadataUnsupported.into());
        }
        let theirs: ExtendedHandshake =
            serde_bencode::de::from_bytes(&message.payload).map_err(|_| ErrorKind::MalformedExtendedMessage)?;

        let peer_ut_metadata_id = theirs.peer_ut_metadata_id().ok_or(ErrorKind::UtMetadataUnsupported)?;
        let metadata_size = theirs.metadata_size.ok_or(ErrorKind::MetadataSizeUnknown)?;
        if metadata_size <= 0 {
            return Err(ErrorKind::MetadataSizeUnknown.into());
        }
        if metadata_size as usize > self.max_metadata_size {
            return Err(ErrorKind::MetadataSizeTooLarge {
                got: metadata_size,
                max: self.max_metadata_size,
            }
            .into());
        }

        Ok((peer_ut_metadata_id, metadata_size as usize))
    }

    async fn download(&self, stream: &mut TcpStream, peer_ut_metadata_id: u8, metadata_size: usize) -> Result<Vec<u8>> {
        let piece_count = (metadata_size + PIECE_LENGTH - 1) / PIECE_LENGTH;
        let mut pieces: Vec<Option<Vec<u8>>> = vec![None; piece_count];
        let mut remaining = piece_count;

        for index in 0..piece_count {
            let request = UtMetadataMessage::request(index as i64);
            let encoded = serde_bencode::to_bytes(&request).map_err(|_| ErrorKind::MalformedExtendedMessage)?;
            self.send(stream, peer_ut_metadata_id, &encoded).await?;
        }

        while remaining > 0 {
            let message = self.recv(stream).await?;
            if message.extended_id != peer_ut_metadata_id {
                continue;
            }

            let header: UtMetadataMessage =
                serde_bencode::de::from_bytes(&message.payload).map_err(|_| ErrorKind::MalformedExtendedMessage)?;

            match header.msg_type {
                MSG_TYPE_DATA => {
                    let index = header.piece;
                    if index < 0 || index as usize >= piece_count {
                        return Err(ErrorKind::PieceIndexOutOfRange { index }.into());
                    }
                    if pieces[index as usize].is_some() {
                        return Err(ErrorKind::DuplicatePiece { index }.into());
                    }

                    let expected_len = if index as usize == piece_count - 1 {
                        metadata_size - index as usize * PIECE_LENGTH
                    } else {
                        PIECE_LENGTH
                    };
                    let data = extension::split_data_payload(&header, &message.payload)?;
                    if data.len() != expected_len {
                        return Err(ErrorKind::PieceLengthMismatch { index }.into());
                    }

                    pieces[index as usize] = Some(data.to_vec());
                    remaining -= 1;
                }
                MSG_TYPE_REJECT => return Err(ErrorKind::PieceRejected { index: header.piece }.into()),
                _ => {} // a request from the peer; this session never serves metadata back
            }
        }

        let assembled: Vec<u8> = pieces.into_iter().flatten().flatten().collect();
        if assembled.len() != metadata_size {
            return Err(ErrorKind::AssembledLengthMismatch {
                got: assembled.len(),
                expected: metadata_size,
            }
            .into());
        }

        if Sha1::digest(&assembled).as_slice() != &self.info_hash[..] {
            return Err(ErrorKind::HashMismatch.into());
        }

        Ok(assembled)
    }

    async fn send(&self, stream: &mut TcpStream, extended_id: u8, payload: &[u8]) -> Result<()> {
        self.with_io_timeout(extension::send_extended(stream, extended_id, payload)).await
    }

    async fn recv(&self, stream: &mut TcpStream) -> Result<ExtendedMessage> {
        match timeout(IO_TIMEOUT, extension::recv_extended(stream)).await {
            Ok(result) => result,
            Err(_) => Err(ErrorKind::IoTimeout { addr: self.addr }.into()),
        }
    }

    async fn with_io_timeout<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        match timeout(IO_TIMEOUT, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::from(ErrorKind::Io { addr: self.addr })),
            Err(_) => Err(Error::from(ErrorKind::IoTimeout { addr: self.addr })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{send_extended, HANDSHAKE_EXTENDED_ID};
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, (server, _)) = tokio::join!(connect, accept);
        (client.unwrap(), server)
    }

    #[tokio::test]
    async fn handshake_round_trips_over_loopback() {
        let (mut client, mut server) = loopback_pair().await;
        let info_hash = [0x42u8; 20];

        let send = async {
            let handshake = Handshake::new(info_hash, [1u8; 20]);
            handshake.write(&mut client).await.unwrap();
        };
        let recv = async {
            let mut buf = [0u8; crate::handshake::HANDSHAKE_LEN];
            server.read_exact(&mut buf).await.unwrap();
            Handshake::parse(&buf).unwrap()
        };

        let (_, received) = tokio::join!(send, recv);
        assert_eq!(received.info_hash, info_hash);
        assert!(received.supports_extension_protocol());
    }

    #[tokio::test]
    async fn metadata_size_too_large_aborts_without_panicking() {
        let (mut client, mut server) = loopback_pair().await;
        let addr = client.peer_addr().unwrap();
        let info_hash = [0x11u8; 20];

        let peer = DisposablePeer::new(addr, info_hash, 1024);

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; crate::handshake::HANDSHAKE_LEN];
            tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
            let theirs = Handshake::parse(&buf).unwrap();
            let ours = Handshake::new(theirs.info_hash, [9u8; 20]);
            ours.write(&mut server).await.unwrap();

            // consume client's extended handshake, then answer with an
            // oversized metadata_size.
            let _ = extension::recv_extended(&mut server).await.unwrap();
            let mut handshake = ExtendedHandshake::advertising_ut_metadata();
            handshake.metadata_size = Some(10_000_000);
            let encoded = serde_bencode::to_bytes(&handshake).unwrap();
            send_extended(&mut server, HANDSHAKE_EXTENDED_ID, &encoded).await.unwrap();
        });

        let result = peer.try_fetch().await;
        server_task.await.unwrap();
        assert!(matches!(result, Err(_)));
    }
}
