use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use failure::ResultExt;
use tokio::net::UdpSocket;

use crate::errors::{ErrorKind, Result};

/// Classification of an outbound send, per spec's error table: congestion
/// shrinks the neighbour cap, anything else is merely logged by the
/// caller.
pub enum SendOutcome {
    Sent,
    Congested,
    Failed,
}

/// Thin wrapper around the node's single UDP socket. The socket sits
/// behind a `Mutex<Option<_>>`, not a bare `Arc`, so [`Transport::close`]
/// can drop it on demand instead of waiting on every outstanding clone to
/// go away on its own.
pub struct Transport {
    socket: Mutex<Option<Arc<UdpSocket>>>,
}

impl Transport {
    pub async fn bind(addr: SocketAddr) -> Result<Transport> {
        let socket = UdpSocket::bind(addr).await.with_context(|_| ErrorKind::BindFailed { addr })?;
        Ok(Transport { socket: Mutex::new(Some(Arc::new(socket))) })
    }

    /// A handle to the live socket, or `None` once [`Transport::close`]
    /// has been called.
    pub fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket.lock().unwrap().clone()
    }

    /// Sends `bytes` to `addr`. A `PermissionDenied` error is `tokio`'s
    /// surfacing of the OS-level "socket buffer full / rate limited"
    /// signal the original implementation catches as `PermissionError`;
    /// everything else is logged and otherwise ignored.
    pub async fn send(&self, addr: SocketAddr, bytes: &[u8]) -> SendOutcome {
        let socket = match self.socket() {
            Some(socket) => socket,
            None => {
                log::debug!("dropped send to {}, transport is closed", addr);
                return SendOutcome::Failed;
            }
        };

        match socket.send_to(bytes, addr).await {
            Ok(_) => SendOutcome::Sent,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                log::debug!("send to {} congested: {}", addr, err);
                SendOutcome::Congested
            }
            Err(err) => {
                log::debug!("send to {} failed: {}", addr, err);
                SendOutcome::Failed
            }
        }
    }

    /// Drops this transport's handle to the socket, closing its file
    /// descriptor once every clone handed out via [`Transport::socket`]
    /// (e.g. the datagram loop's in-flight `recv_from`) has also gone
    /// away.
    pub fn close(&self) {
        self.socket.lock().unwrap().take();
    }
}
