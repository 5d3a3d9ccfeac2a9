use failure::{Context, Fail};
use std::fmt;
use std::net::SocketAddr;

/// Everything that can go wrong fetching one torrent's metadata from one
/// peer. Every variant is non-fatal to the crawler: a [`crate::session::DisposablePeer`]
/// that fails simply yields no result, per spec.
#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "timed out connecting to {}", addr)]
    ConnectTimeout { addr: SocketAddr },

    #[fail(display = "failed to connect to {}", addr)]
    ConnectFailed { addr: SocketAddr },

    #[fail(display = "timed out waiting for data from {}", addr)]
    IoTimeout { addr: SocketAddr },

    #[fail(display = "I/O error talking to {}", addr)]
    Io { addr: SocketAddr },

    #[fail(display = "peer sent a malformed BitTorrent handshake")]
    InvalidHandshake,

    #[fail(display = "peer's info-hash does not match the one we asked for")]
    InfoHashMismatch,

    #[fail(display = "peer does not advertise the BEP-10 extension protocol")]
    ExtensionProtocolUnsupported,

    #[fail(display = "peer's extended handshake did not advertise ut_metadata")]
    UtMetadataUnsupported,

    #[fail(display = "peer did not report a usable metadata_size")]
    MetadataSizeUnknown,

    #[fail(display = "peer's metadata_size {} exceeds the configured maximum {}", got, max)]
    MetadataSizeTooLarge { got: i64, max: usize },

    #[fail(display = "received a ut_metadata piece for out-of-range index {}", index)]
    PieceIndexOutOfRange { index: i64 },

    #[fail(display = "received a duplicate ut_metadata piece for index {}", index)]
    DuplicatePiece { index: i64 },

    #[fail(display = "ut_metadata piece {} has an unexpected length", index)]
    PieceLengthMismatch { index: i64 },

    #[fail(display = "peer rejected our ut_metadata request for piece {}", index)]
    PieceRejected { index: i64 },

    #[fail(display = "assembled metadata is {} bytes, expected {}", got, expected)]
    AssembledLengthMismatch { got: usize, expected: usize },

    #[fail(display = "assembled metadata's SHA-1 does not match the requested info-hash")]
    HashMismatch,

    #[fail(display = "peer sent a malformed extended message")]
    MalformedExtendedMessage,
}

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&failure::Backtrace> {
        self.inner.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
