pub mod errors;
pub mod extension;
pub mod handshake;
pub mod session;

pub use errors::{Error, ErrorKind, Result};
pub use session::DisposablePeer;
