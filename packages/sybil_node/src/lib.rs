pub mod config;
pub mod constants;
pub mod errors;
pub mod node;
pub mod routing;
pub mod transport;

pub use config::SybilConfig;
pub use errors::{Error, ErrorKind, Result};
pub use node::{SybilNode, SybilNodeHandle};
