//! Multiplexed ADB connections.
//!
//! This is the engine's top layer. A [`Connection`] owns one channel and one
//! key pair, runs the CNXN/AUTH handshake, and demultiplexes incoming
//! messages to [`Stream`]s on a dedicated receive-loop thread. Callers block
//! on condition variables until the loop satisfies them; a stream may have at
//! most one WRTE in flight awaiting its OKAY.

pub mod config;
pub mod connection;
pub mod error;
pub mod stream;

pub use config::ConnectConfig;
pub use connection::{Connection, ConnectionState};
pub use error::{ConnError, Result};
pub use stream::Stream;
