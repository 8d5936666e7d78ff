//! ADB wire-protocol messages.
//!
//! Every unit on the wire is a fixed 24-byte little-endian header followed by
//! an optional payload. The header carries the command word, two arguments,
//! the payload length, the payload checksum, and the command's complement as
//! a magic value. Encoding and decoding are pure; [`MessageReader`] and
//! [`MessageWriter`] pump complete messages over a [`adblink_channel::Channel`].

pub mod codec;
pub mod command;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    checksum, decode_header, Header, Message, ADB_VERSION, CONNECT_MAX_PAYLOAD, HEADER_SIZE,
    MAX_PAYLOAD,
};
pub use command::{Command, AUTH_RSAPUBLICKEY, AUTH_SIGNATURE, AUTH_TOKEN};
pub use error::{Result, WireError};
pub use reader::MessageReader;
pub use writer::MessageWriter;
