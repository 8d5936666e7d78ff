//! Authenticated, multiplexed command streams to Android devices.
//!
//! adblink implements the host-facing half of the ADB wire protocol: exact-
//! length transport channels, the 24-byte message codec, RSA public-key
//! authentication, and a connection that multiplexes shell/exec streams with
//! one-outstanding-write flow control.
//!
//! # Crate Structure
//!
//! - [`channel`] — Blocking exact-length transports (TCP, USB behind the
//!   `usb` feature)
//! - [`wire`] — Message codec and channel-level reader/writer
//! - [`auth`] — RSA key-pair lifecycle and challenge signing
//! - [`conn`] — Connection state machine, receive loop, and streams

/// Re-export channel types.
pub mod channel {
    pub use adblink_channel::*;
}

/// Re-export wire codec types.
pub mod wire {
    pub use adblink_wire::*;
}

/// Re-export auth types.
pub mod auth {
    pub use adblink_auth::*;
}

/// Re-export connection types.
pub mod conn {
    pub use adblink_conn::*;
}
