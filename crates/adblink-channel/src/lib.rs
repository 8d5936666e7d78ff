//! Transport channels for the ADB wire protocol.
//!
//! Provides a unified blocking interface over different physical transports:
//! - TCP sockets (network ADB)
//! - USB bulk endpoints (cabled ADB, behind the `usb` feature)
//!
//! This is the lowest layer of adblink. Everything else builds on top of the
//! [`Channel`] trait provided here: exact-length reads and all-or-nothing
//! writes over an unreliable, chunked medium.

pub mod error;
pub mod pool;
pub mod tcp;
pub mod traits;
pub mod usb;

#[cfg(feature = "usb")]
pub mod rusb_backend;

pub use error::{ChannelError, Result};
pub use tcp::TcpChannel;
pub use traits::{Channel, Direction};
pub use usb::{BackoffPolicy, BulkIn, UsbBackend, UsbChannel};

#[cfg(feature = "usb")]
pub use rusb_backend::RusbBackend;
