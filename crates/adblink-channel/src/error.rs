/// Errors that can occur in channel transport operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the transport.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport was closed before the operation completed.
    #[error("channel closed")]
    Closed,

    /// A USB transfer kept completing spuriously or empty until the retry
    /// bound was exhausted.
    #[error("usb transfer glitch persisted after {attempts} attempts")]
    Glitch { attempts: u32 },

    /// A USB transfer reported a hard failure.
    #[error("usb transfer failed: {0}")]
    Transfer(String),

    /// The device interface does not expose the expected bulk endpoints.
    #[error("no bulk in/out endpoint pair on the adb interface")]
    MissingEndpoints,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
