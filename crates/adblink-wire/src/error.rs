/// Errors that can occur while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The header is malformed: short, unknown command, or bad magic.
    #[error("corrupt message header")]
    CorruptHeader,

    /// The payload does not match the checksum or length the header carries.
    #[error("payload checksum mismatch")]
    ChecksumMismatch,

    /// The payload exceeds the protocol's maximum data size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The underlying channel failed.
    #[error("channel error: {0}")]
    Channel(#[from] adblink_channel::ChannelError),
}

pub type Result<T> = std::result::Result<T, WireError>;
