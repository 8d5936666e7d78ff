use std::time::Duration;

/// Errors that can occur on a connection or its streams.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// Channel-level transport failure.
    #[error("channel error: {0}")]
    Channel(#[from] adblink_channel::ChannelError),

    /// Wire-level protocol failure; the connection must be torn down.
    #[error("wire error: {0}")]
    Wire(#[from] adblink_wire::WireError),

    /// Credential management failure.
    #[error("auth error: {0}")]
    Auth(#[from] adblink_auth::AuthError),

    /// The peer sent something the handshake state machine cannot accept.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// `connect` has not completed on this connection.
    #[error("not connected")]
    NotConnected,

    /// `connect` was already called on this connection.
    #[error("already connected")]
    AlreadyConnected,

    /// The connection is closed or failed underneath the caller.
    #[error("connection closed")]
    ConnectionClosed,

    /// The stream is closed.
    #[error("stream closed")]
    StreamClosed,

    /// The peer refused to open the requested service.
    #[error("service '{service}' rejected by device")]
    OpenRejected { service: String },

    /// A blocking wait exceeded its configured bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, ConnError>;
