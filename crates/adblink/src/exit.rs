use std::fmt;
use std::io;

use adblink_auth::AuthError;
use adblink_channel::ChannelError;
use adblink_conn::ConnError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const AUTH_FAILED: i32 = 40;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Connect { source, .. } | ChannelError::Io(source) => {
            io_error(context, source)
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn auth_error(context: &str, err: AuthError) -> CliError {
    CliError::new(AUTH_FAILED, format!("{context}: {err}"))
}

pub fn conn_error(context: &str, err: ConnError) -> CliError {
    match err {
        ConnError::Channel(err) => channel_error(context, err),
        ConnError::Wire(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        ConnError::Auth(err) => auth_error(context, err),
        ConnError::HandshakeFailed(_) => CliError::new(AUTH_FAILED, format!("{context}: {err}")),
        ConnError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ConnError::OpenRejected { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        ConnError::ConnectionClosed | ConnError::StreamClosed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
