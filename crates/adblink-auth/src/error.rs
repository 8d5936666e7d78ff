use std::path::PathBuf;

/// Errors that can occur managing or using authentication keys.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A persisted key could not be parsed.
    #[error("failed to load key pair: {0}")]
    KeyLoad(String),

    /// Key generation failed (entropy or parameter failure).
    #[error("failed to generate key pair: {0}")]
    KeyGenerate(String),

    /// A key file could not be written or removed.
    #[error("failed to persist key material at {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Signing the device's challenge failed.
    #[error("failed to sign auth token: {0}")]
    Sign(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
