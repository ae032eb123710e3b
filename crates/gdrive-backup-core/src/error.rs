use std::path::PathBuf;

/// Errors raised by a `RemoteStore` implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("remote API returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authorization error: {0}")]
    Auth(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Session-level errors. Every variant aborts the backup run.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("no source was provided")]
    InvalidSource,

    #[error("failed to query {context}: {source}")]
    RemoteQuery {
        context: String,
        #[source]
        source: RemoteError,
    },

    #[error("destination {}: {reason}", path.display())]
    DestinationConflict { path: PathBuf, reason: String },

    #[error("credentials unavailable: {0}")]
    Credential(String),

    #[error("transfer of {} failed ({outcome})", path.display())]
    TransferFailed { path: PathBuf, outcome: &'static str },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("backup cancelled")]
    Cancelled,
}

impl BackupError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
