use std::path::PathBuf;

use thiserror::Error;

/// Failures the sync engine distinguishes between.
///
/// Every variant is scoped: a listing error only costs one subtree, an I/O
/// error on a pointer file only costs that file. Nothing here is fatal to the
/// process.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network failure or timeout talking to the remote API.
    #[error("transport error listing {path}: {message}")]
    Transport { path: String, message: String },

    /// The remote answered, but not with a usable listing.
    #[error("protocol error listing {path}: {message}")]
    Protocol {
        path: String,
        message: String,
        retryable: bool,
    },

    /// Local filesystem failure.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed mount line or schedule expression.
    #[error("config error: {0}")]
    Config(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn protocol(path: &str, message: impl Into<String>) -> Self {
        Self::Protocol {
            path: path.to_string(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether repeating the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Protocol { retryable, .. } => *retryable,
            Self::Io { .. } | Self::Config(_) => false,
        }
    }
}
