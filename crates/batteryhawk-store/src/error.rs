//! Error types for storage backends.

pub use batteryhawk_types::Error as Kind;

/// Errors produced by a [`crate::StorageBackend`] or [`crate::ResilientStore`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Kind(#[from] Kind),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "influxdb")]
    #[error("InfluxDB request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),

    #[error("storage backend is not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a retry (or outage-buffering) might succeed later.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kind(k) => k.is_transient(),
            Error::Io(_) | Error::NotConnected => true,
            #[cfg(feature = "influxdb")]
            Error::Http(_) => true,
            Error::Serialization(_) | Error::InvalidConfig(_) | Error::UnknownBackend(_) => false,
        }
    }
}
