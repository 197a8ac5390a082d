//! Error types for `batteryhawk-core`.
//!
//! Wraps the shared [`batteryhawk_types::Error`] taxonomy with the
//! BLE-transport-specific failure modes (`btleplug`, cancellation,
//! configuration) that only this crate produces.

use thiserror::Error;

pub use batteryhawk_types::Error as Kind;

/// Result type for `batteryhawk-core` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while operating the BLE transport, connection
/// pool, and protocol adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// One of the structured kinds from the shared taxonomy (§7).
    #[error(transparent)]
    Kind(#[from] Kind),

    /// Bluetooth Low Energy error from the underlying stack.
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Operation was cancelled (shutdown in progress).
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration supplied to the pool or an adapter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Transient errors are worth retrying without operator intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kind(kind) => kind.is_transient(),
            Error::Bluetooth(_) => true,
            Error::Cancelled | Error::InvalidConfig(_) => false,
        }
    }

    /// The device address this error is associated with, if known.
    pub fn device_address(&self) -> Option<&str> {
        match self {
            Error::Kind(kind) => kind.device_address(),
            _ => None,
        }
    }
}
