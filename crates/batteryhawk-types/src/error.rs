//! Error taxonomy shared by the battery-hawk crates.
//!
//! Every kind carries an optional `device_address`, a structured `context`
//! map, and a stable numeric `error_code` so callers (HTTP handlers, log
//! aggregation) can act on the kind without matching on display text.

use std::collections::HashMap;

/// Result type used throughout `batteryhawk-types`.
pub type Result<T> = std::result::Result<T, Error>;

/// A structured error kind plus the context it occurred in.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// BLE session could not be established or has dropped.
    #[error("connection error: {message}")]
    Connection {
        message: String,
        device_address: Option<String>,
        context: HashMap<String, String>,
    },

    /// Unexpected frame length, bad structure, or decrypt failure.
    #[error("data parsing error: {message}")]
    DataParsing {
        message: String,
        device_address: Option<String>,
        context: HashMap<String, String>,
    },

    /// Protocol command rejected or unsupported.
    #[error("command error: {message}")]
    Command {
        message: String,
        device_address: Option<String>,
        context: HashMap<String, String>,
    },

    /// Operation exceeded its deadline.
    #[error("timeout error: {message}")]
    Timeout {
        message: String,
        device_address: Option<String>,
        context: HashMap<String, String>,
    },

    /// Contract violation: unexpected opcode, version mismatch.
    #[error("protocol error: {message}")]
    Protocol {
        message: String,
        device_address: Option<String>,
        context: HashMap<String, String>,
    },

    /// Subscription delivered malformed or unexpected data.
    #[error("notification error: {message}")]
    Notification {
        message: String,
        device_address: Option<String>,
        context: HashMap<String, String>,
    },

    /// Frame integrity check failed.
    #[error("checksum error: {message}")]
    Checksum {
        message: String,
        device_address: Option<String>,
        context: HashMap<String, String>,
    },

    /// Operation disallowed in the device's current state.
    #[error("state error: {message}")]
    State {
        message: String,
        device_address: Option<String>,
        context: HashMap<String, String>,
    },

    /// Input failed validation before any I/O was attempted.
    #[error("validation error: {message}")]
    Validation {
        message: String,
        context: HashMap<String, String>,
    },
}

macro_rules! ctor {
    ($name:ident, $variant:ident) => {
        #[doc = concat!("Build an [`Error::", stringify!($variant), "`] with empty context.")]
        pub fn $name(message: impl Into<String>) -> Self {
            Error::$variant {
                message: message.into(),
                device_address: None,
                context: HashMap::new(),
            }
        }
    };
}

impl Error {
    ctor!(connection, Connection);
    ctor!(data_parsing, DataParsing);
    ctor!(command, Command);
    ctor!(timeout, Timeout);
    ctor!(protocol, Protocol);
    ctor!(notification, Notification);
    ctor!(checksum, Checksum);
    ctor!(state, State);

    /// Build an [`Error::Validation`] with empty context.
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    /// Attach (or overwrite) the device address this error occurred on.
    /// No-op for [`Error::Validation`], which has no device association.
    #[must_use]
    pub fn with_device_address(mut self, address: impl Into<String>) -> Self {
        let address = address.into();
        match &mut self {
            Error::Connection { device_address, .. }
            | Error::DataParsing { device_address, .. }
            | Error::Command { device_address, .. }
            | Error::Timeout { device_address, .. }
            | Error::Protocol { device_address, .. }
            | Error::Notification { device_address, .. }
            | Error::Checksum { device_address, .. }
            | Error::State { device_address, .. } => *device_address = Some(address),
            Error::Validation { .. } => {}
        }
        self
    }

    /// Insert a key/value pair into this error's context map.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().insert(key.into(), value.into());
        self
    }

    /// The device address this error is associated with, if any.
    pub fn device_address(&self) -> Option<&str> {
        match self {
            Error::Connection { device_address, .. }
            | Error::DataParsing { device_address, .. }
            | Error::Command { device_address, .. }
            | Error::Timeout { device_address, .. }
            | Error::Protocol { device_address, .. }
            | Error::Notification { device_address, .. }
            | Error::Checksum { device_address, .. }
            | Error::State { device_address, .. } => device_address.as_deref(),
            Error::Validation { .. } => None,
        }
    }

    /// Structured context accumulated on this error.
    pub fn context(&self) -> &HashMap<String, String> {
        match self {
            Error::Connection { context, .. }
            | Error::DataParsing { context, .. }
            | Error::Command { context, .. }
            | Error::Timeout { context, .. }
            | Error::Protocol { context, .. }
            | Error::Notification { context, .. }
            | Error::Checksum { context, .. }
            | Error::State { context, .. }
            | Error::Validation { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut HashMap<String, String> {
        match self {
            Error::Connection { context, .. }
            | Error::DataParsing { context, .. }
            | Error::Command { context, .. }
            | Error::Timeout { context, .. }
            | Error::Protocol { context, .. }
            | Error::Notification { context, .. }
            | Error::Checksum { context, .. }
            | Error::State { context, .. }
            | Error::Validation { context, .. } => context,
        }
    }

    /// Stable numeric code for this error kind (1001-1008; validation is 1009).
    pub fn error_code(&self) -> u32 {
        match self {
            Error::Connection { .. } => 1001,
            Error::DataParsing { .. } => 1002,
            Error::Command { .. } => 1003,
            Error::Timeout { .. } => 1004,
            Error::Protocol { .. } => 1005,
            Error::Notification { .. } => 1006,
            Error::Checksum { .. } => 1007,
            Error::State { .. } => 1008,
            Error::Validation { .. } => 1009,
        }
    }

    /// Short machine-readable name for the kind, used in rate-limiting keys
    /// and log fields.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Connection { .. } => "connection",
            Error::DataParsing { .. } => "data_parsing",
            Error::Command { .. } => "command",
            Error::Timeout { .. } => "timeout",
            Error::Protocol { .. } => "protocol",
            Error::Notification { .. } => "notification",
            Error::Checksum { .. } => "checksum",
            Error::State { .. } => "state",
            Error::Validation { .. } => "validation",
        }
    }

    /// Transient errors are worth retrying without operator intervention;
    /// permanent errors should suspend polling until reconfigured.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::Timeout { .. } | Error::Notification { .. }
        )
    }
}
