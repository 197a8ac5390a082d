//! The [`Device`] trait: per-family protocol adapter contract.
//!
//! Implement this trait for any type that speaks a battery monitor's wire
//! protocol over a pooled BLE session. The polling task in
//! `batteryhawk-service` is generic over `D: Device`, so BM2/BM6 adapters
//! and the in-memory mock used in tests are interchangeable.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use batteryhawk_types::{Family, Reading};

use crate::error::Result;

/// A snapshot of device-reported status beyond the telemetry in
/// [`Reading`] (e.g. charging state, fault flags). Protocol-specific;
/// adapters populate whatever fields their command response carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStatus {
    pub fields: HashMap<String, String>,
}

impl DeviceStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.fields.iter().collect();
        entries.sort_by_key(|(k, _)| k.as_str());
        let body = entries
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{body}")
    }
}

/// Parameters passed to [`Device::send_command`].
pub type CommandParams = HashMap<String, String>;

/// Per-family protocol adapter. Constructed with `(mac, pool)` by the
/// protocol factory (see `batteryhawk-service::engine` — not re-exported
/// here since the pool type lives in `batteryhawk-core::pool` and
/// adapters borrow it, not own it).
#[async_trait]
pub trait Device: Send + Sync {
    /// Acquire a pooled session and perform any subscribe/handshake steps
    /// the family requires.
    async fn connect(&self) -> Result<()>;

    /// Release the pooled session.
    async fn disconnect(&self) -> Result<()>;

    /// Produce a fresh [`Reading`]. Implementations should return the
    /// best-effort latest snapshot if the data-received latch does not
    /// fire within the family's wait timeout, per spec.md §4.2.
    async fn read_data(&self) -> Result<Reading>;

    /// Issue a named command (e.g. `"status"`) and return the resulting
    /// status snapshot.
    async fn send_command(&self, name: &str, params: Option<CommandParams>) -> Result<DeviceStatus>;

    /// Protocol version string reported by the device, if known.
    fn protocol_version(&self) -> Option<&str>;

    /// Set of capability names this adapter supports (e.g.
    /// `{"voltage", "current", "temperature", "state_of_charge"}`).
    fn capabilities(&self) -> &[&'static str];

    /// The family this adapter implements.
    fn device_type(&self) -> Family;

    /// The MAC address this adapter is bound to.
    fn address(&self) -> &str;
}
