//! The Device entity: a configured or discovered battery monitor.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::family::Family;
use crate::mac::MacAddress;
use crate::reading::Reading;

/// Default polling interval in seconds, used when Auto-configuration does
/// not choose a more specific value.
pub const DEFAULT_POLLING_INTERVAL_S: u32 = 3600;

/// Minimum allowed polling interval, in seconds.
pub const MIN_POLLING_INTERVAL_S: u32 = 60;

/// Maximum allowed polling interval, in seconds.
pub const MAX_POLLING_INTERVAL_S: u32 = 86_400;

/// Lifecycle status of a Device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Seen by Discovery but not yet configured.
    Discovered,
    /// Has a known family, friendly name, and polling interval.
    Configured,
    /// Polling is suspended pending operator intervention.
    Error,
}

/// Per-device retry/backoff parameters used by the connection pool when
/// this device's session is lost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub max_reconnection_attempts: u32,
    pub base_reconnect_delay_secs: f64,
    pub max_reconnect_delay_secs: f64,
    pub connection_timeout_secs: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnection_attempts: 5,
            base_reconnect_delay_secs: 1.0,
            max_reconnect_delay_secs: 60.0,
            connection_timeout_secs: 30.0,
        }
    }
}

/// A battery monitor, unique by MAC address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub mac: MacAddress,
    pub family: Family,
    pub friendly_name: Option<String>,
    pub vehicle_id: Option<String>,
    pub status: DeviceStatus,
    pub polling_interval_s: u32,
    pub connection_config: ConnectionConfig,
    #[serde(with = "time::serde::rfc3339")]
    pub discovered_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub configured_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub latest_reading: Option<Reading>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_reading_time: Option<OffsetDateTime>,
    #[serde(default)]
    pub device_status: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_status_update: Option<OffsetDateTime>,
}

impl Device {
    /// A freshly discovered, unconfigured device record.
    pub fn discovered(mac: MacAddress, discovered_at: OffsetDateTime) -> Self {
        Self {
            mac,
            family: Family::Unknown,
            friendly_name: None,
            vehicle_id: None,
            status: DeviceStatus::Discovered,
            polling_interval_s: DEFAULT_POLLING_INTERVAL_S,
            connection_config: ConnectionConfig::default(),
            discovered_at,
            configured_at: None,
            latest_reading: None,
            last_reading_time: None,
            device_status: None,
            last_status_update: None,
        }
    }

    /// Whether `polling_interval_s` falls within the allowed range
    /// (`[60, 86400]`).
    pub fn has_valid_polling_interval(&self) -> bool {
        (MIN_POLLING_INTERVAL_S..=MAX_POLLING_INTERVAL_S).contains(&self.polling_interval_s)
    }

    /// Invariant: a configured device must have a known family and a
    /// polling interval within range.
    pub fn upholds_configured_invariant(&self) -> bool {
        if self.status != DeviceStatus::Configured {
            return true;
        }
        self.family.is_known() && self.has_valid_polling_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    #[test]
    fn discovered_device_defaults() {
        let device = Device::discovered(mac(), OffsetDateTime::now_utc());
        assert_eq!(device.status, DeviceStatus::Discovered);
        assert_eq!(device.family, Family::Unknown);
        assert_eq!(device.polling_interval_s, DEFAULT_POLLING_INTERVAL_S);
    }

    #[test]
    fn polling_interval_boundaries() {
        let mut device = Device::discovered(mac(), OffsetDateTime::now_utc());
        device.polling_interval_s = 59;
        assert!(!device.has_valid_polling_interval());
        device.polling_interval_s = 60;
        assert!(device.has_valid_polling_interval());
        device.polling_interval_s = 86_400;
        assert!(device.has_valid_polling_interval());
        device.polling_interval_s = 86_401;
        assert!(!device.has_valid_polling_interval());
    }

    #[test]
    fn configured_invariant_requires_known_family() {
        let mut device = Device::discovered(mac(), OffsetDateTime::now_utc());
        device.status = DeviceStatus::Configured;
        assert!(!device.upholds_configured_invariant());
        device.family = Family::Bm6;
        assert!(device.upholds_configured_invariant());
    }

    #[test]
    fn configured_invariant_requires_valid_interval() {
        let mut device = Device::discovered(mac(), OffsetDateTime::now_utc());
        device.status = DeviceStatus::Configured;
        device.family = Family::Bm2;
        device.polling_interval_s = 30;
        assert!(!device.upholds_configured_invariant());
    }

    #[test]
    fn discovered_devices_have_no_invariant_obligation() {
        let mut device = Device::discovered(mac(), OffsetDateTime::now_utc());
        device.polling_interval_s = 1;
        assert!(device.upholds_configured_invariant());
    }

    #[test]
    fn json_roundtrip() {
        let device = Device::discovered(mac(), OffsetDateTime::now_utc());
        let json = serde_json::to_string(&device).unwrap();
        let back: Device = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mac, device.mac);
        assert_eq!(back.status, device.status);
    }
}
