//! Device registry: in-memory map of mac → Device record (spec.md §4.3).
//!
//! Persistence is delegated to an external collaborator (the
//! `batteryhawk-service` config provider), not owned here — the registry
//! calls [`SectionPersistence::persist`] after every mutating operation
//! and otherwise behaves as a plain in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use batteryhawk_types::{ConnectionConfig, Device, Family, MacAddress, Reading};

use crate::discovery::Sighting;
use crate::error::{Error, Result};
use crate::traits::DeviceStatus;

/// Callback the registry uses to persist its section after a mutation.
/// Implemented by the config provider in `batteryhawk-service`, which
/// knows how to atomically write `devices.json`.
#[async_trait]
pub trait SectionPersistence: Send + Sync {
    async fn persist(&self, devices: &HashMap<String, Device>) -> Result<()>;
}

/// A [`SectionPersistence`] that does nothing; used in tests and as the
/// default when no config provider is wired up.
#[derive(Debug, Default)]
pub struct NullPersistence;

#[async_trait]
impl SectionPersistence for NullPersistence {
    async fn persist(&self, _devices: &HashMap<String, Device>) -> Result<()> {
        Ok(())
    }
}

/// In-memory map of mac → Device record.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Device>>,
    persistence: Arc<dyn SectionPersistence>,
}

impl DeviceRegistry {
    pub fn new(persistence: Arc<dyn SectionPersistence>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            persistence,
        }
    }

    /// Load an existing section (e.g. read from `devices.json` at
    /// startup) without triggering a persist.
    pub async fn load(&self, devices: HashMap<String, Device>) {
        *self.devices.write().await = devices;
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = self.devices.read().await.clone();
        self.persistence.persist(&snapshot).await
    }

    /// Idempotently register a batch of sightings: existing macs are left
    /// untouched, new ones are inserted with `status=discovered`.
    pub async fn register_discovered(&self, sightings: &[Sighting]) -> Result<()> {
        {
            let mut devices = self.devices.write().await;
            for sighting in sightings {
                devices
                    .entry(sighting.mac.as_str().to_string())
                    .or_insert_with(|| Device::discovered(sighting.mac.clone(), sighting.discovered_at));
            }
        }
        self.persist().await
    }

    /// Configure a device: sets family, friendly name, optional vehicle,
    /// polling interval, and transitions status to `configured`.
    pub async fn configure(
        &self,
        mac: &MacAddress,
        family: Family,
        friendly_name: String,
        vehicle_id: Option<String>,
        polling_interval_s: u32,
    ) -> Result<()> {
        if !(batteryhawk_types::device::MIN_POLLING_INTERVAL_S
            ..=batteryhawk_types::device::MAX_POLLING_INTERVAL_S)
            .contains(&polling_interval_s)
        {
            return Err(Error::Kind(batteryhawk_types::Error::validation(format!(
                "polling_interval {polling_interval_s} out of range"
            ))));
        }

        {
            let mut devices = self.devices.write().await;
            let entry = devices
                .entry(mac.as_str().to_string())
                .or_insert_with(|| Device::discovered(mac.clone(), OffsetDateTime::now_utc()));
            entry.family = family;
            entry.friendly_name = Some(friendly_name);
            entry.vehicle_id = vehicle_id;
            entry.polling_interval_s = polling_interval_s;
            entry.status = batteryhawk_types::DeviceStatus::Configured;
            entry.configured_at = Some(OffsetDateTime::now_utc());
        }
        self.persist().await
    }

    pub async fn update_latest_reading(&self, mac: &MacAddress, reading: Reading, at: OffsetDateTime) -> Result<()> {
        {
            let mut devices = self.devices.write().await;
            if let Some(device) = devices.get_mut(mac.as_str()) {
                device.latest_reading = Some(reading);
                device.last_reading_time = Some(at);
            } else {
                return Err(Error::Kind(
                    batteryhawk_types::Error::state("device not registered").with_device_address(mac.as_str()),
                ));
            }
        }
        self.persist().await
    }

    pub async fn update_device_status(&self, mac: &MacAddress, status: &DeviceStatus, at: OffsetDateTime) -> Result<()> {
        {
            let mut devices = self.devices.write().await;
            if let Some(device) = devices.get_mut(mac.as_str()) {
                device.device_status = Some(status.to_string());
                device.last_status_update = Some(at);
            } else {
                return Err(Error::Kind(
                    batteryhawk_types::Error::state("device not registered").with_device_address(mac.as_str()),
                ));
            }
        }
        self.persist().await
    }

    pub async fn get(&self, mac: &MacAddress) -> Option<Device> {
        self.devices.read().await.get(mac.as_str()).cloned()
    }

    pub async fn list_configured(&self) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.status == batteryhawk_types::DeviceStatus::Configured)
            .cloned()
            .collect()
    }

    /// All known devices, discovered or configured. Used by the `GET
    /// /api/devices` listing, which (unlike polling) has no reason to
    /// hide devices still awaiting configuration.
    pub async fn list_all(&self) -> Vec<Device> {
        self.devices.read().await.values().cloned().collect()
    }

    pub async fn list_by_vehicle(&self, vehicle_id: &str) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.vehicle_id.as_deref() == Some(vehicle_id))
            .cloned()
            .collect()
    }

    pub async fn remove(&self, mac: &MacAddress) -> Result<Option<Device>> {
        let removed = {
            let mut devices = self.devices.write().await;
            devices.remove(mac.as_str())
        };
        self.persist().await?;
        Ok(removed)
    }

    /// Also used by `ConnectionConfig` callers that need a device's
    /// per-mac retry parameters without holding the full record.
    pub async fn connection_config(&self, mac: &MacAddress) -> Option<ConnectionConfig> {
        self.devices
            .read()
            .await
            .get(mac.as_str())
            .map(|d| d.connection_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    fn sighting(mac: MacAddress) -> Sighting {
        Sighting {
            mac,
            name: Some("BM6_Test".into()),
            rssi: Some(-60),
            discovered_at: OffsetDateTime::now_utc(),
            advertisement: crate::discovery::Advertisement::default(),
        }
    }

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(NullPersistence))
    }

    #[tokio::test]
    async fn register_discovered_then_get() {
        let registry = registry();
        registry.register_discovered(&[sighting(mac())]).await.unwrap();
        let device = registry.get(&mac()).await.unwrap();
        assert_eq!(device.status, batteryhawk_types::DeviceStatus::Discovered);
    }

    #[tokio::test]
    async fn register_discovered_is_idempotent() {
        let registry = registry();
        registry.register_discovered(&[sighting(mac())]).await.unwrap();
        let first = registry.get(&mac()).await.unwrap().discovered_at;
        registry.register_discovered(&[sighting(mac())]).await.unwrap();
        let second = registry.get(&mac()).await.unwrap().discovered_at;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn configure_transitions_status() {
        let registry = registry();
        registry
            .configure(&mac(), Family::Bm6, "Van 1".into(), Some("vehicle_1".into()), 1800)
            .await
            .unwrap();
        let device = registry.get(&mac()).await.unwrap();
        assert_eq!(device.status, batteryhawk_types::DeviceStatus::Configured);
        assert_eq!(device.polling_interval_s, 1800);
        assert_eq!(device.vehicle_id.as_deref(), Some("vehicle_1"));
    }

    #[tokio::test]
    async fn configure_rejects_out_of_range_interval() {
        let registry = registry();
        let result = registry
            .configure(&mac(), Family::Bm6, "Van 1".into(), None, 59)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn register_then_remove_returns_to_prior_content() {
        let registry = registry();
        assert!(registry.get(&mac()).await.is_none());
        registry.register_discovered(&[sighting(mac())]).await.unwrap();
        registry.remove(&mac()).await.unwrap();
        assert!(registry.get(&mac()).await.is_none());
    }

    #[tokio::test]
    async fn list_by_vehicle_filters_correctly() {
        let registry = registry();
        registry
            .configure(&mac(), Family::Bm6, "Van 1".into(), Some("vehicle_1".into()), 1800)
            .await
            .unwrap();
        assert_eq!(registry.list_by_vehicle("vehicle_1").await.len(), 1);
        assert_eq!(registry.list_by_vehicle("vehicle_2").await.len(), 0);
    }

    #[tokio::test]
    async fn update_latest_reading_requires_existing_record() {
        let registry = registry();
        let reading = Reading::builder(12.6, -1.0).build();
        let result = registry.update_latest_reading(&mac(), reading, OffsetDateTime::now_utc()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_all_includes_discovered_and_configured() {
        let registry = registry();
        registry.register_discovered(&[sighting(mac())]).await.unwrap();
        assert_eq!(registry.list_all().await.len(), 1);
        assert_eq!(registry.list_configured().await.len(), 0);
    }
}
