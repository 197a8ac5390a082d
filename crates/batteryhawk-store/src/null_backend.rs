//! A backend that discards every reading. Useful when storage is disabled
//! in configuration but the rest of the engine should still run unmodified.

use std::collections::HashSet;

use async_trait::async_trait;
use batteryhawk_types::Reading;

use crate::backend::{Capability, StorageBackend, VehicleSummary};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageBackend for NullBackend {
    fn backend_name(&self) -> &'static str {
        "null"
    }

    fn backend_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::new()
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn store_reading(
        &self,
        _device_id: &str,
        _vehicle_id: &str,
        _device_type: &str,
        _reading: &Reading,
    ) -> Result<()> {
        Ok(())
    }

    async fn get_recent_readings(&self, _device_id: &str, _limit: usize) -> Result<Vec<Reading>> {
        Ok(Vec::new())
    }

    async fn get_vehicle_summary(&self, vehicle_id: &str, hours: u32) -> Result<VehicleSummary> {
        Ok(VehicleSummary {
            vehicle_id: vehicle_id.to_string(),
            period_hours: hours,
            avg_voltage_v: 0.0,
            avg_current_a: 0.0,
            avg_temperature_c: None,
            reading_count: 0,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_succeeds() {
        let backend = NullBackend::new();
        backend.connect().await.unwrap();
        let reading = Reading::builder(12.6, -1.2).build();
        backend
            .store_reading("AA:BB:CC:DD:EE:FF", "vehicle-1", "BM6", &reading)
            .await
            .unwrap();
        assert!(backend
            .get_recent_readings("AA:BB:CC:DD:EE:FF", 10)
            .await
            .unwrap()
            .is_empty());
        assert!(backend.health_check().await.unwrap());
    }
}
