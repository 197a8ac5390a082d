//! The storage backend trait and its supporting data model.

use std::collections::HashSet;

use async_trait::async_trait;
use batteryhawk_types::Reading;
use serde::Serialize;

use crate::error::Result;

/// A capability a storage backend may advertise, mirroring the taxonomy the
/// original monitoring service used to decide which queries a backend could
/// serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TimeSeries,
    Aggregation,
    Retention,
    RealTime,
}

/// Aggregate statistics for a vehicle over a lookback window.
#[derive(Debug, Clone, Serialize)]
pub struct VehicleSummary {
    pub vehicle_id: String,
    pub period_hours: u32,
    pub avg_voltage_v: f64,
    pub avg_current_a: f64,
    pub avg_temperature_c: Option<f64>,
    pub reading_count: u64,
}

/// Point-in-time health snapshot of a storage backend.
#[derive(Debug, Clone, Serialize)]
pub struct StorageHealth {
    pub connected: bool,
    pub backend_name: &'static str,
    pub backend_version: &'static str,
    pub error_message: Option<String>,
}

/// Cumulative read/write performance counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageMetrics {
    pub total_writes: u64,
    pub successful_writes: u64,
    pub failed_writes: u64,
    pub total_reads: u64,
    pub successful_reads: u64,
    pub failed_reads: u64,
    pub buffered: u64,
    pub dropped: u64,
}

impl StorageMetrics {
    pub fn record_write(&mut self, ok: bool) {
        self.total_writes += 1;
        if ok {
            self.successful_writes += 1;
        } else {
            self.failed_writes += 1;
        }
    }

    pub fn record_read(&mut self, ok: bool) {
        self.total_reads += 1;
        if ok {
            self.successful_reads += 1;
        } else {
            self.failed_reads += 1;
        }
    }
}

/// A pluggable sink for Battery Hawk readings.
///
/// Implementations handle only the happy path: connect, store, query.
/// Retry, outage buffering, and input validation live one layer up in
/// [`crate::ResilientStore`], which every caller should go through instead
/// of talking to a backend directly.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn backend_name(&self) -> &'static str;
    fn backend_version(&self) -> &'static str;
    fn capabilities(&self) -> HashSet<Capability>;

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;

    async fn store_reading(
        &self,
        device_id: &str,
        vehicle_id: &str,
        device_type: &str,
        reading: &Reading,
    ) -> Result<()>;

    /// Returns up to `limit` readings for `device_id`, newest first. `limit`
    /// is already validated to `[1, 10000]` by the caller.
    async fn get_recent_readings(&self, device_id: &str, limit: usize) -> Result<Vec<Reading>>;

    /// Summarizes a vehicle's readings over the trailing `hours`, already
    /// validated to `(0, 8760]` by the caller.
    async fn get_vehicle_summary(&self, vehicle_id: &str, hours: u32) -> Result<VehicleSummary>;

    async fn health_check(&self) -> Result<bool>;
}

/// Lets a boxed trait object stand in for a concrete backend wherever a
/// `B: StorageBackend` is expected, e.g. [`crate::ResilientStore`] wrapping
/// whatever [`crate::factory::build_backend`] selected at runtime.
#[async_trait]
impl StorageBackend for Box<dyn StorageBackend> {
    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }

    fn backend_version(&self) -> &'static str {
        (**self).backend_version()
    }

    fn capabilities(&self) -> HashSet<Capability> {
        (**self).capabilities()
    }

    async fn connect(&self) -> Result<()> {
        (**self).connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        (**self).disconnect().await
    }

    async fn store_reading(
        &self,
        device_id: &str,
        vehicle_id: &str,
        device_type: &str,
        reading: &Reading,
    ) -> Result<()> {
        (**self).store_reading(device_id, vehicle_id, device_type, reading).await
    }

    async fn get_recent_readings(&self, device_id: &str, limit: usize) -> Result<Vec<Reading>> {
        (**self).get_recent_readings(device_id, limit).await
    }

    async fn get_vehicle_summary(&self, vehicle_id: &str, hours: u32) -> Result<VehicleSummary> {
        (**self).get_vehicle_summary(vehicle_id, hours).await
    }

    async fn health_check(&self) -> Result<bool> {
        (**self).health_check().await
    }
}
