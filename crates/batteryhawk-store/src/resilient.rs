//! [`ResilientStore`] wraps any [`StorageBackend`] with a connection state
//! machine, bounded reconnect retry, and outage buffering, so a flaky
//! database degrades gracefully instead of blocking the poll loop.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use batteryhawk_types::{BoundedRingBuffer, BufferedReading, Reading};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{StorageBackend, StorageHealth, StorageMetrics, VehicleSummary};
use crate::error::Result;
use crate::retry::RetryConfig;
use crate::validate::{validate_device_id, validate_hours, validate_limit, validate_vehicle_id};

/// Connection lifecycle of a [`ResilientStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Failed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Tunables for reconnect behavior and outage buffering.
#[derive(Debug, Clone)]
pub struct ResilientConfig {
    pub retry: RetryConfig,
    pub buffer_capacity: usize,
    pub flush_interval: Duration,
    pub message_retry_limit: u32,
}

impl Default for ResilientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            buffer_capacity: 10_000,
            flush_interval: Duration::from_secs(30),
            message_retry_limit: 5,
        }
    }
}

/// Wraps a [`StorageBackend`] with the connect/retry/buffer bookkeeping
/// every backend would otherwise have to reimplement.
pub struct ResilientStore<B> {
    backend: B,
    config: ResilientConfig,
    state: AtomicU8,
    buffer: Mutex<BoundedRingBuffer<BufferedReading>>,
    metrics: Mutex<StorageMetrics>,
    last_error: Mutex<Option<String>>,
}

impl<B: StorageBackend + 'static> ResilientStore<B> {
    pub fn new(backend: B, config: ResilientConfig) -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(BoundedRingBuffer::new(config.buffer_capacity)),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            metrics: Mutex::new(StorageMetrics::default()),
            last_error: Mutex::new(None),
            backend,
            config,
        })
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, s: ConnectionState) {
        self.state.store(s as u8, Ordering::SeqCst);
    }

    /// Connects with bounded retry per `config.retry`. Gives up and returns
    /// the last error once the retry budget is exhausted or the backend
    /// reports a non-transient failure.
    pub async fn connect(&self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        let mut attempt = 0;
        loop {
            match self.backend.connect().await {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    *self.last_error.lock().await = None;
                    info!(
                        backend = self.backend.backend_name(),
                        "storage backend connected"
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.config.retry.max_retries && e.is_transient() => {
                    warn!(
                        backend = self.backend.backend_name(),
                        attempt,
                        error = %e,
                        "storage connect failed, retrying"
                    );
                    *self.last_error.lock().await = Some(e.to_string());
                    tokio::time::sleep(self.config.retry.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.set_state(ConnectionState::Failed);
                    *self.last_error.lock().await = Some(e.to_string());
                    return Err(e);
                }
            }
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.backend.disconnect().await?;
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    /// Stores a reading. When disconnected, or when the write fails
    /// transiently, the reading is buffered and `Ok(false)` is returned
    /// rather than propagating the failure to the caller.
    pub async fn store_reading(
        &self,
        device_id: &str,
        vehicle_id: &str,
        device_type: &str,
        reading: Reading,
    ) -> Result<bool> {
        validate_device_id(device_id)?;

        if self.state() != ConnectionState::Connected {
            self.buffer_reading(device_id, vehicle_id, device_type, reading)
                .await;
            return Ok(false);
        }

        match self
            .backend
            .store_reading(device_id, vehicle_id, device_type, &reading)
            .await
        {
            Ok(()) => {
                self.metrics.lock().await.record_write(true);
                Ok(true)
            }
            Err(e) if e.is_transient() => {
                warn!(device_id, error = %e, "storage write failed, buffering reading");
                self.metrics.lock().await.record_write(false);
                self.buffer_reading(device_id, vehicle_id, device_type, reading)
                    .await;
                Ok(false)
            }
            Err(e) => {
                self.metrics.lock().await.record_write(false);
                Err(e)
            }
        }
    }

    async fn buffer_reading(
        &self,
        device_id: &str,
        vehicle_id: &str,
        device_type: &str,
        reading: Reading,
    ) {
        let buffered = BufferedReading::new(
            reading,
            device_id,
            Some(vehicle_id.to_string()),
            device_type,
        );
        let mut buffer = self.buffer.lock().await;
        buffer.push(buffered);
        self.metrics.lock().await.buffered = buffer.len() as u64;
    }

    pub async fn buffered_count(&self) -> usize {
        self.buffer.lock().await.len()
    }

    pub async fn get_recent_readings(&self, device_id: &str, limit: usize) -> Result<Vec<Reading>> {
        validate_device_id(device_id)?;
        let limit = validate_limit(limit)?;
        let result = self.backend.get_recent_readings(device_id, limit).await;
        self.metrics.lock().await.record_read(result.is_ok());
        result
    }

    pub async fn get_vehicle_summary(&self, vehicle_id: &str, hours: u32) -> Result<VehicleSummary> {
        validate_vehicle_id(vehicle_id)?;
        let hours = validate_hours(hours)?;
        let result = self.backend.get_vehicle_summary(vehicle_id, hours).await;
        self.metrics.lock().await.record_read(result.is_ok());
        result
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.backend.health_check().await
    }

    pub async fn get_health_status(&self) -> StorageHealth {
        StorageHealth {
            connected: self.state() == ConnectionState::Connected,
            backend_name: self.backend.backend_name(),
            backend_version: self.backend.backend_version(),
            error_message: self.last_error.lock().await.clone(),
        }
    }

    pub async fn get_metrics(&self) -> StorageMetrics {
        let mut metrics = self.metrics.lock().await.clone();
        metrics.buffered = self.buffer.lock().await.len() as u64;
        metrics.dropped = self.buffer.lock().await.dropped();
        metrics
    }

    /// Spawns the outage-buffer flush loop, waking every `config.flush_interval`
    /// until `shutdown` is cancelled.
    pub fn spawn_flush_loop(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(this.config.flush_interval) => {
                        this.flush_buffer().await;
                    }
                    _ = shutdown.cancelled() => {
                        debug!("storage flush loop shutting down");
                        return;
                    }
                }
            }
        })
    }

    /// Drains the outage buffer against the backend once. Returns the
    /// number of readings successfully flushed. Exposed directly so tests
    /// and callers that don't want a background task can drive it manually.
    pub async fn flush_buffer(&self) -> usize {
        if self.state() != ConnectionState::Connected {
            return 0;
        }
        let pending: Vec<BufferedReading> = {
            let mut buffer = self.buffer.lock().await;
            std::iter::from_fn(|| buffer.pop()).collect()
        };
        if pending.is_empty() {
            return 0;
        }
        debug!(count = pending.len(), "flushing buffered readings");

        let mut flushed = 0;
        for mut item in pending {
            let vehicle_id = item.vehicle_id.clone().unwrap_or_default();
            match self
                .backend
                .store_reading(&item.device_id, &vehicle_id, &item.device_type, &item.reading)
                .await
            {
                Ok(()) => {
                    self.metrics.lock().await.record_write(true);
                    flushed += 1;
                }
                Err(e) if e.is_transient() && !item.exceeds_retry_limit(self.config.message_retry_limit) => {
                    item.retry_count += 1;
                    warn!(device_id = %item.device_id, error = %e, "re-buffering reading after flush failure");
                    self.buffer.lock().await.push(item);
                }
                Err(e) => {
                    error!(
                        device_id = %item.device_id,
                        error = %e,
                        "dropping buffered reading after exceeding retry limit"
                    );
                    self.metrics.lock().await.record_write(false);
                }
            }
        }
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null_backend::NullBackend;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    struct FlakyBackend {
        fail_connect: AtomicUsize,
        fail_writes: AtomicBool,
    }

    #[async_trait::async_trait]
    impl StorageBackend for FlakyBackend {
        fn backend_name(&self) -> &'static str {
            "flaky"
        }
        fn backend_version(&self) -> &'static str {
            "0.0.0"
        }
        fn capabilities(&self) -> std::collections::HashSet<crate::backend::Capability> {
            Default::default()
        }
        async fn connect(&self) -> Result<()> {
            if self.fail_connect.fetch_sub(1, Ordering::SeqCst) as isize > 0 {
                return Err(crate::error::Error::NotConnected);
            }
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
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(crate::error::Error::NotConnected);
            }
            Ok(())
        }
        async fn get_recent_readings(&self, _device_id: &str, _limit: usize) -> Result<Vec<Reading>> {
            Ok(vec![])
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

    fn reading() -> Reading {
        Reading::builder(12.6, -1.2).build()
    }

    #[tokio::test]
    async fn connect_retries_then_succeeds() {
        let backend = FlakyBackend {
            fail_connect: AtomicUsize::new(2),
            fail_writes: AtomicBool::new(false),
        };
        let store = ResilientStore::new(
            backend,
            ResilientConfig {
                retry: RetryConfig {
                    initial_delay: Duration::from_millis(1),
                    jitter: false,
                    ..RetryConfig::default()
                },
                ..ResilientConfig::default()
            },
        );
        store.connect().await.unwrap();
        assert_eq!(store.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn writes_buffer_while_disconnected() {
        let store = ResilientStore::new(NullBackend::new(), ResilientConfig::default());
        // Not connected yet: store_reading should buffer, not call through.
        for _ in 0..5 {
            let stored = store
                .store_reading("AA:BB:CC:DD:EE:FF", "vehicle-1", "BM6", reading())
                .await
                .unwrap();
            assert!(!stored);
        }
        assert_eq!(store.buffered_count().await, 5);
    }

    #[tokio::test]
    async fn flush_drains_buffer_once_connected() {
        let store = ResilientStore::new(NullBackend::new(), ResilientConfig::default());
        for _ in 0..5 {
            store
                .store_reading("AA:BB:CC:DD:EE:FF", "vehicle-1", "BM6", reading())
                .await
                .unwrap();
        }
        store.connect().await.unwrap();
        let flushed = store.flush_buffer().await;
        assert_eq!(flushed, 5);
        assert_eq!(store.buffered_count().await, 0);
    }

    #[tokio::test]
    async fn transient_write_failure_buffers_instead_of_erroring() {
        let backend = FlakyBackend {
            fail_connect: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(true),
        };
        let store = ResilientStore::new(backend, ResilientConfig::default());
        store.connect().await.unwrap();
        let stored = store
            .store_reading("AA:BB:CC:DD:EE:FF", "vehicle-1", "BM6", reading())
            .await
            .unwrap();
        assert!(!stored);
        assert_eq!(store.buffered_count().await, 1);
    }

    #[tokio::test]
    async fn rejects_invalid_device_id() {
        let store = ResilientStore::new(NullBackend::new(), ResilientConfig::default());
        let result = store
            .store_reading("not a mac!", "vehicle-1", "BM6", reading())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_out_of_range_limit() {
        let store = ResilientStore::new(NullBackend::new(), ResilientConfig::default());
        store.connect().await.unwrap();
        let result = store.get_recent_readings("AA:BB:CC:DD:EE:FF", 10_001).await;
        assert!(result.is_err());
    }
}
