//! Application state shared across the HTTP API, the orchestrator, and
//! the MQTT publisher.

use std::sync::Arc;

use batteryhawk_core::{ConnectionPool, DeviceRegistry, EventDispatcher, StateManager, VehicleRegistry};
use batteryhawk_store::{ResilientConfig, ResilientStore, StorageBackend};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigManager;
use crate::mqtt::MqttPublisher;

/// Shared application state, built once at startup and handed to the
/// router, the orchestrator, and the MQTT publisher as an `Arc`.
pub struct AppState {
    pub config: Arc<ConfigManager>,
    pub devices: Arc<DeviceRegistry>,
    pub vehicles: Arc<VehicleRegistry>,
    pub pool: Arc<ConnectionPool>,
    pub state_manager: Arc<StateManager>,
    pub events: EventDispatcher,
    pub storage: Arc<ResilientStore<Box<dyn StorageBackend>>>,
    pub mqtt: Arc<MqttPublisher>,
    /// Cancelled on SIGINT/SIGTERM; every background loop selects on this
    /// after each await point and exits promptly once it fires.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Async because building the initial MQTT publisher snapshots
    /// `config`'s current `mqtt` section. Unlike the other sections, MQTT
    /// broker settings are not hot-reloaded into a running publisher;
    /// changing them via `PATCH /api/system/config` takes effect on the
    /// next restart.
    pub async fn new(
        config: Arc<ConfigManager>,
        devices: Arc<DeviceRegistry>,
        vehicles: Arc<VehicleRegistry>,
        pool: Arc<ConnectionPool>,
        events: EventDispatcher,
        storage_backend: Box<dyn StorageBackend>,
        storage_config: ResilientConfig,
    ) -> Arc<Self> {
        let state_manager = Arc::new(StateManager::new(&events));
        let storage = ResilientStore::new(storage_backend, storage_config);
        let mqtt = MqttPublisher::new(config.system().await.mqtt);
        Arc::new(Self {
            config,
            devices,
            vehicles,
            pool,
            state_manager,
            events,
            storage,
            mqtt,
            shutdown: CancellationToken::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batteryhawk_core::PoolConfig;
    use batteryhawk_store::NullBackend;

    async fn test_state() -> Arc<AppState> {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigManager::load(dir.path()).await.unwrap();
        let devices = Arc::new(DeviceRegistry::new(Arc::new(
            batteryhawk_core::NullPersistence,
        )));
        let vehicles = Arc::new(VehicleRegistry::new(
            Arc::new(batteryhawk_core::NullVehiclePersistence),
            Arc::new(|_| false),
        ));
        let events = EventDispatcher::new(100);
        // Unit tests run without BLE hardware; a transport that fails every
        // operation still lets the rest of AppState construction and the
        // storage/config plumbing be exercised.
        let pool = ConnectionPool::new(Arc::new(NoAdapterTransport), PoolConfig::default());
        AppState::new(
            config,
            devices,
            vehicles,
            pool,
            events,
            Box::new(NullBackend::new()),
            ResilientConfig::default(),
        )
        .await
    }

    struct NoAdapterTransport;

    #[async_trait::async_trait]
    impl batteryhawk_core::transport::Transport for NoAdapterTransport {
        async fn raw_connect(&self, _mac: &str) -> batteryhawk_core::Result<()> {
            Err(batteryhawk_core::Error::Cancelled)
        }
        async fn raw_disconnect(&self, _mac: &str) -> batteryhawk_core::Result<()> {
            Ok(())
        }
        async fn raw_write(&self, _mac: &str, _characteristic: uuid::Uuid, _bytes: &[u8]) -> batteryhawk_core::Result<()> {
            Err(batteryhawk_core::Error::Cancelled)
        }
        async fn raw_subscribe(
            &self,
            _mac: &str,
            _characteristic: uuid::Uuid,
        ) -> batteryhawk_core::Result<tokio::sync::mpsc::Receiver<Vec<u8>>> {
            Err(batteryhawk_core::Error::Cancelled)
        }
        async fn raw_unsubscribe(&self, _mac: &str, _characteristic: uuid::Uuid) -> batteryhawk_core::Result<()> {
            Ok(())
        }
        async fn raw_is_connected(&self, _mac: &str) -> batteryhawk_core::Result<bool> {
            Ok(false)
        }
        async fn raw_scan(&self, _duration: std::time::Duration) -> batteryhawk_core::Result<Vec<batteryhawk_core::Sighting>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn app_state_constructs_with_null_backend() {
        let state = test_state().await;
        assert_eq!(state.storage.state(), batteryhawk_store::ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn shutdown_token_starts_uncancelled() {
        let state = test_state().await;
        assert!(!state.shutdown.is_cancelled());
        state.shutdown.cancel();
        assert!(state.shutdown.is_cancelled());
    }
}
