//! Battery Hawk Service - BLE battery-monitor collector and HTTP API.
//!
//! Run with: `cargo run -p batteryhawk-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use batteryhawk_core::{BlePoolTransport, ConnectionPool, DeviceRegistry, EventDispatcher, PoolConfig, Transport, VehicleRegistry};
use batteryhawk_service::config::{
    default_config_dir, load_devices, load_vehicles, ConfigManager, DevicesPersistence, VehiclesPersistence,
};
use batteryhawk_service::middleware::{self, RateLimitState};
use batteryhawk_service::{api, AppState, Engine};
use batteryhawk_store::{RetryConfig, ResilientConfig};

/// Battery Hawk Service - BLE battery-monitor collector and HTTP REST API.
#[derive(Parser, Debug)]
#[command(name = "batteryhawk-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration directory (holds system.json, devices.json, vehicles.json).
    #[arg(short, long)]
    config_dir: Option<PathBuf>,
}

/// A transport that never finds a device. Used when `bluetooth.test_mode`
/// is set, or as a fallback if no adapter is present, so the service can
/// still serve its REST API without real Bluetooth hardware.
struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn raw_connect(&self, mac: &str) -> batteryhawk_core::Result<()> {
        Err(batteryhawk_core::Error::Kind(
            batteryhawk_types::Error::connection("test_mode: no transport").with_device_address(mac),
        ))
    }
    async fn raw_disconnect(&self, _mac: &str) -> batteryhawk_core::Result<()> {
        Ok(())
    }
    async fn raw_write(&self, _mac: &str, _characteristic: Uuid, _bytes: &[u8]) -> batteryhawk_core::Result<()> {
        Err(batteryhawk_core::Error::Cancelled)
    }
    async fn raw_subscribe(
        &self,
        _mac: &str,
        _characteristic: Uuid,
    ) -> batteryhawk_core::Result<tokio::sync::mpsc::Receiver<Vec<u8>>> {
        Err(batteryhawk_core::Error::Cancelled)
    }
    async fn raw_unsubscribe(&self, _mac: &str, _characteristic: Uuid) -> batteryhawk_core::Result<()> {
        Ok(())
    }
    async fn raw_is_connected(&self, _mac: &str) -> batteryhawk_core::Result<bool> {
        Ok(false)
    }
    async fn raw_scan(&self, _duration: std::time::Duration) -> batteryhawk_core::Result<Vec<batteryhawk_core::Sighting>> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("batteryhawk_service=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let config_dir = args.config_dir.unwrap_or_else(default_config_dir);
    info!(?config_dir, "loading configuration");
    let config = ConfigManager::load(config_dir).await?;
    let system = config.system().await;

    let devices = Arc::new(DeviceRegistry::new(Arc::new(DevicesPersistence::new(config.clone()))));
    devices.load(load_devices(&config).await).await;

    let vehicles_snapshot = load_vehicles(&config).await;
    let devices_for_check = devices.clone();
    // ReferenceCheck is a plain sync Fn; block_in_place lets it bridge back
    // into the device registry's async API without a second runtime.
    let vehicles = Arc::new(VehicleRegistry::new(
        Arc::new(VehiclesPersistence::new(config.clone())),
        Arc::new(move |vehicle_id: &str| {
            let devices = devices_for_check.clone();
            let vehicle_id = vehicle_id.to_string();
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(async move { !devices.list_by_vehicle(&vehicle_id).await.is_empty() })
            })
        }),
    ));
    vehicles.load(vehicles_snapshot.0, vehicles_snapshot.1).await;

    let transport: Arc<dyn Transport> = if system.bluetooth.test_mode {
        info!("bluetooth.test_mode enabled, using a null transport");
        Arc::new(NullTransport)
    } else {
        match BlePoolTransport::first_adapter().await {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                warn!(%e, "no Bluetooth adapter available, falling back to a null transport");
                Arc::new(NullTransport)
            }
        }
    };
    let pool_config = PoolConfig {
        max_concurrent_connections: system.bluetooth.max_concurrent_connections,
        connection_timeout: std::time::Duration::from_secs_f64(system.bluetooth.connection_timeout_seconds),
        ..PoolConfig::default()
    };
    let pool = ConnectionPool::new(transport, pool_config);

    let storage_backend_config = match system.storage.backend.as_str() {
        "influxdb" => serde_json::json!({
            "url": system.storage.host.clone().unwrap_or_default(),
            "org": system.storage.username.clone().unwrap_or_default(),
            "bucket": system.storage.database.clone().unwrap_or_default(),
            "token": system.storage.password.clone().unwrap_or_default(),
        }),
        _ => {
            let path = system
                .storage
                .database
                .clone()
                .unwrap_or_else(|| config.dir().join("readings").display().to_string());
            serde_json::json!({ "path": path })
        }
    };
    let storage_backend = batteryhawk_store::build_backend(&system.storage.backend, &storage_backend_config)?;
    let storage_config = resilient_config_from(&system.storage.error_recovery);

    let events = EventDispatcher::new(256);
    let state = AppState::new(config.clone(), devices, vehicles, pool, events, storage_backend, storage_config).await;

    let engine = Arc::new(Engine::new(state.clone()));
    engine.start().await?;

    let security_config = Arc::new(system.security.clone());
    let rate_limit_state = Arc::new(RateLimitState::new());
    {
        let rate_limit_state = rate_limit_state.clone();
        let window_secs = system.security.rate_limit_window_secs;
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = interval.tick() => rate_limit_state.cleanup(window_secs).await,
                    _ = shutdown.cancelled() => return,
                }
            }
        });
    }

    let app: Router<()> = Router::new()
        .merge(api::router())
        .layer(axum::middleware::from_fn_with_state(security_config.clone(), middleware::api_key_auth))
        .layer(axum::middleware::from_fn_with_state(
            (security_config, rate_limit_state),
            middleware::rate_limit,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", system.api.host, system.api.port).parse()?;
    info!(%addr, "starting HTTP API");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_engine = engine.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { shutdown_engine.wait_for_shutdown().await })
        .await?;

    Ok(())
}

fn resilient_config_from(recovery: &batteryhawk_service::config::ErrorRecoveryConfig) -> ResilientConfig {
    ResilientConfig {
        retry: RetryConfig {
            max_retries: recovery.max_retry_attempts,
            initial_delay: std::time::Duration::from_secs_f64(recovery.retry_delay_seconds),
            max_delay: std::time::Duration::from_secs_f64(recovery.max_retry_delay_seconds),
            backoff_multiplier: recovery.retry_backoff_multiplier,
            jitter: true,
        },
        buffer_capacity: recovery.buffer_max_size,
        flush_interval: std::time::Duration::from_secs_f64(recovery.buffer_flush_interval_seconds),
        ..ResilientConfig::default()
    }
}
