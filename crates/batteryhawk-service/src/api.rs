//! REST API endpoints for the Battery Hawk service.
//!
//! This module provides HTTP endpoints for managing devices, vehicles,
//! readings, and system configuration.
//!
//! # Concurrency and Lock Acquisition
//!
//! Handlers never hold a lock across an `.await` on another lock: each
//! registry/config/storage call takes and releases its own internal lock.
//! There is no fixed multi-lock ordering to document because no handler
//! acquires more than one at a time.
//!
//! # Error Handling
//!
//! All endpoints return a JSON:API-style error envelope via [`AppError`].
//! Registry and storage errors are classified into 400/404/409/500 by
//! [`AppError::from`] impls; validation failures carry a `source.pointer`
//! identifying the offending field.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use batteryhawk_core::Event;
use batteryhawk_types::{Family, MacAddress, Reading};

use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/system/status", get(system_status))
        .route("/api/system/health", get(system_health))
        .route("/api/system/config", get(get_system_config).patch(patch_system_config))
        .route("/api/devices", get(list_devices).post(create_device))
        .route(
            "/api/devices/{mac}",
            get(get_device).patch(patch_device).delete(delete_device),
        )
        .route("/api/vehicles", get(list_vehicles).post(create_vehicle))
        .route(
            "/api/vehicles/{id}",
            get(get_vehicle).patch(patch_vehicle).delete(delete_vehicle),
        )
        .route("/api/readings/{mac}", get(get_readings))
        .route("/api/readings/{mac}/latest", get(get_latest_reading))
}

// ==========================================================================
// Error envelope
// ==========================================================================

/// A single JSON:API error object.
#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub id: String,
    pub status: String,
    pub code: Option<String>,
    pub title: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
}

#[derive(Debug, Serialize)]
pub struct ErrorSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    errors: Vec<ErrorObject>,
}

/// Errors returned by HTTP handlers, translated into the JSON:API error
/// envelope by [`IntoResponse`].
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest { detail: String, pointer: Option<String> },
    Conflict(String),
    Internal(String),
}

impl AppError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        AppError::BadRequest {
            detail: detail.into(),
            pointer: None,
        }
    }

    pub fn invalid_field(pointer: impl Into<String>, detail: impl Into<String>) -> Self {
        AppError::BadRequest {
            detail: detail.into(),
            pointer: Some(pointer.into()),
        }
    }
}

impl From<batteryhawk_core::Error> for AppError {
    fn from(e: batteryhawk_core::Error) -> Self {
        match &e {
            batteryhawk_core::Error::Kind(kind) if matches!(kind, batteryhawk_types::Error::Validation { .. }) => {
                AppError::bad_request(e.to_string())
            }
            _ => AppError::Internal(e.to_string()),
        }
    }
}

impl From<batteryhawk_store::Error> for AppError {
    fn from(e: batteryhawk_store::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(e: crate::config::ConfigError) -> Self {
        match &e {
            crate::config::ConfigError::UnknownSection(section) => {
                AppError::invalid_field(format!("/{section}"), e.to_string())
            }
            crate::config::ConfigError::Validation { field, .. } => AppError::invalid_field(format!("/{field}"), e.to_string()),
            _ => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, title, detail, pointer) = match self {
            AppError::NotFound(detail) => (StatusCode::NOT_FOUND, "Not Found", detail, None),
            AppError::BadRequest { detail, pointer } => (StatusCode::BAD_REQUEST, "Bad Request", detail, pointer),
            AppError::Conflict(detail) => (StatusCode::CONFLICT, "Conflict", detail, None),
            AppError::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", detail, None),
        };

        let body = ErrorEnvelope {
            errors: vec![ErrorObject {
                id: uuid::Uuid::new_v4().to_string(),
                status: (status.as_u16()).to_string(),
                code: None,
                title: title.to_string(),
                detail,
                source: pointer.map(|pointer| ErrorSource {
                    pointer: Some(pointer),
                    parameter: None,
                }),
            }],
        };

        (status, Json(body)).into_response()
    }
}

fn parse_mac(mac: &str) -> Result<MacAddress, AppError> {
    mac.parse().map_err(|_| AppError::invalid_field("/mac_address", format!("invalid mac address: {mac}")))
}

fn parse_family(family: &str) -> Result<Family, AppError> {
    match family.to_ascii_uppercase().as_str() {
        "BM2" => Ok(Family::Bm2),
        "BM6" => Ok(Family::Bm6),
        _ => Err(AppError::invalid_field("/device_type", format!("unknown device family: {family}"))),
    }
}

// ==========================================================================
// Health and status
// ==========================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Liveness probe. Always returns 200 once the process is serving HTTP;
/// use `/api/system/health` for an actual subsystem health check.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

#[derive(Debug, Serialize)]
pub struct SystemStatusResponse {
    pub devices_total: usize,
    pub devices_configured: usize,
    pub devices_connected: usize,
    pub vehicles_total: usize,
    pub storage: batteryhawk_store::StorageHealth,
    pub storage_metrics: batteryhawk_store::StorageMetrics,
    pub mqtt_connected: bool,
    pub mqtt_metrics: crate::mqtt::MqttMetrics,
}

async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatusResponse> {
    let devices = state.devices.list_all().await;
    let configured = devices.iter().filter(|d| d.status == batteryhawk_types::DeviceStatus::Configured).count();
    let runtime_states = state.state_manager.list().await;
    let connected = runtime_states
        .iter()
        .filter(|(_, s)| s.connection_state == batteryhawk_types::ConnectionState::Connected)
        .count();

    Json(SystemStatusResponse {
        devices_total: devices.len(),
        devices_configured: configured,
        devices_connected: connected,
        vehicles_total: state.vehicles.list().await.len(),
        storage: state.storage.get_health_status().await,
        storage_metrics: state.storage.get_metrics().await,
        mqtt_connected: state.mqtt.state() == crate::mqtt::ConnectionState::Connected,
        mqtt_metrics: state.mqtt.metrics().await,
    })
}

/// Overall health: 503 when storage is disconnected, since every reading
/// would then be held only in the outage buffer.
async fn system_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.storage.get_health_status().await;
    let status = if health.connected { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(health))
}

// ==========================================================================
// System configuration
// ==========================================================================

async fn get_system_config(State(state): State<Arc<AppState>>) -> Json<crate::config::SystemConfig> {
    Json(state.config.system().await)
}

async fn patch_system_config(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<Value>,
) -> Result<Json<crate::config::SystemConfig>, AppError> {
    let updated = state.config.patch_system(&patch).await?;
    Ok(Json(updated))
}

// ==========================================================================
// Devices
// ==========================================================================

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PaginationQuery {
    /// `limit` defaults to 100 and must be in `[1, 1000]`; `offset`
    /// defaults to 0.
    fn validate(&self) -> Result<(usize, usize), AppError> {
        let limit = self.limit.unwrap_or(100);
        if !(1..=1000).contains(&limit) {
            return Err(AppError::invalid_field("/limit", "limit must be between 1 and 1000"));
        }
        Ok((limit, self.offset.unwrap_or(0)))
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub meta: PaginationMeta,
}

#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub count: usize,
    pub offset: usize,
    pub limit: usize,
}

async fn list_devices(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<PaginatedResponse<batteryhawk_types::Device>>, AppError> {
    let (limit, offset) = pagination.validate()?;
    let mut devices = state.devices.list_all().await;
    devices.sort_by(|a, b| a.mac.as_str().cmp(b.mac.as_str()));
    let page: Vec<_> = devices.into_iter().skip(offset).take(limit).collect();
    Ok(Json(PaginatedResponse {
        meta: PaginationMeta {
            count: page.len(),
            offset,
            limit,
        },
        data: page,
    }))
}

async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(mac): Path<String>,
) -> Result<Json<batteryhawk_types::Device>, AppError> {
    let mac = parse_mac(&mac)?;
    let device = state.devices.get(&mac).await.ok_or_else(|| AppError::NotFound(format!("device {} not found", mac.as_str())))?;
    Ok(Json(device))
}

fn default_polling_interval() -> u32 {
    batteryhawk_types::device::DEFAULT_POLLING_INTERVAL_S
}

#[derive(Debug, Deserialize)]
pub struct ConfigureDeviceRequest {
    pub mac_address: String,
    pub device_type: String,
    pub friendly_name: String,
    pub vehicle_id: Option<String>,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u32,
}

/// Configures a device that Discovery has already reported. Rejects macs
/// the registry has never seen, per spec.
async fn create_device(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConfigureDeviceRequest>,
) -> Result<Json<batteryhawk_types::Device>, AppError> {
    let mac = parse_mac(&request.mac_address)?;
    if state.devices.get(&mac).await.is_none() {
        return Err(AppError::NotFound(format!(
            "device {} has not been discovered yet",
            mac.as_str()
        )));
    }
    let family = parse_family(&request.device_type)?;
    if let Some(vehicle_id) = &request.vehicle_id {
        if state.vehicles.get(vehicle_id).await.is_none() {
            return Err(AppError::invalid_field("/vehicle_id", format!("vehicle {vehicle_id} not found")));
        }
    }

    state
        .devices
        .configure(
            &mac,
            family,
            request.friendly_name,
            request.vehicle_id.clone(),
            request.polling_interval,
        )
        .await?;

    if let Some(vehicle_id) = request.vehicle_id {
        state.events.send(Event::VehicleAssociated { mac: mac.clone(), vehicle_id });
    }

    let device = state.devices.get(&mac).await.ok_or_else(|| AppError::Internal("device vanished after configure".into()))?;
    Ok(Json(device))
}

#[derive(Debug, Deserialize)]
pub struct PatchDeviceRequest {
    pub device_type: Option<String>,
    pub friendly_name: Option<String>,
    pub vehicle_id: Option<String>,
    pub polling_interval: Option<u32>,
}

/// Partial update: unset fields keep their current value.
async fn patch_device(
    State(state): State<Arc<AppState>>,
    Path(mac): Path<String>,
    Json(request): Json<PatchDeviceRequest>,
) -> Result<Json<batteryhawk_types::Device>, AppError> {
    let mac = parse_mac(&mac)?;
    let current = state.devices.get(&mac).await.ok_or_else(|| AppError::NotFound(format!("device {} not found", mac.as_str())))?;

    let family = match &request.device_type {
        Some(family) => parse_family(family)?,
        None => current.family,
    };
    let friendly_name = request.friendly_name.unwrap_or_else(|| current.friendly_name.clone().unwrap_or_default());
    let vehicle_id = request.vehicle_id.or(current.vehicle_id.clone());
    let polling_interval = request.polling_interval.unwrap_or(current.polling_interval_s);
    if let Some(vehicle_id) = &vehicle_id {
        if state.vehicles.get(vehicle_id).await.is_none() {
            return Err(AppError::invalid_field("/vehicle_id", format!("vehicle {vehicle_id} not found")));
        }
    }

    state
        .devices
        .configure(&mac, family, friendly_name, vehicle_id.clone(), polling_interval)
        .await?;

    if let Some(vehicle_id) = vehicle_id {
        state.events.send(Event::VehicleAssociated { mac: mac.clone(), vehicle_id });
    }

    let device = state.devices.get(&mac).await.ok_or_else(|| AppError::Internal("device vanished after configure".into()))?;
    Ok(Json(device))
}

async fn delete_device(State(state): State<Arc<AppState>>, Path(mac): Path<String>) -> Result<StatusCode, AppError> {
    let mac = parse_mac(&mac)?;
    let removed = state.devices.remove(&mac).await?;
    if removed.is_none() {
        return Err(AppError::NotFound(format!("device {} not found", mac.as_str())));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ==========================================================================
// Vehicles
// ==========================================================================

async fn list_vehicles(State(state): State<Arc<AppState>>) -> Json<Vec<batteryhawk_types::Vehicle>> {
    Json(state.vehicles.list().await)
}

async fn get_vehicle(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<batteryhawk_types::Vehicle>, AppError> {
    let vehicle = state.vehicles.get(&id).await.ok_or_else(|| AppError::NotFound(format!("vehicle {id} not found")))?;
    Ok(Json(vehicle))
}

#[derive(Debug, Deserialize)]
pub struct CreateVehicleRequest {
    pub id: Option<String>,
    pub name: String,
}

async fn create_vehicle(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateVehicleRequest>,
) -> Result<Json<batteryhawk_types::Vehicle>, AppError> {
    let vehicle = state.vehicles.create(request.id, request.name).await?;
    Ok(Json(vehicle))
}

#[derive(Debug, Deserialize)]
pub struct PatchVehicleRequest {
    pub name: String,
}

async fn patch_vehicle(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<PatchVehicleRequest>,
) -> Result<Json<batteryhawk_types::Vehicle>, AppError> {
    let vehicle = state.vehicles.update_name(&id, request.name).await?;
    Ok(Json(vehicle))
}

/// The registry's `delete` maps a "still referenced" failure and a
/// "not found" failure to the same `Validation` error kind, which the
/// generic `From<batteryhawk_core::Error>` conversion would flatten to
/// 400. The reference check is done here first so the 409/404 split is
/// visible at the handler instead.
async fn delete_vehicle(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    let devices = state.devices.list_by_vehicle(&id).await;
    if !devices.is_empty() {
        let macs: Vec<_> = devices.iter().map(|d| d.mac.as_str().to_string()).collect();
        return Err(AppError::Conflict(format!(
            "vehicle {id} still has associated devices: {}",
            macs.join(", ")
        )));
    }
    match state.vehicles.delete(&id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(batteryhawk_core::Error::Kind(batteryhawk_types::Error::Validation { message, .. })) => {
            Err(AppError::NotFound(message))
        }
        Err(e) => Err(e.into()),
    }
}

// ==========================================================================
// Readings
// ==========================================================================

async fn get_readings(
    State(state): State<Arc<AppState>>,
    Path(mac): Path<String>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<PaginatedResponse<Reading>>, AppError> {
    let mac = parse_mac(&mac)?;
    if state.devices.get(&mac).await.is_none() {
        return Err(AppError::NotFound(format!("device {} not found", mac.as_str())));
    }
    let (limit, offset) = pagination.validate()?;
    let readings = state.storage.get_recent_readings(mac.as_str(), limit + offset).await?;
    let page: Vec<_> = readings.into_iter().skip(offset).take(limit).collect();
    Ok(Json(PaginatedResponse {
        meta: PaginationMeta {
            count: page.len(),
            offset,
            limit,
        },
        data: page,
    }))
}

async fn get_latest_reading(
    State(state): State<Arc<AppState>>,
    Path(mac): Path<String>,
) -> Result<Json<Reading>, AppError> {
    let mac = parse_mac(&mac)?;
    let runtime_state = state
        .state_manager
        .get(&mac)
        .await
        .ok_or_else(|| AppError::NotFound(format!("no runtime state for device {}", mac.as_str())))?;
    let reading = runtime_state
        .latest_reading
        .ok_or_else(|| AppError::NotFound(format!("no readings yet for device {}", mac.as_str())))?;
    Ok(Json(reading))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use batteryhawk_core::{ConnectionPool, DeviceRegistry, EventDispatcher, PoolConfig, StateManager};
    use batteryhawk_store::{NullBackend, ResilientConfig};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

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

    async fn test_state() -> Arc<AppState> {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::ConfigManager::load(dir.path()).await.unwrap();
        let devices = Arc::new(DeviceRegistry::new(Arc::new(batteryhawk_core::NullPersistence)));
        let vehicles = Arc::new(batteryhawk_core::VehicleRegistry::new(
            Arc::new(batteryhawk_core::NullVehiclePersistence),
            Arc::new(|_| false),
        ));
        let events = EventDispatcher::new(100);
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

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let state = test_state().await;
        let app = router().with_state(state);
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_device_404_for_unknown_mac() {
        let state = test_state().await;
        let app = router().with_state(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/devices/AA:BB:CC:DD:EE:FF")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["status"], "404");
    }

    #[tokio::test]
    async fn configure_undiscovered_device_is_rejected() {
        let state = test_state().await;
        let app = router().with_state(state);
        let request = Request::builder()
            .method("POST")
            .uri("/api/devices")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&serde_json::json!({
                    "mac_address": "AA:BB:CC:DD:EE:FF",
                    "device_type": "BM6",
                    "friendly_name": "Test",
                    "vehicle_id": null,
                    "polling_interval": 1800,
                }))
                .unwrap(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn configure_discovered_device_then_get() {
        let state = test_state().await;
        state
            .devices
            .register_discovered(&[batteryhawk_core::Sighting {
                mac: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
                name: Some("BM6_Test".into()),
                rssi: Some(-60),
                discovered_at: OffsetDateTime::now_utc(),
                advertisement: batteryhawk_core::Advertisement::default(),
            }])
            .await
            .unwrap();
        state.vehicles.create(Some("vehicle_1".into()), "Van 1".into()).await.unwrap();

        let app = router().with_state(state.clone());
        let request = Request::builder()
            .method("POST")
            .uri("/api/devices")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&serde_json::json!({
                    "mac_address": "AA:BB:CC:DD:EE:FF",
                    "device_type": "BM6",
                    "friendly_name": "Test",
                    "vehicle_id": "vehicle_1",
                    "polling_interval": 1800,
                }))
                .unwrap(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let device = state.devices.get(&"AA:BB:CC:DD:EE:FF".parse().unwrap()).await.unwrap();
        assert_eq!(device.status, batteryhawk_types::DeviceStatus::Configured);
        assert_eq!(device.polling_interval_s, 1800);
    }

    #[tokio::test]
    async fn delete_vehicle_conflict_then_success() {
        let state = test_state().await;
        state.vehicles.create(Some("vehicle_1".into()), "Van 1".into()).await.unwrap();
        state
            .devices
            .configure(&"AA:BB:CC:DD:EE:FF".parse().unwrap(), Family::Bm6, "Test".into(), Some("vehicle_1".into()), 1800)
            .await
            .unwrap();

        let app = router().with_state(state.clone());
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/vehicles/vehicle_1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert!(body["errors"][0]["detail"].as_str().unwrap().contains("associated devices"));

        state.devices.remove(&"AA:BB:CC:DD:EE:FF".parse().unwrap()).await.unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/vehicles/vehicle_1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn list_devices_rejects_limit_out_of_range() {
        let state = test_state().await;
        let app = router().with_state(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/devices?limit=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn patch_system_config_rejects_unknown_section() {
        let state = test_state().await;
        let app = router().with_state(state);
        let request = Request::builder()
            .method("PATCH")
            .uri("/api/system/config")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&serde_json::json!({"unknown": {}})).unwrap()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn system_status_reports_counts() {
        let state = test_state().await;
        state.vehicles.create(Some("vehicle_1".into()), "Van 1".into()).await.unwrap();
        let app = router().with_state(state);
        let response = app
            .oneshot(Request::builder().uri("/api/system/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["vehicles_total"], 1);
    }
}
