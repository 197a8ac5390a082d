//! Orchestrator, REST API, and MQTT publisher for Battery Hawk.
//!
//! This crate provides the long-running service that:
//! - Discovers and polls configured BM2/BM6 battery monitors on a schedule
//! - Persists readings through a pluggable storage backend
//! - Publishes readings, status, and discovery events over MQTT
//! - Exposes a REST API for device/vehicle management and queries
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - liveness probe
//! - `GET /api/devices`, `/api/devices/{mac}` - device listing and detail
//! - `POST /api/devices`, `PATCH /api/devices/{mac}`, `DELETE /api/devices/{mac}` - device management
//! - `GET /api/vehicles`, `/api/vehicles/{id}` and POST/PATCH/DELETE - vehicle management
//! - `GET /api/readings/{mac}`, `/api/readings/{mac}/latest` - reading queries
//! - `GET /api/system/status`, `/api/system/health` - operational status
//! - `GET /api/system/config`, `PATCH /api/system/config` - configuration
//!
//! # Configuration
//!
//! The service reads three JSON sections (`system`, `devices`, `vehicles`)
//! from a directory (default `/data`, overridable via
//! `BATTERYHAWK_CONFIG_DIR`). See [`config`] for the full schema.

pub mod api;
pub mod config;
pub mod engine;
pub mod middleware;
pub mod mqtt;
pub mod state;

pub use config::{ConfigError, ConfigManager};
pub use engine::Engine;
pub use state::AppState;
