//! Storage backends for persisting Battery Hawk readings.
//!
//! A backend implements [`StorageBackend`]: connect, disconnect, store a
//! reading, answer a couple of read queries, and report health. Three ship
//! here: [`JsonFileBackend`] (append-only JSON lines, one file per device),
//! [`NullBackend`] (discards everything, always succeeds), and, behind the
//! `influxdb` feature, a minimal InfluxDB HTTP line-protocol backend.
//!
//! Callers should not talk to a [`StorageBackend`] directly. [`ResilientStore`]
//! wraps one with a connection state machine, bounded reconnect retry, input
//! validation, and outage buffering, so a flaky database degrades instead of
//! blocking the poll loop.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use batteryhawk_store::{JsonFileBackend, ResilientConfig, ResilientStore};
//! # use batteryhawk_types::Reading;
//! # #[tokio::main]
//! # async fn main() -> batteryhawk_store::Result<()> {
//! let backend = JsonFileBackend::new("/data/readings");
//! let store = ResilientStore::new(backend, ResilientConfig::default());
//! store.connect().await?;
//! let reading = Reading::builder(12.6, -1.2).build();
//! store.store_reading("AA:BB:CC:DD:EE:FF", "vehicle-1", "BM6", reading).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod factory;
pub mod json_backend;
pub mod null_backend;
pub mod resilient;
pub mod retry;
pub mod validate;

#[cfg(feature = "influxdb")]
pub mod influx_backend;

pub use backend::{Capability, StorageBackend, StorageHealth, StorageMetrics, VehicleSummary};
pub use error::{Error, Result};
pub use factory::build_backend;
pub use json_backend::JsonFileBackend;
pub use null_backend::NullBackend;
pub use resilient::{ConnectionState, ResilientConfig, ResilientStore};
pub use retry::RetryConfig;

#[cfg(feature = "influxdb")]
pub use influx_backend::InfluxBackend;
