//! Core BLE library for Battery Hawk's vehicle battery monitors.
//!
//! This crate provides Bluetooth Low Energy communication with BM2/BM6
//! battery monitors: device discovery and family classification, a bounded
//! connection pool, per-family protocol adapters, connection retry with
//! backoff, an event bus, and the device/vehicle registries that back the
//! orchestrator in `batteryhawk-service`.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use batteryhawk_core::{BlePoolTransport, ConnectionPool, PoolConfig};
//! use batteryhawk_core::bm6::Bm6Device;
//! use batteryhawk_core::traits::Device;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(BlePoolTransport::first_adapter().await?);
//!     let pool = ConnectionPool::new(transport, PoolConfig::default());
//!
//!     let mac = "AA:BB:CC:DD:EE:FF".parse()?;
//!     let device = Bm6Device::new(mac, pool);
//!     device.connect().await?;
//!     let reading = device.read_data().await?;
//!     println!("voltage: {} V", reading.voltage_v);
//!
//!     Ok(())
//! }
//! ```

pub mod ble_transport;
pub mod bm2;
pub mod bm6;
pub mod discovery;
pub mod error;
pub mod events;
pub mod pool;
pub mod registry;
pub mod retry;
pub mod state;
pub mod traits;
pub mod transport;
pub mod vehicle_registry;

pub use ble_transport::BlePoolTransport;
pub use discovery::{Advertisement, AutoConfigRule, AutoConfigRules, Sighting};
pub use error::{Error, Result};
pub use events::{Event, EventDispatcher, EventReceiver, EventSender};
pub use pool::{ConnectionPool, PoolConfig};
pub use registry::{DeviceRegistry, NullPersistence, SectionPersistence};
pub use retry::{with_retry, RetryConfig};
pub use state::StateManager;
pub use traits::{CommandParams, Device, DeviceStatus};
pub use transport::Transport;
pub use vehicle_registry::{NullVehiclePersistence, ReferenceCheck, VehicleRegistry, VehicleSectionPersistence};
