//! Shared data types for battery-hawk: the Device/Vehicle/Reading domain
//! model, the BLE UUID contract BM2/BM6 adapters parse against, and the
//! error taxonomy every other crate in the workspace propagates.

pub mod device;
pub mod error;
pub mod family;
pub mod mac;
pub mod queue;
pub mod reading;
pub mod runtime;
pub mod uuid;
pub mod vehicle;

pub use device::{ConnectionConfig, Device, DeviceStatus};
pub use error::{Error, Result};
pub use family::Family;
pub use mac::MacAddress;
pub use queue::{BoundedRingBuffer, BufferedReading, QueuedMessage};
pub use reading::{Reading, ReadingBuilder};
pub use runtime::{ConnectionState, DeviceRuntimeState, StateTransition};
pub use vehicle::Vehicle;

/// BLE UUID and manufacturer-ID constants, aliased for readability at call
/// sites (`batteryhawk_types::ble::NOTIFY_CHARACTERISTIC`).
pub use uuid as ble;
