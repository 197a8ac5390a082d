//! Bluetooth UUIDs for BM2/BM6 battery monitors.
//!
//! The exact vendor frame formats are not publicly documented; these UUIDs
//! and the frame layout in [`crate::reading`] are an illustrative but
//! internally consistent contract, sufficient to exercise parsing,
//! checksum, and decrypt-hook seams. Real hardware constants are a
//! documented extension point.

use uuid::{Uuid, uuid};

/// Custom service shared by both BM2 and BM6 families.
pub const BATTERY_MONITOR_SERVICE: Uuid = uuid!("0000ff00-0000-1000-8000-00805f9b34fb");

/// Notify characteristic devices push voltage/temperature/state-of-charge
/// frames on.
pub const NOTIFY_CHARACTERISTIC: Uuid = uuid!("0000fff4-0000-1000-8000-00805f9b34fb");

/// Write characteristic commands (status requests, interval changes) are
/// sent on.
pub const WRITE_CHARACTERISTIC: Uuid = uuid!("0000fff3-0000-1000-8000-00805f9b34fb");

/// Manufacturer ID used in BM6 advertisement manufacturer-data frames.
pub const BM6_MANUFACTURER_ID: u16 = 0x5242;

/// Manufacturer ID used in BM2 advertisement manufacturer-data frames.
pub const BM2_MANUFACTURER_ID: u16 = 0x5243;

// --- Standard BLE Service/Characteristic UUIDs ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Device Information service.
pub const DEVICE_INFO_SERVICE: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");

/// Battery service.
pub const BATTERY_SERVICE: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");

/// Device name characteristic.
pub const DEVICE_NAME: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");

/// Battery level characteristic.
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");
