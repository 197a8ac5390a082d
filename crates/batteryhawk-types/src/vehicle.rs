//! The Vehicle entity: a named grouping of one or more devices.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A vehicle, unique by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Cached count of devices referencing this vehicle; recomputed by the
    /// registry whenever device associations change.
    pub device_count: u32,
}

impl Vehicle {
    pub fn new(id: impl Into<String>, name: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_at,
            device_count: 0,
        }
    }

    /// Format a generated id from a monotonic sequence number, e.g.
    /// `vehicle_7`.
    pub fn format_generated_id(seq: u64) -> String {
        format!("vehicle_{seq}")
    }
}
