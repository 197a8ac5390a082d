//! Device family classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The protocol family a battery monitor speaks.
///
/// Detection evidence is layered by specificity: a name substring match is
/// most specific, manufacturer-data pattern next, service-UUID membership
/// least specific. More specific evidence wins when signals disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Family {
    Bm2,
    Bm6,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Family {
    /// Classify by device-name substring (case-insensitive). Most specific
    /// evidence; checked first.
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        if upper.contains("BM6") {
            Some(Family::Bm6)
        } else if upper.contains("BM2") {
            Some(Family::Bm2)
        } else {
            None
        }
    }

    /// Classify by manufacturer-data byte pattern. Checked after name.
    pub fn from_manufacturer_data(data: &[u8]) -> Option<Self> {
        const BM6_PATTERNS: &[&[u8]] = &[b"BM6", b"Battery Monitor 6"];
        const BM2_PATTERNS: &[&[u8]] = &[b"BM2", b"Battery Monitor 2"];

        if BM6_PATTERNS.iter().any(|p| contains_subslice(data, p)) {
            Some(Family::Bm6)
        } else if BM2_PATTERNS.iter().any(|p| contains_subslice(data, p)) {
            Some(Family::Bm2)
        } else {
            None
        }
    }

    /// Classify by advertised service UUID membership. Least specific;
    /// both families share the same service UUID so this only confirms
    /// "some battery monitor", not which one.
    pub fn from_service_uuids(uuids: &[uuid::Uuid]) -> Option<Self> {
        if uuids.contains(&crate::ble::BATTERY_MONITOR_SERVICE) {
            Some(Family::Unknown)
        } else {
            None
        }
    }

    /// Whether this family is concrete (not `Unknown`).
    pub fn is_known(self) -> bool {
        !matches!(self, Family::Unknown)
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Bm2 => write!(f, "BM2"),
            Family::Bm6 => write!(f, "BM6"),
            Family::Unknown => write!(f, "unknown"),
        }
    }
}
