//! Input validation shared by every storage backend caller.

use crate::error::{Error, Result};

const MAX_QUERY_LIMIT: usize = 10_000;
const MAX_HOURS: u32 = 8_760;

/// Validates a device id: non-empty, alphanumeric plus `:` and `-`
/// (MAC-like identifiers).
pub fn validate_device_id(device_id: &str) -> Result<()> {
    if device_id.is_empty()
        || !device_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '-')
    {
        return Err(Error::InvalidConfig(format!(
            "invalid device id: {device_id}"
        )));
    }
    Ok(())
}

/// Validates a vehicle id: non-empty, `[A-Za-z0-9_-]+`.
pub fn validate_vehicle_id(vehicle_id: &str) -> Result<()> {
    if vehicle_id.is_empty()
        || !vehicle_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidConfig(format!(
            "invalid vehicle id: {vehicle_id}"
        )));
    }
    Ok(())
}

/// Validates a query limit, returning it unchanged when in `[1, 10000]`.
pub fn validate_limit(limit: usize) -> Result<usize> {
    if limit == 0 || limit > MAX_QUERY_LIMIT {
        return Err(Error::InvalidConfig(format!(
            "limit must be between 1 and {MAX_QUERY_LIMIT}, got {limit}"
        )));
    }
    Ok(limit)
}

/// Validates an hours-lookback window, returning it unchanged when in
/// `(0, 8760]`.
pub fn validate_hours(hours: u32) -> Result<u32> {
    if hours == 0 || hours > MAX_HOURS {
        return Err(Error::InvalidConfig(format!(
            "hours must be between 1 and {MAX_HOURS}, got {hours}"
        )));
    }
    Ok(hours)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_mac_like_device_ids() {
        assert!(validate_device_id("AA:BB:CC:DD:EE:FF").is_ok());
        assert!(validate_device_id("aa-bb-cc-dd-ee-ff").is_ok());
    }

    #[test]
    fn rejects_empty_and_punctuation_device_ids() {
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id("not a mac!").is_err());
        assert!(validate_device_id("GG:HH:II:JJ:KK:LL").is_err());
    }

    #[test]
    fn vehicle_id_allows_underscore_and_dash() {
        assert!(validate_vehicle_id("vehicle_1").is_ok());
        assert!(validate_vehicle_id("vehicle-1").is_ok());
        assert!(validate_vehicle_id("vehicle 1").is_err());
    }

    #[test]
    fn limit_boundaries() {
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(1).is_ok());
        assert!(validate_limit(10_000).is_ok());
        assert!(validate_limit(10_001).is_err());
    }

    #[test]
    fn hours_boundaries() {
        assert!(validate_hours(0).is_err());
        assert!(validate_hours(1).is_ok());
        assert!(validate_hours(8_760).is_ok());
        assert!(validate_hours(8_761).is_err());
    }
}
