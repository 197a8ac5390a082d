//! Point-in-time telemetry produced by a device protocol adapter.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Minimum frame length accepted by [`Reading::from_bm6_bytes`]: a 1-byte
/// opcode, 2-byte voltage, 2-byte current, 2-byte temperature, 1-byte SoC,
/// 1-byte checksum.
pub const MIN_BM6_FRAME_BYTES: usize = 9;

/// Minimum frame length accepted by [`Reading::from_bm2_bytes`]: a 1-byte
/// opcode, 2-byte voltage, 1-byte SoC, 1-byte checksum.
pub const MIN_BM2_FRAME_BYTES: usize = 5;

/// A single telemetry sample. Immutable once produced; flows to storage,
/// MQTT, and the state manager's last-value cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub voltage_v: f64,
    pub current_a: f64,
    pub temperature_c: Option<f64>,
    pub state_of_charge_pct: Option<f64>,
    pub capacity_mah: Option<f64>,
    pub cycles: Option<u32>,
    pub power_w: Option<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Fluent builder for [`Reading`], mirroring the pattern used for the
/// other record types in this crate.
#[derive(Debug, Default, Clone)]
pub struct ReadingBuilder {
    voltage_v: f64,
    current_a: f64,
    temperature_c: Option<f64>,
    state_of_charge_pct: Option<f64>,
    capacity_mah: Option<f64>,
    cycles: Option<u32>,
    power_w: Option<f64>,
    extra: HashMap<String, f64>,
    timestamp: Option<OffsetDateTime>,
}

impl ReadingBuilder {
    pub fn new(voltage_v: f64, current_a: f64) -> Self {
        Self {
            voltage_v,
            current_a,
            ..Default::default()
        }
    }

    pub fn temperature_c(mut self, value: f64) -> Self {
        self.temperature_c = Some(value);
        self
    }

    pub fn state_of_charge_pct(mut self, value: f64) -> Self {
        self.state_of_charge_pct = Some(value);
        self
    }

    pub fn capacity_mah(mut self, value: f64) -> Self {
        self.capacity_mah = Some(value);
        self
    }

    pub fn cycles(mut self, value: u32) -> Self {
        self.cycles = Some(value);
        self
    }

    pub fn power_w(mut self, value: f64) -> Self {
        self.power_w = Some(value);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: f64) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn timestamp(mut self, value: OffsetDateTime) -> Self {
        self.timestamp = Some(value);
        self
    }

    pub fn build(self) -> Reading {
        let power_w = self
            .power_w
            .unwrap_or(self.voltage_v * self.current_a);
        Reading {
            voltage_v: self.voltage_v,
            current_a: self.current_a,
            temperature_c: self.temperature_c,
            state_of_charge_pct: self.state_of_charge_pct,
            capacity_mah: self.capacity_mah,
            cycles: self.cycles,
            power_w: Some(power_w),
            extra: self.extra,
            timestamp: self.timestamp.unwrap_or_else(OffsetDateTime::now_utc),
        }
    }
}

impl Reading {
    pub fn builder(voltage_v: f64, current_a: f64) -> ReadingBuilder {
        ReadingBuilder::new(voltage_v, current_a)
    }

    /// Parse a BM6-class voltage/current/temperature/SoC notification frame.
    ///
    /// Layout (illustrative, see module docs on [`crate::ble`]):
    /// `[opcode: u8][voltage: u16LE, mV][current: i16LE, mA]
    /// [temperature: i16LE, in 0.1C][soc: u8][checksum: u8]`.
    /// The checksum is the low byte of the sum of all preceding bytes.
    pub fn from_bm6_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_BM6_FRAME_BYTES {
            return Err(Error::data_parsing(format!(
                "BM6 frame too short: expected at least {MIN_BM6_FRAME_BYTES} bytes, got {}",
                data.len()
            )));
        }

        verify_checksum(&data[..MIN_BM6_FRAME_BYTES])?;

        let voltage_mv = u16::from_le_bytes([data[1], data[2]]);
        let current_ma = i16::from_le_bytes([data[3], data[4]]);
        let temp_tenths = i16::from_le_bytes([data[5], data[6]]);
        let soc = data[7];

        if soc > 100 {
            return Err(Error::data_parsing(format!(
                "state of charge out of range: {soc}"
            )));
        }

        Ok(Reading::builder(
            f64::from(voltage_mv) / 1000.0,
            f64::from(current_ma) / 1000.0,
        )
        .temperature_c(f64::from(temp_tenths) / 10.0)
        .state_of_charge_pct(f64::from(soc))
        .build())
    }

    /// Parse a BM2-class voltage/SoC notification frame (no current or
    /// temperature channel).
    ///
    /// Layout: `[opcode: u8][voltage: u16LE, mV][soc: u8][checksum: u8]`.
    pub fn from_bm2_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_BM2_FRAME_BYTES {
            return Err(Error::data_parsing(format!(
                "BM2 frame too short: expected at least {MIN_BM2_FRAME_BYTES} bytes, got {}",
                data.len()
            )));
        }

        verify_checksum(&data[..MIN_BM2_FRAME_BYTES])?;

        let voltage_mv = u16::from_le_bytes([data[1], data[2]]);
        let soc = data[3];

        if soc > 100 {
            return Err(Error::data_parsing(format!(
                "state of charge out of range: {soc}"
            )));
        }

        Ok(Reading::builder(f64::from(voltage_mv) / 1000.0, 0.0)
            .state_of_charge_pct(f64::from(soc))
            .build())
    }
}

fn verify_checksum(frame: &[u8]) -> Result<()> {
    let (body, checksum_byte) = frame.split_at(frame.len() - 1);
    let computed = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if computed != checksum_byte[0] {
        return Err(Error::checksum(format!(
            "frame checksum mismatch: computed 0x{computed:02x}, frame claims 0x{:02x}",
            checksum_byte[0]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(body: &[u8]) -> Vec<u8> {
        let checksum = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        let mut frame = body.to_vec();
        frame.push(checksum);
        frame
    }

    #[test]
    fn builder_derives_power_from_voltage_and_current() {
        let reading = Reading::builder(12.0, 2.0).build();
        assert_eq!(reading.power_w, Some(24.0));
    }

    #[test]
    fn builder_respects_explicit_power() {
        let reading = Reading::builder(12.0, 2.0).power_w(100.0).build();
        assert_eq!(reading.power_w, Some(100.0));
    }

    #[test]
    fn parses_valid_bm6_frame() {
        let voltage = 12600u16.to_le_bytes();
        let current = (-1500i16).to_le_bytes();
        let temp = 235i16.to_le_bytes();
        let body = [0x01, voltage[0], voltage[1], current[0], current[1], temp[0], temp[1], 87];
        let frame = framed(&body);

        let reading = Reading::from_bm6_bytes(&frame).unwrap();
        assert_eq!(reading.voltage_v, 12.6);
        assert_eq!(reading.current_a, -1.5);
        assert_eq!(reading.temperature_c, Some(23.5));
        assert_eq!(reading.state_of_charge_pct, Some(87.0));
    }

    #[test]
    fn rejects_bm6_frame_too_short() {
        let result = Reading::from_bm6_bytes(&[0x01, 0x02, 0x03]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_bm6_frame_with_bad_checksum() {
        let body = [0x01, 0x10, 0x27, 0x00, 0x00, 0x00, 0x00, 50];
        let mut frame = framed(&body);
        *frame.last_mut().unwrap() ^= 0xFF;
        let result = Reading::from_bm6_bytes(&frame);
        assert!(matches!(result, Err(Error::Checksum { .. })));
    }

    #[test]
    fn rejects_bm6_soc_out_of_range() {
        let body = [0x01, 0x10, 0x27, 0x00, 0x00, 0x00, 0x00, 101];
        let frame = framed(&body);
        let result = Reading::from_bm6_bytes(&frame);
        assert!(result.is_err());
    }

    #[test]
    fn parses_valid_bm2_frame() {
        let voltage = 3700u16.to_le_bytes();
        let body = [0x01, voltage[0], voltage[1], 64];
        let frame = framed(&body);

        let reading = Reading::from_bm2_bytes(&frame).unwrap();
        assert_eq!(reading.voltage_v, 3.7);
        assert_eq!(reading.current_a, 0.0);
        assert_eq!(reading.state_of_charge_pct, Some(64.0));
        assert_eq!(reading.temperature_c, None);
    }

    #[test]
    fn json_roundtrip_preserves_fields() {
        let reading = Reading::builder(12.6, -1.2)
            .temperature_c(23.4)
            .state_of_charge_pct(87.0)
            .extra("internal_resistance_ohm", 0.015)
            .timestamp(OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap())
            .build();
        let json = serde_json::to_string(&reading).unwrap();
        let back: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reading);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn from_bm6_bytes_never_panics(data: Vec<u8>) {
            let _ = Reading::from_bm6_bytes(&data);
        }

        #[test]
        fn from_bm2_bytes_never_panics(data: Vec<u8>) {
            let _ = Reading::from_bm2_bytes(&data);
        }

        #[test]
        fn valid_bm6_frames_always_parse(
            voltage in 0u16..20000,
            current in -10000i16..10000,
            temp in -400i16..800,
            soc in 0u8..=100,
        ) {
            let v = voltage.to_le_bytes();
            let c = current.to_le_bytes();
            let t = temp.to_le_bytes();
            let body = [0x01, v[0], v[1], c[0], c[1], t[0], t[1], soc];
            let checksum = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            let mut frame = body.to_vec();
            frame.push(checksum);

            let reading = Reading::from_bm6_bytes(&frame).unwrap();
            prop_assert!((reading.voltage_v - f64::from(voltage) / 1000.0).abs() < 1e-9);
            prop_assert!((reading.current_a - f64::from(current) / 1000.0).abs() < 1e-9);
        }
    }
}
