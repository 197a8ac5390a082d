//! Minimal InfluxDB 2.x backend over its HTTP API: line protocol for
//! writes, Flux for reads. Gated behind the `influxdb` feature since it is
//! the one backend with a real network dependency.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use batteryhawk_types::Reading;
use reqwest::Client;
use time::OffsetDateTime;

use crate::backend::{Capability, StorageBackend, VehicleSummary};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

pub struct InfluxBackend {
    config: InfluxConfig,
    client: Client,
    connected: AtomicBool,
}

impl InfluxBackend {
    pub fn new(config: InfluxConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            connected: AtomicBool::new(false),
        }
    }

    fn write_url(&self) -> String {
        format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ns",
            self.config.url.trim_end_matches('/'),
            self.config.org,
            self.config.bucket
        )
    }

    fn query_url(&self) -> String {
        format!(
            "{}/api/v2/query?org={}",
            self.config.url.trim_end_matches('/'),
            self.config.org
        )
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.config.token)
    }
}

fn escape_tag(value: &str) -> String {
    value.replace(' ', "\\ ").replace(',', "\\,").replace('=', "\\=")
}

fn line_protocol(device_id: &str, vehicle_id: &str, device_type: &str, reading: &Reading) -> String {
    let mut fields = vec![
        format!("voltage_v={}", reading.voltage_v),
        format!("current_a={}", reading.current_a),
    ];
    if let Some(t) = reading.temperature_c {
        fields.push(format!("temperature_c={t}"));
    }
    if let Some(soc) = reading.state_of_charge_pct {
        fields.push(format!("state_of_charge_pct={soc}"));
    }
    let timestamp_ns = reading.timestamp.unix_timestamp_nanos();
    format!(
        "battery_reading,device_id={},vehicle_id={},device_type={} {} {}",
        escape_tag(device_id),
        escape_tag(vehicle_id),
        escape_tag(device_type),
        fields.join(","),
        timestamp_ns
    )
}

#[async_trait]
impl StorageBackend for InfluxBackend {
    fn backend_name(&self) -> &'static str {
        "influxdb"
    }

    fn backend_version(&self) -> &'static str {
        "2.x"
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([
            Capability::TimeSeries,
            Capability::Aggregation,
            Capability::Retention,
            Capability::RealTime,
        ])
    }

    async fn connect(&self) -> Result<()> {
        let url = format!("{}/health", self.config.url.trim_end_matches('/'));
        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(Error::InvalidConfig(format!(
                "InfluxDB health check returned {}",
                response.status()
            )))
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn store_reading(
        &self,
        device_id: &str,
        vehicle_id: &str,
        device_type: &str,
        reading: &Reading,
    ) -> Result<()> {
        let body = line_protocol(device_id, vehicle_id, device_type, reading);
        let response = self
            .client
            .post(self.write_url())
            .header("Authorization", self.auth_header())
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::InvalidConfig(format!(
                "InfluxDB write returned {}",
                response.status()
            )))
        }
    }

    async fn get_recent_readings(&self, device_id: &str, limit: usize) -> Result<Vec<Reading>> {
        let flux = format!(
            "from(bucket: \"{bucket}\") |> range(start: -30d) \
             |> filter(fn: (r) => r._measurement == \"battery_reading\" and r.device_id == \"{device_id}\") \
             |> sort(columns: [\"_time\"], desc: true) |> limit(n: {limit})",
            bucket = self.config.bucket,
        );
        let csv = self.run_flux(&flux).await?;
        Ok(parse_readings_csv(&csv))
    }

    async fn get_vehicle_summary(&self, vehicle_id: &str, hours: u32) -> Result<VehicleSummary> {
        let flux = format!(
            "from(bucket: \"{bucket}\") |> range(start: -{hours}h) \
             |> filter(fn: (r) => r._measurement == \"battery_reading\" and r.vehicle_id == \"{vehicle_id}\")",
            bucket = self.config.bucket,
        );
        let csv = self.run_flux(&flux).await?;
        let readings = parse_readings_csv(&csv);
        let count = readings.len() as u64;
        let avg_voltage_v = average(readings.iter().map(|r| r.voltage_v));
        let avg_current_a = average(readings.iter().map(|r| r.current_a));
        let temps: Vec<f64> = readings.iter().filter_map(|r| r.temperature_c).collect();
        let avg_temperature_c = if temps.is_empty() {
            None
        } else {
            Some(average(temps.into_iter()))
        };
        Ok(VehicleSummary {
            vehicle_id: vehicle_id.to_string(),
            period_hours: hours,
            avg_voltage_v,
            avg_current_a,
            avg_temperature_c,
            reading_count: count,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.config.url.trim_end_matches('/'));
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }
}

impl InfluxBackend {
    async fn run_flux(&self, query: &str) -> Result<String> {
        let response = self
            .client
            .post(self.query_url())
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(query.to_string())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::InvalidConfig(format!(
                "InfluxDB query returned {}",
                response.status()
            )));
        }
        Ok(response.text().await?)
    }
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0u64), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Parses the annotated CSV Flux returns into [`Reading`]s. Only the pivoted
/// `_field`/`_value` shape with `voltage_v`/`current_a`/`temperature_c`/
/// `state_of_charge_pct` fields and a `_time` column is understood; rows
/// that don't fit are skipped rather than erroring.
fn parse_readings_csv(csv: &str) -> Vec<Reading> {
    let mut header: Option<Vec<String>> = None;
    let mut readings = Vec::new();

    for line in csv.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = line.split(',').collect();
        if header.is_none() {
            header = Some(cols.iter().map(|s| s.to_string()).collect());
            continue;
        }
        let Some(hdr) = &header else { continue };
        let col = |name: &str| -> Option<&str> {
            hdr.iter().position(|h| h == name).and_then(|i| cols.get(i)).copied()
        };

        let Some(time_str) = col("_time") else { continue };
        let Ok(timestamp) = OffsetDateTime::parse(time_str, &time::format_description::well_known::Rfc3339)
        else {
            continue;
        };
        let voltage_v = col("voltage_v").and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let current_a = col("current_a").and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let temperature_c = col("temperature_c").and_then(|s| s.parse().ok());
        let state_of_charge_pct = col("state_of_charge_pct").and_then(|s| s.parse().ok());

        let mut builder = Reading::builder(voltage_v, current_a).timestamp(timestamp);
        if let Some(t) = temperature_c {
            builder = builder.temperature_c(t);
        }
        if let Some(s) = state_of_charge_pct {
            builder = builder.state_of_charge_pct(s);
        }
        readings.push(builder.build());
    }
    readings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_protocol_escapes_tag_values() {
        let reading = Reading::builder(12.6, -1.2).build();
        let line = line_protocol("vehicle fleet", "a,b", "BM6", &reading);
        assert!(line.contains("vehicle_id=a\\,b"));
        assert!(line.contains("device_id=vehicle\\ fleet"));
    }

    #[test]
    fn parses_empty_csv_as_no_readings() {
        assert!(parse_readings_csv("").is_empty());
    }
}
