//! Append-only JSON-lines storage backend: one `<device>.jsonl` file per
//! device under a root directory. The default backend for deployments that
//! don't want to stand up a time-series database.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use batteryhawk_types::Reading;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::backend::{Capability, StorageBackend, VehicleSummary};
use crate::error::{Error, Result};

const DEFAULT_MAX_LINES_PER_DEVICE: usize = 100_000;

/// One line of a device's `.jsonl` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JsonRecord {
    device_id: String,
    vehicle_id: String,
    device_type: String,
    reading: Reading,
}

pub struct JsonFileBackend {
    root: PathBuf,
    write_lock: Mutex<()>,
    max_lines_per_device: usize,
}

impl JsonFileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
            max_lines_per_device: DEFAULT_MAX_LINES_PER_DEVICE,
        }
    }

    /// Sets the retention sweep threshold: once a device's file exceeds
    /// this many lines, the oldest entries are trimmed on the next write.
    pub fn with_retention(mut self, max_lines_per_device: usize) -> Self {
        self.max_lines_per_device = max_lines_per_device;
        self
    }

    fn device_path(&self, device_id: &str) -> PathBuf {
        self.root.join(format!("{}.jsonl", sanitize(device_id)))
    }

    async fn read_records(&self, device_id: &str) -> Result<Vec<JsonRecord>> {
        let path = self.device_path(device_id);
        match fs::read_to_string(&path).await {
            Ok(contents) => contents
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| serde_json::from_str(line).map_err(Error::from))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Trims a device's file down to its newest `max_lines_per_device`
    /// records via write-temp-then-rename, the same atomic-replace idiom
    /// used for persisting configuration.
    async fn rotate_if_needed(&self, device_id: &str) -> Result<()> {
        let mut records = self.read_records(device_id).await?;
        if records.len() <= self.max_lines_per_device {
            return Ok(());
        }
        let start = records.len() - self.max_lines_per_device;
        records.drain(..start);

        let path = self.device_path(device_id);
        let tmp_path = path.with_extension("jsonl.tmp");
        let mut buf = String::new();
        for record in &records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        fs::write(&tmp_path, buf).await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

fn sanitize(device_id: &str) -> String {
    device_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[async_trait]
impl StorageBackend for JsonFileBackend {
    fn backend_name(&self) -> &'static str {
        "json"
    }

    fn backend_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::TimeSeries, Capability::Retention])
    }

    async fn connect(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn store_reading(
        &self,
        device_id: &str,
        vehicle_id: &str,
        device_type: &str,
        reading: &Reading,
    ) -> Result<()> {
        let record = JsonRecord {
            device_id: device_id.to_string(),
            vehicle_id: vehicle_id.to_string(),
            device_type: device_type.to_string(),
            reading: reading.clone(),
        };
        let line = serde_json::to_string(&record)?;
        let path = self.device_path(device_id);

        {
            let _guard = self.write_lock.lock().await;
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }

        self.rotate_if_needed(device_id).await
    }

    async fn get_recent_readings(&self, device_id: &str, limit: usize) -> Result<Vec<Reading>> {
        let mut records = self.read_records(device_id).await?;
        records.reverse();
        records.truncate(limit);
        Ok(records.into_iter().map(|r| r.reading).collect())
    }

    async fn get_vehicle_summary(&self, vehicle_id: &str, hours: u32) -> Result<VehicleSummary> {
        let cutoff = OffsetDateTime::now_utc() - time::Duration::hours(i64::from(hours));

        let mut voltage_sum = 0.0;
        let mut current_sum = 0.0;
        let mut temp_sum = 0.0;
        let mut temp_count: u64 = 0;
        let mut count: u64 = 0;

        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VehicleSummary {
                    vehicle_id: vehicle_id.to_string(),
                    period_hours: hours,
                    avg_voltage_v: 0.0,
                    avg_current_a: 0.0,
                    avg_temperature_c: None,
                    reading_count: 0,
                });
            }
            Err(e) => return Err(Error::from(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(file_device_id) = entry
                .path()
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
            else {
                continue;
            };
            for record in self.read_records(&file_device_id).await? {
                if record.vehicle_id != vehicle_id || record.reading.timestamp < cutoff {
                    continue;
                }
                voltage_sum += record.reading.voltage_v;
                current_sum += record.reading.current_a;
                if let Some(t) = record.reading.temperature_c {
                    temp_sum += t;
                    temp_count += 1;
                }
                count += 1;
            }
        }

        Ok(VehicleSummary {
            vehicle_id: vehicle_id.to_string(),
            period_hours: hours,
            avg_voltage_v: if count > 0 { voltage_sum / count as f64 } else { 0.0 },
            avg_current_a: if count > 0 { current_sum / count as f64 } else { 0.0 },
            avg_temperature_c: if temp_count > 0 {
                Some(temp_sum / temp_count as f64)
            } else {
                None
            },
            reading_count: count,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.root.is_dir())
    }
}
