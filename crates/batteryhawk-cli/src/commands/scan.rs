//! Scan command: a one-shot BLE scan run directly against local hardware,
//! independent of any running service.

use std::time::Duration;

use anyhow::{Context, Result};
use batteryhawk_core::{BlePoolTransport, ConnectionPool, PoolConfig};

pub async fn cmd_scan(duration: u64, json: bool) -> Result<()> {
    let transport = BlePoolTransport::first_adapter().await.context("no Bluetooth adapter available")?;
    let pool = ConnectionPool::new(std::sync::Arc::new(transport), PoolConfig::default());

    let sightings = pool.scan(Duration::from_secs(duration), false).await.context("scan failed")?;

    if json {
        let payload: Vec<_> = sightings
            .iter()
            .map(|s| {
                serde_json::json!({
                    "mac": s.mac.as_str(),
                    "name": s.name,
                    "rssi": s.rssi,
                    "family": s.classify_family(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if sightings.is_empty() {
        println!("No devices found.");
        return Ok(());
    }

    for sighting in &sightings {
        println!(
            "{:<18} {:<8} {:>5} dBm  {}",
            sighting.mac.as_str(),
            format!("{:?}", sighting.classify_family()),
            sighting.rssi.map(|r| r.to_string()).unwrap_or_else(|| "?".to_string()),
            sighting.name.as_deref().unwrap_or("")
        );
    }

    Ok(())
}
