//! Set command: PATCH a single field on a configured device.

use anyhow::{bail, Result};

use crate::client::ServiceClient;

const FIELDS: &[&str] = &["device_type", "friendly_name", "vehicle_id", "polling_interval"];

pub async fn cmd_set(client: &ServiceClient, mac: &str, field: &str, value: &str, json: bool) -> Result<()> {
    if !FIELDS.contains(&field) {
        bail!("unknown field '{field}', expected one of {FIELDS:?}");
    }

    let json_value = if field == "polling_interval" {
        let interval: u32 = value.parse().map_err(|_| anyhow::anyhow!("polling_interval must be an integer number of seconds"))?;
        serde_json::json!(interval)
    } else {
        serde_json::json!(value)
    };

    let body = serde_json::json!({ field: json_value });
    let device = client.patch_device(mac, &body).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&device)?);
    } else {
        println!("{device}");
    }

    Ok(())
}
