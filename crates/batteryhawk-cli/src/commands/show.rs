//! Show command: fetch a device (and its latest reading) or list all
//! devices from a running service.

use anyhow::Result;

use crate::client::ServiceClient;

pub async fn cmd_show(client: &ServiceClient, mac: Option<&str>, json: bool) -> Result<()> {
    let Some(mac) = mac else {
        let list = client.list_devices().await?;
        print_value(&list, json);
        return Ok(());
    };

    let device = client.get_device(mac).await?;
    if json {
        let reading = client.get_latest_reading(mac).await.ok();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "device": device,
                "latest_reading": reading,
            }))?
        );
        return Ok(());
    }

    print_value(&device, false);
    match client.get_latest_reading(mac).await {
        Ok(reading) => println!("latest reading: {reading}"),
        Err(e) => println!("latest reading: unavailable ({e})"),
    }

    Ok(())
}

fn print_value(value: &serde_json::Value, json: bool) {
    if json {
        if let Ok(pretty) = serde_json::to_string_pretty(value) {
            println!("{pretty}");
        }
    } else {
        println!("{value}");
    }
}
