//! Save command: force an atomic re-write of the on-disk `devices.json`
//! and `vehicles.json` sections, constructing the config collaborator
//! directly rather than going through a running service.

use std::path::PathBuf;

use anyhow::Result;
use batteryhawk_core::{SectionPersistence, VehicleSectionPersistence};
use batteryhawk_service::config::{default_config_dir, load_devices, load_vehicles, ConfigManager, DevicesPersistence, VehiclesPersistence};

pub async fn cmd_save(config_dir: Option<PathBuf>) -> Result<()> {
    let config_dir = config_dir.unwrap_or_else(default_config_dir);
    let config = ConfigManager::load(config_dir).await?;

    let devices = load_devices(&config).await;
    let (vehicles, _) = load_vehicles(&config).await;

    DevicesPersistence::new(config.clone()).persist(&devices).await?;
    VehiclesPersistence::new(config.clone()).persist(&vehicles).await?;

    println!("saved {} device(s) and {} vehicle(s) to {}", devices.len(), vehicles.len(), config.dir().display());
    Ok(())
}
