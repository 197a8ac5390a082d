//! CLI argument definitions.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "batteryhawk")]
#[command(author, version, about = "Thin CLI client for Battery Hawk", long_about = None)]
pub struct Cli {
    /// Base URL of a running batteryhawk-service instance.
    #[arg(long, global = true, env = "BATTERYHAWK_SERVICE_URL", default_value = "http://localhost:8080")]
    pub service_url: String,

    /// Configuration directory, used by standalone (service-less) commands.
    #[arg(long, global = true, env = "BATTERYHAWK_CONFIG_DIR")]
    pub config_dir: Option<std::path::PathBuf>,

    /// Print raw JSON instead of a formatted summary.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby BLE battery monitors (standalone, no running service required).
    Scan {
        /// Scan duration in seconds.
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },

    /// Show a configured device, or list all devices if no mac is given.
    Show {
        /// Device MAC address.
        mac: Option<String>,
    },

    /// Patch a single field on a configured device.
    Set {
        /// Device MAC address.
        mac: String,
        /// Field to update: device_type, friendly_name, vehicle_id, or polling_interval.
        field: String,
        /// New value for the field.
        value: String,
    },

    /// Force a re-save of the on-disk devices and vehicles sections.
    Save,
}
