//! BM2-class protocol adapter (spec.md §4.2): voltage and state-of-charge
//! only, no current or temperature telemetry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::timeout;

use batteryhawk_types::{ble, Family, MacAddress, Reading};

use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::traits::{CommandParams, Device, DeviceStatus};

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Voltage/SoC request, written before every `read_data` wait (and once on
/// `connect`, per spec.md §4.2).
const DATA_REQUEST: [u8; 1] = [0x01];
/// Status request written by `send_command("status", _)`.
const STATUS_REQUEST: [u8; 1] = [0x02];

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct Bm2Device {
    mac: MacAddress,
    pool: Arc<ConnectionPool>,
    latest: Mutex<Option<Reading>>,
}

impl Bm2Device {
    pub fn new(mac: MacAddress, pool: Arc<ConnectionPool>) -> Self {
        Self {
            mac,
            pool,
            latest: Mutex::new(None),
        }
    }

    async fn fallback_or_err(&self, err: Error) -> Result<Reading> {
        match self.latest.lock().await.clone() {
            Some(reading) => Ok(reading),
            None => Err(err),
        }
    }
}

#[async_trait]
impl Device for Bm2Device {
    async fn connect(&self) -> Result<()> {
        self.pool.connect(&self.mac, Family::Bm2).await?;
        self.pool.write(&self.mac, ble::WRITE_CHARACTERISTIC, &DATA_REQUEST).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.pool.disconnect(&self.mac).await
    }

    async fn read_data(&self) -> Result<Reading> {
        let mut receiver = self.pool.subscribe(&self.mac, ble::NOTIFY_CHARACTERISTIC).await?;
        if let Err(e) = self.pool.write(&self.mac, ble::WRITE_CHARACTERISTIC, &DATA_REQUEST).await {
            let _ = self.pool.unsubscribe(&self.mac, ble::NOTIFY_CHARACTERISTIC).await;
            return self.fallback_or_err(e).await;
        }

        let frame = timeout(WAIT_TIMEOUT, receiver.recv()).await;
        let _ = self.pool.unsubscribe(&self.mac, ble::NOTIFY_CHARACTERISTIC).await;

        match frame {
            Ok(Some(bytes)) => match Reading::from_bm2_bytes(&bytes) {
                Ok(reading) => {
                    *self.latest.lock().await = Some(reading.clone());
                    Ok(reading)
                }
                Err(e) => self.fallback_or_err(e).await,
            },
            _ => {
                let err = Error::Kind(
                    batteryhawk_types::Error::timeout("no notification within wait window")
                        .with_device_address(self.mac.as_str()),
                );
                self.fallback_or_err(err).await
            }
        }
    }

    async fn send_command(&self, name: &str, _params: Option<CommandParams>) -> Result<DeviceStatus> {
        if name != "status" {
            return Err(Error::Kind(
                batteryhawk_types::Error::command(format!("unsupported command: {name}"))
                    .with_device_address(self.mac.as_str()),
            ));
        }

        let mut receiver = self.pool.subscribe(&self.mac, ble::NOTIFY_CHARACTERISTIC).await?;
        if let Err(e) = self.pool.write(&self.mac, ble::WRITE_CHARACTERISTIC, &STATUS_REQUEST).await {
            let _ = self.pool.unsubscribe(&self.mac, ble::NOTIFY_CHARACTERISTIC).await;
            return Err(e);
        }

        let frame = timeout(WAIT_TIMEOUT, receiver.recv()).await;
        let _ = self.pool.unsubscribe(&self.mac, ble::NOTIFY_CHARACTERISTIC).await;

        match frame {
            Ok(Some(bytes)) => Ok(DeviceStatus::new().with_field("raw_hex", hex_encode(&bytes))),
            _ => Err(Error::Kind(
                batteryhawk_types::Error::timeout("no status response within wait window")
                    .with_device_address(self.mac.as_str()),
            )),
        }
    }

    fn protocol_version(&self) -> Option<&str> {
        None
    }

    fn capabilities(&self) -> &[&'static str] {
        &["voltage", "state_of_charge"]
    }

    fn device_type(&self) -> Family {
        Family::Bm2
    }

    fn address(&self) -> &str {
        self.mac.as_str()
    }
}
