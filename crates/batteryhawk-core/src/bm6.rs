//! BM6-class protocol adapter (spec.md §4.2): subscribe to the notify
//! characteristic, latch the first well-formed frame, fall back to the
//! last cached reading if no frame arrives within the wait timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::timeout;

use batteryhawk_types::{ble, Family, MacAddress, Reading};

use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::traits::{CommandParams, Device, DeviceStatus};

/// Time to wait for a fresh notification before falling back to the
/// cached reading.
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Voltage/temperature/SoC request, written before every `read_data` wait
/// (and once on `connect`, per spec.md §4.2).
const DATA_REQUEST: [u8; 1] = [0x01];
/// Status request written by `send_command("status", _)`.
const STATUS_REQUEST: [u8; 1] = [0x02];

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct Bm6Device {
    mac: MacAddress,
    pool: Arc<ConnectionPool>,
    latest: Mutex<Option<Reading>>,
}

impl Bm6Device {
    pub fn new(mac: MacAddress, pool: Arc<ConnectionPool>) -> Self {
        Self {
            mac,
            pool,
            latest: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Device for Bm6Device {
    async fn connect(&self) -> Result<()> {
        self.pool.connect(&self.mac, Family::Bm6).await?;
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
            Ok(Some(bytes)) => match Reading::from_bm6_bytes(&bytes) {
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
        &["voltage", "current", "temperature", "state_of_charge"]
    }

    fn device_type(&self) -> Family {
        Family::Bm6
    }

    fn address(&self) -> &str {
        self.mac.as_str()
    }
}

impl Bm6Device {
    async fn fallback_or_err(&self, err: Error) -> Result<Reading> {
        match self.latest.lock().await.clone() {
            Some(reading) => Ok(reading),
            None => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::transport::Transport;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    struct StubTransport {
        connected: StdMutex<HashSet<String>>,
        /// Bytes to hand back on the next notify subscription, echoing the
        /// write that triggered it. `None` means stay silent (no frame).
        response: StdMutex<Option<Vec<u8>>>,
        writes: StdMutex<Vec<Vec<u8>>>,
    }

    impl StubTransport {
        fn silent() -> Self {
            Self {
                connected: StdMutex::new(HashSet::new()),
                response: StdMutex::new(None),
                writes: StdMutex::new(Vec::new()),
            }
        }

        fn responding_with(bytes: Vec<u8>) -> Self {
            Self {
                connected: StdMutex::new(HashSet::new()),
                response: StdMutex::new(Some(bytes)),
                writes: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn raw_connect(&self, mac: &str) -> Result<()> {
            self.connected.lock().unwrap().insert(mac.to_string());
            Ok(())
        }
        async fn raw_disconnect(&self, mac: &str) -> Result<()> {
            self.connected.lock().unwrap().remove(mac);
            Ok(())
        }
        async fn raw_write(&self, _mac: &str, _c: uuid::Uuid, bytes: &[u8]) -> Result<()> {
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
        async fn raw_subscribe(&self, _mac: &str, _c: uuid::Uuid) -> Result<tokio::sync::mpsc::Receiver<Vec<u8>>> {
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            if let Some(bytes) = self.response.lock().unwrap().clone() {
                let _ = tx.try_send(bytes);
            }
            Ok(rx)
        }
        async fn raw_unsubscribe(&self, _mac: &str, _c: uuid::Uuid) -> Result<()> {
            Ok(())
        }
        async fn raw_is_connected(&self, mac: &str) -> Result<bool> {
            Ok(self.connected.lock().unwrap().contains(mac))
        }
        async fn raw_scan(&self, _d: Duration) -> Result<Vec<crate::discovery::Sighting>> {
            Ok(Vec::new())
        }
    }

    fn mac() -> MacAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    #[tokio::test]
    async fn read_data_without_notification_or_cache_times_out() {
        let pool = ConnectionPool::new(
            Arc::new(StubTransport::silent()),
            PoolConfig {
                cleanup_interval: Duration::from_secs(3600),
                ..PoolConfig::default()
            },
        );
        let adapter = Bm6Device::new(mac(), pool);
        adapter.connect().await.unwrap();
        let result = adapter.read_data().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connect_writes_data_request_on_the_write_characteristic() {
        let transport = Arc::new(StubTransport::silent());
        let pool = ConnectionPool::new(transport.clone(), PoolConfig::default());
        let adapter = Bm6Device::new(mac(), pool);
        adapter.connect().await.unwrap();
        assert_eq!(transport.writes.lock().unwrap().as_slice(), &[DATA_REQUEST.to_vec()]);
    }

    #[tokio::test]
    async fn read_data_writes_request_then_parses_the_response() {
        let voltage = 12600u16.to_le_bytes();
        let current = 0i16.to_le_bytes();
        let temp = 235i16.to_le_bytes();
        let body = [0x01, voltage[0], voltage[1], current[0], current[1], temp[0], temp[1], 87];
        let checksum = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        let mut frame = body.to_vec();
        frame.push(checksum);

        let pool = ConnectionPool::new(Arc::new(StubTransport::responding_with(frame)), PoolConfig::default());
        let adapter = Bm6Device::new(mac(), pool);
        adapter.connect().await.unwrap();
        let reading = adapter.read_data().await.unwrap();
        assert_eq!(reading.voltage_v, 12.6);
        assert_eq!(reading.state_of_charge_pct, Some(87.0));
    }

    #[tokio::test]
    async fn send_command_status_returns_a_status_snapshot() {
        let pool = ConnectionPool::new(Arc::new(StubTransport::responding_with(vec![0xAA, 0xBB])), PoolConfig::default());
        let adapter = Bm6Device::new(mac(), pool);
        adapter.connect().await.unwrap();
        let status = adapter.send_command("status", None).await.unwrap();
        assert_eq!(status.fields.get("raw_hex").map(String::as_str), Some("aabb"));
    }

    #[tokio::test]
    async fn send_command_rejects_unknown_commands() {
        let pool = ConnectionPool::new(Arc::new(StubTransport::silent()), PoolConfig::default());
        let adapter = Bm6Device::new(mac(), pool);
        adapter.connect().await.unwrap();
        assert!(adapter.send_command("reboot", None).await.is_err());
    }

    #[test]
    fn capabilities_include_temperature() {
        let pool = ConnectionPool::new(Arc::new(StubTransport::silent()), PoolConfig::default());
        let adapter = Bm6Device::new(mac(), pool);
        assert!(adapter.capabilities().contains(&"temperature"));
    }
}
