//! [`Transport`] implementation backed by real Bluetooth Low Energy
//! hardware via `btleplug`.
//!
//! Grounded in the teacher's `Device` connection/notification/find-by-cache
//! patterns, generalized from a single owned peripheral to a multi-device
//! map keyed by mac since the pool, not an adapter struct, now owns
//! connection lifetime.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use batteryhawk_types::MacAddress;

use crate::discovery::{Advertisement, Sighting};
use crate::error::{Error, Result};
use crate::transport::Transport;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

struct Session {
    peripheral: Peripheral,
    characteristics: HashMap<Uuid, Characteristic>,
}

/// A [`Transport`] that drives a single platform BLE adapter.
pub struct BlePoolTransport {
    adapter: Adapter,
    sessions: RwLock<HashMap<String, Session>>,
}

impl BlePoolTransport {
    /// Acquire the first available adapter from the platform manager.
    pub async fn first_adapter() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidConfig("no Bluetooth adapter found".into()))?;
        Ok(Self {
            adapter,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    async fn find_peripheral(&self, mac: &str) -> Result<Peripheral> {
        for peripheral in self.adapter.peripherals().await? {
            if let Ok(Some(props)) = peripheral.properties().await {
                if props.address.to_string().eq_ignore_ascii_case(mac) {
                    return Ok(peripheral);
                }
            }
        }
        Err(Error::Kind(
            batteryhawk_types::Error::connection("device not found in adapter's peripheral cache")
                .with_device_address(mac),
        ))
    }

    async fn characteristic(&self, mac: &str, uuid: Uuid) -> Result<Characteristic> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(mac).ok_or_else(|| {
            Error::Kind(batteryhawk_types::Error::state("not connected").with_device_address(mac))
        })?;
        session
            .characteristics
            .get(&uuid)
            .cloned()
            .ok_or_else(|| Error::Kind(batteryhawk_types::Error::protocol(format!("characteristic {uuid} not found")).with_device_address(mac)))
    }
}

#[async_trait]
impl Transport for BlePoolTransport {
    async fn raw_connect(&self, mac: &str) -> Result<()> {
        if self.sessions.read().await.contains_key(mac) {
            return Ok(());
        }

        let peripheral = self.find_peripheral(mac).await?;
        timeout(CONNECT_TIMEOUT, peripheral.connect())
            .await
            .map_err(|_| Error::Kind(batteryhawk_types::Error::timeout("connect").with_device_address(mac)))??;

        timeout(DISCOVERY_TIMEOUT, peripheral.discover_services())
            .await
            .map_err(|_| Error::Kind(batteryhawk_types::Error::timeout("discover services").with_device_address(mac)))??;

        let mut characteristics = HashMap::new();
        for service in peripheral.services() {
            for characteristic in service.characteristics {
                characteristics.insert(characteristic.uuid, characteristic);
            }
        }
        debug!(mac, count = characteristics.len(), "cached characteristics");

        self.sessions.write().await.insert(
            mac.to_string(),
            Session { peripheral, characteristics },
        );
        Ok(())
    }

    async fn raw_disconnect(&self, mac: &str) -> Result<()> {
        let session = self.sessions.write().await.remove(mac);
        if let Some(session) = session {
            session.peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn raw_write(&self, mac: &str, characteristic: Uuid, bytes: &[u8]) -> Result<()> {
        let char = self.characteristic(mac, characteristic).await?;
        let sessions = self.sessions.read().await;
        let session = sessions.get(mac).expect("checked by characteristic()");
        timeout(WRITE_TIMEOUT, session.peripheral.write(&char, bytes, WriteType::WithResponse))
            .await
            .map_err(|_| Error::Kind(batteryhawk_types::Error::timeout("write characteristic").with_device_address(mac)))??;
        Ok(())
    }

    async fn raw_subscribe(&self, mac: &str, characteristic: Uuid) -> Result<mpsc::Receiver<Vec<u8>>> {
        let char = self.characteristic(mac, characteristic).await?;
        let peripheral = {
            let sessions = self.sessions.read().await;
            sessions.get(mac).expect("checked by characteristic()").peripheral.clone()
        };
        peripheral.subscribe(&char).await?;

        let (tx, rx) = mpsc::channel(16);
        let mut stream = peripheral.notifications().await?;
        tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == char.uuid && tx.send(notification.value).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn raw_unsubscribe(&self, mac: &str, characteristic: Uuid) -> Result<()> {
        let char = self.characteristic(mac, characteristic).await?;
        let sessions = self.sessions.read().await;
        let session = sessions.get(mac).expect("checked by characteristic()");
        session.peripheral.unsubscribe(&char).await?;
        Ok(())
    }

    async fn raw_is_connected(&self, mac: &str) -> Result<bool> {
        let sessions = self.sessions.read().await;
        match sessions.get(mac) {
            Some(session) => Ok(session.peripheral.is_connected().await.unwrap_or(false)),
            None => Ok(false),
        }
    }

    async fn raw_scan(&self, duration: Duration) -> Result<Vec<Sighting>> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(duration).await;
        self.adapter.stop_scan().await?;

        let mut sightings = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let Some(props) = peripheral.properties().await.ok().flatten() else {
                continue;
            };
            let Ok(mac) = props.address.to_string().parse::<MacAddress>() else {
                warn!("skipping peripheral with unparseable address");
                continue;
            };
            sightings.push(Sighting {
                mac,
                name: props.local_name,
                rssi: props.rssi,
                discovered_at: time::OffsetDateTime::now_utc(),
                advertisement: Advertisement {
                    service_uuids: props.services,
                    manufacturer_data: props.manufacturer_data,
                    service_data: props.service_data,
                    local_name: None,
                    tx_power: props.tx_power_level,
                    platform_data: HashMap::new(),
                },
            });
        }
        Ok(sightings)
    }
}
