//! The Orchestrator: owns every long-lived task and the event bus.
//!
//! `start()` brings storage and the pool up, installs signal handlers, and
//! spawns the four supervised loops (initial discovery, periodic
//! discovery, device-polling supervisor, vehicle-association supervisor).
//! `stop()` reverses all of it, tolerating individual task failures so one
//! stuck device never blocks a clean shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use batteryhawk_core::bm2::Bm2Device;
use batteryhawk_core::bm6::Bm6Device;
use batteryhawk_core::discovery::{self, AutoConfigRule, AutoConfigRules};
use batteryhawk_core::{Device, Event, Family, MacAddress};

use crate::config::AutoConfigRuleConfig;
use crate::state::AppState;

/// Status log cadence for the device-polling supervisor (every Nth wake).
const SUPERVISOR_LOG_EVERY: u64 = 10;
/// Supervisor wake interval.
const SUPERVISOR_INTERVAL: Duration = Duration::from_secs(30);
/// Vehicle-association supervisor interval.
const ASSOCIATION_INTERVAL: Duration = Duration::from_secs(3600);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the per-family protocol adapter the polling task drives, mirroring
/// the layered family detection used during discovery.
fn build_device(mac: MacAddress, family: Family, pool: Arc<batteryhawk_core::ConnectionPool>) -> Option<Box<dyn Device>> {
    match family {
        Family::Bm2 => Some(Box::new(Bm2Device::new(mac, pool))),
        Family::Bm6 => Some(Box::new(Bm6Device::new(mac, pool))),
        Family::Unknown => None,
    }
}

fn auto_config_rule_from(cfg: &AutoConfigRuleConfig) -> AutoConfigRule {
    AutoConfigRule {
        enabled: cfg.auto_configure,
        polling_interval_s: cfg.polling_interval,
        friendly_name_template: cfg.default_name_template.clone(),
    }
}

/// Owns the supervised background tasks. Holds no state of its own beyond
/// the join handles needed to tear them down; everything else lives on
/// [`AppState`].
pub struct Engine {
    state: Arc<AppState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    polling_tasks: Arc<tokio::sync::RwLock<HashMap<String, JoinHandle<()>>>>,
}

impl Engine {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            tasks: Mutex::new(Vec::new()),
            polling_tasks: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    /// Bring storage and the pool up, install signal handlers, and spawn
    /// the four supervised loops. Returns once everything is running; does
    /// not block on shutdown (call [`Engine::wait_for_shutdown`] for that).
    pub async fn start(&self) -> anyhow::Result<()> {
        self.state.storage.connect().await.ok();
        self.state
            .storage
            .spawn_flush_loop(self.shutdown_token_as_cancellation());
        self.spawn_tracked(self.state.mqtt.start(self.shutdown_token_as_cancellation())).await;

        self.install_signal_handlers();

        let system = self.state.config.system().await;

        if system.discovery.initial_scan {
            self.spawn_tracked(self.initial_discovery_task()).await;
        }
        self.spawn_tracked(self.periodic_discovery_task(Duration::from_secs(system.discovery.periodic_interval)))
            .await;
        self.spawn_tracked(self.polling_supervisor_task()).await;
        self.spawn_tracked(self.association_supervisor_task()).await;

        info!("orchestrator started");
        Ok(())
    }

    fn shutdown_token_as_cancellation(&self) -> tokio_util::sync::CancellationToken {
        self.state.shutdown.clone()
    }

    async fn spawn_tracked(&self, handle: JoinHandle<()>) {
        self.tasks.lock().await.push(handle);
    }

    fn install_signal_handlers(&self) {
        let shutdown = self.state.shutdown.clone();
        tokio::spawn(async move {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(%e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
            shutdown.cancel();
        });
    }

    /// Runs every loop until the shutdown latch fires, then calls
    /// [`Engine::stop`].
    pub async fn wait_for_shutdown(&self) {
        self.state.shutdown.cancelled().await;
        self.stop().await;
    }

    /// Fires `system_shutdown`, disconnects every active device and the
    /// storage backend, and reaps all supervised tasks. Errors from
    /// individual tasks are logged, never propagated: a clean shutdown
    /// should not itself fail because one device was misbehaving.
    pub async fn stop(&self) {
        info!("orchestrator stopping");
        self.state.events.send(Event::SystemShutdown);

        let polling = self.polling_tasks.write().await.drain().collect::<Vec<_>>();
        for (mac, handle) in polling {
            handle.abort();
            debug!(mac, "polling task aborted for shutdown");
        }

        for device in self.state.devices.list_configured().await {
            let mac = device.mac;
            let _ = self.state.pool.disconnect(&mac).await;
            self.state.events.send(Event::DeviceDisconnected {
                mac,
                reason: "shutdown".to_string(),
            });
        }

        let tasks = self.tasks.lock().await.drain(..).collect::<Vec<_>>();
        for task in tasks {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(%e, "supervised task exited with error during shutdown");
                }
            }
        }

        if let Err(e) = self.state.storage.disconnect().await {
            warn!(%e, "error disconnecting storage during shutdown");
        }

        info!("orchestrator stopped");
    }

    fn initial_discovery_task(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_discovery_cycle(&state).await {
                warn!(%e, "initial discovery scan failed");
            }
        })
    }

    fn periodic_discovery_task(&self, interval: Duration) -> JoinHandle<()> {
        let state = self.state.clone();
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = run_discovery_cycle(&state).await {
                            warn!(%e, "periodic discovery scan failed");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("periodic discovery task shutting down");
                        return;
                    }
                }
            }
        })
    }

    fn polling_supervisor_task(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        let shutdown = state.shutdown.clone();
        let polling_tasks = self.polling_tasks.clone();
        tokio::spawn(async move {
            let mut cycle: u64 = 0;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(SUPERVISOR_INTERVAL) => {}
                    _ = shutdown.cancelled() => {
                        debug!("polling supervisor shutting down");
                        return;
                    }
                }
                cycle += 1;

                let configured = state.devices.list_configured().await;
                {
                    let mut tasks = polling_tasks.write().await;
                    tasks.retain(|_, handle| !handle.is_finished());
                    for device in &configured {
                        let mac_str = device.mac.as_str().to_string();
                        if tasks.contains_key(&mac_str) {
                            continue;
                        }
                        let handle = spawn_polling_task(state.clone(), device.mac.clone(), device.family, device.polling_interval_s);
                        tasks.insert(mac_str, handle);
                    }
                }

                if cycle % SUPERVISOR_LOG_EVERY == 0 {
                    let active = polling_tasks.read().await.len();
                    info!(active, configured = configured.len(), "polling supervisor status");
                }
            }
        })
    }

    fn association_supervisor_task(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(ASSOCIATION_INTERVAL) => {}
                    _ = shutdown.cancelled() => {
                        debug!("vehicle association supervisor shutting down");
                        return;
                    }
                }
                if let Err(e) = run_association_cycle(&state).await {
                    warn!(%e, "vehicle association cycle failed");
                }
            }
        })
    }
}

async fn run_discovery_cycle(state: &Arc<AppState>) -> anyhow::Result<()> {
    let system = state.config.system().await;
    let duration = Duration::from_secs(system.discovery.scan_duration);
    let sightings = state.pool.scan(duration, system.discovery.stop_on_new_device).await?;
    info!(count = sightings.len(), "discovery scan complete");

    state.devices.register_discovered(&sightings).await?;
    for sighting in &sightings {
        state.events.send(Event::DeviceDiscovered {
            mac: sighting.mac.clone(),
            name: sighting.name.clone(),
        });
        state
            .mqtt
            .publish_discovery_found(&sighting.mac, sighting.classify_family(), sighting.rssi)
            .await;
    }

    if !system.discovery.auto_configure.enabled {
        return Ok(());
    }

    let rules = AutoConfigRules {
        bm2: system
            .discovery
            .auto_configure
            .rules
            .get("bm2")
            .map(auto_config_rule_from)
            .unwrap_or_default(),
        bm6: system
            .discovery
            .auto_configure
            .rules
            .get("bm6")
            .map(auto_config_rule_from)
            .unwrap_or_default(),
    };

    let devices = state.devices.clone();
    let already_configured_macs: std::collections::HashSet<String> = devices
        .list_configured()
        .await
        .into_iter()
        .map(|d| d.mac.as_str().to_string())
        .collect();

    let pending: Vec<_> = {
        let mut configure_calls = Vec::new();
        discovery::auto_configure(
            &sightings,
            &rules,
            |mac| already_configured_macs.contains(mac.as_str()),
            |sighting, family, friendly_name, polling_interval_s| {
                configure_calls.push((sighting.mac.clone(), family, friendly_name, polling_interval_s));
            },
        );
        configure_calls
    };

    for (mac, family, friendly_name, polling_interval_s) in pending {
        devices
            .configure(&mac, family, friendly_name, None, polling_interval_s)
            .await?;
    }

    Ok(())
}

async fn run_association_cycle(state: &Arc<AppState>) -> anyhow::Result<()> {
    let configured = state.devices.list_configured().await;
    let unassociated: Vec<_> = configured.into_iter().filter(|d| d.vehicle_id.is_none()).collect();
    if unassociated.is_empty() {
        return Ok(());
    }

    for device in unassociated {
        let name = device
            .friendly_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", device.family, device.mac.hex_suffix()));
        let vehicle = state.vehicles.create(None, name).await?;

        state
            .devices
            .configure(
                &device.mac,
                device.family,
                device.friendly_name.clone().unwrap_or_default(),
                Some(vehicle.id.clone()),
                device.polling_interval_s,
            )
            .await?;

        state.events.send(Event::VehicleAssociated {
            mac: device.mac.clone(),
            vehicle_id: vehicle.id.clone(),
        });
        info!(mac = device.mac.as_str(), vehicle = vehicle.id, "associated device with new vehicle");
    }

    Ok(())
}

fn spawn_polling_task(state: Arc<AppState>, mac: MacAddress, family: Family, polling_interval_s: u32) -> JoinHandle<()> {
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        state.state_manager.set_polling_active(&mac, true).await;
        let mut device: Option<Box<dyn Device>> = None;
        let mut first_tick = true;

        loop {
            if !first_tick {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(polling_interval_s as u64)) => {}
                    _ = shutdown.cancelled() => {
                        debug!(mac = mac.as_str(), "polling task shutting down");
                        return;
                    }
                }
            }
            first_tick = false;

            if shutdown.is_cancelled() {
                return;
            }

            if device.is_none() {
                match build_device(mac.clone(), family, state.pool.clone()) {
                    Some(d) => {
                        match tokio::time::timeout(CONNECT_TIMEOUT, d.connect()).await {
                            Ok(Ok(())) => {
                                state.events.send(Event::DeviceConnected { mac: mac.clone(), family });
                                device = Some(d);
                            }
                            Ok(Err(e)) => {
                                warn!(mac = mac.as_str(), error = %e, "device connect failed");
                                state.state_manager.set_polling_active(&mac, false).await;
                                state.events.send(Event::DeviceError {
                                    mac: mac.clone(),
                                    message: e.to_string(),
                                    error_code: 1001,
                                    transient: e.is_transient(),
                                });
                                continue;
                            }
                            Err(_) => {
                                warn!(mac = mac.as_str(), "device connect timed out");
                                state.state_manager.set_polling_active(&mac, false).await;
                                state.events.send(Event::DeviceError {
                                    mac: mac.clone(),
                                    message: "connect timed out".to_string(),
                                    error_code: 1004,
                                    transient: true,
                                });
                                continue;
                            }
                        }
                    }
                    None => {
                        error!(mac = mac.as_str(), "no protocol adapter for unknown family, suspending polling");
                        state.state_manager.set_polling_active(&mac, false).await;
                        return;
                    }
                }
            }

            let Some(active_device) = device.as_ref() else { continue };
            let now = OffsetDateTime::now_utc();
            match tokio::time::timeout(READ_TIMEOUT, active_device.read_data()).await {
                Ok(Ok(reading)) => {
                    state.events.send(Event::ReadingProduced { mac: mac.clone(), reading: reading.clone() });
                    let _ = state.devices.update_latest_reading(&mac, reading.clone(), now).await;

                    let vehicle_id = state.devices.get(&mac).await.and_then(|d| d.vehicle_id);
                    state
                        .mqtt
                        .publish_reading(&mac, vehicle_id.as_deref(), &family.to_string(), &reading)
                        .await;

                    match active_device.send_command("status", None).await {
                        Ok(status) => {
                            state.events.send(Event::DeviceStatusReported { mac: mac.clone(), status: status.to_string() });
                            let _ = state.devices.update_device_status(&mac, &status, now).await;
                            state.mqtt.publish_device_status(&mac, &status).await;
                        }
                        Err(e) => {
                            warn!(mac = mac.as_str(), error = %e, "status request failed");
                        }
                    }

                    if let Err(e) = state
                        .storage
                        .store_reading(mac.as_str(), &vehicle_id.unwrap_or_default(), &family.to_string(), reading)
                        .await
                    {
                        warn!(mac = mac.as_str(), error = %e, "failed to persist reading (non-fatal)");
                    }

                    state.state_manager.set_polling_active(&mac, false).await;
                }
                Ok(Err(e)) => {
                    warn!(mac = mac.as_str(), error = %e, "read_data failed");
                    state.state_manager.set_polling_active(&mac, false).await;
                    state.events.send(Event::DeviceError {
                        mac: mac.clone(),
                        message: e.to_string(),
                        error_code: 1003,
                        transient: e.is_transient(),
                    });
                    if !e.is_transient() {
                        device = None;
                    }
                }
                Err(_) => {
                    warn!(mac = mac.as_str(), "read_data timed out");
                    state.state_manager.set_polling_active(&mac, false).await;
                    state.events.send(Event::DeviceError {
                        mac: mac.clone(),
                        message: "read timed out".to_string(),
                        error_code: 1004,
                        transient: true,
                    });
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_device_returns_none_for_unknown_family() {
        let pool = batteryhawk_core::ConnectionPool::new(
            Arc::new(NullTransport),
            batteryhawk_core::PoolConfig::default(),
        );
        let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert!(build_device(mac, Family::Unknown, pool).is_none());
    }

    struct NullTransport;

    #[async_trait::async_trait]
    impl batteryhawk_core::transport::Transport for NullTransport {
        async fn raw_connect(&self, _mac: &str) -> batteryhawk_core::Result<()> {
            Ok(())
        }
        async fn raw_disconnect(&self, _mac: &str) -> batteryhawk_core::Result<()> {
            Ok(())
        }
        async fn raw_write(&self, _mac: &str, _characteristic: uuid::Uuid, _bytes: &[u8]) -> batteryhawk_core::Result<()> {
            Ok(())
        }
        async fn raw_subscribe(
            &self,
            _mac: &str,
            _characteristic: uuid::Uuid,
        ) -> batteryhawk_core::Result<tokio::sync::mpsc::Receiver<Vec<u8>>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
        async fn raw_unsubscribe(&self, _mac: &str, _characteristic: uuid::Uuid) -> batteryhawk_core::Result<()> {
            Ok(())
        }
        async fn raw_is_connected(&self, _mac: &str) -> batteryhawk_core::Result<bool> {
            Ok(false)
        }
        async fn raw_scan(&self, _duration: Duration) -> batteryhawk_core::Result<Vec<batteryhawk_core::Sighting>> {
            Ok(Vec::new())
        }
    }
}
