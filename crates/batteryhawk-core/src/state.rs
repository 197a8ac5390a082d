//! Runtime state manager (spec.md §4.6).
//!
//! Maintains one [`DeviceRuntimeState`] per device, built up by mirroring
//! the event bus rather than being written to directly by the pool or
//! poller — this keeps it a pure read-model that the REST API and MQTT
//! publisher can consult without reaching into connection-pool internals.

use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use batteryhawk_types::{ConnectionState, DeviceRuntimeState, Family, MacAddress};

use crate::events::{Event, EventDispatcher};

/// Owns the live [`DeviceRuntimeState`] for every known device, updated by
/// a background task that mirrors events off the bus.
pub struct StateManager {
    states: Arc<RwLock<HashMap<String, DeviceRuntimeState>>>,
    mirror_task: JoinHandle<()>,
}

impl StateManager {
    pub fn new(dispatcher: &EventDispatcher) -> Self {
        let states: Arc<RwLock<HashMap<String, DeviceRuntimeState>>> = Arc::new(RwLock::new(HashMap::new()));
        let mut receiver = dispatcher.subscribe();
        let mirror_states = states.clone();

        let mirror_task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => apply_event(&mirror_states, event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { states, mirror_task }
    }

    pub async fn get(&self, mac: &MacAddress) -> Option<DeviceRuntimeState> {
        self.states.read().await.get(mac.as_str()).cloned()
    }

    pub async fn list(&self) -> Vec<(String, DeviceRuntimeState)> {
        self.states
            .read()
            .await
            .iter()
            .map(|(mac, state)| (mac.clone(), state.clone()))
            .collect()
    }

    /// Toggle polling for a device; not carried on the event bus since
    /// polling activity is a scheduling detail, not a system event.
    pub async fn set_polling_active(&self, mac: &MacAddress, active: bool) {
        let mut states = self.states.write().await;
        let state = states
            .entry(mac.as_str().to_string())
            .or_insert_with(|| DeviceRuntimeState::new(Family::Unknown));
        state.polling_active = active;
    }
}

impl Drop for StateManager {
    fn drop(&mut self) {
        self.mirror_task.abort();
    }
}

async fn apply_event(states: &Arc<RwLock<HashMap<String, DeviceRuntimeState>>>, event: Event) {
    let now = OffsetDateTime::now_utc();
    let mut states = states.write().await;
    match event {
        Event::DeviceDiscovered { mac, .. } => {
            states
                .entry(mac.as_str().to_string())
                .or_insert_with(|| DeviceRuntimeState::new(Family::Unknown));
        }
        Event::DeviceConnected { mac, family } => {
            let state = states
                .entry(mac.as_str().to_string())
                .or_insert_with(|| DeviceRuntimeState::new(family));
            state.family = family;
            state.record_transition(ConnectionState::Connected, None, now);
        }
        Event::DeviceDisconnected { mac, reason } => {
            if let Some(state) = states.get_mut(mac.as_str()) {
                state.record_transition(ConnectionState::Disconnected, Some(reason), now);
            }
        }
        Event::DeviceError { mac, message, .. } => {
            if let Some(state) = states.get_mut(mac.as_str()) {
                state.record_transition(ConnectionState::Error, Some(message), now);
            }
        }
        Event::VehicleAssociated { mac, vehicle_id } => {
            let state = states
                .entry(mac.as_str().to_string())
                .or_insert_with(|| DeviceRuntimeState::new(Family::Unknown));
            state.vehicle_id = Some(vehicle_id);
        }
        Event::ReadingProduced { mac, reading } => {
            let state = states
                .entry(mac.as_str().to_string())
                .or_insert_with(|| DeviceRuntimeState::new(Family::Unknown));
            state.update_reading(reading, now);
        }
        Event::DeviceStatusReported { mac, status } => {
            let state = states
                .entry(mac.as_str().to_string())
                .or_insert_with(|| DeviceRuntimeState::new(Family::Unknown));
            state.update_status(status, now);
        }
        Event::SystemShutdown => {}
        #[allow(unreachable_patterns)]
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn mac() -> MacAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn mirrors_connection_events_into_state() {
        let dispatcher = EventDispatcher::new(16);
        let manager = StateManager::new(&dispatcher);

        dispatcher.send(Event::DeviceConnected { mac: mac(), family: Family::Bm6 });
        settle().await;

        let state = manager.get(&mac()).await.unwrap();
        assert_eq!(state.connection_state, ConnectionState::Connected);
        assert_eq!(state.family, Family::Bm6);
    }

    #[tokio::test]
    async fn mirrors_reading_produced_events() {
        let dispatcher = EventDispatcher::new(16);
        let manager = StateManager::new(&dispatcher);
        let reading = batteryhawk_types::Reading::builder(12.6, -1.2).build();

        dispatcher.send(Event::ReadingProduced { mac: mac(), reading: reading.clone() });
        settle().await;

        let state = manager.get(&mac()).await.unwrap();
        assert_eq!(state.latest_reading, Some(reading));
    }

    #[tokio::test]
    async fn vehicle_association_is_mirrored() {
        let dispatcher = EventDispatcher::new(16);
        let manager = StateManager::new(&dispatcher);

        dispatcher.send(Event::VehicleAssociated { mac: mac(), vehicle_id: "vehicle_1".into() });
        settle().await;

        let state = manager.get(&mac()).await.unwrap();
        assert_eq!(state.vehicle_id.as_deref(), Some("vehicle_1"));
    }

    #[tokio::test]
    async fn set_polling_active_does_not_require_an_event() {
        let dispatcher = EventDispatcher::new(16);
        let manager = StateManager::new(&dispatcher);
        manager.set_polling_active(&mac(), true).await;
        assert!(manager.get(&mac()).await.unwrap().polling_active);
    }
}
