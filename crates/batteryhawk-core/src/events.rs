//! The orchestrator's event bus: a fixed set of named events broadcast to
//! any number of subscribers. Dispatch is best-effort and isolated — one
//! failing handler must not prevent others from observing the event.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use batteryhawk_types::{Family, MacAddress, Reading};

/// Events emitted by the orchestrator over the lifetime of the service.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Event {
    /// A previously-unseen device was observed during a scan.
    DeviceDiscovered { mac: MacAddress, name: Option<String> },
    /// A configured device's BLE session was established.
    DeviceConnected { mac: MacAddress, family: Family },
    /// A device's BLE session was closed, intentionally or otherwise.
    DeviceDisconnected { mac: MacAddress, reason: String },
    /// A device operation failed; `transient` mirrors [`crate::error::Error::is_transient`].
    DeviceError {
        mac: MacAddress,
        message: String,
        error_code: u32,
        transient: bool,
    },
    /// A device was associated with a vehicle by the association
    /// supervisor or an explicit configure call.
    VehicleAssociated { mac: MacAddress, vehicle_id: String },
    /// A reading was produced; carried on the bus mainly for test and
    /// diagnostic subscribers (storage/MQTT consume it directly).
    ReadingProduced { mac: MacAddress, reading: Reading },
    /// A device status command (e.g. firmware/capability report) returned
    /// a result.
    DeviceStatusReported {
        mac: MacAddress,
        status: String,
    },
    /// Orchestrator shutdown has begun.
    SystemShutdown,
}

/// Sender for bus events.
pub type EventSender = broadcast::Sender<Event>;

/// Receiver for bus events.
pub type EventReceiver = broadcast::Receiver<Event>;

/// Broadcasts [`Event`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Best-effort send: dropped silently if there are no subscribers.
    pub fn send(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
