//! MQTT publisher: durable async publish with reconnection and a bounded
//! outbound queue (SPEC §4.9).
//!
//! Mirrors `batteryhawk_store::ResilientStore`'s shape: a connection state
//! machine, a bounded ring buffer that absorbs writes made while
//! disconnected, and a background worker that drains it once the
//! connection is back. The two differ in what they wrap — a storage
//! backend vs. a broker client — but the resilience pattern is the same
//! one used throughout this crate.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use serde::Serialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use batteryhawk_core::DeviceStatus;
use batteryhawk_types::{BoundedRingBuffer, Family, MacAddress, QueuedMessage, Reading};

use crate::config::MqttConfig;

/// Connection lifecycle of the publisher. Mirrors
/// `batteryhawk_store::ConnectionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Failed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// A topic category this publisher knows how to compute and recognize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    DeviceReading { mac: MacAddress },
    DeviceStatus { mac: MacAddress },
    VehicleSummary { vehicle_id: String },
    SystemStatus,
    DiscoveryFound,
}

impl Topic {
    /// Recommended QoS and retain flag, per spec: reading topics are QoS 1
    /// non-retained; device/vehicle status topics are QoS 1 retained;
    /// system status is QoS 2 retained; discovery is QoS 1 non-retained.
    pub fn qos_and_retain(&self) -> (QoS, bool) {
        match self {
            Topic::DeviceReading { .. } => (QoS::AtLeastOnce, false),
            Topic::DeviceStatus { .. } => (QoS::AtLeastOnce, true),
            Topic::VehicleSummary { .. } => (QoS::AtLeastOnce, true),
            Topic::SystemStatus => (QoS::ExactlyOnce, true),
            Topic::DiscoveryFound => (QoS::AtLeastOnce, false),
        }
    }

    pub fn render(&self, prefix: &str) -> String {
        match self {
            Topic::DeviceReading { mac } => format!("{prefix}/device/{}/reading", mac.as_str()),
            Topic::DeviceStatus { mac } => format!("{prefix}/device/{}/status", mac.as_str()),
            Topic::VehicleSummary { vehicle_id } => format!("{prefix}/vehicle/{vehicle_id}/summary"),
            Topic::SystemStatus => format!("{prefix}/system/status"),
            Topic::DiscoveryFound => format!("{prefix}/discovery/found"),
        }
    }
}

/// Recognizes and classifies a topic string published under `prefix`,
/// rejecting malformed mac addresses and vehicle ids.
pub fn parse_topic(prefix: &str, topic: &str) -> Option<Topic> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();
    match parts.as_slice() {
        ["device", mac, "reading"] => mac.parse::<MacAddress>().ok().map(|mac| Topic::DeviceReading { mac }),
        ["device", mac, "status"] => mac.parse::<MacAddress>().ok().map(|mac| Topic::DeviceStatus { mac }),
        ["vehicle", id, "summary"] if is_valid_vehicle_id(id) => Some(Topic::VehicleSummary {
            vehicle_id: (*id).to_string(),
        }),
        ["system", "status"] => Some(Topic::SystemStatus),
        ["discovery", "found"] => Some(Topic::DiscoveryFound),
        _ => None,
    }
}

fn is_valid_vehicle_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Publish counters exposed at `/api/system/status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MqttMetrics {
    pub messages_queued: u64,
    pub messages_published: u64,
    pub messages_failed: u64,
    pub messages_dropped: u64,
    pub reconnects: u64,
}

/// Resilient MQTT publisher. Construct once at startup, call
/// [`MqttPublisher::start`] to spawn its background tasks, and
/// [`MqttPublisher::publish_reading`] etc. from anywhere that holds the
/// `Arc`.
pub struct MqttPublisher {
    config: MqttConfig,
    state: AtomicU8,
    queue: Mutex<BoundedRingBuffer<QueuedMessage>>,
    client: Mutex<Option<AsyncClient>>,
    messages_queued: AtomicU64,
    messages_published: AtomicU64,
    messages_failed: AtomicU64,
    reconnects: AtomicU64,
}

impl MqttPublisher {
    pub fn new(config: MqttConfig) -> Arc<Self> {
        let queue_capacity = config.message_queue_size;
        Arc::new(Self {
            config,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            queue: Mutex::new(BoundedRingBuffer::new(queue_capacity)),
            client: Mutex::new(None),
            messages_queued: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, s: ConnectionState) {
        self.state.store(s as u8, Ordering::SeqCst);
    }

    pub async fn metrics(&self) -> MqttMetrics {
        MqttMetrics {
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_dropped: self.queue.lock().await.dropped(),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    pub async fn queued_count(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Enqueues a reading payload for `{prefix}/device/{mac}/reading`.
    pub async fn publish_reading(&self, mac: &MacAddress, vehicle_id: Option<&str>, device_type: &str, reading: &Reading) {
        let mut payload = match serde_json::to_value(reading) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to serialize reading for MQTT, dropping");
                return;
            }
        };
        if let Value::Object(ref mut map) = payload {
            map.insert("device_id".into(), json!(mac.as_str()));
            map.insert("device_type".into(), json!(device_type));
            if let Some(vid) = vehicle_id {
                map.insert("vehicle_id".into(), json!(vid));
            }
        }
        self.enqueue(Topic::DeviceReading { mac: mac.clone() }, payload).await;
    }

    /// Enqueues a status payload for `{prefix}/device/{mac}/status`.
    pub async fn publish_device_status(&self, mac: &MacAddress, status: &DeviceStatus) {
        let payload = json!({
            "device_id": mac.as_str(),
            "fields": status.fields,
            "timestamp": rfc3339_now(),
        });
        self.enqueue(Topic::DeviceStatus { mac: mac.clone() }, payload).await;
    }

    /// Enqueues a sighting payload for `{prefix}/discovery/found`.
    pub async fn publish_discovery_found(&self, mac: &MacAddress, family: Family, rssi: Option<i16>) {
        let payload = json!({
            "mac": mac.as_str(),
            "family": family.to_string(),
            "rssi": rssi,
            "timestamp": rfc3339_now(),
        });
        self.enqueue(Topic::DiscoveryFound, payload).await;
    }

    /// Enqueues an arbitrary summary payload for
    /// `{prefix}/vehicle/{id}/summary`. The caller supplies the payload
    /// since `VehicleSummary` lives in `batteryhawk-store`, not here.
    pub async fn publish_vehicle_summary(&self, vehicle_id: &str, payload: Value) {
        self.enqueue(
            Topic::VehicleSummary {
                vehicle_id: vehicle_id.to_string(),
            },
            payload,
        )
        .await;
    }

    /// Enqueues a payload for `{prefix}/system/status`.
    pub async fn publish_system_status(&self, payload: Value) {
        self.enqueue(Topic::SystemStatus, payload).await;
    }

    async fn enqueue(&self, topic: Topic, payload: Value) {
        if !self.config.enabled {
            return;
        }
        let (_, retain) = topic.qos_and_retain();
        let rendered = topic.render(&self.config.topic_prefix);
        let msg = QueuedMessage::new(rendered, payload, retain, now());
        self.queue.lock().await.push(msg);
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Spawns the connection-maintaining task and the queue-drain worker.
    /// No-op (returns a handle to an immediately-finished task) when MQTT
    /// is disabled.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        if !self.config.enabled {
            info!("MQTT publisher disabled, not starting");
            return tokio::spawn(async {});
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(shutdown).await })
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut attempt = 0u32;
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            self.set_state(ConnectionState::Connecting);
            let (client, eventloop) = self.new_client();
            *self.client.lock().await = Some(client);
            info!(broker = %self.config.broker, port = self.config.port, "MQTT connecting");

            // `eventloop.poll()` performs the actual TCP/MQTT handshake
            // lazily on first call; ConnAck in `drive_until_disconnected`
            // is what flips us to Connected.
            self.drive_until_disconnected(eventloop, shutdown.clone()).await;
            *self.client.lock().await = None;
            self.set_state(ConnectionState::Disconnected);
            self.reconnects.fetch_add(1, Ordering::Relaxed);
            attempt = attempt.saturating_add(1);

            let delay = self.reconnect_delay(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }

    /// `delay_n = initial_retry_delay * backoff_multiplier^n`, capped at
    /// `max_retry_delay`, with ±`jitter_factor` applied on top. Mirrors
    /// `batteryhawk_core::retry::RetryConfig::delay_for_attempt`.
    fn reconnect_delay(&self, attempt: u32) -> Duration {
        let base = self.config.initial_retry_delay * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.config.max_retry_delay);
        let jitter = (rand::rng().random::<f64>() * 2.0 - 1.0) * self.config.jitter_factor;
        Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
    }

    fn new_client(&self) -> (AsyncClient, rumqttc::EventLoop) {
        let client_id = format!("batteryhawk-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, self.config.broker.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keepalive));
        options.set_connection_timeout(self.config.connection_timeout);
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(username, password);
        }
        if self.config.tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        AsyncClient::new(options, self.config.message_queue_size.max(1))
    }

    /// Polls the eventloop (mandatory for rumqttc to make network progress)
    /// and drains the outbound queue while connected. Returns once the
    /// eventloop reports a connection error, so the caller can reconnect.
    async fn drive_until_disconnected(&self, mut eventloop: rumqttc::EventLoop, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                polled = eventloop.poll() => {
                    match polled {
                        Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                            info!("MQTT broker acknowledged connection");
                            self.set_state(ConnectionState::Connected);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "MQTT eventloop error, reconnecting");
                            return;
                        }
                    }
                }
                _ = self.drain_tick() => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }

    /// Drains up to one message per tick when connected; sleeps briefly
    /// otherwise so `drive_until_disconnected`'s `select!` doesn't spin.
    async fn drain_tick(&self) {
        if self.state() != ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(200)).await;
            return;
        }
        let Some(mut msg) = self.queue.lock().await.pop() else {
            tokio::time::sleep(Duration::from_millis(50)).await;
            return;
        };
        let client = self.client.lock().await.clone();
        let Some(client) = client else {
            self.queue.lock().await.push(msg);
            return;
        };
        let (qos, _) = parse_topic(&self.config.topic_prefix, &msg.topic)
            .map(|t| t.qos_and_retain())
            .unwrap_or((qos_from_u8(self.config.qos), msg.retain));
        let body = serde_json::to_vec(&msg.payload).unwrap_or_default();
        match tokio::time::timeout(
            Duration::from_secs(self.config.connection_timeout),
            client.publish(msg.topic.clone(), qos, msg.retain, body),
        )
        .await
        {
            Ok(Ok(())) => {
                self.messages_published.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) if msg.exceeds_retry_limit(self.config.message_retry_limit) => {
                self.messages_failed.fetch_add(1, Ordering::Relaxed);
                warn!(topic = %msg.topic, error = %e, "dropping MQTT message after exceeding retry limit");
            }
            Ok(Err(e)) => {
                warn!(topic = %msg.topic, error = %e, "MQTT publish failed, re-queuing");
                msg.retry_count += 1;
                self.queue.lock().await.push(msg);
            }
            Err(_) => {
                warn!(topic = %msg.topic, "MQTT publish timed out, re-queuing");
                msg.retry_count += 1;
                self.queue.lock().await.push(msg);
            }
        }
    }
}

fn qos_from_u8(v: u8) -> QoS {
    match v {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

fn rfc3339_now() -> String {
    now()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    #[test]
    fn render_matches_spec_topic_scheme() {
        assert_eq!(
            Topic::DeviceReading { mac: mac() }.render("batteryhawk"),
            "batteryhawk/device/AA:BB:CC:DD:EE:FF/reading"
        );
        assert_eq!(
            Topic::DeviceStatus { mac: mac() }.render("batteryhawk"),
            "batteryhawk/device/AA:BB:CC:DD:EE:FF/status"
        );
        assert_eq!(
            Topic::VehicleSummary { vehicle_id: "vehicle_1".into() }.render("batteryhawk"),
            "batteryhawk/vehicle/vehicle_1/summary"
        );
        assert_eq!(Topic::SystemStatus.render("batteryhawk"), "batteryhawk/system/status");
        assert_eq!(Topic::DiscoveryFound.render("batteryhawk"), "batteryhawk/discovery/found");
    }

    #[test]
    fn parse_rejects_malformed_mac() {
        assert!(parse_topic("batteryhawk", "batteryhawk/device/not-a-mac/reading").is_none());
    }

    #[test]
    fn parse_rejects_invalid_vehicle_id() {
        assert!(parse_topic("batteryhawk", "batteryhawk/vehicle/has space/summary").is_none());
    }

    #[test]
    fn compute_then_parse_round_trips() {
        let topic = Topic::DeviceReading { mac: mac() };
        let rendered = topic.render("batteryhawk");
        assert_eq!(parse_topic("batteryhawk", &rendered), Some(topic));
    }

    #[tokio::test]
    async fn disabled_publisher_drops_without_queuing() {
        let publisher = MqttPublisher::new(MqttConfig { enabled: false, ..MqttConfig::default() });
        publisher
            .publish_reading(&mac(), None, "BM6", &Reading::builder(12.6, -1.2).build())
            .await;
        assert_eq!(publisher.queued_count().await, 0);
    }

    #[tokio::test]
    async fn enabled_publisher_queues_while_disconnected() {
        let publisher = MqttPublisher::new(MqttConfig {
            enabled: true,
            message_queue_size: 10,
            ..MqttConfig::default()
        });
        for _ in 0..15 {
            publisher
                .publish_reading(&mac(), None, "BM6", &Reading::builder(12.6, -1.2).build())
                .await;
        }
        assert_eq!(publisher.queued_count().await, 10);
        assert_eq!(publisher.metrics().await.messages_dropped, 5);
        assert_eq!(publisher.metrics().await.messages_queued, 15);
    }
}
