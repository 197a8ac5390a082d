//! Bounded connection pool (spec.md §4.1).
//!
//! Wraps a [`Transport`] with three pieces of policy the transport itself
//! doesn't know about: a cap on concurrently-open sessions, a single
//! global semaphore shared by scan-initiation and connect-initiation (a
//! BLE adapter cannot do both at once), and per-mac serialization so two
//! concurrent `connect()` calls for the same device share one session
//! instead of racing the transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use batteryhawk_types::{ConnectionState, DeviceRuntimeState, Family, MacAddress, StateTransition};

use crate::discovery::{self, Sighting};
use crate::error::{Error, Result};
use crate::retry::RetryConfig;
use crate::transport::Transport;

/// Default number of BLE sessions the pool allows open at once.
pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: usize = 3;

/// Default interval for the pool's idle-cleanup task.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5);

/// Default age a `Connected` session may reach before the cleanup task
/// force-closes it.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a mac may sit in `Connecting` with no progress before the
/// cleanup task forces it back to `Disconnected`.
const STUCK_CONNECTING_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_concurrent_connections: usize,
    pub cleanup_interval: Duration,
    pub reconnect: RetryConfig,
    /// Maximum age of a `Connected` session before the cleanup task closes
    /// it (spec.md §4.1 Cleanup).
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_connections: DEFAULT_MAX_CONCURRENT_CONNECTIONS,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            reconnect: RetryConfig::for_connect(Duration::from_secs(1), Duration::from_secs(60), 5),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }
}

struct ConnectionEntry {
    state: DeviceRuntimeState,
    /// Held for the duration of a connect attempt; a second caller for the
    /// same mac awaits this lock instead of racing the transport, then
    /// observes the session the first caller already established.
    connecting: Arc<Mutex<()>>,
    last_activity: OffsetDateTime,
    /// Held for the full lifetime of an open session, from the moment
    /// `connect` succeeds until `disconnect` or the cleanup sweep closes
    /// it. This is what makes `max_concurrent_connections` cap simultaneous
    /// sessions rather than just in-flight `connect` calls.
    connection_permit: Option<OwnedSemaphorePermit>,
}

impl ConnectionEntry {
    fn new(family: Family) -> Self {
        Self {
            state: DeviceRuntimeState::new(family),
            connecting: Arc::new(Mutex::new(())),
            last_activity: OffsetDateTime::now_utc(),
            connection_permit: None,
        }
    }
}

/// Bounded pool of BLE connections, generic over any [`Transport`].
pub struct ConnectionPool {
    transport: Arc<dyn Transport>,
    config: PoolConfig,
    entries: RwLock<HashMap<String, ConnectionEntry>>,
    connection_slots: Arc<Semaphore>,
    /// A BLE adapter can only scan or connect, never both: this permit is
    /// acquired before either a scan or a single connect attempt begins.
    adapter_slot: Arc<Semaphore>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    pub fn new(transport: Arc<dyn Transport>, config: PoolConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            transport,
            connection_slots: Arc::new(Semaphore::new(config.max_concurrent_connections)),
            adapter_slot: Arc::new(Semaphore::new(1)),
            entries: RwLock::new(HashMap::new()),
            cleanup_task: Mutex::new(None),
            config,
        });
        pool.clone().spawn_cleanup_task();
        pool
    }

    fn spawn_cleanup_task(self: Arc<Self>) {
        let interval = self.config.cleanup_interval;
        let pool = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                pool.sweep_stuck_connections().await;
            }
        });
        // `try_lock` is safe here: nothing else holds this lock this early.
        if let Ok(mut guard) = self.cleanup_task.try_lock() {
            *guard = Some(handle);
        }
    }

    /// Traverses active connections, resetting ones stuck mid-`Connecting`
    /// and closing `Connected` sessions whose age exceeds
    /// `connection_timeout` or whose transport reports them closed, per
    /// spec.md §4.1 Cleanup. Closing a session releases its concurrency
    /// slot, which drains the FIFO of any `connect` call waiting on one.
    async fn sweep_stuck_connections(&self) {
        let now = OffsetDateTime::now_utc();

        let (stuck_connecting, stale_connected): (Vec<String>, Vec<String>) = {
            let entries = self.entries.read().await;
            let stuck = entries
                .iter()
                .filter(|(_, e)| {
                    e.state.connection_state == ConnectionState::Connecting
                        && now - e.last_activity > STUCK_CONNECTING_TIMEOUT
                })
                .map(|(mac, _)| mac.clone())
                .collect();
            let stale = entries
                .iter()
                .filter(|(_, e)| e.state.connection_state == ConnectionState::Connected)
                .map(|(mac, _)| mac.clone())
                .collect();
            (stuck, stale)
        };

        for mac in stuck_connecting {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(&mac) {
                warn!(mac, "connection stuck in Connecting, resetting to Disconnected");
                entry.state.record_transition(
                    ConnectionState::Disconnected,
                    Some("stuck connecting, reset by cleanup task".into()),
                    now,
                );
                entry.last_activity = now;
            }
        }

        for mac in stale_connected {
            let age_exceeded = {
                let entries = self.entries.read().await;
                entries
                    .get(&mac)
                    .is_some_and(|e| now - e.last_activity > self.config.connection_timeout)
            };
            let transport_closed = !self.transport.raw_is_connected(&mac).await.unwrap_or(false);
            if !age_exceeded && !transport_closed {
                continue;
            }

            warn!(mac, age_exceeded, transport_closed, "closing stale connection in cleanup sweep");
            let _ = self.transport.raw_disconnect(&mac).await;

            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(&mac) {
                entry.state.record_transition(
                    ConnectionState::Disconnected,
                    Some("closed by cleanup task".into()),
                    now,
                );
                entry.last_activity = now;
                entry.connection_permit = None;
            }
        }
    }

    /// Scan for devices. Acquires the adapter slot so a concurrent
    /// `connect()` attempt is serialized against this scan.
    ///
    /// When `stop_on_new` is `false`, performs one scan of `duration`. When
    /// `true`, issues repeated short scans of
    /// `discovery::short_timeout_for(duration)` until a mac this pool has
    /// never connected to is observed, or `duration` elapses — whichever
    /// comes first (spec.md §4.5).
    pub async fn scan(&self, duration: Duration, stop_on_new: bool) -> Result<Vec<Sighting>> {
        let _permit = self
            .adapter_slot
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?;

        if !stop_on_new {
            return self.transport.raw_scan(duration).await;
        }

        let known_macs: std::collections::HashSet<String> = self.entries.read().await.keys().cloned().collect();
        let short_timeout = discovery::short_timeout_for(duration);
        let deadline = tokio::time::Instant::now() + duration;

        let mut seen_macs = std::collections::HashSet::new();
        let mut sightings = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            let slice = remaining.min(short_timeout);
            let batch = self.transport.raw_scan(slice).await?;

            let mut found_new = false;
            for sighting in batch {
                if seen_macs.insert(sighting.mac.as_str().to_string()) {
                    if !known_macs.contains(sighting.mac.as_str()) {
                        found_new = true;
                    }
                    sightings.push(sighting);
                }
            }

            if found_new {
                break;
            }
        }

        Ok(sightings)
    }

    /// Establish a session for `mac`, respecting the pool's concurrency
    /// cap. If a connect for the same mac is already in flight, this call
    /// waits for it and then observes its result rather than racing it.
    pub async fn connect(&self, mac: &MacAddress, family: Family) -> Result<()> {
        let connecting_lock = {
            let mut entries = self.entries.write().await;
            let entry = entries
                .entry(mac.as_str().to_string())
                .or_insert_with(|| ConnectionEntry::new(family));
            entry.connecting.clone()
        };

        let _guard = connecting_lock.lock().await;

        if self.transport.raw_is_connected(mac.as_str()).await? {
            return Ok(());
        }

        let _adapter_permit = self
            .adapter_slot
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?;
        // Held in the entry for the session's full lifetime, not dropped at
        // the end of this call: see `ConnectionEntry::connection_permit`.
        let connection_permit = self
            .connection_slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Cancelled)?;

        self.transition(mac, ConnectionState::Connecting, None).await;

        let result = self.transport.raw_connect(mac.as_str()).await;
        match &result {
            Ok(()) => {
                info!(mac = mac.as_str(), "connected");
                self.transition(mac, ConnectionState::Connected, None).await;
                let mut entries = self.entries.write().await;
                if let Some(entry) = entries.get_mut(mac.as_str()) {
                    entry.connection_permit = Some(connection_permit);
                }
            }
            Err(e) => {
                warn!(mac = mac.as_str(), error = %e, "connect failed");
                self.transition(mac, ConnectionState::Error, Some(e.to_string())).await;
                // connection_permit drops here, releasing the slot.
            }
        }
        result
    }

    pub async fn disconnect(&self, mac: &MacAddress) -> Result<()> {
        self.transition(mac, ConnectionState::Disconnecting, None).await;
        let result = self.transport.raw_disconnect(mac.as_str()).await;
        self.transition(
            mac,
            ConnectionState::Disconnected,
            result.as_ref().err().map(|e| e.to_string()),
        )
        .await;

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(mac.as_str()) {
            entry.connection_permit = None;
        }
        result
    }

    /// Connect with the pool's configured retry/backoff policy, stopping
    /// early on a permanent error.
    pub async fn connect_with_retry(&self, mac: &MacAddress, family: Family) -> Result<()> {
        crate::retry::with_retry(&self.config.reconnect, "pool_connect", || self.connect(mac, family)).await
    }

    pub async fn is_connected(&self, mac: &MacAddress) -> Result<bool> {
        self.transport.raw_is_connected(mac.as_str()).await
    }

    pub async fn write(&self, mac: &MacAddress, characteristic: uuid::Uuid, bytes: &[u8]) -> Result<()> {
        self.transport.raw_write(mac.as_str(), characteristic, bytes).await
    }

    pub async fn subscribe(
        &self,
        mac: &MacAddress,
        characteristic: uuid::Uuid,
    ) -> Result<tokio::sync::mpsc::Receiver<Vec<u8>>> {
        self.transport.raw_subscribe(mac.as_str(), characteristic).await
    }

    pub async fn unsubscribe(&self, mac: &MacAddress, characteristic: uuid::Uuid) -> Result<()> {
        self.transport.raw_unsubscribe(mac.as_str(), characteristic).await
    }

    pub async fn runtime_state(&self, mac: &MacAddress) -> Option<DeviceRuntimeState> {
        self.entries.read().await.get(mac.as_str()).map(|e| e.state.clone())
    }

    async fn transition(&self, mac: &MacAddress, to: ConnectionState, error: Option<String>) {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(mac.as_str().to_string())
            .or_insert_with(|| ConnectionEntry::new(Family::Unknown));
        entry.state.record_transition(to, error, now);
        entry.last_activity = now;
        debug!(mac = mac.as_str(), state = ?to, "connection state transition");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.cleanup_task.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    #[derive(Default)]
    struct MockTransport {
        connect_calls: AtomicU32,
        connected: StdMutex<std::collections::HashSet<String>>,
        fail_next_connect: std::sync::atomic::AtomicBool,
        /// Consumed front-to-back, one batch per `raw_scan` call; once
        /// empty, `raw_scan` returns no sightings.
        scan_batches: StdMutex<std::collections::VecDeque<Vec<Sighting>>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn raw_connect(&self, mac: &str) -> Result<()> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_next_connect.swap(false, Ordering::SeqCst) {
                return Err(Error::Kind(batteryhawk_types::Error::connection("simulated failure")));
            }
            self.connected.lock().unwrap().insert(mac.to_string());
            Ok(())
        }

        async fn raw_disconnect(&self, mac: &str) -> Result<()> {
            self.connected.lock().unwrap().remove(mac);
            Ok(())
        }

        async fn raw_write(&self, _mac: &str, _characteristic: uuid::Uuid, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn raw_subscribe(
            &self,
            _mac: &str,
            _characteristic: uuid::Uuid,
        ) -> Result<tokio::sync::mpsc::Receiver<Vec<u8>>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }

        async fn raw_unsubscribe(&self, _mac: &str, _characteristic: uuid::Uuid) -> Result<()> {
            Ok(())
        }

        async fn raw_is_connected(&self, mac: &str) -> Result<bool> {
            Ok(self.connected.lock().unwrap().contains(mac))
        }

        async fn raw_scan(&self, _duration: Duration) -> Result<Vec<Sighting>> {
            Ok(self.scan_batches.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    fn mac() -> MacAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    fn sighting(mac: &str) -> Sighting {
        Sighting {
            mac: mac.parse().unwrap(),
            name: None,
            rssi: None,
            discovered_at: OffsetDateTime::now_utc(),
            advertisement: crate::discovery::Advertisement::default(),
        }
    }

    fn test_pool_config() -> PoolConfig {
        PoolConfig {
            cleanup_interval: Duration::from_secs(3600),
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn connect_transitions_to_connected() {
        let pool = ConnectionPool::new(Arc::new(MockTransport::default()), test_pool_config());
        pool.connect(&mac(), Family::Bm6).await.unwrap();
        let state = pool.runtime_state(&mac()).await.unwrap();
        assert_eq!(state.connection_state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn concurrent_connects_for_same_mac_share_one_session() {
        let transport = Arc::new(MockTransport::default());
        let pool = ConnectionPool::new(transport.clone(), test_pool_config());

        let pool_a = pool.clone();
        let pool_b = pool.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { pool_a.connect(&mac(), Family::Bm6).await }),
            tokio::spawn(async move { pool_b.connect(&mac(), Family::Bm6).await }),
        );
        a.unwrap().unwrap();
        b.unwrap().unwrap();

        assert_eq!(transport.connect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_transitions_to_disconnected() {
        let pool = ConnectionPool::new(Arc::new(MockTransport::default()), test_pool_config());
        pool.connect(&mac(), Family::Bm6).await.unwrap();
        pool.disconnect(&mac()).await.unwrap();
        let state = pool.runtime_state(&mac()).await.unwrap();
        assert_eq!(state.connection_state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn failed_connect_transitions_to_error() {
        let transport = Arc::new(MockTransport::default());
        transport.fail_next_connect.store(true, Ordering::SeqCst);
        let pool = ConnectionPool::new(transport, test_pool_config());

        let result = pool.connect(&mac(), Family::Bm6).await;
        assert!(result.is_err());
        let state = pool.runtime_state(&mac()).await.unwrap();
        assert_eq!(state.connection_state, ConnectionState::Error);
    }

    #[tokio::test]
    async fn connect_with_retry_succeeds_after_one_failure() {
        let transport = Arc::new(MockTransport::default());
        transport.fail_next_connect.store(true, Ordering::SeqCst);
        let mut config = test_pool_config();
        config.reconnect = RetryConfig::for_connect(Duration::from_millis(1), Duration::from_millis(10), 3);
        let pool = ConnectionPool::new(transport.clone(), config);

        pool.connect_with_retry(&mac(), Family::Bm6).await.unwrap();
        assert_eq!(transport.connect_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn connection_permit_is_held_until_disconnect() {
        let mut config = test_pool_config();
        config.max_concurrent_connections = 1;
        let pool = ConnectionPool::new(Arc::new(MockTransport::default()), config);

        assert_eq!(pool.connection_slots.available_permits(), 1);
        pool.connect(&mac(), Family::Bm6).await.unwrap();
        assert_eq!(pool.connection_slots.available_permits(), 0, "slot must stay held for the open session");

        pool.disconnect(&mac()).await.unwrap();
        assert_eq!(pool.connection_slots.available_permits(), 1, "disconnect must release the slot");
    }

    #[tokio::test]
    async fn failed_connect_releases_the_slot_immediately() {
        let transport = Arc::new(MockTransport::default());
        transport.fail_next_connect.store(true, Ordering::SeqCst);
        let mut config = test_pool_config();
        config.max_concurrent_connections = 1;
        let pool = ConnectionPool::new(transport, config);

        assert!(pool.connect(&mac(), Family::Bm6).await.is_err());
        assert_eq!(pool.connection_slots.available_permits(), 1);
    }

    #[tokio::test]
    async fn second_connect_waits_for_a_free_slot() {
        let mut config = test_pool_config();
        config.max_concurrent_connections = 1;
        let pool = ConnectionPool::new(Arc::new(MockTransport::default()), config);

        let first: MacAddress = "AA:AA:AA:AA:AA:01".parse().unwrap();
        let second: MacAddress = "AA:AA:AA:AA:AA:02".parse().unwrap();
        pool.connect(&first, Family::Bm6).await.unwrap();

        let pool_b = pool.clone();
        let second_connect = tokio::spawn(async move { pool_b.connect(&second, Family::Bm6).await });
        tokio::task::yield_now().await;
        assert!(!second_connect.is_finished(), "second connect must wait for the slot held by the first session");

        pool.disconnect(&first).await.unwrap();
        second_connect.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cleanup_sweep_closes_connections_past_connection_timeout() {
        let config = PoolConfig {
            cleanup_interval: Duration::from_millis(10),
            connection_timeout: Duration::from_millis(20),
            ..test_pool_config()
        };
        let pool = ConnectionPool::new(Arc::new(MockTransport::default()), config);
        pool.connect(&mac(), Family::Bm6).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        let state = pool.runtime_state(&mac()).await.unwrap();
        assert_eq!(state.connection_state, ConnectionState::Disconnected);
        assert_eq!(pool.connection_slots.available_permits(), DEFAULT_MAX_CONCURRENT_CONNECTIONS);
    }

    #[tokio::test]
    async fn cleanup_sweep_closes_connections_the_transport_reports_dropped() {
        let transport = Arc::new(MockTransport::default());
        let config = PoolConfig {
            cleanup_interval: Duration::from_millis(10),
            connection_timeout: Duration::from_secs(3600),
            ..test_pool_config()
        };
        let pool = ConnectionPool::new(transport.clone(), config);
        pool.connect(&mac(), Family::Bm6).await.unwrap();

        // Transport drops the session out from under the pool, with no
        // disconnect() call to tell it so.
        transport.connected.lock().unwrap().clear();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let state = pool.runtime_state(&mac()).await.unwrap();
        assert_eq!(state.connection_state, ConnectionState::Disconnected);
        assert_eq!(pool.connection_slots.available_permits(), DEFAULT_MAX_CONCURRENT_CONNECTIONS);
    }

    #[tokio::test]
    async fn scan_without_stop_on_new_performs_a_single_flat_scan() {
        let transport = Arc::new(MockTransport::default());
        transport.scan_batches.lock().unwrap().push_back(vec![sighting("AA:BB:CC:DD:EE:01")]);
        let pool = ConnectionPool::new(transport, test_pool_config());

        let sightings = pool.scan(Duration::from_secs(30), false).await.unwrap();
        assert_eq!(sightings.len(), 1);
    }

    #[tokio::test]
    async fn scan_with_stop_on_new_stops_as_soon_as_an_unknown_mac_appears() {
        let transport = Arc::new(MockTransport::default());
        {
            let mut batches = transport.scan_batches.lock().unwrap();
            batches.push_back(vec![]);
            batches.push_back(vec![sighting("AA:BB:CC:DD:EE:01")]);
            // Would only be reached if the loop didn't stop on the new mac.
            batches.push_back(vec![sighting("AA:BB:CC:DD:EE:02")]);
        }
        let pool = ConnectionPool::new(transport.clone(), test_pool_config());

        let sightings = pool.scan(Duration::from_secs(30), true).await.unwrap();
        assert_eq!(sightings.len(), 1);
        assert_eq!(sightings[0].mac.as_str(), "AA:BB:CC:DD:EE:01");
    }

    #[tokio::test]
    async fn scan_with_stop_on_new_runs_the_full_duration_if_nothing_new_appears() {
        let transport = Arc::new(MockTransport::default());
        let pool = ConnectionPool::new(transport, test_pool_config());

        let start = tokio::time::Instant::now();
        let sightings = pool.scan(Duration::from_millis(40), true).await.unwrap();
        assert!(sightings.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
