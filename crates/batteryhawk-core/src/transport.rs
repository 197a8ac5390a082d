//! The [`Transport`] seam: the one place actual BLE I/O crosses out of
//! this crate's otherwise-pure pool logic. Swappable for a mock in tests,
//! mirroring the way `AranetDevice`-style traits let the rest of the
//! codebase be exercised without real hardware.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// Raw BLE operations a connection pool delegates to. Implementations own
/// whatever adapter/peripheral handles are needed to actually talk to a
/// device; the pool only ever calls through this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a session with the device at `mac`. Idempotent: calling
    /// this while already connected is a no-op.
    async fn raw_connect(&self, mac: &str) -> Result<()>;

    /// Tear down the session with the device at `mac`, if any.
    async fn raw_disconnect(&self, mac: &str) -> Result<()>;

    /// Write `bytes` to `characteristic` on the connected device at `mac`.
    async fn raw_write(&self, mac: &str, characteristic: Uuid, bytes: &[u8]) -> Result<()>;

    /// Subscribe to notifications on `characteristic`, returning a channel
    /// that yields each notification's payload.
    async fn raw_subscribe(&self, mac: &str, characteristic: Uuid) -> Result<mpsc::Receiver<Vec<u8>>>;

    /// Cancel a previously established subscription.
    async fn raw_unsubscribe(&self, mac: &str, characteristic: Uuid) -> Result<()>;

    /// Whether the underlying session reports itself connected, without
    /// consulting the pool's own bookkeeping.
    async fn raw_is_connected(&self, mac: &str) -> Result<bool>;

    /// Run a scan for `duration`, returning every sighting observed.
    async fn raw_scan(&self, duration: std::time::Duration) -> Result<Vec<crate::discovery::Sighting>>;
}
