//! Vehicle registry (spec.md §4.4): create/list/delete vehicles, with a
//! monotonic counter driving generated ids (resolves the open question on
//! id generation — see `DESIGN.md`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use batteryhawk_types::Vehicle;

use crate::error::{Error, Result};

/// Persists the vehicles section after a mutation; implemented by the
/// config provider in `batteryhawk-service`.
#[async_trait]
pub trait VehicleSectionPersistence: Send + Sync {
    async fn persist(&self, vehicles: &HashMap<String, Vehicle>) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct NullVehiclePersistence;

#[async_trait]
impl VehicleSectionPersistence for NullVehiclePersistence {
    async fn persist(&self, _vehicles: &HashMap<String, Vehicle>) -> Result<()> {
        Ok(())
    }
}

/// A function that reports whether any device currently references the
/// given vehicle id; deletion is rejected while this returns `true`.
pub type ReferenceCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub struct VehicleRegistry {
    vehicles: RwLock<HashMap<String, Vehicle>>,
    next_seq: AtomicU64,
    persistence: Arc<dyn VehicleSectionPersistence>,
    has_devices: ReferenceCheck,
}

impl VehicleRegistry {
    pub fn new(persistence: Arc<dyn VehicleSectionPersistence>, has_devices: ReferenceCheck) -> Self {
        Self {
            vehicles: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
            persistence,
            has_devices,
        }
    }

    /// Load an existing section plus the next sequence number to resume
    /// from (persisted alongside the vehicles section).
    pub async fn load(&self, vehicles: HashMap<String, Vehicle>, next_seq: u64) {
        *self.vehicles.write().await = vehicles;
        self.next_seq.store(next_seq, Ordering::SeqCst);
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst)
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = self.vehicles.read().await.clone();
        self.persistence.persist(&snapshot).await
    }

    /// Create a vehicle. If `id` is `None`, a monotonically increasing
    /// `vehicle_N` id is generated.
    pub async fn create(&self, id: Option<String>, name: String) -> Result<Vehicle> {
        let id = match id {
            Some(id) => id,
            None => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                Vehicle::format_generated_id(seq)
            }
        };

        let vehicle = {
            let mut vehicles = self.vehicles.write().await;
            if vehicles.contains_key(&id) {
                return Err(Error::Kind(batteryhawk_types::Error::validation(format!(
                    "vehicle {id} already exists"
                ))));
            }
            let vehicle = Vehicle::new(id.clone(), name, OffsetDateTime::now_utc());
            vehicles.insert(id, vehicle.clone());
            vehicle
        };
        self.persist().await?;
        Ok(vehicle)
    }

    pub async fn get(&self, id: &str) -> Option<Vehicle> {
        self.vehicles.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Vehicle> {
        self.vehicles.read().await.values().cloned().collect()
    }

    /// Rename a vehicle. Used by `PATCH /api/vehicles/{id}`.
    pub async fn update_name(&self, id: &str, name: String) -> Result<Vehicle> {
        let vehicle = {
            let mut vehicles = self.vehicles.write().await;
            let vehicle = vehicles.get_mut(id).ok_or_else(|| {
                Error::Kind(batteryhawk_types::Error::validation(format!("vehicle {id} not found")))
            })?;
            vehicle.name = name;
            vehicle.clone()
        };
        self.persist().await?;
        Ok(vehicle)
    }

    /// Delete a vehicle. Rejected while any device still references it.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if (self.has_devices)(id) {
            return Err(Error::Kind(batteryhawk_types::Error::validation(format!(
                "vehicle {id} still has associated devices"
            ))));
        }
        {
            let mut vehicles = self.vehicles.write().await;
            if vehicles.remove(id).is_none() {
                return Err(Error::Kind(batteryhawk_types::Error::validation(format!(
                    "vehicle {id} not found"
                ))));
            }
        }
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(has_devices: bool) -> VehicleRegistry {
        VehicleRegistry::new(Arc::new(NullVehiclePersistence), Arc::new(move |_| has_devices))
    }

    #[tokio::test]
    async fn create_with_explicit_id() {
        let registry = registry(false);
        let vehicle = registry.create(Some("van_1".into()), "Van 1".into()).await.unwrap();
        assert_eq!(vehicle.id, "van_1");
    }

    #[tokio::test]
    async fn create_generates_monotonic_ids() {
        let registry = registry(false);
        let a = registry.create(None, "First".into()).await.unwrap();
        let b = registry.create(None, "Second".into()).await.unwrap();
        assert_eq!(a.id, "vehicle_1");
        assert_eq!(b.id, "vehicle_2");
    }

    #[tokio::test]
    async fn create_rejects_duplicate_explicit_id() {
        let registry = registry(false);
        registry.create(Some("van_1".into()), "Van 1".into()).await.unwrap();
        let result = registry.create(Some("van_1".into()), "Van 1 Again".into()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_rejected_while_devices_reference_it() {
        let registry = registry(true);
        registry.create(Some("van_1".into()), "Van 1".into()).await.unwrap();
        let result = registry.delete("van_1").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_succeeds_once_unreferenced() {
        let registry = registry(false);
        registry.create(Some("van_1".into()), "Van 1".into()).await.unwrap();
        registry.delete("van_1").await.unwrap();
        assert!(registry.get("van_1").await.is_none());
    }

    #[tokio::test]
    async fn load_resumes_sequence_counter() {
        let registry = registry(false);
        registry.load(HashMap::new(), 5).await;
        let vehicle = registry.create(None, "Resumed".into()).await.unwrap();
        assert_eq!(vehicle.id, "vehicle_5");
    }

    #[tokio::test]
    async fn update_name_renames_existing_vehicle() {
        let registry = registry(false);
        registry.create(Some("van_1".into()), "Van 1".into()).await.unwrap();
        let updated = registry.update_name("van_1", "Van One".into()).await.unwrap();
        assert_eq!(updated.name, "Van One");
        assert_eq!(registry.get("van_1").await.unwrap().name, "Van One");
    }

    #[tokio::test]
    async fn update_name_rejects_unknown_vehicle() {
        let registry = registry(false);
        let result = registry.update_name("missing", "Name".into()).await;
        assert!(result.is_err());
    }
}
