//! Latest-state cache.
//!
//! Holds the most recent [`Telemetry`] snapshot per vehicle id and the most
//! recent [`MissionRecord`] per task id. Values are stored behind [`Arc`] and
//! swapped whole on every upsert, so a reader either sees the previous
//! snapshot or the new one, never a mixture.
//!
//! # Example
//!
//! ```rust
//! use hydronom_store::StateCache;
//! use hydronom_types::Telemetry;
//!
//! let cache = StateCache::new();
//! let mut t = Telemetry::default();
//! t.vehicle.id = "boat-01".into();
//! t.leak = true;
//!
//! cache.upsert("boat-01", t);
//! assert!(cache.get("boat-01").unwrap().leak);
//! assert!(cache.get("boat-02").is_none());
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use hydronom_types::{MissionRecord, Telemetry};

/// Concurrent latest-state store. Share it behind an [`Arc`].
///
/// Entries are never evicted; the cache lives as long as the process.
#[derive(Debug, Default)]
pub struct StateCache {
    vehicles: DashMap<String, Arc<Telemetry>>,
    missions: DashMap<String, Arc<MissionRecord>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot for `vehicle_id` and return the stored value.
    ///
    /// The caller is responsible for rejecting empty ids.
    pub fn upsert(&self, vehicle_id: &str, snapshot: Telemetry) -> Arc<Telemetry> {
        let snapshot = Arc::new(snapshot);
        self.vehicles
            .insert(vehicle_id.to_string(), Arc::clone(&snapshot));
        snapshot
    }

    /// Most recent snapshot for `vehicle_id`, or `None` if it has never
    /// reported.
    pub fn get(&self, vehicle_id: &str) -> Option<Arc<Telemetry>> {
        self.vehicles.get(vehicle_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Replace the mission stored under `record.task_id`.
    pub fn upsert_mission(&self, record: MissionRecord) -> Arc<MissionRecord> {
        let record = Arc::new(record);
        self.missions
            .insert(record.task_id.clone(), Arc::clone(&record));
        record
    }

    pub fn get_mission(&self, task_id: &str) -> Option<Arc<MissionRecord>> {
        self.missions.get(task_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn mission_count(&self) -> usize {
        self.missions.len()
    }

    /// Ids of every vehicle that has reported, sorted.
    pub fn vehicle_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.vehicles.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
