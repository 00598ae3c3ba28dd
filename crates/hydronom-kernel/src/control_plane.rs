//! [`ControlPlane`] – the entry point between the transport layer and the
//! core.
//!
//! Every operation validates its identifier first and then drives the store
//! and the middleware in a fixed order:
//!
//! | Operation | Order |
//! |---|---|
//! | [`ingest_telemetry`](ControlPlane::ingest_telemetry) | cache upsert → journal append → hub broadcast |
//! | [`submit_command`](ControlPlane::submit_command) | queue enqueue → journal append |
//! | [`mission_action`](ControlPlane::mission_action) | mission lookup → journal append |
//!
//! A journal failure is returned to the caller as [`FleetError::Storage`].
//! Steps already taken are not rolled back: the cache keeps the new snapshot
//! (and the queue keeps the command) even though the caller is told the
//! operation failed. Broadcast failures never surface here.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hydronom_kernel::ControlPlane;
//! use hydronom_middleware::{SubscriptionHub, command_queue};
//! use hydronom_store::{Journal, StateCache};
//!
//! # async fn run() -> Result<(), hydronom_types::FleetError> {
//! let (commands, _drain) = command_queue();
//! let plane = ControlPlane::new(
//!     Arc::new(StateCache::new()),
//!     Arc::new(Journal::open("logs")?),
//!     Arc::new(SubscriptionHub::default()),
//!     commands,
//! );
//! assert!(plane.latest_state("boat-01").is_none());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use hydronom_middleware::{BroadcastReport, CommandQueue, FrameSink, Subscription, SubscriptionHub};
use hydronom_store::{Journal, StateCache};
use hydronom_types::{CommandRecord, EventLogRecord, FleetError, MissionRecord, Telemetry};
use tracing::{debug, info, instrument};

use crate::validation;

/// Dependency-injected facade over the cache, journal, hub, and queue.
///
/// Cheap to clone; all clones share the same components.
#[derive(Clone)]
pub struct ControlPlane {
    cache: Arc<StateCache>,
    journal: Arc<Journal>,
    hub: Arc<SubscriptionHub>,
    commands: CommandQueue,
}

impl ControlPlane {
    pub fn new(
        cache: Arc<StateCache>,
        journal: Arc<Journal>,
        hub: Arc<SubscriptionHub>,
        commands: CommandQueue,
    ) -> Self {
        Self {
            cache,
            journal,
            hub,
            commands,
        }
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    /// Commands waiting for the control channel.
    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    // ── Telemetry ───────────────────────────────────────────────────────────

    /// Store, journal, and fan out one telemetry snapshot.
    ///
    /// # Errors
    ///
    /// - [`FleetError::Validation`] – empty `vehicle.id`; nothing is touched.
    /// - [`FleetError::Storage`] – the journal append failed; the cache has
    ///   already been updated and no broadcast is made.
    #[instrument(skip_all, fields(vehicle_id = %snapshot.vehicle_id()))]
    pub async fn ingest_telemetry(&self, snapshot: Telemetry) -> Result<BroadcastReport, FleetError> {
        validation::telemetry(&snapshot)?;
        let vehicle_id = snapshot.vehicle_id().to_string();

        let stored = self.cache.upsert(&vehicle_id, snapshot);

        let journal = Arc::clone(&self.journal);
        let record = Arc::clone(&stored);
        tokio::task::spawn_blocking(move || journal.append_telemetry(&record))
            .await
            .map_err(|e| FleetError::Storage(std::io::Error::other(e)))??;

        let report = self.hub.broadcast(&vehicle_id, &stored).await;
        debug!(delivered = report.delivered, evicted = report.evicted, "telemetry ingested");
        Ok(report)
    }

    /// Latest snapshot for `vehicle_id`, if the vehicle has ever reported.
    pub fn latest_state(&self, vehicle_id: &str) -> Option<Arc<Telemetry>> {
        self.cache.get(vehicle_id)
    }

    // ── Commands ────────────────────────────────────────────────────────────

    /// Queue `command` for the control channel and record a `"command"`
    /// event.
    #[instrument(skip_all, fields(vehicle_id = %command.vehicle_id, command = %command.command))]
    pub async fn submit_command(&self, command: CommandRecord) -> Result<(), FleetError> {
        validation::command(&command)?;
        let event = EventLogRecord::command(&command)?;

        self.commands.enqueue(command);
        self.append_event(event).await?;
        info!("command accepted");
        Ok(())
    }

    // ── Missions ────────────────────────────────────────────────────────────

    /// Store `mission`, replacing any mission with the same task id.
    #[instrument(skip_all, fields(task_id = %mission.task_id))]
    pub fn upsert_mission(&self, mission: MissionRecord) -> Result<Arc<MissionRecord>, FleetError> {
        validation::mission(&mission)?;
        let stored = self.cache.upsert_mission(mission);
        info!(vehicle_id = %stored.vehicle_id, "mission stored");
        Ok(stored)
    }

    pub fn mission(&self, task_id: &str) -> Option<Arc<MissionRecord>> {
        self.cache.get_mission(task_id)
    }

    /// Record a `mission.<action>` event for an existing mission.
    ///
    /// The mission record itself is left untouched.
    ///
    /// # Errors
    ///
    /// - [`FleetError::Validation`] – the action is not a single token.
    /// - [`FleetError::NotFound`] – no mission with `task_id`.
    /// - [`FleetError::Storage`] – the journal append failed.
    #[instrument(skip(self))]
    pub async fn mission_action(
        &self,
        task_id: &str,
        action: &str,
    ) -> Result<Arc<MissionRecord>, FleetError> {
        validation::mission_action(action)?;
        let mission = self
            .cache
            .get_mission(task_id)
            .ok_or_else(|| FleetError::NotFound(format!("mission {task_id}")))?;

        let event = EventLogRecord::mission_action(&mission, action)?;
        self.append_event(event).await?;
        info!(vehicle_id = %mission.vehicle_id, "mission action recorded");
        Ok(mission)
    }

    // ── Live subscriptions ──────────────────────────────────────────────────

    /// Register `sink` for live telemetry of `vehicle_id`.
    ///
    /// Keep the returned guard alive while the connection is served.
    pub async fn subscribe(
        &self,
        vehicle_id: &str,
        sink: &Arc<dyn FrameSink>,
    ) -> Result<Subscription, FleetError> {
        validation::require_id("vehicleId", vehicle_id)?;
        Ok(self.hub.subscribe(vehicle_id, sink).await)
    }

    async fn append_event(&self, event: EventLogRecord) -> Result<(), FleetError> {
        let journal = Arc::clone(&self.journal);
        tokio::task::spawn_blocking(move || journal.append_event(&event))
            .await
            .map_err(|e| FleetError::Storage(std::io::Error::other(e)))?
    }
}
