//! Identifier checks.
//!
//! Only identifiers are validated; payload contents belong to the vehicle
//! and are never inspected here. A failure returns
//! [`FleetError::Validation`] and the record never reaches the cache, the
//! journal, or the queue.

use hydronom_types::{CommandRecord, FleetError, MissionRecord, Telemetry};

/// Reject a missing, empty, or whitespace-only identifier.
pub fn require_id(field: &str, value: &str) -> Result<(), FleetError> {
    if value.trim().is_empty() {
        return Err(FleetError::Validation(format!("{field} required")));
    }
    Ok(())
}

pub fn telemetry(snapshot: &Telemetry) -> Result<(), FleetError> {
    require_id("vehicle.id", snapshot.vehicle_id())
}

pub fn command(command: &CommandRecord) -> Result<(), FleetError> {
    require_id("vehicle_id", &command.vehicle_id)
}

pub fn mission(mission: &MissionRecord) -> Result<(), FleetError> {
    require_id("task_id", &mission.task_id)
}

/// Mission actions become part of an event tag (`mission.<action>`), so they
/// must be a single non-empty token.
pub fn mission_action(action: &str) -> Result<(), FleetError> {
    require_id("action", action)?;
    if action.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(FleetError::Validation(format!("invalid action '{action}'")));
    }
    Ok(())
}
