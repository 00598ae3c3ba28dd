//! `hydronom-types` – shared data model for the fleet link.
//!
//! Wire shapes follow the JSON the vehicles and the operator dashboard
//! already speak (snake_case fields, `vehicle.id` as the routing key).
//! Every struct tolerates missing fields so that validation happens in one
//! place (the control plane) instead of in the deserializer.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Vehicle id recorded on events whose mission names no vehicle.
pub const UNASSIGNED_VEHICLE: &str = "n/a";

/// Event type tag used for operator commands.
pub const COMMAND_EVENT: &str = "command";

/// Opaque JSON object carried through the core without interpretation.
pub type Payload = Map<String, Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry
// ─────────────────────────────────────────────────────────────────────────────

/// Identity block of a telemetry report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleRef {
    pub id: String,
    /// `"boat"` or `"sub"` for the current fleet.
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pose {
    pub lat: f64,
    pub lon: f64,
    pub heading_deg: f64,
    pub speed_mps: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Imu {
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thrusters {
    pub left_pwm: i32,
    pub right_pwm: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ballast {
    pub level_pct: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Battery {
    pub voltage: f64,
    pub soc_pct: f64,
}

/// Mission summary as reported by the vehicle itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionState {
    pub mode: String,
    pub task_id: String,
    pub waypoint_index: i32,
}

/// One complete vehicle state report (a *snapshot*).
///
/// The cache stores exactly one of these per vehicle and replaces it whole on
/// every ingestion; there is no field-level merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// Vehicle-reported ISO-8601 time, kept verbatim.
    pub timestamp: String,
    pub vehicle: VehicleRef,
    pub pose: Pose,
    pub depth_m: f64,
    pub imu: Imu,
    pub thrusters: Thrusters,
    pub rudder_deg: f64,
    pub ballast: Ballast,
    pub battery: Battery,
    pub leak: bool,
    pub temp_c: f64,
    pub mission: MissionState,
}

impl Telemetry {
    /// The routing key of this snapshot.
    pub fn vehicle_id(&self) -> &str {
        &self.vehicle.id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands & missions
// ─────────────────────────────────────────────────────────────────────────────

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn default_mission_mode() -> String {
    "AUTONOMOUS".to_string()
}

fn default_created_by() -> String {
    "operator".to_string()
}

/// An operator command addressed to one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    #[serde(default = "now_rfc3339")]
    pub timestamp: String,
    #[serde(default)]
    pub vehicle_id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub payload: Option<Payload>,
}

impl CommandRecord {
    /// Build a command stamped with the current UTC time.
    pub fn new(vehicle_id: impl Into<String>, command: impl Into<String>, payload: Option<Payload>) -> Self {
        Self {
            timestamp: now_rfc3339(),
            vehicle_id: vehicle_id.into(),
            command: command.into(),
            payload,
        }
    }
}

/// A mission plan keyed by `task_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRecord {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vehicle_id: String,
    #[serde(default = "default_mission_mode")]
    pub mode: String,
    /// Ordered waypoints; their schema belongs to the vehicle planner.
    #[serde(default)]
    pub waypoints: Vec<Payload>,
    #[serde(default)]
    pub constraints: Option<Payload>,
    #[serde(default = "default_created_by")]
    pub created_by: String,
}

impl MissionRecord {
    pub fn new(task_id: impl Into<String>, vehicle_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            name: String::new(),
            vehicle_id: vehicle_id.into(),
            mode: default_mission_mode(),
            waypoints: Vec::new(),
            constraints: None,
            created_by: default_created_by(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event log
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable fact appended to the event partition of the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogRecord {
    pub timestamp: DateTime<Utc>,
    /// `"command"` or `"mission.<action>"`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "vehicleId")]
    pub vehicle_id: String,
    pub data: Value,
}

impl EventLogRecord {
    /// Event recorded when an operator command is accepted.
    pub fn command(command: &CommandRecord) -> Result<Self, FleetError> {
        Ok(Self {
            timestamp: Utc::now(),
            kind: COMMAND_EVENT.to_string(),
            vehicle_id: command.vehicle_id.clone(),
            data: serde_json::to_value(command)?,
        })
    }

    /// Event recorded when `action` is triggered on `mission`.
    pub fn mission_action(mission: &MissionRecord, action: &str) -> Result<Self, FleetError> {
        let vehicle_id = if mission.vehicle_id.is_empty() {
            UNASSIGNED_VEHICLE.to_string()
        } else {
            mission.vehicle_id.clone()
        };
        Ok(Self {
            timestamp: Utc::now(),
            kind: format!("mission.{action}"),
            vehicle_id,
            data: serde_json::to_value(mission)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Live frames
// ─────────────────────────────────────────────────────────────────────────────

/// Text frames pushed to live subscribers.
///
/// Serialized as `{"type":"hello","vehicleId":..}` and
/// `{"type":"telemetry","data":{..}}`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HubFrame<'a> {
    Hello {
        #[serde(rename = "vehicleId")]
        vehicle_id: &'a str,
    },
    Telemetry { data: &'a Telemetry },
}

impl HubFrame<'_> {
    pub fn to_json(&self) -> Result<String, FleetError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error type shared by every hydronom crate.
#[derive(Error, Debug)]
pub enum FleetError {
    /// Missing or empty identifier; rejected before reaching cache or log.
    #[error("Validation Error: {0}")]
    Validation(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    /// The journal could not write or flush a record.
    #[error("Storage Error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    /// Socket-level failure: a subscriber send, a client connection, or the
    /// listener itself.
    #[error("Transport Error: {0}")]
    Transport(String),
}

impl From<serde_json::Error> for FleetError {
    fn from(e: serde_json::Error) -> Self {
        FleetError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_json() -> Value {
        json!({
            "timestamp": "2025-05-01T10:00:00Z",
            "vehicle": {"id": "hydronom-boat-01", "type": "boat"},
            "pose": {"lat": 41.025, "lon": 28.85, "heading_deg": 90.0, "speed_mps": 1.2},
            "depth_m": 0.0,
            "imu": {"roll_deg": 0.5, "pitch_deg": -0.2, "yaw_deg": 91.0},
            "thrusters": {"left_pwm": 1450, "right_pwm": 1460},
            "rudder_deg": 3.5,
            "ballast": {"level_pct": 0},
            "battery": {"voltage": 14.2, "soc_pct": 88.0},
            "leak": false,
            "temp_c": 31.5,
            "mission": {"mode": "AUTONOMOUS", "task_id": "task-001", "waypoint_index": 2}
        })
    }

    #[test]
    fn telemetry_parses_feeder_payload() {
        let t: Telemetry = serde_json::from_value(sample_json()).unwrap();
        assert_eq!(t.vehicle_id(), "hydronom-boat-01");
        assert_eq!(t.vehicle.kind, "boat");
        assert_eq!(t.thrusters.right_pwm, 1460);
        assert_eq!(t.mission.waypoint_index, 2);
    }

    #[test]
    fn telemetry_missing_fields_default() {
        let t: Telemetry = serde_json::from_value(json!({"leak": true})).unwrap();
        assert!(t.leak);
        assert!(t.vehicle_id().is_empty());
        assert_eq!(t.battery.voltage, 0.0);
    }

    #[test]
    fn telemetry_serializes_vehicle_type_key() {
        let t: Telemetry = serde_json::from_value(sample_json()).unwrap();
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["vehicle"]["type"], "boat");
        assert!(v["vehicle"].get("kind").is_none());
    }

    #[test]
    fn command_defaults_timestamp_when_absent() {
        let c: CommandRecord =
            serde_json::from_value(json!({"vehicle_id": "v1", "command": "SET_MODE"})).unwrap();
        assert!(!c.timestamp.is_empty());
        assert!(DateTime::parse_from_rfc3339(&c.timestamp).is_ok());
        assert!(c.payload.is_none());
    }

    #[test]
    fn mission_defaults_mode_and_creator() {
        let m: MissionRecord = serde_json::from_value(json!({"task_id": "m1"})).unwrap();
        assert_eq!(m.mode, "AUTONOMOUS");
        assert_eq!(m.created_by, "operator");
        assert!(m.waypoints.is_empty());
    }

    #[test]
    fn mission_action_event_uses_placeholder_vehicle() {
        let m = MissionRecord::new("m1", "");
        let e = EventLogRecord::mission_action(&m, "start").unwrap();
        assert_eq!(e.kind, "mission.start");
        assert_eq!(e.vehicle_id, UNASSIGNED_VEHICLE);
        assert_eq!(e.data["task_id"], "m1");
    }

    #[test]
    fn event_record_wire_keys() {
        let c = CommandRecord::new("v1", "SET_MODE", None);
        let e = EventLogRecord::command(&c).unwrap();
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "command");
        assert_eq!(v["vehicleId"], "v1");
        assert_eq!(v["data"]["command"], "SET_MODE");
    }

    #[test]
    fn hub_frames_are_tagged() {
        let hello = HubFrame::Hello { vehicle_id: "v1" }.to_json().unwrap();
        assert_eq!(hello, r#"{"type":"hello","vehicleId":"v1"}"#);

        let t: Telemetry = serde_json::from_value(sample_json()).unwrap();
        let frame: Value =
            serde_json::from_str(&HubFrame::Telemetry { data: &t }.to_json().unwrap()).unwrap();
        assert_eq!(frame["type"], "telemetry");
        assert_eq!(frame["data"]["vehicle"]["id"], "hydronom-boat-01");
    }

    #[test]
    fn fleet_error_display() {
        let err = FleetError::Validation("vehicle_id required".into());
        assert!(err.to_string().contains("vehicle_id required"));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: FleetError = io.into();
        assert!(matches!(err, FleetError::Storage(_)));
    }
}
