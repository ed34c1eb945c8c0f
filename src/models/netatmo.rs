//! Models for the Netatmo Energy API (`homesdata`, `homestatus`, `getmeasure`).
//!
//! Notes
//! - The same `Home`/`Room`/`Module` structs decode both the static home list and
//!   the live status view. Each endpoint only fills a subset of the fields, so
//!   every field defaults to its zero value when absent.
//! - Measurement records are kept as raw JSON here; `crate::measure` owns the
//!   tolerant decoding of their columnar layout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =====================
// Scalar ID newtype wrappers
// =====================

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HomeId(pub String);

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub String);

// =====================
// Response payloads (already unwrapped from the `body` envelope)
// =====================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HomesData {
    #[serde(default)]
    pub homes: Vec<Home>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HomeStatus {
    #[serde(default)]
    pub home: Home,
}

// =====================
// Entities
// =====================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Home {
    pub id: HomeId,
    pub name: String,
    pub country: String,
    pub altitude: u32,
    /// Two elements when present; see `Home::lat` / `Home::long`.
    pub coordinates: Vec<f64>,
    pub rooms: Vec<Room>,
    pub modules: Vec<Module>,
}

impl Home {
    pub fn lat(&self) -> Option<f64> {
        self.coordinates.first().copied()
    }

    pub fn long(&self) -> Option<f64> {
        self.coordinates.get(1).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub reachable: bool,
    pub anticipating: bool,
    pub open_window: bool,
    #[serde(rename = "therm_measured_temperature")]
    pub measured_temperature: f64,
    #[serde(rename = "therm_setpoint_temperature")]
    pub setpoint_temperature: f64,
    #[serde(rename = "therm_setpoint_start_time")]
    pub setpoint_start_time: u64,
    #[serde(rename = "therm_setpoint_end_time")]
    pub setpoint_end_time: u64,
    #[serde(rename = "therm_setpoint_mode")]
    pub setpoint_mode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Module {
    pub id: ModuleId,
    pub reachable: bool,
    #[serde(rename = "type")]
    pub module_type: String,
    /// Id of the relay/bridge this module talks through; empty for bridges.
    pub bridge: String,
    pub anticipating: bool,
    pub firmware_revision: f64,
    pub rf_strength: f64,
    pub wifi_strength: f64,
    pub battery_level: f64,
    pub battery_state: String,
    pub boiler_status: bool,
    pub room_id: RoomId,
}

/// One columnar record from `getmeasure`, left undecoded.
///
/// `beg_time`/`step_time` are epoch seconds; `value` is an array of rows, each
/// row `[sum_boiler_on, sum_boiler_off, temperature, sp_temperature]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureRecord {
    pub beg_time: Value,
    pub step_time: Value,
    pub value: Value,
}

/// A single decoded sample of a module's thermal/boiler state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurePoint {
    /// Seconds since the Unix epoch.
    pub time: i64,
    pub sum_boiler_on: u32,
    pub sum_boiler_off: u32,
    pub measured_temperature: f64,
    pub setpoint_temperature: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_views_decode_with_zero_defaults() {
        let status: HomeStatus = serde_json::from_str(
            r#"{"home":{"id":"H1","modules":[{"id":"M1","reachable":true}],"rooms":[{"id":"R1","open_window":true}]}}"#,
        )
        .expect("parse status");

        let home = status.home;
        assert_eq!(home.id, HomeId("H1".into()));
        assert!(home.name.is_empty());
        assert!(home.coordinates.is_empty());
        assert_eq!(home.lat(), None);
        assert!(home.modules[0].reachable);
        assert_eq!(home.modules[0].battery_level, 0.0);
        assert!(home.rooms[0].open_window);
        assert_eq!(home.rooms[0].measured_temperature, 0.0);
    }

    #[test]
    fn renamed_fields_map_onto_vendor_names() {
        let room: Room = serde_json::from_str(
            r#"{"id":"R1","therm_measured_temperature":19.5,"therm_setpoint_temperature":21,"therm_setpoint_mode":"schedule"}"#,
        )
        .expect("parse room");
        assert_eq!(room.measured_temperature, 19.5);
        assert_eq!(room.setpoint_temperature, 21.0);
        assert_eq!(room.setpoint_mode, "schedule");

        let module: Module =
            serde_json::from_str(r#"{"id":"M1","type":"NATherm1","bridge":"B1","room_id":"R1"}"#).expect("parse module");
        assert_eq!(module.module_type, "NATherm1");
        assert_eq!(module.room_id, RoomId("R1".into()));
    }
}
