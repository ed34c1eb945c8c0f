//! Flattening of the snapshot cache into labeled samples.
//!
//! Device and room gauges describe current state and carry no timestamp.
//! Measurement gauges carry the timestamp of the sample they come from, not
//! the time of the scrape.

use crate::cache::{HomeEntry, ModuleEntry, SnapshotCache};
use crate::models::netatmo::{Home, MeasurePoint, Room};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDef {
    pub name: &'static str,
    pub help: &'static str,
}

pub const UP: MetricDef = MetricDef {
    name: "netatmo_up",
    help: "Status of netatmo exporter",
};

pub const BUILD_INFO: MetricDef = MetricDef {
    name: "netatmo_exporter_build_info",
    help: "A metric with a constant '1' value labeled by version and revision from which netatmo_exporter was built",
};

pub const MODULE_BATTERY_LEVEL: MetricDef = MetricDef {
    name: "netatmo_module_battery_level",
    help: "Level of the battery",
};
pub const MODULE_WIFI_STRENGTH: MetricDef = MetricDef {
    name: "netatmo_module_wifi_strength",
    help: "WiFi signal strength",
};
pub const MODULE_RF_STRENGTH: MetricDef = MetricDef {
    name: "netatmo_module_rf_strength",
    help: "Radio signal strength",
};
pub const MODULE_BOILER_STATUS: MetricDef = MetricDef {
    name: "netatmo_module_boiler_status",
    help: "Status of the boiler",
};
pub const MODULE_REACHABLE: MetricDef = MetricDef {
    name: "netatmo_module_reachable",
    help: "Tells if the module is currently reachable",
};
pub const MODULE_FIRMWARE_REVISION: MetricDef = MetricDef {
    name: "netatmo_module_firmware_revision",
    help: "Firmware revision of module",
};

pub const MODULE_TEMPERATURE: MetricDef = MetricDef {
    name: "netatmo_module_temperature",
    help: "Measured temperature reported by the module",
};
pub const MODULE_SP_TEMPERATURE: MetricDef = MetricDef {
    name: "netatmo_module_sp_temperature",
    help: "Set point temperature reported by the module",
};
pub const MODULE_SUM_BOILER_ON: MetricDef = MetricDef {
    name: "netatmo_module_sum_boiler_on_seconds",
    help: "Seconds the boiler was on during the sampling interval",
};
pub const MODULE_SUM_BOILER_OFF: MetricDef = MetricDef {
    name: "netatmo_module_sum_boiler_off_seconds",
    help: "Seconds the boiler was off during the sampling interval",
};

pub const ROOM_TEMPERATURE: MetricDef = MetricDef {
    name: "netatmo_room_temperature",
    help: "Measured Temperature in a room",
};
pub const ROOM_SP_TEMPERATURE: MetricDef = MetricDef {
    name: "netatmo_room_sp_temperature",
    help: "Set Point Temperature of a room",
};
pub const ROOM_REACHABLE: MetricDef = MetricDef {
    name: "netatmo_room_reachable",
    help: "Tells if the room is currently reachable",
};
pub const ROOM_OPEN_WINDOW: MetricDef = MetricDef {
    name: "netatmo_room_open_window",
    help: "Tells if the window is open.",
};

pub type Labels = Vec<(&'static str, String)>;

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: MetricDef,
    pub labels: Labels,
    pub value: f64,
    /// Milliseconds since the epoch; `None` for current-state gauges.
    pub timestamp_ms: Option<i64>,
}

impl Sample {
    fn gauge(metric: MetricDef, labels: &Labels, value: f64) -> Self {
        Sample {
            metric,
            labels: labels.clone(),
            value,
            timestamp_ms: None,
        }
    }

    fn at(metric: MetricDef, labels: &Labels, value: f64, point: &MeasurePoint) -> Self {
        Sample {
            metric,
            labels: labels.clone(),
            value,
            timestamp_ms: Some(point.time.saturating_mul(1000)),
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.iter().find(|(n, _)| *n == name).map(|(_, v)| v.as_str())
    }
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

/// Render the whole cache. When `up` is false only the health gauge is emitted.
pub fn render(cache: &SnapshotCache, up: bool) -> Vec<Sample> {
    if !up {
        return render_down();
    }
    let mut samples = vec![Sample::gauge(UP, &Vec::new(), 1.0), build_info()];
    for entry in cache.homes() {
        render_home(entry, &mut samples);
    }
    samples
}

/// The sample set of a failed pass.
pub fn render_down() -> Vec<Sample> {
    vec![Sample::gauge(UP, &Vec::new(), 0.0)]
}

fn build_info() -> Sample {
    let labels = vec![
        ("version", env!("CARGO_PKG_VERSION").to_string()),
        ("revision", env!("BUILD_TIME_GIT_HASH").to_string()),
    ];
    Sample::gauge(BUILD_INFO, &labels, 1.0)
}

fn home_labels(home: &Home) -> Labels {
    let coordinate = |c: Option<f64>| c.map(|v| format!("{:.8}", v)).unwrap_or_default();
    vec![
        ("home_id", home.id.0.clone()),
        ("home_name", home.name.clone()),
        ("home_country", home.country.clone()),
        ("home_altitude", home.altitude.to_string()),
        ("home_lat", coordinate(home.lat())),
        ("home_long", coordinate(home.long())),
    ]
}

fn render_home(entry: &HomeEntry, out: &mut Vec<Sample>) {
    let labels = home_labels(&entry.home);
    for module in entry.modules.values() {
        render_module(&labels, module, out);
    }
    for room in &entry.home.rooms {
        render_room(&labels, room, out);
    }
}

fn render_module(home_labels: &Labels, entry: &ModuleEntry, out: &mut Vec<Sample>) {
    let m = &entry.module;
    let mut labels = home_labels.clone();
    labels.push(("room_id", m.room_id.0.clone()));
    labels.push(("bridge", m.bridge.clone()));
    labels.push(("module", m.id.0.clone()));
    labels.push(("type", m.module_type.clone()));

    out.push(Sample::gauge(MODULE_BATTERY_LEVEL, &labels, m.battery_level));
    out.push(Sample::gauge(MODULE_WIFI_STRENGTH, &labels, m.wifi_strength));
    out.push(Sample::gauge(MODULE_RF_STRENGTH, &labels, m.rf_strength));
    out.push(Sample::gauge(MODULE_BOILER_STATUS, &labels, flag(m.boiler_status)));
    out.push(Sample::gauge(MODULE_REACHABLE, &labels, flag(m.reachable)));
    out.push(Sample::gauge(MODULE_FIRMWARE_REVISION, &labels, m.firmware_revision));

    if let Some(p) = entry.current_measure() {
        out.push(Sample::at(MODULE_TEMPERATURE, &labels, p.measured_temperature, p));
        out.push(Sample::at(MODULE_SP_TEMPERATURE, &labels, p.setpoint_temperature, p));
        out.push(Sample::at(MODULE_SUM_BOILER_ON, &labels, f64::from(p.sum_boiler_on), p));
        out.push(Sample::at(MODULE_SUM_BOILER_OFF, &labels, f64::from(p.sum_boiler_off), p));
    }
}

fn render_room(home_labels: &Labels, room: &Room, out: &mut Vec<Sample>) {
    let mut labels = home_labels.clone();
    labels.push(("room_id", room.id.0.clone()));

    out.push(Sample::gauge(ROOM_TEMPERATURE, &labels, room.measured_temperature));
    out.push(Sample::gauge(ROOM_SP_TEMPERATURE, &labels, room.setpoint_temperature));
    out.push(Sample::gauge(ROOM_REACHABLE, &labels, flag(room.reachable)));
    out.push(Sample::gauge(ROOM_OPEN_WINDOW, &labels, flag(room.open_window)));
}
