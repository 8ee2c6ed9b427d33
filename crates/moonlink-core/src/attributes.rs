// ── Attribute table ──
//
// Static metadata for the leaf names Moonraker reports, keyed by the last
// path segment. Names not listed here still materialize, with inferred
// defaults and a one-time warning from the flattener.

use crate::round::Precision;
use crate::store::ValueType::{Boolean, Mixed, Number, String as Text};
use crate::store::{StateMeta, ValueType};

/// Metadata for one leaf name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: &'static str,
    /// Display label; the leaf name is used when absent.
    pub label: Option<&'static str>,
    pub value_type: ValueType,
    pub role: &'static str,
    pub unit: &'static str,
    pub writable: bool,
    pub rounding: Option<Precision>,
    /// Leaf is a liveness indicator: it falls back to `false` when it stops
    /// being refreshed.
    pub liveness: bool,
}

impl AttributeDef {
    const fn new(name: &'static str, value_type: ValueType, role: &'static str) -> Self {
        Self {
            name,
            label: None,
            value_type,
            role,
            unit: "",
            writable: false,
            rounding: None,
            liveness: false,
        }
    }

    const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    const fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    const fn round(mut self, precision: Precision) -> Self {
        self.rounding = Some(precision);
        self
    }

    const fn liveness(mut self) -> Self {
        self.liveness = true;
        self
    }

    /// State metadata for a leaf carrying this definition.
    pub fn meta(&self) -> StateMeta {
        StateMeta {
            name: self.label.unwrap_or(self.name).to_owned(),
            value_type: self.value_type,
            role: self.role.to_owned(),
            unit: self.unit.to_owned(),
            readable: true,
            writable: self.writable,
        }
    }
}

const fn num(name: &'static str, role: &'static str) -> AttributeDef {
    AttributeDef::new(name, Number, role)
}

const fn text(name: &'static str) -> AttributeDef {
    AttributeDef::new(name, Text, "text")
}

const fn flag(name: &'static str, role: &'static str) -> AttributeDef {
    AttributeDef::new(name, Boolean, role)
}

/// Every known leaf name.
pub const ATTRIBUTES: &[AttributeDef] = &[
    // Server / connection
    flag("klippy_connected", "indicator.reachable")
        .label("Klippy connected")
        .liveness(),
    text("klippy_state").label("Klippy state"),
    text("moonraker_version"),
    text("api_version_string"),
    num("websocket_count", "value"),
    text("hostname"),
    text("software_version"),
    text("cpu_info"),
    text("state"),
    text("state_message").label("State message"),
    text("message"),
    // Heaters and sensors
    num("temperature", "value.temperature").unit("°C").round(Precision::One),
    num("target", "level.temperature").unit("°C").round(Precision::One),
    num("power", "value.power").round(Precision::Two),
    num("measured_min_temp", "value.temperature").unit("°C").round(Precision::One),
    num("measured_max_temp", "value.temperature").unit("°C").round(Precision::One),
    num("pressure_advance", "value").round(Precision::Three),
    num("smooth_time", "value").unit("s").round(Precision::Three),
    flag("can_extrude", "indicator"),
    // Fans and pins
    num("speed", "value.speed").round(Precision::Two),
    num("rpm", "value.speed").unit("rpm").round(Precision::One),
    num("value", "value").round(Precision::Two),
    // Motion
    num("speed_factor", "level").round(Precision::Two),
    num("extrude_factor", "level").round(Precision::Two),
    num("max_velocity", "value.speed").unit("mm/s"),
    num("max_accel", "value").unit("mm/s²"),
    num("square_corner_velocity", "value.speed").unit("mm/s"),
    num("minimum_cruise_ratio", "value").round(Precision::Two),
    num("print_time", "value.time").unit("s").round(Precision::One),
    num("estimated_print_time", "value.time").unit("s").round(Precision::One),
    text("homed_axes").label("Homed axes"),
    AttributeDef::new("position", Text, "value.position"),
    AttributeDef::new("gcode_position", Text, "value.position"),
    flag("absolute_coordinates", "indicator"),
    flag("absolute_extrude", "indicator"),
    // Print job
    text("filename").label("File name"),
    num("progress", "value").round(Precision::Three),
    num("print_duration", "value.time").unit("s").round(Precision::One),
    num("total_duration", "value.time").unit("s").round(Precision::One),
    num("filament_used", "value").unit("mm").round(Precision::One),
    flag("is_active", "indicator"),
    flag("is_paused", "indicator"),
    num("file_position", "value").unit("B"),
    num("file_size", "value").unit("B"),
    num("current_layer", "value"),
    num("total_layer", "value"),
    // Spoolman
    AttributeDef::new("spool_id", Mixed, "value"),
    // LED controllers
    num("mA", "value.current")
        .label("Current LED power usage in milliamps as determined by the ABL. 0 if ABL is disabled")
        .unit("mA"),
    // Host system
    num("cpu_temp", "value.temperature").unit("°C").round(Precision::One),
    num("memory_used", "value").unit("kB"),
];

/// Definition for a leaf name, if it is known.
pub fn lookup(name: &str) -> Option<&'static AttributeDef> {
    ATTRIBUTES.iter().find(|def| def.name == name)
}
