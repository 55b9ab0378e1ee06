//! Record types persisted by the store.
//!
//! Everything is stored as JSON values under tree-specific key encodings;
//! these structs are the single source of truth for the row shapes.

use serde::{Deserialize, Serialize};

use crate::config::SetpointType;
use crate::zone::Zone;

// ---------------------------------------------------------------------------
// Setpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SetpointRecord {
    pub heating_setpoint: Option<f64>,
    pub cooling_setpoint: Option<f64>,
    pub humidity: Option<f64>,
    pub co2: Option<f64>,
    pub vpd: Option<f64>,
    /// Minutes over which a mode transition ramps the setpoints in.
    pub ramp_in_duration: Option<i64>,
    pub updated_at: i64,
}

impl SetpointRecord {
    pub fn value(&self, setpoint_type: SetpointType) -> Option<f64> {
        match setpoint_type {
            SetpointType::Heating => self.heating_setpoint,
            SetpointType::Cooling => self.cooling_setpoint,
            SetpointType::Humidity => self.humidity,
            SetpointType::Co2 => self.co2,
            SetpointType::Vpd => self.vpd,
        }
    }

    /// Merge a patch into this record, leaving unspecified fields alone.
    pub fn apply(&mut self, patch: &SetpointPatch, now_ms: i64) {
        if let Some(v) = patch.heating_setpoint {
            self.heating_setpoint = Some(v);
        }
        if let Some(v) = patch.cooling_setpoint {
            self.cooling_setpoint = Some(v);
        }
        if let Some(v) = patch.humidity {
            self.humidity = Some(v);
        }
        if let Some(v) = patch.co2 {
            self.co2 = Some(v);
        }
        if let Some(v) = patch.vpd {
            self.vpd = Some(v);
        }
        if let Some(v) = patch.ramp_in_duration {
            self.ramp_in_duration = Some(v);
        }
        self.updated_at = now_ms;
    }
}

/// Partial setpoint update from the operator surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetpointPatch {
    pub heating_setpoint: Option<f64>,
    pub cooling_setpoint: Option<f64>,
    pub humidity: Option<f64>,
    pub co2: Option<f64>,
    pub vpd: Option<f64>,
    pub ramp_in_duration: Option<i64>,
}

// ---------------------------------------------------------------------------
// Schedules and rules
// ---------------------------------------------------------------------------

/// Per-room climate windows; the light schedule supplies day start/end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomScheduleRecord {
    pub day_start: String,
    pub day_end: String,
    pub pre_day_duration: i64,
    pub pre_night_duration: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleRecord {
    pub id: u64,
    pub location: String,
    pub cluster: String,
    pub device_name: String,
    /// 0 = Monday .. 6 = Sunday; `None` means every day.
    pub day_of_week: Option<u8>,
    pub start_time: String,
    pub end_time: String,
    pub enabled: bool,
    /// Optional climate-mode tag; NIGHT schedules switch devices off.
    pub mode: Option<String>,
    pub target_intensity: Option<f64>,
    pub ramp_up_duration: Option<i64>,
    pub ramp_down_duration: Option<i64>,
}

impl ScheduleRecord {
    pub fn zone(&self) -> Zone {
        Zone::new(self.location.clone(), self.cluster.clone())
    }
}

/// Schedule fields without the id, for creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub location: String,
    pub cluster: String,
    pub device_name: String,
    pub day_of_week: Option<u8>,
    pub start_time: String,
    pub end_time: String,
    pub enabled: bool,
    pub mode: Option<String>,
    pub target_intensity: Option<f64>,
    pub ramp_up_duration: Option<i64>,
    pub ramp_down_duration: Option<i64>,
}

impl NewSchedule {
    pub fn into_record(self, id: u64) -> ScheduleRecord {
        ScheduleRecord {
            id,
            location: self.location,
            cluster: self.cluster,
            device_name: self.device_name,
            day_of_week: self.day_of_week,
            start_time: self.start_time,
            end_time: self.end_time,
            enabled: self.enabled,
            mode: self.mode,
            target_intensity: self.target_intensity,
            ramp_up_duration: self.ramp_up_duration,
            ramp_down_duration: self.ramp_down_duration,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleRecord {
    pub id: u64,
    pub location: String,
    pub cluster: String,
    pub enabled: bool,
    pub condition_sensor: String,
    /// "<", ">", "<=", ">=", "=".
    pub condition_operator: String,
    pub condition_value: f64,
    pub action_device: String,
    pub action_state: u8,
    pub priority: i32,
    pub schedule_id: Option<u64>,
}

impl RuleRecord {
    pub fn zone(&self) -> Zone {
        Zone::new(self.location.clone(), self.cluster.clone())
    }
}

// ---------------------------------------------------------------------------
// PID parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PidParamsRow {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub source: String,
    pub updated_by: Option<String>,
    pub updated_at: i64,
}

// ---------------------------------------------------------------------------
// Device state and decision history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceStateRow {
    pub channel: u8,
    pub state: u8,
    pub mode: String,
    pub updated_at: i64,
}

/// Per-tick automation snapshot, one row per device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationStateRow {
    pub ts: i64,
    pub location: String,
    pub cluster: String,
    pub device_name: String,
    pub state: u8,
    pub mode: String,
    pub pid_output: Option<f64>,
    pub duty_cycle_percent: Option<f64>,
    pub active_rule_ids: Vec<u64>,
    pub active_schedule_ids: Vec<u64>,
    pub control_reason: Option<String>,
    pub schedule_ramp_up_duration: Option<i64>,
    pub schedule_ramp_down_duration: Option<i64>,
    pub schedule_photoperiod_hours: Option<f64>,
    pub pid_kp: Option<f64>,
    pub pid_ki: Option<f64>,
    pub pid_kd: Option<f64>,
}

/// State transition with its trigger, kept as an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlHistoryRow {
    pub ts: i64,
    pub location: String,
    pub cluster: String,
    pub device_name: String,
    pub channel: u8,
    pub old_state: u8,
    pub new_state: u8,
    pub mode: String,
    pub reason: String,
    pub sensor_value: Option<f64>,
    pub setpoint: Option<f64>,
}

// ---------------------------------------------------------------------------
// Effective setpoints (observability)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SetpointValues {
    pub heating: Option<f64>,
    pub cooling: Option<f64>,
    pub humidity: Option<f64>,
    pub co2: Option<f64>,
    pub vpd: Option<f64>,
}

impl SetpointValues {
    pub fn get(&self, setpoint_type: SetpointType) -> Option<f64> {
        match setpoint_type {
            SetpointType::Heating => self.heating,
            SetpointType::Cooling => self.cooling,
            SetpointType::Humidity => self.humidity,
            SetpointType::Co2 => self.co2,
            SetpointType::Vpd => self.vpd,
        }
    }

    pub fn set(&mut self, setpoint_type: SetpointType, value: Option<f64>) {
        match setpoint_type {
            SetpointType::Heating => self.heating = value,
            SetpointType::Cooling => self.cooling = value,
            SetpointType::Humidity => self.humidity = value,
            SetpointType::Co2 => self.co2 = value,
            SetpointType::Vpd => self.vpd = value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveSetpointsRow {
    pub ts: i64,
    pub location: String,
    pub cluster: String,
    pub mode: Option<String>,
    pub effective: SetpointValues,
    pub nominal: SetpointValues,
    pub ramp_progress: SetpointValues,
}

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherRow {
    pub ts: i64,
    pub station: String,
    pub temperature_c: Option<f64>,
    pub dewpoint_c: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub wind_direction_deg: Option<i64>,
    pub precipitation_mm: Option<f64>,
}

// ---------------------------------------------------------------------------
// Config audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigVersionRow {
    pub ts: i64,
    pub author: String,
    pub comment: String,
    /// "setpoints" | "schedules" | "rules" | "pid_parameters" | ...
    pub config_type: String,
    pub location: Option<String>,
    pub cluster: Option<String>,
    pub changes: Vec<FieldChange>,
}
