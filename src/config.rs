//! Daemon configuration.
//!
//! One YAML file describes the hardware addresses, the device topology
//! (locations → clusters → devices), the sensor-role mapping, control
//! parameters, and optional seed schedules/rules that are synced into the
//! store on first start. The file is read once at boot and validated before
//! anything touches hardware; runtime edits flow through the operator
//! surface, not this file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::control::scheduler::time_to_minutes;
use crate::error::ConfigError;
use crate::zone::Zone;

// ---------------------------------------------------------------------------
// Enums shared across the crate
// ---------------------------------------------------------------------------

/// Semantic device type; also the key for per-type PID parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Heater,
    Fan,
    Dehumidifier,
    Humidifier,
    Light,
    Pump,
    Co2,
    Vent,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heater => "heater",
            Self::Fan => "fan",
            Self::Dehumidifier => "dehumidifier",
            Self::Humidifier => "humidifier",
            Self::Light => "light",
            Self::Pump => "pump",
            Self::Co2 => "co2",
            Self::Vent => "vent",
        }
    }
}

/// The five independently tracked setpoint types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetpointType {
    #[serde(rename = "heating_setpoint")]
    Heating,
    #[serde(rename = "cooling_setpoint")]
    Cooling,
    #[serde(rename = "humidity")]
    Humidity,
    #[serde(rename = "co2")]
    Co2,
    #[serde(rename = "vpd")]
    Vpd,
}

impl SetpointType {
    pub const ALL: [SetpointType; 5] = [
        Self::Heating,
        Self::Cooling,
        Self::Humidity,
        Self::Co2,
        Self::Vpd,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heating => "heating_setpoint",
            Self::Cooling => "cooling_setpoint",
            Self::Humidity => "humidity",
            Self::Co2 => "co2",
            Self::Vpd => "vpd",
        }
    }

    /// Which sensor-mapping role feeds this setpoint type.
    pub fn sensor_role(self) -> &'static str {
        match self {
            Self::Heating | Self::Cooling => "temperature_sensor",
            Self::Humidity => "humidity_sensor",
            Self::Co2 => "co2_sensor",
            Self::Vpd => "vpd_sensor",
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub weather: Option<WeatherConfig>,
    /// location → cluster → device name → device config.
    #[serde(default)]
    pub devices: BTreeMap<String, BTreeMap<String, BTreeMap<String, DeviceConfig>>>,
    /// location → cluster → role name → sensor name.
    #[serde(default)]
    pub sensor_mapping: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
    #[serde(default)]
    pub control: ControlConfig,
    /// Global interlock rules, in addition to per-device `interlock_with`.
    #[serde(default)]
    pub interlocks: Vec<GlobalInterlock>,
    /// Seed rows synced into the store when the matching table is empty.
    #[serde(default)]
    pub room_schedules: Vec<RoomScheduleSeed>,
    #[serde(default)]
    pub schedules: Vec<ScheduleSeed>,
    #[serde(default)]
    pub rules: Vec<RuleSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory for the embedded store.
    pub data_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/canopy"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Run every driver against in-memory state instead of real buses.
    pub simulation: bool,
    /// I2C bus number (1 on every recent Raspberry Pi).
    pub i2c_bus: u8,
    pub mcp23017_address: u16,
    pub dac_boards: Vec<DacBoardConfig>,
    pub can_interface: String,
    /// Zone assigned to frames from unknown CAN node IDs.
    pub fallback_zone: Zone,
    pub soil_probes: Vec<SoilProbeConfig>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            simulation: false,
            i2c_bus: 1,
            mcp23017_address: 0x20,
            dac_boards: Vec::new(),
            can_interface: "can0".to_string(),
            fallback_zone: Zone::new("Flower Room", "back"),
            soil_probes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DacBoardConfig {
    pub board_id: u8,
    pub address: u16,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoilProbeConfig {
    pub port: String,
    pub slave_id: u8,
    /// Bed identifier used in sensor names (`soil_temp_<bed>`).
    pub bed: String,
    pub room: String,
    #[serde(default = "default_soil_poll")]
    pub poll_interval_secs: u64,
}

fn default_soil_poll() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(default = "default_metar_url")]
    pub api_url: String,
    pub station_icao: String,
    #[serde(default = "default_weather_poll")]
    pub poll_interval_secs: u64,
}

fn default_metar_url() -> String {
    "https://aviationweather.gov/api/data/metar".to_string()
}

fn default_weather_poll() -> u64 {
    900
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_type: DeviceType,
    /// Channel on the 16-channel expander board (0-15).
    pub channel: u8,
    #[serde(default = "default_true")]
    pub active_high: bool,
    /// State driven on failsafe/shutdown (0 or 1).
    #[serde(default)]
    pub safe_state: u8,
    #[serde(default)]
    pub pid_enabled: bool,
    /// Software PWM period in seconds for PID-driven relays.
    #[serde(default = "default_pwm_period")]
    pub pwm_period: u64,
    #[serde(default)]
    pub dimming: Option<DimmingConfig>,
    /// Devices in the same zone that block this one when loaded.
    #[serde(default)]
    pub interlock_with: Vec<String>,
    /// Load (%) the interlocking device may carry before it blocks.
    #[serde(default)]
    pub interlock_max_allowed_load: f64,
    /// Conservative intensity written once to the DAC EEPROM.
    #[serde(default)]
    pub safety_level: Option<f64>,
    /// Ordered (setpoint type, priority) pairs for multi-setpoint PID.
    /// Empty means "use the defaults for the device type".
    #[serde(default)]
    pub pid_setpoints: Vec<PidSetpointEntry>,
}

fn default_true() -> bool {
    true
}

fn default_pwm_period() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimmingConfig {
    pub board_id: u8,
    /// DAC channel on the board (0 or 1).
    pub channel: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidSetpointEntry {
    pub setpoint_type: SetpointType,
    pub priority: i32,
}

impl DeviceConfig {
    /// Priority-ordered setpoint list for PID control, highest first.
    pub fn pid_setpoints_ordered(&self) -> Vec<PidSetpointEntry> {
        let mut list = if self.pid_setpoints.is_empty() {
            default_pid_setpoints(self.device_type)
        } else {
            self.pid_setpoints.clone()
        };
        list.sort_by_key(|e| std::cmp::Reverse(e.priority));
        list
    }
}

fn default_pid_setpoints(device_type: DeviceType) -> Vec<PidSetpointEntry> {
    let pairs: &[(SetpointType, i32)] = match device_type {
        DeviceType::Heater => &[(SetpointType::Heating, 10)],
        DeviceType::Co2 => &[(SetpointType::Co2, 10)],
        DeviceType::Fan => &[(SetpointType::Cooling, 10), (SetpointType::Vpd, 5)],
        DeviceType::Dehumidifier => &[(SetpointType::Vpd, 10)],
        DeviceType::Humidifier => &[(SetpointType::Humidity, 10)],
        _ => &[],
    };
    pairs
        .iter()
        .map(|&(setpoint_type, priority)| PidSetpointEntry {
            setpoint_type,
            priority,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Control parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Control loop cadence in seconds.
    pub update_interval: u64,
    /// How long a last-good sensor value substitutes for a live one.
    pub last_good_hold_period: u64,
    /// Per-field setpoint write rate limit.
    pub setpoint_max_writes_per_sec: f64,
    pub safety_limits: SafetyLimits,
    /// device type → default PID gains.
    pub pid: BTreeMap<String, PidGains>,
    /// device type → allowed gain ranges for operator edits.
    pub pid_limits: BTreeMap<String, PidLimits>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            update_interval: 1,
            last_good_hold_period: 30,
            setpoint_max_writes_per_sec: 1.0,
            safety_limits: SafetyLimits::default(),
            pid: BTreeMap::new(),
            pid_limits: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyLimits {
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub min_humidity: f64,
    pub max_humidity: f64,
    pub min_co2: f64,
    pub max_co2: f64,
    pub min_vpd: f64,
    pub max_vpd: f64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            min_temperature: 10.0,
            max_temperature: 35.0,
            min_humidity: 30.0,
            max_humidity: 90.0,
            min_co2: 400.0,
            max_co2: 2000.0,
            min_vpd: 0.0,
            max_vpd: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.1,
            kd: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PidLimits {
    pub kp_min: f64,
    pub kp_max: f64,
    pub ki_min: f64,
    pub ki_max: f64,
    pub kd_min: f64,
    pub kd_max: f64,
}

impl Default for PidLimits {
    fn default() -> Self {
        Self {
            kp_min: 0.0,
            kp_max: 100.0,
            ki_min: 0.0,
            ki_max: 1.0,
            kd_min: 0.0,
            kd_max: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalInterlock {
    pub when_device: String,
    pub then_device: String,
    #[serde(default)]
    pub max_allowed_load: f64,
}

// ---------------------------------------------------------------------------
// Seed rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomScheduleSeed {
    pub location: String,
    pub cluster: String,
    /// "HH:MM" wall-clock times.
    pub day_start: String,
    pub day_end: String,
    #[serde(default)]
    pub pre_day_duration: i64,
    #[serde(default)]
    pub pre_night_duration: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSeed {
    pub location: String,
    pub cluster: String,
    pub device_name: String,
    /// 0 = Monday .. 6 = Sunday; absent means daily.
    #[serde(default)]
    pub day_of_week: Option<u8>,
    pub start_time: String,
    pub end_time: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub target_intensity: Option<f64>,
    #[serde(default)]
    pub ramp_up_duration: Option<i64>,
    #[serde(default)]
    pub ramp_down_duration: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSeed {
    pub location: String,
    pub cluster: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub condition_sensor: String,
    pub condition_operator: String,
    pub condition_value: f64,
    pub action_device: String,
    pub action_state: u8,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub schedule_id: Option<u64>,
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Iterate every configured (zone, device name, device config) triple.
    pub fn iter_devices(&self) -> impl Iterator<Item = (Zone, &String, &DeviceConfig)> {
        self.devices.iter().flat_map(|(location, clusters)| {
            clusters.iter().flat_map(move |(cluster, devices)| {
                devices.iter().map(move |(name, device)| {
                    (Zone::new(location.clone(), cluster.clone()), name, device)
                })
            })
        })
    }

    /// All zones that carry at least one device.
    pub fn zones(&self) -> Vec<Zone> {
        let mut zones = Vec::new();
        for (location, clusters) in &self.devices {
            for cluster in clusters.keys() {
                zones.push(Zone::new(location.clone(), cluster.clone()));
            }
        }
        zones
    }

    pub fn device(&self, zone: &Zone, name: &str) -> Option<&DeviceConfig> {
        self.devices
            .get(&zone.location)?
            .get(&zone.cluster)?
            .get(name)
    }

    /// Sensor name fulfilling `role` in `zone`, from the sensor mapping.
    pub fn sensor_for_role(&self, zone: &Zone, role: &str) -> Option<&String> {
        self.sensor_mapping
            .get(&zone.location)?
            .get(&zone.cluster)?
            .get(role)
    }

    /// All mapped sensors for a zone.
    pub fn zone_sensors(&self, zone: &Zone) -> Vec<String> {
        self.sensor_mapping
            .get(&zone.location)
            .and_then(|c| c.get(&zone.cluster))
            .map(|roles| roles.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Default PID gains for a device type (config, then built-in default).
    pub fn pid_gains(&self, device_type: DeviceType) -> PidGains {
        self.control
            .pid
            .get(device_type.as_str())
            .copied()
            .unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Channel assignments must be unique on the expander board.
        let mut seen: BTreeMap<u8, String> = BTreeMap::new();
        for (zone, name, device) in self.iter_devices() {
            if device.channel > 15 {
                return Err(ConfigError::Invalid(format!(
                    "{zone}/{name}: channel {} out of range (0-15)",
                    device.channel
                )));
            }
            if device.safe_state > 1 {
                return Err(ConfigError::Invalid(format!(
                    "{zone}/{name}: safe_state must be 0 or 1"
                )));
            }
            if let Some(existing) = seen.insert(device.channel, format!("{zone}/{name}")) {
                return Err(ConfigError::ChannelCollision {
                    channel: device.channel,
                    existing,
                });
            }
            if let Some(dimming) = &device.dimming {
                if dimming.channel > 1 {
                    return Err(ConfigError::Invalid(format!(
                        "{zone}/{name}: DAC channel {} out of range (0-1)",
                        dimming.channel
                    )));
                }
                if !self
                    .hardware
                    .dac_boards
                    .iter()
                    .any(|b| b.board_id == dimming.board_id)
                {
                    return Err(ConfigError::Invalid(format!(
                        "{zone}/{name}: DAC board {} not declared in hardware.dac_boards",
                        dimming.board_id
                    )));
                }
            }
            if let Some(level) = device.safety_level {
                if !(0.0..=100.0).contains(&level) {
                    return Err(ConfigError::Invalid(format!(
                        "{zone}/{name}: safety_level {level} out of range (0-100)"
                    )));
                }
            }
            if device.pwm_period == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{zone}/{name}: pwm_period must be at least 1 second"
                )));
            }
        }

        let mut board_ids = std::collections::BTreeSet::new();
        for board in &self.hardware.dac_boards {
            if !board_ids.insert(board.board_id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate DAC board_id {}",
                    board.board_id
                )));
            }
        }

        for seed in &self.room_schedules {
            validate_room_schedule(
                &seed.day_start,
                &seed.day_end,
                seed.pre_day_duration,
                seed.pre_night_duration,
            )
            .map_err(ConfigError::Invalid)?;
        }

        for seed in &self.schedules {
            if time_to_minutes(&seed.start_time).is_none()
                || time_to_minutes(&seed.end_time).is_none()
            {
                return Err(ConfigError::Invalid(format!(
                    "schedule for {}/{}/{}: bad time format",
                    seed.location, seed.cluster, seed.device_name
                )));
            }
            if let Some(dow) = seed.day_of_week {
                if dow > 6 {
                    return Err(ConfigError::Invalid(format!(
                        "schedule for {}: day_of_week {dow} out of range (0-6)",
                        seed.device_name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Validate the climate transition windows against the configured night.
///
/// Both pre-durations are capped at 240 minutes and together must fit
/// inside the night.
pub fn validate_room_schedule(
    day_start: &str,
    day_end: &str,
    pre_day_duration: i64,
    pre_night_duration: i64,
) -> Result<(), String> {
    const MAX_DURATION: i64 = 240;

    let start = time_to_minutes(day_start)
        .ok_or_else(|| format!("bad day_start time '{day_start}'"))? as i64;
    let end =
        time_to_minutes(day_end).ok_or_else(|| format!("bad day_end time '{day_end}'"))? as i64;

    if !(0..=MAX_DURATION).contains(&pre_day_duration) {
        return Err(format!(
            "pre_day_duration ({pre_day_duration} min) must be within 0-{MAX_DURATION}"
        ));
    }
    if !(0..=MAX_DURATION).contains(&pre_night_duration) {
        return Err(format!(
            "pre_night_duration ({pre_night_duration} min) must be within 0-{MAX_DURATION}"
        ));
    }

    let night_length = if end > start {
        1440 - (end - start)
    } else {
        start - end
    };
    if pre_day_duration + pre_night_duration >= night_length {
        return Err(format!(
            "pre_day_duration ({pre_day_duration} min) + pre_night_duration \
             ({pre_night_duration} min) must be less than night length ({night_length} min)"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
service:
  data_dir: /tmp/canopy-test
hardware:
  simulation: true
  dac_boards:
    - { board_id: 1, address: 88 }
devices:
  "Flower Room":
    front:
      heater_1:
        device_type: heater
        channel: 0
        pid_enabled: true
      light_main:
        device_type: light
        channel: 1
        dimming: { board_id: 1, channel: 0 }
        safety_level: 60
sensor_mapping:
  "Flower Room":
    front:
      temperature_sensor: dry_bulb_f
      vpd_sensor: vpd_f
"#
    }

    #[test]
    fn parses_minimal_config() {
        let config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.validate().unwrap();
        let zone = Zone::new("Flower Room", "front");
        assert_eq!(
            config.sensor_for_role(&zone, "temperature_sensor").unwrap(),
            "dry_bulb_f"
        );
        let heater = config.device(&zone, "heater_1").unwrap();
        assert!(heater.pid_enabled);
        assert_eq!(heater.pwm_period, 100);
    }

    #[test]
    fn rejects_channel_collision() {
        let yaml = minimal_yaml().replace("channel: 1", "channel: 0");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ChannelCollision { channel: 0, .. })
        ));
    }

    #[test]
    fn rejects_undeclared_dac_board() {
        let yaml = minimal_yaml().replace("board_id: 1, channel: 0", "board_id: 7, channel: 0");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn room_schedule_window_validation() {
        // 06:00-18:00 day leaves a 720 min night.
        assert!(validate_room_schedule("06:00", "18:00", 60, 60).is_ok());
        assert!(validate_room_schedule("06:00", "18:00", 241, 0).is_err());
        assert!(validate_room_schedule("06:00", "18:00", 240, 240).is_err());
        assert!(validate_room_schedule("6:00", "05:00", 120, 120).is_err());
    }

    #[test]
    fn pid_setpoint_defaults_by_type() {
        let config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        let zone = Zone::new("Flower Room", "front");
        let heater = config.device(&zone, "heater_1").unwrap();
        let list = heater.pid_setpoints_ordered();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].setpoint_type, SetpointType::Heating);
    }
}
