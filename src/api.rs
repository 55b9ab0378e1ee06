//! Operator surface contracts.
//!
//! The HTTP/WebSocket layer lives elsewhere; this module is what it calls.
//! Every mutation validates against the configured safety/PID limits,
//! persists through the store, appends a `config_versions` audit row with
//! old/new values per field, refreshes the control loop's config snapshot,
//! and reflects into the live cache. Queries assemble the read side:
//! per-zone live snapshots with staleness flags, tiered time-series
//! fetches, device states, alarms, and modes. WebSocket consumers
//! subscribe to the broadcast channel of JSON envelopes.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::cache::{AlarmRecord, LiveCache, PidParamsRecord, ZoneMode};
use crate::config::{Config, SetpointType};
use crate::control::alarm::AlarmManager;
use crate::control::engine::EngineCommand;
use crate::control::relay::ControlMode;
use crate::control::scheduler::time_to_minutes;
use crate::control::SharedConfigState;
use crate::error::ApiError;
use crate::store::types::{
    ConfigVersionRow, DeviceStateRow, FieldChange, NewSchedule, PidParamsRow, RoomScheduleRecord,
    RuleRecord, ScheduleRecord, SetpointPatch, SetpointRecord,
};
use crate::store::Store;
use crate::zone::Zone;

/// A sensor value older than this is flagged stale in snapshots.
const STALE_AFTER_MS: i64 = 30_000;

/// Downsampling tier boundaries.
const RAW_WINDOW_MS: i64 = 12 * 3_600_000;
const HOURLY_WINDOW_MS: i64 = 72 * 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTier {
    Raw,
    Hourly,
    Daily,
}

/// Pick the aggregation tier for a query window.
pub fn query_tier(from_ms: i64, to_ms: i64) -> QueryTier {
    let span = (to_ms - from_ms).max(0);
    if span < RAW_WINDOW_MS {
        QueryTier::Raw
    } else if span < HOURLY_WINDOW_MS {
        QueryTier::Hourly
    } else {
        QueryTier::Daily
    }
}

/// Average measurements into fixed buckets (bucket start, mean).
pub fn downsample(points: &[(i64, f64)], bucket_ms: i64) -> Vec<(i64, f64)> {
    let mut out: Vec<(i64, f64)> = Vec::new();
    let mut current: Option<i64> = None;
    let mut sum = 0.0;
    let mut count = 0usize;
    for &(ts, value) in points {
        let start = ts - ts.rem_euclid(bucket_ms);
        if current != Some(start) {
            if let Some(bucket_start) = current {
                out.push((bucket_start, sum / count as f64));
            }
            current = Some(start);
            sum = 0.0;
            count = 0;
        }
        sum += value;
        count += 1;
    }
    if let Some(bucket_start) = current {
        out.push((bucket_start, sum / count as f64));
    }
    out
}

pub struct ApiService {
    config: Arc<Config>,
    cache: Arc<LiveCache>,
    store: Arc<Store>,
    state: Arc<SharedConfigState>,
    alarms: Arc<Mutex<AlarmManager>>,
    broadcast: broadcast::Sender<serde_json::Value>,
    engine_commands: mpsc::UnboundedSender<EngineCommand>,
}

impl ApiService {
    pub fn new(
        config: Arc<Config>,
        cache: Arc<LiveCache>,
        store: Arc<Store>,
        state: Arc<SharedConfigState>,
        alarms: Arc<Mutex<AlarmManager>>,
        broadcast: broadcast::Sender<serde_json::Value>,
        engine_commands: mpsc::UnboundedSender<EngineCommand>,
    ) -> Self {
        Self {
            config,
            cache,
            store,
            state,
            alarms,
            broadcast,
            engine_commands,
        }
    }

    /// Subscribe to the `{sensor,device,mode}_update` envelope stream.
    pub fn subscribe(&self) -> broadcast::Receiver<serde_json::Value> {
        self.broadcast.subscribe()
    }

    // ── Setpoints ─────────────────────────────────────────────────

    pub fn set_setpoint(
        &self,
        zone: &Zone,
        mode: Option<&str>,
        patch: SetpointPatch,
        author: &str,
    ) -> Result<SetpointRecord, ApiError> {
        let now_ms = Utc::now().timestamp_millis();
        let limits = &self.config.control.safety_limits;

        let fields: [(SetpointType, Option<f64>); 5] = [
            (SetpointType::Heating, patch.heating_setpoint),
            (SetpointType::Cooling, patch.cooling_setpoint),
            (SetpointType::Humidity, patch.humidity),
            (SetpointType::Co2, patch.co2),
            (SetpointType::Vpd, patch.vpd),
        ];

        for (setpoint_type, value) in fields {
            let Some(value) = value else { continue };
            validate_setpoint_value(setpoint_type, value, limits)
                .map_err(ApiError::Validation)?;
            if !self.cache.check_rate_limit(
                zone,
                setpoint_type.as_str(),
                self.config.control.setpoint_max_writes_per_sec,
                now_ms,
            ) {
                return Err(ApiError::RateLimited(format!(
                    "setpoint {} for {zone}",
                    setpoint_type.as_str()
                )));
            }
        }
        if let Some(ramp) = patch.ramp_in_duration {
            if !(0..=1440).contains(&ramp) {
                return Err(ApiError::Validation(format!(
                    "ramp_in_duration ({ramp} min) must be within 0-1440"
                )));
            }
        }

        let (old, new) = self.store.set_setpoint(zone, mode, &patch, now_ms)?;

        self.audit(
            "setpoints",
            Some(zone),
            author,
            &format!("setpoint update (mode: {})", mode.unwrap_or("default")),
            setpoint_changes(old.as_ref(), &new),
            now_ms,
        )?;

        for (setpoint_type, value) in fields {
            if let Some(value) = value {
                self.cache
                    .write_setpoint_field(zone, setpoint_type.as_str(), value, "api", now_ms);
            }
        }
        Ok(new)
    }

    // ── PID parameters ────────────────────────────────────────────

    pub fn set_pid_parameters(
        &self,
        device_type: &str,
        kp: Option<f64>,
        ki: Option<f64>,
        kd: Option<f64>,
        source: &str,
        updated_by: &str,
    ) -> Result<PidParamsRow, ApiError> {
        let now_ms = Utc::now().timestamp_millis();
        let limits = self
            .config
            .control
            .pid_limits
            .get(device_type)
            .copied()
            .unwrap_or_default();

        let mut errors = Vec::new();
        if let Some(kp) = kp {
            if !(limits.kp_min..=limits.kp_max).contains(&kp) {
                errors.push(format!(
                    "Kp ({kp}) must be between {} and {}",
                    limits.kp_min, limits.kp_max
                ));
            }
        }
        if let Some(ki) = ki {
            if !(limits.ki_min..=limits.ki_max).contains(&ki) {
                errors.push(format!(
                    "Ki ({ki}) must be between {} and {}",
                    limits.ki_min, limits.ki_max
                ));
            }
        }
        if let Some(kd) = kd {
            if !(limits.kd_min..=limits.kd_max).contains(&kd) {
                errors.push(format!(
                    "Kd ({kd}) must be between {} and {}",
                    limits.kd_min, limits.kd_max
                ));
            }
        }
        if !errors.is_empty() {
            return Err(ApiError::Validation(errors.join("; ")));
        }

        let existing = self.store.get_pid_parameters(device_type)?;
        let defaults = self
            .config
            .control
            .pid
            .get(device_type)
            .copied()
            .unwrap_or_default();
        let base = existing.clone().unwrap_or(PidParamsRow {
            kp: defaults.kp,
            ki: defaults.ki,
            kd: defaults.kd,
            source: "config".to_string(),
            updated_by: None,
            updated_at: now_ms,
        });
        let row = PidParamsRow {
            kp: kp.unwrap_or(base.kp),
            ki: ki.unwrap_or(base.ki),
            kd: kd.unwrap_or(base.kd),
            source: source.to_string(),
            updated_by: Some(updated_by.to_string()),
            updated_at: now_ms,
        };
        let old = self.store.set_pid_parameters(device_type, &row)?;

        self.cache.write_pid_parameters(
            device_type,
            &PidParamsRecord {
                kp: row.kp,
                ki: row.ki,
                kd: row.kd,
                source: row.source.clone(),
                updated_at: now_ms,
            },
        );

        let changes = vec![
            change("kp", old.as_ref().map(|o| o.kp), row.kp),
            change("ki", old.as_ref().map(|o| o.ki), row.ki),
            change("kd", old.as_ref().map(|o| o.kd), row.kd),
        ];
        self.audit(
            "pid_parameters",
            None,
            updated_by,
            &format!("PID update for {device_type}"),
            changes,
            now_ms,
        )?;
        Ok(row)
    }

    // ── Schedules ─────────────────────────────────────────────────

    pub fn create_schedule(
        &self,
        new: NewSchedule,
        author: &str,
    ) -> Result<ScheduleRecord, ApiError> {
        validate_schedule_times(&new.start_time, &new.end_time)?;
        let now_ms = Utc::now().timestamp_millis();
        let zone = Zone::new(new.location.clone(), new.cluster.clone());
        let record = self.store.create_schedule(new)?;
        self.state.refresh(&self.store)?;
        self.audit(
            "schedules",
            Some(&zone),
            author,
            &format!("schedule {} created for {}", record.id, record.device_name),
            vec![change("schedule", None::<String>, record.id.to_string())],
            now_ms,
        )?;
        Ok(record)
    }

    pub fn update_schedule(&self, record: ScheduleRecord, author: &str) -> Result<(), ApiError> {
        validate_schedule_times(&record.start_time, &record.end_time)?;
        let now_ms = Utc::now().timestamp_millis();
        if self.store.get_schedule(record.id)?.is_none() {
            return Err(ApiError::NotFound(format!("schedule {}", record.id)));
        }
        let zone = record.zone();
        self.store.update_schedule(&record)?;
        self.state.refresh(&self.store)?;
        self.audit(
            "schedules",
            Some(&zone),
            author,
            &format!("schedule {} updated", record.id),
            vec![],
            now_ms,
        )?;
        Ok(())
    }

    pub fn delete_schedule(&self, id: u64, author: &str) -> Result<(), ApiError> {
        let now_ms = Utc::now().timestamp_millis();
        if !self.store.delete_schedule(id)? {
            return Err(ApiError::NotFound(format!("schedule {id}")));
        }
        self.state.refresh(&self.store)?;
        self.audit(
            "schedules",
            None,
            author,
            &format!("schedule {id} deleted"),
            vec![],
            now_ms,
        )?;
        Ok(())
    }

    /// Room-schedule edit: validates the climate windows, persists them,
    /// and atomically recreates the per-light schedules for the zone.
    ///
    /// The generated day window is the complement of the night by
    /// construction (day_end = night_start, day_start = night_end).
    pub fn set_room_schedule(
        &self,
        zone: &Zone,
        day_start: &str,
        day_end: &str,
        pre_day_duration: i64,
        pre_night_duration: i64,
        target_intensity: Option<f64>,
        ramp_up_duration: Option<i64>,
        ramp_down_duration: Option<i64>,
        author: &str,
    ) -> Result<Vec<ScheduleRecord>, ApiError> {
        crate::config::validate_room_schedule(
            day_start,
            day_end,
            pre_day_duration,
            pre_night_duration,
        )
        .map_err(ApiError::Validation)?;
        if let Some(intensity) = target_intensity {
            if !(0.0..=100.0).contains(&intensity) {
                return Err(ApiError::Validation(format!(
                    "target_intensity ({intensity}) must be within 0-100"
                )));
            }
        }

        let now_ms = Utc::now().timestamp_millis();
        let old = self.store.set_room_schedule(
            zone,
            &RoomScheduleRecord {
                day_start: day_start.to_string(),
                day_end: day_end.to_string(),
                pre_day_duration,
                pre_night_duration,
                updated_at: now_ms,
            },
        )?;

        let lights: Vec<String> = self
            .config
            .devices
            .get(&zone.location)
            .and_then(|c| c.get(&zone.cluster))
            .map(|devices| {
                devices
                    .iter()
                    .filter(|(_, d)| d.device_type == crate::config::DeviceType::Light)
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default();

        let new_schedules: Vec<NewSchedule> = lights
            .iter()
            .map(|device| NewSchedule {
                location: zone.location.clone(),
                cluster: zone.cluster.clone(),
                device_name: device.clone(),
                day_of_week: None,
                start_time: day_start.to_string(),
                end_time: day_end.to_string(),
                enabled: true,
                mode: Some("DAY".to_string()),
                target_intensity,
                ramp_up_duration,
                ramp_down_duration,
            })
            .collect();

        let created = self.store.replace_zone_schedules(zone, &lights, new_schedules)?;
        self.state.refresh(&self.store)?;

        self.audit(
            "room_schedule",
            Some(zone),
            author,
            "room schedule updated",
            vec![
                change(
                    "day_start",
                    old.as_ref().map(|o| o.day_start.clone()),
                    day_start.to_string(),
                ),
                change(
                    "day_end",
                    old.as_ref().map(|o| o.day_end.clone()),
                    day_end.to_string(),
                ),
                change(
                    "pre_day_duration",
                    old.as_ref().map(|o| o.pre_day_duration),
                    pre_day_duration,
                ),
                change(
                    "pre_night_duration",
                    old.as_ref().map(|o| o.pre_night_duration),
                    pre_night_duration,
                ),
            ],
            now_ms,
        )?;
        Ok(created)
    }

    // ── Rules ─────────────────────────────────────────────────────

    pub fn create_rule(&self, rule: RuleRecord, author: &str) -> Result<RuleRecord, ApiError> {
        validate_rule(&rule)?;
        let now_ms = Utc::now().timestamp_millis();
        let zone = rule.zone();
        let record = self.store.create_rule(rule)?;
        self.state.refresh(&self.store)?;
        self.audit(
            "rules",
            Some(&zone),
            author,
            &format!("rule {} created", record.id),
            vec![],
            now_ms,
        )?;
        Ok(record)
    }

    pub fn update_rule(&self, rule: RuleRecord, author: &str) -> Result<(), ApiError> {
        validate_rule(&rule)?;
        let now_ms = Utc::now().timestamp_millis();
        let zone = rule.zone();
        self.store.update_rule(&rule)?;
        self.state.refresh(&self.store)?;
        self.audit(
            "rules",
            Some(&zone),
            author,
            &format!("rule {} updated", rule.id),
            vec![],
            now_ms,
        )?;
        Ok(())
    }

    pub fn delete_rule(&self, id: u64, author: &str) -> Result<(), ApiError> {
        let now_ms = Utc::now().timestamp_millis();
        if !self.store.delete_rule(id)? {
            return Err(ApiError::NotFound(format!("rule {id}")));
        }
        self.state.refresh(&self.store)?;
        self.audit("rules", None, author, &format!("rule {id} deleted"), vec![], now_ms)?;
        Ok(())
    }

    // ── Modes, devices, failsafe, alarms ──────────────────────────

    pub fn set_zone_mode(&self, zone: &Zone, mode: ZoneMode) -> Result<(), ApiError> {
        if mode != ZoneMode::Failsafe && self.alarms.lock().is_failsafe(zone) {
            return Err(ApiError::CriticalAlarmsActive(zone.to_string()));
        }
        self.cache.write_mode(zone, mode);
        let _ = self.broadcast.send(serde_json::json!({
            "type": "mode_update",
            "location": zone.location,
            "cluster": zone.cluster,
            "mode": mode.as_str(),
        }));
        Ok(())
    }

    pub fn zone_mode(&self, zone: &Zone) -> ZoneMode {
        self.cache.read_mode(zone)
    }

    pub fn set_device_state(
        &self,
        zone: &Zone,
        device: &str,
        state: u8,
        mode: ControlMode,
    ) -> Result<(), ApiError> {
        if self.config.device(zone, device).is_none() {
            return Err(ApiError::NotFound(format!("{zone}/{device}")));
        }
        let _ = self.engine_commands.send(EngineCommand::SetDeviceState {
            zone: zone.clone(),
            device: device.to_string(),
            state,
            mode,
        });
        Ok(())
    }

    pub fn set_device_mode(
        &self,
        zone: &Zone,
        device: &str,
        mode: ControlMode,
    ) -> Result<(), ApiError> {
        if self.config.device(zone, device).is_none() {
            return Err(ApiError::NotFound(format!("{zone}/{device}")));
        }
        let _ = self.engine_commands.send(EngineCommand::SetDeviceMode {
            zone: zone.clone(),
            device: device.to_string(),
            mode,
        });
        Ok(())
    }

    pub fn set_light_intensity(
        &self,
        zone: &Zone,
        device: &str,
        intensity: f64,
    ) -> Result<(), ApiError> {
        let configured = self
            .config
            .device(zone, device)
            .ok_or_else(|| ApiError::NotFound(format!("{zone}/{device}")))?;
        if configured.dimming.is_none() {
            return Err(ApiError::Validation(format!("{zone}/{device} is not dimmable")));
        }
        if !(0.0..=100.0).contains(&intensity) {
            return Err(ApiError::Validation(format!(
                "intensity ({intensity}) must be within 0-100"
            )));
        }
        let _ = self.engine_commands.send(EngineCommand::SetLightIntensity {
            zone: zone.clone(),
            device: device.to_string(),
            intensity,
        });
        Ok(())
    }

    pub fn clear_failsafe(&self, zone: &Zone) -> Result<(), ApiError> {
        self.alarms
            .lock()
            .clear_failsafe(zone)
            .map_err(|_| ApiError::CriticalAlarmsActive(zone.to_string()))?;
        let _ = self.broadcast.send(serde_json::json!({
            "type": "mode_update",
            "location": zone.location,
            "cluster": zone.cluster,
            "mode": ZoneMode::Auto.as_str(),
        }));
        Ok(())
    }

    pub fn acknowledge_alarm(&self, zone: &Zone, name: &str) -> Result<(), ApiError> {
        if self.alarms.lock().acknowledge(zone, name) {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!("alarm {name} in {zone}")))
        }
    }

    pub fn clear_alarm(&self, zone: &Zone, name: &str) -> Result<(), ApiError> {
        if self.alarms.lock().clear(zone, name) {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!("alarm {name} in {zone}")))
        }
    }

    pub fn active_alarms(&self, zone: &Zone) -> Vec<(String, AlarmRecord)> {
        self.alarms
            .lock()
            .alarms(zone)
            .into_iter()
            .filter(|(_, a)| a.active)
            .collect()
    }

    // ── Queries ───────────────────────────────────────────────────

    /// Live snapshot for a zone with per-sensor staleness flags.
    pub fn live_snapshot(&self, zone: &Zone) -> serde_json::Value {
        let now_ms = Utc::now().timestamp_millis();
        let mut sensors = serde_json::Map::new();
        for sensor in self.config.zone_sensors(zone) {
            let entry = match self.cache.read_sensor_with_ts(&sensor) {
                Some((value, ts)) => {
                    let stale = ts.map_or(true, |t| now_ms - t > STALE_AFTER_MS);
                    serde_json::json!({ "value": value, "ts": ts, "stale": stale })
                }
                None => serde_json::json!({ "value": null, "ts": null, "stale": true }),
            };
            sensors.insert(sensor, entry);
        }
        serde_json::json!({
            "location": zone.location,
            "cluster": zone.cluster,
            "mode": self.cache.read_mode(zone).as_str(),
            "failsafe": self.cache.read_failsafe(zone),
            "sensors": sensors,
        })
    }

    /// Time-series fetch with automatic downsampling.
    pub fn fetch_measurements(
        &self,
        sensor: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<(QueryTier, Vec<(i64, f64)>), ApiError> {
        let Some(sensor_id) = self.store.sensor_id_by_name(sensor)? else {
            return Err(ApiError::NotFound(format!("sensor {sensor}")));
        };
        let raw = self.store.measurements_between(sensor_id, from_ms, to_ms)?;
        let tier = query_tier(from_ms, to_ms);
        let points = match tier {
            QueryTier::Raw => raw,
            QueryTier::Hourly => downsample(&raw, 3_600_000),
            QueryTier::Daily => downsample(&raw, 86_400_000),
        };
        Ok((tier, points))
    }

    pub fn device_states(&self) -> Result<Vec<(Zone, String, DeviceStateRow)>, ApiError> {
        Ok(self.store.all_device_states()?)
    }

    pub fn latest_weather(&self) -> Result<Option<crate::store::types::WeatherRow>, ApiError> {
        Ok(self.store.latest_weather()?)
    }

    // ── Internals ─────────────────────────────────────────────────

    fn audit(
        &self,
        config_type: &str,
        zone: Option<&Zone>,
        author: &str,
        comment: &str,
        changes: Vec<FieldChange>,
        now_ms: i64,
    ) -> Result<(), ApiError> {
        self.store.log_config_version(&ConfigVersionRow {
            ts: now_ms,
            author: author.to_string(),
            comment: comment.to_string(),
            config_type: config_type.to_string(),
            location: zone.map(|z| z.location.clone()),
            cluster: zone.map(|z| z.cluster.clone()),
            changes,
        })?;
        Ok(())
    }
}

fn change<O: serde::Serialize, N: serde::Serialize>(
    field: &str,
    old: O,
    new: N,
) -> FieldChange {
    FieldChange {
        field: field.to_string(),
        old: serde_json::to_value(old).unwrap_or(serde_json::Value::Null),
        new: serde_json::to_value(new).unwrap_or(serde_json::Value::Null),
    }
}

fn setpoint_changes(old: Option<&SetpointRecord>, new: &SetpointRecord) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    let pairs: [(&str, Option<f64>, Option<f64>); 5] = [
        (
            "heating_setpoint",
            old.and_then(|o| o.heating_setpoint),
            new.heating_setpoint,
        ),
        (
            "cooling_setpoint",
            old.and_then(|o| o.cooling_setpoint),
            new.cooling_setpoint,
        ),
        ("humidity", old.and_then(|o| o.humidity), new.humidity),
        ("co2", old.and_then(|o| o.co2), new.co2),
        ("vpd", old.and_then(|o| o.vpd), new.vpd),
    ];
    for (field, old_value, new_value) in pairs {
        if old_value != new_value {
            changes.push(change(field, old_value, new_value));
        }
    }
    let old_ramp = old.and_then(|o| o.ramp_in_duration);
    if old_ramp != new.ramp_in_duration {
        changes.push(change("ramp_in_duration", old_ramp, new.ramp_in_duration));
    }
    changes
}

fn validate_setpoint_value(
    setpoint_type: SetpointType,
    value: f64,
    limits: &crate::config::SafetyLimits,
) -> Result<(), String> {
    match setpoint_type {
        SetpointType::Heating | SetpointType::Cooling => {
            if value < limits.min_temperature || value > limits.max_temperature {
                return Err(format!(
                    "Temperature setpoint ({value}°C) must be between \
                     {}°C and {}°C",
                    limits.min_temperature, limits.max_temperature
                ));
            }
        }
        SetpointType::Humidity => {
            if value < limits.min_humidity || value > limits.max_humidity {
                return Err(format!(
                    "Humidity setpoint ({value}%) must be between {}% and {}%",
                    limits.min_humidity, limits.max_humidity
                ));
            }
        }
        SetpointType::Co2 => {
            if value < limits.min_co2 || value > limits.max_co2 {
                return Err(format!(
                    "CO2 setpoint ({value}ppm) must be between {}ppm and {}ppm",
                    limits.min_co2, limits.max_co2
                ));
            }
        }
        SetpointType::Vpd => {
            if value < limits.min_vpd || value > limits.max_vpd {
                return Err(format!(
                    "VPD setpoint ({value}kPa) must be between {}kPa and {}kPa",
                    limits.min_vpd, limits.max_vpd
                ));
            }
        }
    }
    Ok(())
}

fn validate_schedule_times(start: &str, end: &str) -> Result<(), ApiError> {
    if time_to_minutes(start).is_none() || time_to_minutes(end).is_none() {
        return Err(ApiError::Validation(format!(
            "bad schedule time range '{start}'-'{end}'"
        )));
    }
    Ok(())
}

fn validate_rule(rule: &RuleRecord) -> Result<(), ApiError> {
    if !["<", ">", "<=", ">=", "=", "==", "≤", "≥"].contains(&rule.condition_operator.as_str()) {
        return Err(ApiError::Validation(format!(
            "unknown operator '{}'",
            rule.condition_operator
        )));
    }
    if rule.action_state > 1 {
        return Err(ApiError::Validation("action_state must be 0 or 1".to_string()));
    }
    Ok(())
}
