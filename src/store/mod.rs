//! Embedded time-series and config store.
//!
//! One `sled` tree per logical table. Measurement keys are
//! `sensor_id BE ++ ts_ms BE`, so an insert at the same (sensor, time) is a
//! natural upsert and range scans per sensor are contiguous. Config
//! mutations append an audit row to `config_versions` describing old/new
//! values per field. Name-to-id lookups are cached in-process.
//!
//! The store must open at startup (fatal otherwise); runtime write failures
//! are retried by the callers via [`with_backoff`] while sensor producers
//! keep feeding the live cache.

pub mod types;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;
use crate::zone::Zone;
use types::{
    AutomationStateRow, ConfigVersionRow, ControlHistoryRow, DeviceStateRow,
    EffectiveSetpointsRow, NewSchedule, PidParamsRow, RoomScheduleRecord, RuleRecord,
    ScheduleRecord, SetpointPatch, SetpointRecord, WeatherRow,
};

/// Back-off schedule shared by reconnect-style retries: 1 s doubling to a
/// 60 s cap, five attempts.
pub const BACKOFF_START: Duration = Duration::from_secs(1);
pub const BACKOFF_CAP: Duration = Duration::from_secs(60);
pub const BACKOFF_ATTEMPTS: u32 = 5;

/// Retry `op` on the standard back-off schedule.
pub async fn with_backoff<T, F>(mut op: F, what: &str) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let mut delay = BACKOFF_START;
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= BACKOFF_ATTEMPTS {
                    return Err(e);
                }
                warn!("{what} failed ({e}); retrying in {}s", delay.as_secs());
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(BACKOFF_CAP);
            }
        }
    }
}

pub struct Store {
    db: sled::Db,

    measurement: sled::Tree,
    rooms: sled::Tree,
    devices: sled::Tree,
    sensors: sled::Tree,
    sensor_names: sled::Tree,

    setpoints: sled::Tree,
    setpoint_history: sled::Tree,
    room_schedules: sled::Tree,
    schedules: sled::Tree,
    rules: sled::Tree,
    pid_parameters: sled::Tree,
    pid_parameter_history: sled::Tree,
    device_states: sled::Tree,
    config_versions: sled::Tree,
    automation_state: sled::Tree,
    control_history: sled::Tree,
    effective_setpoints: sled::Tree,
    weather: sled::Tree,

    /// device key ("room|name") → device_id.
    device_ids: RwLock<HashMap<String, u64>>,
    /// (device_id, sensor name) → sensor_id.
    sensor_ids: RwLock<HashMap<(u64, String), u64>>,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode_value<T: DeserializeOwned>(tree: &'static str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        tree,
        reason: e.to_string(),
    })
}

fn zone_key(zone: &Zone) -> String {
    format!("{}|{}", zone.location, zone.cluster)
}

fn setpoint_key(zone: &Zone, mode: Option<&str>) -> String {
    format!("{}|{}|{}", zone.location, zone.cluster, mode.unwrap_or(""))
}

fn device_state_key(zone: &Zone, device: &str) -> String {
    format!("{}|{}|{device}", zone.location, zone.cluster)
}

/// Time-ordered key with an id suffix for uniqueness within one millisecond.
fn time_key(ts_ms: i64, seq: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&ts_ms.to_be_bytes());
    key[8..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn measurement_key(sensor_id: u64, ts_ms: i64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&sensor_id.to_be_bytes());
    key[8..].copy_from_slice(&ts_ms.to_be_bytes());
    key
}

impl Store {
    /// Open (or create) the store. Failure here is fatal for the daemon.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let store = Self {
            measurement: db.open_tree("measurement")?,
            rooms: db.open_tree("rooms")?,
            devices: db.open_tree("devices")?,
            sensors: db.open_tree("sensors")?,
            sensor_names: db.open_tree("sensor_names")?,
            setpoints: db.open_tree("setpoints")?,
            setpoint_history: db.open_tree("setpoint_history")?,
            room_schedules: db.open_tree("room_schedules")?,
            schedules: db.open_tree("schedules")?,
            rules: db.open_tree("rules")?,
            pid_parameters: db.open_tree("pid_parameters")?,
            pid_parameter_history: db.open_tree("pid_parameter_history")?,
            device_states: db.open_tree("device_states")?,
            config_versions: db.open_tree("config_versions")?,
            automation_state: db.open_tree("automation_state")?,
            control_history: db.open_tree("control_history")?,
            effective_setpoints: db.open_tree("effective_setpoints")?,
            weather: db.open_tree("weather")?,
            device_ids: RwLock::new(HashMap::new()),
            sensor_ids: RwLock::new(HashMap::new()),
            db,
        };
        info!("store opened at {}", path.display());
        Ok(store)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn next_id(&self) -> Result<u64, StoreError> {
        Ok(self.db.generate_id()?)
    }

    // ── Hierarchy (rooms / devices / sensors) ─────────────────────

    fn ensure_room(&self, name: &str) -> Result<u64, StoreError> {
        if let Some(bytes) = self.rooms.get(name.as_bytes())? {
            let row: serde_json::Value = decode_value("rooms", &bytes)?;
            if let Some(id) = row.get("room_id").and_then(serde_json::Value::as_u64) {
                return Ok(id);
            }
        }
        let id = self.next_id()?;
        let row = serde_json::json!({ "room_id": id, "name": name });
        self.rooms.insert(name.as_bytes(), encode(&row)?)?;
        Ok(id)
    }

    fn ensure_device(&self, room: &str, device: &str) -> Result<u64, StoreError> {
        let key = format!("{room}|{device}");
        if let Some(id) = self.device_ids.read().get(&key) {
            return Ok(*id);
        }
        let id = if let Some(bytes) = self.devices.get(key.as_bytes())? {
            let row: serde_json::Value = decode_value("devices", &bytes)?;
            row.get("device_id")
                .and_then(serde_json::Value::as_u64)
                .ok_or(StoreError::Corrupt {
                    tree: "devices",
                    reason: "missing device_id".to_string(),
                })?
        } else {
            let room_id = self.ensure_room(room)?;
            let id = self.next_id()?;
            let row = serde_json::json!({
                "device_id": id,
                "room_id": room_id,
                "name": device,
            });
            self.devices.insert(key.as_bytes(), encode(&row)?)?;
            id
        };
        self.device_ids.write().insert(key, id);
        Ok(id)
    }

    /// Resolve (creating on first sight) the sensor id for a reading.
    pub fn ensure_sensor(
        &self,
        room: &str,
        device: &str,
        sensor: &str,
        unit: &str,
    ) -> Result<u64, StoreError> {
        let device_id = self.ensure_device(room, device)?;
        let cache_key = (device_id, sensor.to_string());
        if let Some(id) = self.sensor_ids.read().get(&cache_key) {
            return Ok(*id);
        }
        let key = format!("{device_id}|{sensor}");
        let id = if let Some(bytes) = self.sensors.get(key.as_bytes())? {
            let row: serde_json::Value = decode_value("sensors", &bytes)?;
            row.get("sensor_id")
                .and_then(serde_json::Value::as_u64)
                .ok_or(StoreError::Corrupt {
                    tree: "sensors",
                    reason: "missing sensor_id".to_string(),
                })?
        } else {
            let id = self.next_id()?;
            let row = serde_json::json!({
                "sensor_id": id,
                "device_id": device_id,
                "name": sensor,
                "unit": unit,
                "data_type": "float",
            });
            self.sensors.insert(key.as_bytes(), encode(&row)?)?;
            self.sensor_names
                .insert(sensor.as_bytes(), id.to_be_bytes().to_vec())?;
            id
        };
        self.sensor_ids.write().insert(cache_key, id);
        Ok(id)
    }

    pub fn sensor_id_by_name(&self, sensor: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.sensor_names.get(sensor.as_bytes())?.map(|bytes| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes);
            u64::from_be_bytes(raw)
        }))
    }

    // ── Measurements ──────────────────────────────────────────────

    /// Idempotent upsert on (sensor, time).
    pub fn insert_measurement(
        &self,
        sensor_id: u64,
        ts_ms: i64,
        value: f64,
        status: i32,
    ) -> Result<(), StoreError> {
        let row = serde_json::json!({ "value": value, "status": status });
        self.measurement
            .insert(measurement_key(sensor_id, ts_ms), encode(&row)?)?;
        Ok(())
    }

    /// Batched insert for one decoded frame's readings.
    pub fn insert_measurements(
        &self,
        rows: &[(u64, i64, f64)],
    ) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for &(sensor_id, ts_ms, value) in rows {
            let row = serde_json::json!({ "value": value, "status": 0 });
            batch.insert(measurement_key(sensor_id, ts_ms).to_vec(), encode(&row)?);
        }
        self.measurement.apply_batch(batch)?;
        Ok(())
    }

    /// (ts, value) pairs for a sensor over [from, to], ascending.
    pub fn measurements_between(
        &self,
        sensor_id: u64,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        let lo = measurement_key(sensor_id, from_ms);
        let hi = measurement_key(sensor_id, to_ms.saturating_add(1));
        let mut out = Vec::new();
        for item in self.measurement.range(lo..hi) {
            let (key, bytes) = item?;
            let mut ts_raw = [0u8; 8];
            ts_raw.copy_from_slice(&key[8..16]);
            let ts = i64::from_be_bytes(ts_raw);
            let row: serde_json::Value = decode_value("measurement", &bytes)?;
            if let Some(value) = row.get("value").and_then(serde_json::Value::as_f64) {
                out.push((ts, value));
            }
        }
        Ok(out)
    }

    pub fn measurement_count(&self, sensor_id: u64) -> Result<usize, StoreError> {
        let lo = measurement_key(sensor_id, 0);
        let hi = measurement_key(sensor_id, i64::MAX);
        let mut count = 0;
        for item in self.measurement.range(lo..=hi) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn latest_measurement(&self, sensor_id: u64) -> Result<Option<(i64, f64)>, StoreError> {
        let lo = measurement_key(sensor_id, 0);
        let hi = measurement_key(sensor_id, i64::MAX);
        if let Some(item) = self.measurement.range(lo..=hi).next_back() {
            let (key, bytes) = item?;
            let mut ts_raw = [0u8; 8];
            ts_raw.copy_from_slice(&key[8..16]);
            let row: serde_json::Value = decode_value("measurement", &bytes)?;
            let value = row
                .get("value")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(f64::NAN);
            return Ok(Some((i64::from_be_bytes(ts_raw), value)));
        }
        Ok(None)
    }

    // ── Setpoints ─────────────────────────────────────────────────

    pub fn get_setpoint(
        &self,
        zone: &Zone,
        mode: Option<&str>,
    ) -> Result<Option<SetpointRecord>, StoreError> {
        let key = setpoint_key(zone, mode);
        match self.setpoints.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode_value("setpoints", &bytes)?)),
            None => Ok(None),
        }
    }

    /// Merge-write a setpoint row, returning (old, new).
    pub fn set_setpoint(
        &self,
        zone: &Zone,
        mode: Option<&str>,
        patch: &SetpointPatch,
        now_ms: i64,
    ) -> Result<(Option<SetpointRecord>, SetpointRecord), StoreError> {
        let key = setpoint_key(zone, mode);
        let old = self.get_setpoint(zone, mode)?;
        let mut record = old.clone().unwrap_or_default();
        record.apply(patch, now_ms);
        self.setpoints.insert(key.as_bytes(), encode(&record)?)?;
        Ok((old, record))
    }

    /// Append the current setpoint rows to the history table.
    pub fn log_setpoint_history(&self, now_ms: i64) -> Result<usize, StoreError> {
        let mut logged = 0;
        for item in self.setpoints.iter() {
            let (key, bytes) = item?;
            let record: SetpointRecord = decode_value("setpoints", &bytes)?;
            let row = serde_json::json!({
                "ts": now_ms,
                "key": String::from_utf8_lossy(&key),
                "record": record,
            });
            let seq = self.next_id()?;
            self.setpoint_history
                .insert(time_key(now_ms, seq), encode(&row)?)?;
            logged += 1;
        }
        Ok(logged)
    }

    pub fn all_setpoints(&self) -> Result<Vec<(String, SetpointRecord)>, StoreError> {
        let mut out = Vec::new();
        for item in self.setpoints.iter() {
            let (key, bytes) = item?;
            out.push((
                String::from_utf8_lossy(&key).to_string(),
                decode_value("setpoints", &bytes)?,
            ));
        }
        Ok(out)
    }

    // ── Room schedules ────────────────────────────────────────────

    pub fn get_room_schedule(&self, zone: &Zone) -> Result<Option<RoomScheduleRecord>, StoreError> {
        match self.room_schedules.get(zone_key(zone).as_bytes())? {
            Some(bytes) => Ok(Some(decode_value("room_schedules", &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_room_schedule(
        &self,
        zone: &Zone,
        record: &RoomScheduleRecord,
    ) -> Result<Option<RoomScheduleRecord>, StoreError> {
        let old = self.get_room_schedule(zone)?;
        self.room_schedules
            .insert(zone_key(zone).as_bytes(), encode(record)?)?;
        Ok(old)
    }

    // ── Schedules ─────────────────────────────────────────────────

    pub fn create_schedule(&self, new: NewSchedule) -> Result<ScheduleRecord, StoreError> {
        let id = self.next_id()?;
        let record = new.into_record(id);
        self.schedules
            .insert(&id.to_be_bytes(), encode(&record)?)?;
        Ok(record)
    }

    pub fn get_schedule(&self, id: u64) -> Result<Option<ScheduleRecord>, StoreError> {
        match self.schedules.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode_value("schedules", &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn update_schedule(&self, record: &ScheduleRecord) -> Result<(), StoreError> {
        self.schedules
            .insert(&record.id.to_be_bytes(), encode(record)?)?;
        Ok(())
    }

    pub fn delete_schedule(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.schedules.remove(id.to_be_bytes())?.is_some())
    }

    pub fn all_schedules(&self) -> Result<Vec<ScheduleRecord>, StoreError> {
        let mut out = Vec::new();
        for item in self.schedules.iter() {
            let (_, bytes) = item?;
            out.push(decode_value("schedules", &bytes)?);
        }
        Ok(out)
    }

    /// Atomically replace all per-device schedules for a zone's devices.
    ///
    /// Used by room-schedule edits: the old rows and the new rows land in
    /// one batch so a crash cannot leave a half-rewritten schedule table.
    pub fn replace_zone_schedules(
        &self,
        zone: &Zone,
        device_names: &[String],
        new: Vec<NewSchedule>,
    ) -> Result<Vec<ScheduleRecord>, StoreError> {
        let mut batch = sled::Batch::default();
        for record in self.all_schedules()? {
            if record.location == zone.location
                && record.cluster == zone.cluster
                && device_names.contains(&record.device_name)
            {
                batch.remove(record.id.to_be_bytes().to_vec());
            }
        }
        let mut created = Vec::new();
        for schedule in new {
            let id = self.next_id()?;
            let record = schedule.into_record(id);
            batch.insert(id.to_be_bytes().to_vec(), encode(&record)?);
            created.push(record);
        }
        self.schedules.apply_batch(batch)?;
        Ok(created)
    }

    // ── Rules ─────────────────────────────────────────────────────

    pub fn create_rule(&self, mut rule: RuleRecord) -> Result<RuleRecord, StoreError> {
        rule.id = self.next_id()?;
        self.rules.insert(&rule.id.to_be_bytes(), encode(&rule)?)?;
        Ok(rule)
    }

    pub fn update_rule(&self, rule: &RuleRecord) -> Result<(), StoreError> {
        self.rules.insert(&rule.id.to_be_bytes(), encode(rule)?)?;
        Ok(())
    }

    pub fn delete_rule(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.rules.remove(id.to_be_bytes())?.is_some())
    }

    pub fn all_rules(&self) -> Result<Vec<RuleRecord>, StoreError> {
        let mut out = Vec::new();
        for item in self.rules.iter() {
            let (_, bytes) = item?;
            out.push(decode_value("rules", &bytes)?);
        }
        Ok(out)
    }

    // ── PID parameters ────────────────────────────────────────────

    pub fn get_pid_parameters(&self, device_type: &str) -> Result<Option<PidParamsRow>, StoreError> {
        match self.pid_parameters.get(device_type.as_bytes())? {
            Some(bytes) => Ok(Some(decode_value("pid_parameters", &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_pid_parameters(
        &self,
        device_type: &str,
        row: &PidParamsRow,
    ) -> Result<Option<PidParamsRow>, StoreError> {
        let old = self.get_pid_parameters(device_type)?;
        self.pid_parameters
            .insert(device_type.as_bytes(), encode(row)?)?;
        let seq = self.next_id()?;
        let history = serde_json::json!({ "device_type": device_type, "row": row });
        self.pid_parameter_history
            .insert(time_key(row.updated_at, seq), encode(&history)?)?;
        Ok(old)
    }

    pub fn all_pid_parameters(&self) -> Result<Vec<(String, PidParamsRow)>, StoreError> {
        let mut out = Vec::new();
        for item in self.pid_parameters.iter() {
            let (key, bytes) = item?;
            out.push((
                String::from_utf8_lossy(&key).to_string(),
                decode_value("pid_parameters", &bytes)?,
            ));
        }
        Ok(out)
    }

    // ── Device states ─────────────────────────────────────────────

    pub fn get_device_state(
        &self,
        zone: &Zone,
        device: &str,
    ) -> Result<Option<DeviceStateRow>, StoreError> {
        match self.device_states.get(device_state_key(zone, device).as_bytes())? {
            Some(bytes) => Ok(Some(decode_value("device_states", &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_device_state(
        &self,
        zone: &Zone,
        device: &str,
        row: &DeviceStateRow,
    ) -> Result<(), StoreError> {
        self.device_states
            .insert(device_state_key(zone, device).as_bytes(), encode(row)?)?;
        Ok(())
    }

    /// All persisted device states as (location, cluster, device, row).
    pub fn all_device_states(&self) -> Result<Vec<(Zone, String, DeviceStateRow)>, StoreError> {
        let mut out = Vec::new();
        for item in self.device_states.iter() {
            let (key, bytes) = item?;
            let key = String::from_utf8_lossy(&key).to_string();
            let mut parts = key.splitn(3, '|');
            let (Some(location), Some(cluster), Some(device)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            out.push((
                Zone::new(location, cluster),
                device.to_string(),
                decode_value("device_states", &bytes)?,
            ));
        }
        Ok(out)
    }

    // ── Decision logging ──────────────────────────────────────────

    pub fn log_automation_state(&self, row: &AutomationStateRow) -> Result<(), StoreError> {
        let seq = self.next_id()?;
        self.automation_state
            .insert(time_key(row.ts, seq), encode(row)?)?;
        Ok(())
    }

    pub fn log_control_action(&self, row: &ControlHistoryRow) -> Result<(), StoreError> {
        let seq = self.next_id()?;
        self.control_history
            .insert(time_key(row.ts, seq), encode(row)?)?;
        Ok(())
    }

    pub fn log_effective_setpoints(&self, row: &EffectiveSetpointsRow) -> Result<(), StoreError> {
        let seq = self.next_id()?;
        self.effective_setpoints
            .insert(time_key(row.ts, seq), encode(row)?)?;
        Ok(())
    }

    /// Most recent non-null duty cycle recorded for a device, newest first.
    ///
    /// Used to restore light intensity when the live cache lost its copy.
    pub fn latest_duty_cycle(&self, zone: &Zone, device: &str) -> Result<Option<f64>, StoreError> {
        for item in self.automation_state.iter().rev() {
            let (_, bytes) = item?;
            let row: AutomationStateRow = decode_value("automation_state", &bytes)?;
            if row.location == zone.location
                && row.cluster == zone.cluster
                && row.device_name == device
            {
                if let Some(duty) = row.duty_cycle_percent {
                    return Ok(Some(duty));
                }
            }
        }
        Ok(None)
    }

    // ── Weather ───────────────────────────────────────────────────

    pub fn insert_weather(&self, row: &WeatherRow) -> Result<(), StoreError> {
        let seq = self.next_id()?;
        self.weather.insert(time_key(row.ts, seq), encode(row)?)?;
        Ok(())
    }

    pub fn latest_weather(&self) -> Result<Option<WeatherRow>, StoreError> {
        match self.weather.iter().next_back() {
            Some(item) => {
                let (_, bytes) = item?;
                Ok(Some(decode_value("weather", &bytes)?))
            }
            None => Ok(None),
        }
    }

    // ── Config audit ──────────────────────────────────────────────

    pub fn log_config_version(&self, row: &ConfigVersionRow) -> Result<(), StoreError> {
        let seq = self.next_id()?;
        self.config_versions
            .insert(time_key(row.ts, seq), encode(row)?)?;
        Ok(())
    }

    pub fn config_versions_tail(&self, n: usize) -> Result<Vec<ConfigVersionRow>, StoreError> {
        let mut out = Vec::new();
        for item in self.config_versions.iter().rev().take(n) {
            let (_, bytes) = item?;
            out.push(decode_value("config_versions", &bytes)?);
        }
        out.reverse();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    fn zone() -> Zone {
        Zone::new("Flower Room", "front")
    }

    #[test]
    fn measurement_upsert_is_idempotent() {
        let (_dir, store) = store();
        let id = store
            .ensure_sensor("Flower Room", "can_node_2", "dry_bulb_f", "°C")
            .unwrap();
        store.insert_measurement(id, 1_000, 24.5, 0).unwrap();
        store.insert_measurement(id, 1_000, 24.5, 0).unwrap();
        assert_eq!(store.measurement_count(id).unwrap(), 1);
        assert_eq!(store.latest_measurement(id).unwrap(), Some((1_000, 24.5)));
    }

    #[test]
    fn measurement_range_scan_is_per_sensor() {
        let (_dir, store) = store();
        let a = store
            .ensure_sensor("Flower Room", "node", "co2_f", "ppm")
            .unwrap();
        let b = store
            .ensure_sensor("Flower Room", "node", "co2_b", "ppm")
            .unwrap();
        store
            .insert_measurements(&[(a, 1_000, 800.0), (a, 2_000, 810.0), (b, 1_500, 700.0)])
            .unwrap();
        let got = store.measurements_between(a, 0, 10_000).unwrap();
        assert_eq!(got, vec![(1_000, 800.0), (2_000, 810.0)]);
        let got = store.measurements_between(b, 0, 10_000).unwrap();
        assert_eq!(got, vec![(1_500, 700.0)]);
    }

    #[test]
    fn sensor_ids_are_stable() {
        let (_dir, store) = store();
        let first = store
            .ensure_sensor("Veg Room", "soil_bed_1", "soil_temp_bed_1", "°C")
            .unwrap();
        let second = store
            .ensure_sensor("Veg Room", "soil_bed_1", "soil_temp_bed_1", "°C")
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            store.sensor_id_by_name("soil_temp_bed_1").unwrap(),
            Some(first)
        );
    }

    #[test]
    fn setpoint_merge_keeps_unspecified_fields() {
        let (_dir, store) = store();
        let patch = SetpointPatch {
            heating_setpoint: Some(18.0),
            co2: Some(900.0),
            ..Default::default()
        };
        store.set_setpoint(&zone(), Some("DAY"), &patch, 1).unwrap();
        let patch = SetpointPatch {
            heating_setpoint: Some(24.0),
            ..Default::default()
        };
        let (old, new) = store.set_setpoint(&zone(), Some("DAY"), &patch, 2).unwrap();
        assert_eq!(old.unwrap().heating_setpoint, Some(18.0));
        assert_eq!(new.heating_setpoint, Some(24.0));
        assert_eq!(new.co2, Some(900.0));
        // Legacy default row is a separate key.
        assert!(store.get_setpoint(&zone(), None).unwrap().is_none());
    }

    #[test]
    fn schedule_crud_and_zone_replace() {
        let (_dir, store) = store();
        let new = |device: &str| NewSchedule {
            location: "Flower Room".to_string(),
            cluster: "front".to_string(),
            device_name: device.to_string(),
            day_of_week: None,
            start_time: "06:00".to_string(),
            end_time: "18:00".to_string(),
            enabled: true,
            mode: None,
            target_intensity: None,
            ramp_up_duration: None,
            ramp_down_duration: None,
        };
        let created = store.create_schedule(new("light_main")).unwrap();
        assert!(store.get_schedule(created.id).unwrap().is_some());

        let replaced = store
            .replace_zone_schedules(&zone(), &["light_main".to_string()], vec![new("light_main")])
            .unwrap();
        assert_eq!(replaced.len(), 1);
        assert!(store.get_schedule(created.id).unwrap().is_none());
        assert_eq!(store.all_schedules().unwrap().len(), 1);

        assert!(store.delete_schedule(replaced[0].id).unwrap());
        assert!(!store.delete_schedule(replaced[0].id).unwrap());
    }

    #[test]
    fn device_state_round_trip() {
        let (_dir, store) = store();
        let row = DeviceStateRow {
            channel: 3,
            state: 1,
            mode: "auto".to_string(),
            updated_at: 5,
        };
        store.set_device_state(&zone(), "heater_1", &row).unwrap();
        assert_eq!(store.get_device_state(&zone(), "heater_1").unwrap(), Some(row));
        let all = store.all_device_states().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, zone());
        assert_eq!(all[0].1, "heater_1");
    }

    #[test]
    fn latest_duty_cycle_scans_backwards() {
        let (_dir, store) = store();
        let mut row = AutomationStateRow {
            ts: 1_000,
            location: "Flower Room".to_string(),
            cluster: "front".to_string(),
            device_name: "light_main".to_string(),
            state: 1,
            mode: "auto".to_string(),
            pid_output: None,
            duty_cycle_percent: Some(40.0),
            active_rule_ids: vec![],
            active_schedule_ids: vec![],
            control_reason: Some("schedule".to_string()),
            schedule_ramp_up_duration: None,
            schedule_ramp_down_duration: None,
            schedule_photoperiod_hours: None,
            pid_kp: None,
            pid_ki: None,
            pid_kd: None,
        };
        store.log_automation_state(&row).unwrap();
        row.ts = 2_000;
        row.duty_cycle_percent = Some(65.0);
        store.log_automation_state(&row).unwrap();
        row.ts = 3_000;
        row.duty_cycle_percent = None;
        store.log_automation_state(&row).unwrap();
        assert_eq!(
            store.latest_duty_cycle(&zone(), "light_main").unwrap(),
            Some(65.0)
        );
        assert_eq!(store.latest_duty_cycle(&zone(), "other").unwrap(), None);
    }

    #[test]
    fn config_versions_append() {
        let (_dir, store) = store();
        store
            .log_config_version(&ConfigVersionRow {
                ts: 1,
                author: "operator".to_string(),
                comment: "initial".to_string(),
                config_type: "setpoints".to_string(),
                location: Some("Flower Room".to_string()),
                cluster: Some("front".to_string()),
                changes: vec![],
            })
            .unwrap();
        assert_eq!(store.config_versions_tail(10).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_gives_up_after_attempts() {
        let mut calls = 0;
        let result: Result<(), StoreError> = with_backoff(
            || {
                calls += 1;
                Err(StoreError::NotFound("nope".to_string()))
            },
            "test op",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, BACKOFF_ATTEMPTS);
    }
}
