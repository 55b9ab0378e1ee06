//! Live key/value cache and the bounded event log.
//!
//! The cache holds "latest reading" state with per-key TTLs: consumers must
//! treat an absent key as "no recent data", never as zero. The event log
//! (`sensor:raw`) is a single ordered, append-only, length-capped log shared
//! by every producer. Both live in-process behind locks — this is a
//! single-node system; the key schema is kept store-shaped so a remote
//! backend could be slotted in behind the same calls.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::zone::Zone;

// ---------------------------------------------------------------------------
// TTLs (seconds)
// ---------------------------------------------------------------------------

pub const SENSOR_TTL: u64 = 10;
pub const AUTOMATION_TTL: u64 = 10;
pub const MODE_TTL: u64 = 300;
pub const SETPOINT_TTL: u64 = 60;
pub const PID_PARAMS_TTL: u64 = 300;
pub const HEARTBEAT_CONTROL_TTL: u64 = 5;
pub const HEARTBEAT_SENSOR_TTL: u64 = 10;
pub const RATE_LIMIT_TTL: u64 = 2;

/// Event log cap, trimmed approximately on append.
const EVENT_LOG_MAX: usize = 100_000;
/// Slack before a trim actually happens.
const EVENT_LOG_TRIM_SLACK: usize = 1_000;

// ---------------------------------------------------------------------------
// Shared value types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Zone automation mode, as stored under `mode:<zone>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneMode {
    Auto,
    Manual,
    Override,
    Failsafe,
}

impl ZoneMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Override => "override",
            Self::Failsafe => "failsafe",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "manual" => Some(Self::Manual),
            "override" => Some(Self::Override),
            "failsafe" => Some(Self::Failsafe),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlarmRecord {
    pub severity: Severity,
    pub message: String,
    /// Milliseconds since the epoch; preserved across re-raises.
    pub since: i64,
    pub active: bool,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailsafeRecord {
    pub reason: String,
    pub triggered_by: String,
    pub since: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LastGood {
    pub value: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LightIntensityRecord {
    pub intensity: f64,
    pub voltage: f64,
    pub board_id: u8,
    pub channel: u8,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PidParamsRecord {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub source: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationStateRecord {
    pub state: u8,
    pub mode: String,
    pub pid_output: Option<f64>,
    pub duty_cycle_percent: Option<f64>,
    pub timestamp_ms: i64,
}

// ---------------------------------------------------------------------------
// Key construction
// ---------------------------------------------------------------------------

pub mod keys {
    use crate::zone::Zone;

    pub fn sensor(name: &str) -> String {
        format!("sensor:{name}")
    }

    pub fn sensor_ts(name: &str) -> String {
        format!("sensor:{name}:ts")
    }

    pub fn automation(zone: &Zone, device: &str) -> String {
        format!("automation:{}:{}:{device}", zone.location, zone.cluster)
    }

    pub fn mode(zone: &Zone) -> String {
        format!("mode:{}:{}", zone.location, zone.cluster)
    }

    pub fn failsafe(zone: &Zone) -> String {
        format!("failsafe:{}:{}", zone.location, zone.cluster)
    }

    pub fn alarm(zone: &Zone, name: &str) -> String {
        format!("alarm:{}:{}:{name}", zone.location, zone.cluster)
    }

    pub fn alarm_prefix(zone: &Zone) -> String {
        format!("alarm:{}:{}:", zone.location, zone.cluster)
    }

    pub fn heartbeat(service: &str) -> String {
        format!("heartbeat:{service}")
    }

    pub fn last_good(cluster: &str, sensor: &str) -> String {
        format!("sensor:{cluster}:{sensor}:last_good")
    }

    pub fn setpoint_field(zone: &Zone, field: &str) -> String {
        format!("setpoint:{}:{}:{field}", zone.location, zone.cluster)
    }

    pub fn setpoint_source(zone: &Zone) -> String {
        format!("setpoint:{}:{}:source", zone.location, zone.cluster)
    }

    pub fn setpoint_last_write(zone: &Zone, field: &str) -> String {
        format!(
            "setpoint:{}:{}:{field}:last_write",
            zone.location, zone.cluster
        )
    }

    pub fn pid_parameters(device_type: &str) -> String {
        format!("pid:parameters:{device_type}")
    }

    pub fn light(zone: &Zone, device: &str) -> String {
        format!("light:{}:{}:{device}", zone.location, zone.cluster)
    }
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub ts: i64,
    /// "can" | "soil" | "automation".
    pub entry_type: &'static str,
    pub fields: BTreeMap<String, String>,
}

#[derive(Default)]
struct EventLog {
    entries: VecDeque<EventRecord>,
}

impl EventLog {
    fn append(&mut self, record: EventRecord) {
        self.entries.push_back(record);
        // Approximate trimming: only pay for the drain once slack builds up.
        if self.entries.len() > EVENT_LOG_MAX + EVENT_LOG_TRIM_SLACK {
            let excess = self.entries.len() - EVENT_LOG_MAX;
            self.entries.drain(..excess);
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

#[derive(Default)]
pub struct LiveCache {
    state: RwLock<HashMap<String, Entry>>,
    log: Mutex<EventLog>,
}

impl LiveCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Raw key operations ────────────────────────────────────────

    pub fn set(&self, key: &str, value: impl Into<String>, ttl_secs: Option<u64>) {
        let entry = Entry {
            value: value.into(),
            expires_at: ttl_secs.map(|s| Instant::now() + Duration::from_secs(s)),
        };
        self.state.write().insert(key.to_string(), entry);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let state = self.state.read();
        let entry = state.get(key)?;
        entry.live().then(|| entry.value.clone())
    }

    pub fn remove(&self, key: &str) {
        self.state.write().remove(key);
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: Option<u64>) {
        match serde_json::to_string(value) {
            Ok(text) => self.set(key, text, ttl_secs),
            Err(e) => log::warn!("cache: failed to encode {key}: {e}"),
        }
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let text = self.get(key)?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("cache: corrupt JSON under {key}: {e}");
                None
            }
        }
    }

    /// All live keys under a prefix (used for alarm scans).
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.state
            .read()
            .iter()
            .filter(|(k, entry)| k.starts_with(prefix) && entry.live())
            .map(|(k, _)| k.clone())
            .collect()
    }

    // ── Sensors ───────────────────────────────────────────────────

    pub fn write_sensor_value(&self, name: &str, value: f64, ts_ms: i64) {
        self.set(&keys::sensor(name), value.to_string(), Some(SENSOR_TTL));
        self.set(&keys::sensor_ts(name), ts_ms.to_string(), Some(SENSOR_TTL));
    }

    pub fn read_sensor_value(&self, name: &str) -> Option<f64> {
        self.get(&keys::sensor(name))?.parse().ok()
    }

    pub fn read_sensor_with_ts(&self, name: &str) -> Option<(f64, Option<i64>)> {
        let value = self.read_sensor_value(name)?;
        let ts = self.get(&keys::sensor_ts(name)).and_then(|t| t.parse().ok());
        Some((value, ts))
    }

    // ── Last good values ──────────────────────────────────────────

    pub fn write_last_good(
        &self,
        cluster: &str,
        sensor: &str,
        value: f64,
        ts_ms: i64,
        hold_period_secs: u64,
    ) {
        let record = LastGood {
            value,
            timestamp: ts_ms,
        };
        self.set_json(
            &keys::last_good(cluster, sensor),
            &record,
            Some(hold_period_secs + 10),
        );
    }

    pub fn read_last_good(&self, cluster: &str, sensor: &str) -> Option<LastGood> {
        self.get_json(&keys::last_good(cluster, sensor))
    }

    /// Whether the last-good value is recent enough, and its age in seconds.
    pub fn last_good_age_ok(
        &self,
        cluster: &str,
        sensor: &str,
        max_age_secs: u64,
        now_ms: i64,
    ) -> (bool, Option<f64>) {
        match self.read_last_good(cluster, sensor) {
            Some(last) => {
                let age = (now_ms - last.timestamp) as f64 / 1000.0;
                (age <= max_age_secs as f64, Some(age))
            }
            None => (false, None),
        }
    }

    // ── Zone mode ─────────────────────────────────────────────────

    pub fn read_mode(&self, zone: &Zone) -> ZoneMode {
        self.get(&keys::mode(zone))
            .and_then(|s| ZoneMode::parse(&s))
            .unwrap_or(ZoneMode::Auto)
    }

    pub fn write_mode(&self, zone: &Zone, mode: ZoneMode) {
        self.set(&keys::mode(zone), mode.as_str(), Some(MODE_TTL));
    }

    // ── Failsafe ──────────────────────────────────────────────────

    pub fn write_failsafe(&self, zone: &Zone, record: &FailsafeRecord) {
        self.set_json(&keys::failsafe(zone), record, None);
    }

    pub fn read_failsafe(&self, zone: &Zone) -> Option<FailsafeRecord> {
        self.get_json(&keys::failsafe(zone))
    }

    pub fn clear_failsafe(&self, zone: &Zone) {
        self.remove(&keys::failsafe(zone));
    }

    // ── Alarms ────────────────────────────────────────────────────

    /// Upsert an alarm, preserving `since` while it is still active.
    pub fn write_alarm(
        &self,
        zone: &Zone,
        name: &str,
        severity: Severity,
        message: &str,
        now_ms: i64,
    ) -> AlarmRecord {
        let key = keys::alarm(zone, name);
        let since = match self.get_json::<AlarmRecord>(&key) {
            Some(existing) if existing.active => existing.since,
            _ => now_ms,
        };
        let record = AlarmRecord {
            severity,
            message: message.to_string(),
            since,
            active: true,
            acknowledged: false,
        };
        self.set_json(&key, &record, None);
        record
    }

    pub fn read_alarm(&self, zone: &Zone, name: &str) -> Option<AlarmRecord> {
        self.get_json(&keys::alarm(zone, name))
    }

    /// All alarms for a zone, active or not, as (name, record).
    pub fn read_alarms(&self, zone: &Zone) -> Vec<(String, AlarmRecord)> {
        let prefix = keys::alarm_prefix(zone);
        let mut alarms = Vec::new();
        for key in self.keys_with_prefix(&prefix) {
            if let Some(record) = self.get_json::<AlarmRecord>(&key) {
                alarms.push((key[prefix.len()..].to_string(), record));
            }
        }
        alarms.sort_by(|a, b| a.0.cmp(&b.0));
        alarms
    }

    pub fn clear_alarm(&self, zone: &Zone, name: &str) -> bool {
        let key = keys::alarm(zone, name);
        match self.get_json::<AlarmRecord>(&key) {
            Some(mut record) => {
                record.active = false;
                self.set_json(&key, &record, None);
                true
            }
            None => false,
        }
    }

    pub fn acknowledge_alarm(&self, zone: &Zone, name: &str) -> bool {
        let key = keys::alarm(zone, name);
        match self.get_json::<AlarmRecord>(&key) {
            Some(mut record) => {
                record.acknowledged = true;
                self.set_json(&key, &record, None);
                true
            }
            None => false,
        }
    }

    pub fn has_critical_alarm(&self, zone: &Zone) -> bool {
        self.read_alarms(zone)
            .iter()
            .any(|(_, a)| a.active && a.severity == Severity::Critical)
    }

    // ── Heartbeats ────────────────────────────────────────────────

    pub fn write_heartbeat(&self, service: &str, ttl_secs: u64, now_ms: i64) {
        self.set(&keys::heartbeat(service), now_ms.to_string(), Some(ttl_secs));
    }

    /// (alive, age seconds) for a service heartbeat.
    pub fn check_heartbeat(
        &self,
        service: &str,
        max_age_secs: u64,
        now_ms: i64,
    ) -> (bool, Option<f64>) {
        match self
            .get(&keys::heartbeat(service))
            .and_then(|s| s.parse::<i64>().ok())
        {
            Some(beat_ms) => {
                let age = (now_ms - beat_ms) as f64 / 1000.0;
                (age <= max_age_secs as f64, Some(age))
            }
            None => (false, None),
        }
    }

    // ── Automation state ──────────────────────────────────────────

    pub fn write_automation_state(&self, zone: &Zone, device: &str, record: &AutomationStateRecord) {
        let key = keys::automation(zone, device);
        self.set_json(&key, record, Some(AUTOMATION_TTL));
        self.set(
            &format!("{key}:ts"),
            record.timestamp_ms.to_string(),
            Some(AUTOMATION_TTL),
        );
    }

    pub fn read_automation_state(&self, zone: &Zone, device: &str) -> Option<AutomationStateRecord> {
        self.get_json(&keys::automation(zone, device))
    }

    // ── PID parameters ────────────────────────────────────────────

    pub fn write_pid_parameters(&self, device_type: &str, record: &PidParamsRecord) {
        self.set_json(&keys::pid_parameters(device_type), record, Some(PID_PARAMS_TTL));
    }

    pub fn read_pid_parameters(&self, device_type: &str) -> Option<PidParamsRecord> {
        self.get_json(&keys::pid_parameters(device_type))
    }

    // ── Light intensity (persistent) ──────────────────────────────

    pub fn write_light_intensity(&self, zone: &Zone, device: &str, record: &LightIntensityRecord) {
        self.set_json(&keys::light(zone, device), record, None);
    }

    pub fn read_light_intensity(&self, zone: &Zone, device: &str) -> Option<LightIntensityRecord> {
        self.get_json(&keys::light(zone, device))
    }

    // ── Setpoint reflection + rate limiting ───────────────────────

    pub fn write_setpoint_field(&self, zone: &Zone, field: &str, value: f64, source: &str, now_ms: i64) {
        self.set(
            &keys::setpoint_field(zone, field),
            value.to_string(),
            Some(SETPOINT_TTL),
        );
        self.set_json(
            &keys::setpoint_source(zone),
            &serde_json::json!({ "source": source, "timestamp": now_ms }),
            Some(SETPOINT_TTL),
        );
    }

    /// Returns `true` when the write is allowed, recording it as the latest.
    pub fn check_rate_limit(
        &self,
        zone: &Zone,
        field: &str,
        max_per_second: f64,
        now_ms: i64,
    ) -> bool {
        if max_per_second <= 0.0 {
            return true;
        }
        let key = keys::setpoint_last_write(zone, field);
        let min_interval_ms = (1000.0 / max_per_second) as i64;
        if let Some(last_ms) = self.get(&key).and_then(|s| s.parse::<i64>().ok()) {
            if now_ms - last_ms < min_interval_ms {
                return false;
            }
        }
        self.set(&key, now_ms.to_string(), Some(RATE_LIMIT_TTL));
        true
    }

    // ── Event log ─────────────────────────────────────────────────

    pub fn append_event(&self, record: EventRecord) {
        self.log.lock().append(record);
    }

    pub fn event_log_len(&self) -> usize {
        self.log.lock().entries.len()
    }

    /// Most recent `n` entries, oldest first.
    pub fn event_log_tail(&self, n: usize) -> Vec<EventRecord> {
        let log = self.log.lock();
        let skip = log.entries.len().saturating_sub(n);
        log.entries.iter().skip(skip).cloned().collect()
    }
}

/// Build a `type=can` event-log record.
pub fn can_event(ts_ms: i64, raw_hex: &str, decoded: &serde_json::Value) -> EventRecord {
    let mut fields = BTreeMap::new();
    fields.insert("data".to_string(), raw_hex.to_string());
    fields.insert("decoded".to_string(), decoded.to_string());
    EventRecord {
        ts: ts_ms,
        entry_type: "can",
        fields,
    }
}

/// Build a `type=soil` event-log record.
pub fn soil_event(ts_ms: i64, sensor_name: &str, readings: &serde_json::Value) -> EventRecord {
    let mut fields = BTreeMap::new();
    fields.insert("sensor_name".to_string(), sensor_name.to_string());
    fields.insert("readings".to_string(), readings.to_string());
    EventRecord {
        ts: ts_ms,
        entry_type: "soil",
        fields,
    }
}

/// Build a `type=automation` event-log record.
pub fn automation_event(
    ts_ms: i64,
    zone: &Zone,
    device: &str,
    state: u8,
    mode: &str,
    reason: Option<&str>,
    pid_output: Option<f64>,
    duty_cycle_percent: Option<f64>,
) -> EventRecord {
    let mut fields = BTreeMap::new();
    fields.insert("location".to_string(), zone.location.clone());
    fields.insert("cluster".to_string(), zone.cluster.clone());
    fields.insert("device_name".to_string(), device.to_string());
    fields.insert("device_state".to_string(), state.to_string());
    fields.insert("device_mode".to_string(), mode.to_string());
    if let Some(reason) = reason {
        fields.insert("control_reason".to_string(), reason.to_string());
    }
    if let Some(output) = pid_output {
        fields.insert("pid_output".to_string(), output.to_string());
    }
    if let Some(duty) = duty_cycle_percent {
        fields.insert("duty_cycle_percent".to_string(), duty.to_string());
    }
    EventRecord {
        ts: ts_ms,
        entry_type: "automation",
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Zone {
        Zone::new("Flower Room", "front")
    }

    #[test]
    fn sensor_round_trip() {
        let cache = LiveCache::new();
        cache.write_sensor_value("dry_bulb_f", 24.5, 1_000);
        assert_eq!(cache.read_sensor_value("dry_bulb_f"), Some(24.5));
        assert_eq!(
            cache.read_sensor_with_ts("dry_bulb_f"),
            Some((24.5, Some(1_000)))
        );
        assert_eq!(cache.read_sensor_value("dry_bulb_b"), None);
    }

    #[test]
    fn mode_defaults_to_auto() {
        let cache = LiveCache::new();
        assert_eq!(cache.read_mode(&zone()), ZoneMode::Auto);
        cache.write_mode(&zone(), ZoneMode::Failsafe);
        assert_eq!(cache.read_mode(&zone()), ZoneMode::Failsafe);
    }

    #[test]
    fn alarm_since_preserved_across_re_raise() {
        let cache = LiveCache::new();
        let first = cache.write_alarm(&zone(), "co2_offline", Severity::Warning, "gone", 1_000);
        assert_eq!(first.since, 1_000);
        // Escalation preserves `since` while active.
        let second = cache.write_alarm(&zone(), "co2_offline", Severity::Critical, "still gone", 9_000);
        assert_eq!(second.since, 1_000);
        assert_eq!(second.severity, Severity::Critical);
        // After a clear, a new raise restarts `since`.
        assert!(cache.clear_alarm(&zone(), "co2_offline"));
        let third = cache.write_alarm(&zone(), "co2_offline", Severity::Warning, "again", 20_000);
        assert_eq!(third.since, 20_000);
    }

    #[test]
    fn critical_alarm_detection() {
        let cache = LiveCache::new();
        cache.write_alarm(&zone(), "rh_offline", Severity::Warning, "m", 0);
        assert!(!cache.has_critical_alarm(&zone()));
        cache.write_alarm(&zone(), "co2_offline", Severity::Critical, "m", 0);
        assert!(cache.has_critical_alarm(&zone()));
        cache.clear_alarm(&zone(), "co2_offline");
        assert!(!cache.has_critical_alarm(&zone()));
        // Cleared alarms still show up in the listing.
        assert_eq!(cache.read_alarms(&zone()).len(), 2);
    }

    #[test]
    fn acknowledge_does_not_clear() {
        let cache = LiveCache::new();
        cache.write_alarm(&zone(), "heater_stuck", Severity::Warning, "m", 0);
        assert!(cache.acknowledge_alarm(&zone(), "heater_stuck"));
        let record = cache.read_alarm(&zone(), "heater_stuck").unwrap();
        assert!(record.acknowledged);
        assert!(record.active);
    }

    #[test]
    fn last_good_age() {
        let cache = LiveCache::new();
        cache.write_last_good("front", "vpd_f", 1.2, 10_000, 30);
        let (ok, age) = cache.last_good_age_ok("front", "vpd_f", 30, 25_000);
        assert!(ok);
        assert_eq!(age, Some(15.0));
        let (ok, _) = cache.last_good_age_ok("front", "vpd_f", 30, 50_000);
        assert!(!ok);
    }

    #[test]
    fn heartbeat_age() {
        let cache = LiveCache::new();
        cache.write_heartbeat("control", HEARTBEAT_CONTROL_TTL, 1_000);
        let (alive, age) = cache.check_heartbeat("control", 5, 3_000);
        assert!(alive);
        assert_eq!(age, Some(2.0));
        let (alive, _) = cache.check_heartbeat("control", 5, 60_000);
        assert!(!alive);
    }

    #[test]
    fn rate_limit_blocks_fast_writes() {
        let cache = LiveCache::new();
        assert!(cache.check_rate_limit(&zone(), "heating_setpoint", 1.0, 1_000));
        assert!(!cache.check_rate_limit(&zone(), "heating_setpoint", 1.0, 1_500));
        assert!(cache.check_rate_limit(&zone(), "heating_setpoint", 1.0, 2_100));
        // Different field, independent limit.
        assert!(cache.check_rate_limit(&zone(), "co2", 1.0, 1_500));
    }

    #[test]
    fn ttl_expiry() {
        let cache = LiveCache::new();
        cache.set("ephemeral", "1", Some(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("ephemeral"), None);
        cache.set("durable", "1", None);
        assert_eq!(cache.get("durable"), Some("1".to_string()));
    }

    #[test]
    fn event_log_caps_length() {
        let log = &LiveCache::new();
        for i in 0..(EVENT_LOG_MAX + EVENT_LOG_TRIM_SLACK + 10) {
            log.append_event(EventRecord {
                ts: i as i64,
                entry_type: "can",
                fields: BTreeMap::new(),
            });
        }
        assert!(log.event_log_len() <= EVENT_LOG_MAX + EVENT_LOG_TRIM_SLACK);
        let tail = log.event_log_tail(2);
        assert_eq!(tail.len(), 2);
        assert!(tail[0].ts < tail[1].ts);
    }

    #[test]
    fn light_intensity_survives_without_ttl() {
        let cache = LiveCache::new();
        let record = LightIntensityRecord {
            intensity: 60.0,
            voltage: 6.0,
            board_id: 1,
            channel: 0,
            timestamp_ms: 123,
        };
        cache.write_light_intensity(&zone(), "light_main", &record);
        assert_eq!(cache.read_light_intensity(&zone(), "light_main"), Some(record));
    }
}
