//! The 1 Hz control engine.
//!
//! Each tick, per zone: read mapped sensors from the live cache, derive the
//! climate mode, compute effective setpoints (ramped), then walk the zone's
//! devices through the decision ladder — manual/failsafe gates, rules,
//! schedules, priority PID, VPD hysteresis — committing through the relay
//! manager and logging every decision to the cache, the event log, and the
//! store. Nothing in here is allowed to panic the loop; hardware refusals
//! and missing data degrade per device, store errors bubble up so the
//! caller can enter its reconnect spin.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};

use crate::cache::{
    automation_event, AutomationStateRecord, LightIntensityRecord, LiveCache, Severity, ZoneMode,
};
use crate::config::{Config, DeviceConfig, DeviceType, DimmingConfig, SetpointType};
use crate::control::alarm::AlarmManager;
use crate::control::interlock::DeviceLoadProbe;
use crate::control::relay::{ControlMode, DeviceKey, RelayManager};
use crate::control::rules::RulesEngine;
use crate::control::scheduler::{climate_mode, time_to_minutes, ClimateMode, Scheduler, WallClock};
use crate::control::setpoint::{EffectiveSetpoints, SetpointEngine};
use crate::control::pid::Pid;
use crate::control::SharedConfigState;
use crate::drivers::gp8403::DacManager;
use crate::error::StoreError;
use crate::store::types::{
    AutomationStateRow, ControlHistoryRow, DeviceStateRow, EffectiveSetpointsRow, SetpointRecord,
};
use crate::store::Store;
use crate::zone::Zone;

/// Minimum PID output (%) that counts as "this setpoint needs action".
const PID_ACTION_THRESHOLD: f64 = 0.5;
/// VPD on/off hysteresis band (kPa).
const VPD_HYSTERESIS: f64 = 0.1;

/// Load probe backed by the DAC manager (dimmable lights) and the engine's
/// PWM duty map (PID-driven relays).
pub struct EngineLoadProbe {
    dacs: Arc<Mutex<DacManager>>,
    duties: Arc<RwLock<HashMap<DeviceKey, f64>>>,
    dimming: HashMap<DeviceKey, DimmingConfig>,
}

impl EngineLoadProbe {
    pub fn new(
        config: &Config,
        dacs: Arc<Mutex<DacManager>>,
        duties: Arc<RwLock<HashMap<DeviceKey, f64>>>,
    ) -> Self {
        let mut dimming = HashMap::new();
        for (zone, name, device) in config.iter_devices() {
            if let Some(dim) = &device.dimming {
                dimming.insert((zone, name.clone()), dim.clone());
            }
        }
        Self {
            dacs,
            duties,
            dimming,
        }
    }
}

impl DeviceLoadProbe for EngineLoadProbe {
    fn load_of(&self, zone: &Zone, device: &str) -> Option<f64> {
        let key = (zone.clone(), device.to_string());
        if let Some(dim) = self.dimming.get(&key) {
            return self.dacs.lock().get_intensity(dim.board_id, dim.channel);
        }
        self.duties.read().get(&key).copied()
    }
}

/// Operator commands forwarded from the API surface, applied between ticks
/// so all actuation stays on the engine's thread.
#[derive(Debug)]
pub enum EngineCommand {
    /// Manual relay override; mode is usually [`ControlMode::Manual`].
    SetDeviceState {
        zone: Zone,
        device: String,
        state: u8,
        mode: ControlMode,
    },
    /// Change a device's control mode without touching the relay
    /// (releasing manual back to auto).
    SetDeviceMode {
        zone: Zone,
        device: String,
        mode: ControlMode,
    },
    /// Manual light intensity; interlock-checked against the requested load.
    SetLightIntensity {
        zone: Zone,
        device: String,
        intensity: f64,
    },
}

/// Per-device context accumulated over one tick, for logging.
#[derive(Debug, Clone, Default)]
struct TickContext {
    active_rule_ids: Vec<u64>,
    active_schedule_ids: Vec<u64>,
    pid_output: Option<f64>,
    duty_cycle_percent: Option<f64>,
    control_reason: Option<&'static str>,
    schedule_ramp_up_duration: Option<i64>,
    schedule_ramp_down_duration: Option<i64>,
    schedule_photoperiod_hours: Option<f64>,
    pid_kp: Option<f64>,
    pid_ki: Option<f64>,
    pid_kd: Option<f64>,
}

pub struct ControlEngine {
    config: Arc<Config>,
    state: Arc<SharedConfigState>,
    cache: Arc<LiveCache>,
    store: Arc<Store>,
    relays: RelayManager,
    dacs: Arc<Mutex<DacManager>>,
    alarms: Arc<Mutex<AlarmManager>>,
    setpoints: SetpointEngine,
    pids: HashMap<(Zone, String, SetpointType), Pid>,
    duties: Arc<RwLock<HashMap<DeviceKey, f64>>>,
    broadcast: broadcast::Sender<serde_json::Value>,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
}

impl ControlEngine {
    pub fn new(
        config: Arc<Config>,
        state: Arc<SharedConfigState>,
        cache: Arc<LiveCache>,
        store: Arc<Store>,
        relays: RelayManager,
        dacs: Arc<Mutex<DacManager>>,
        alarms: Arc<Mutex<AlarmManager>>,
        duties: Arc<RwLock<HashMap<DeviceKey, f64>>>,
        broadcast: broadcast::Sender<serde_json::Value>,
        commands: mpsc::UnboundedReceiver<EngineCommand>,
    ) -> Self {
        Self {
            config,
            state,
            cache,
            store,
            relays,
            dacs,
            alarms,
            setpoints: SetpointEngine::new(),
            pids: HashMap::new(),
            duties,
            broadcast,
            commands,
        }
    }

    /// Apply operator commands queued since the previous tick.
    fn drain_commands(&mut self, now_ms: i64) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                EngineCommand::SetDeviceState {
                    zone,
                    device,
                    state,
                    mode,
                } => {
                    self.commit_state(&zone, &device, state, mode, "manual", None, None, now_ms);
                }
                EngineCommand::SetDeviceMode { zone, device, mode } => {
                    info!("device {zone}/{device} control mode -> {}", mode.as_str());
                    self.relays.set_device_mode(&zone, &device, mode);
                }
                EngineCommand::SetLightIntensity {
                    zone,
                    device,
                    intensity,
                } => {
                    self.apply_manual_intensity(&zone, &device, intensity, now_ms);
                }
            }
        }
    }

    fn apply_manual_intensity(&mut self, zone: &Zone, device: &str, intensity: f64, now_ms: i64) {
        let Some(dim) = self
            .config
            .device(zone, device)
            .and_then(|d| d.dimming.clone())
        else {
            warn!("{zone}/{device} is not dimmable");
            return;
        };
        let intensity = intensity.clamp(0.0, 100.0);
        let state = u8::from(intensity > 0.0);
        if state == 1 {
            let (ok, refusal) = self.relays.set_device_state_with_load(
                zone,
                device,
                1,
                ControlMode::Manual,
                true,
                Some(intensity),
            );
            if !ok {
                warn!(
                    "manual intensity refused for {zone}/{device}: {}",
                    refusal.unwrap_or_default()
                );
                return;
            }
        } else {
            self.commit_state(
                zone,
                device,
                0,
                ControlMode::Manual,
                "manual",
                None,
                None,
                now_ms,
            );
        }
        if !self
            .dacs
            .lock()
            .set_intensity(dim.board_id, dim.channel, intensity, false)
        {
            warn!("failed to set manual intensity for {zone}/{device}");
            return;
        }
        self.cache.write_light_intensity(
            zone,
            device,
            &LightIntensityRecord {
                intensity,
                voltage: intensity / 100.0 * 10.0,
                board_id: dim.board_id,
                channel: dim.channel,
                timestamp_ms: now_ms,
            },
        );
    }

    /// Restore relay states from the store at startup.
    ///
    /// Interlocks are not re-checked: the hardware is in whatever state the
    /// world left it, and the persisted map is our best estimate of that.
    pub fn restore_device_states(&mut self) -> Result<(), StoreError> {
        let rows = self.store.all_device_states()?;
        let restored: Vec<(Zone, String, u8, ControlMode)> = rows
            .into_iter()
            .map(|(zone, device, row)| {
                let mode = ControlMode::parse(&row.mode).unwrap_or(ControlMode::Auto);
                (zone, device, row.state, mode)
            })
            .collect();
        if !restored.is_empty() {
            info!("restoring {} device states from store", restored.len());
        }
        self.relays.restore_states(restored);
        Ok(())
    }

    /// Restore dimmable light intensities: live cache first, then the most
    /// recent duty recorded in `automation_state`.
    pub fn restore_light_intensities(&mut self) -> Result<(), StoreError> {
        for (zone, name, device) in self.config.iter_devices() {
            let Some(dim) = &device.dimming else {
                continue;
            };
            let intensity = match self.cache.read_light_intensity(&zone, name) {
                Some(record) => Some(record.intensity),
                None => self.store.latest_duty_cycle(&zone, name)?,
            };
            if let Some(intensity) = intensity {
                info!("restoring {zone}/{name} intensity to {intensity:.1}%");
                self.dacs
                    .lock()
                    .set_intensity(dim.board_id, dim.channel, intensity, false);
            }
        }
        Ok(())
    }

    /// Write each configured light's safety level to the DAC EEPROM once.
    pub fn apply_safety_levels(&mut self) {
        for (zone, name, device) in self.config.iter_devices() {
            if let (Some(dim), Some(level)) = (&device.dimming, device.safety_level) {
                if !self
                    .dacs
                    .lock()
                    .set_safety_level(dim.board_id, dim.channel, level)
                {
                    warn!("failed to store safety level for {zone}/{name}");
                }
            }
        }
    }

    /// Drive everything to its safe state (shutdown, failsafe entry).
    pub fn all_safe(&mut self) {
        self.relays.all_safe();
    }

    pub fn relays(&self) -> &RelayManager {
        &self.relays
    }

    /// One control iteration at `now_ms` / `clock`.
    pub fn run_tick(&mut self, now_ms: i64, clock: WallClock) -> Result<(), StoreError> {
        self.drain_commands(now_ms);

        let snapshot = self.state.snapshot();
        let scheduler = Scheduler::new(snapshot.schedules.clone());
        let rules = RulesEngine::new(snapshot.rules.clone());

        for zone in self.config.zones() {
            self.alarms.lock().tick(&zone);

            let sensor_values = self.gather_sensor_values(&zone, now_ms);

            // Climate mode needs the room's schedule windows.
            let mode = self.zone_climate_mode(&zone, clock)?;

            // Effective setpoints, computed once per zone and logged.
            let setpoint_record = self.zone_setpoints(&zone, mode)?;
            let mut effective = None;
            let mut mode_changed = false;
            if let Some(record) = &setpoint_record {
                let config = self.config.clone();
                let ramp_zone = zone.clone();
                let sensor_for = |t: SetpointType| {
                    config
                        .sensor_for_role(&ramp_zone, t.sensor_role())
                        .and_then(|name| sensor_values.get(name).copied())
                };
                let (computed, changed) =
                    self.setpoints
                        .compute(&zone, now_ms, mode, record, sensor_for);
                self.store.log_effective_setpoints(&EffectiveSetpointsRow {
                    ts: now_ms,
                    location: zone.location.clone(),
                    cluster: zone.cluster.clone(),
                    mode: mode.map(|m| m.as_str().to_string()),
                    effective: computed.effective,
                    nominal: computed.nominal,
                    ramp_progress: computed.ramp_progress,
                })?;
                effective = Some(computed);
                mode_changed = changed;
            }

            if mode_changed {
                // Day/night flips reset integrators to stop cross-mode windup.
                for ((pid_zone, _, _), pid) in self.pids.iter_mut() {
                    if pid_zone == &zone {
                        pid.reset_integrator();
                    }
                }
            }

            let device_names: Vec<String> = self
                .config
                .devices
                .get(&zone.location)
                .and_then(|c| c.get(&zone.cluster))
                .map(|d| d.keys().cloned().collect())
                .unwrap_or_default();

            for name in device_names {
                let Some(device) = self.config.device(&zone, &name).cloned() else {
                    continue;
                };
                let context = self.process_device(
                    &zone,
                    &name,
                    &device,
                    &sensor_values,
                    setpoint_record.as_ref(),
                    effective.as_ref(),
                    &scheduler,
                    &rules,
                    clock,
                    now_ms,
                );
                self.log_device_state(&zone, &name, &context, now_ms)?;
            }
        }
        Ok(())
    }

    // ── Per-zone helpers ──────────────────────────────────────────

    fn gather_sensor_values(&self, zone: &Zone, now_ms: i64) -> HashMap<String, f64> {
        let mut values = HashMap::new();
        for sensor in self.config.zone_sensors(zone) {
            if let Some(value) = self.cache.read_sensor_value(&sensor) {
                // Every fresh reading refreshes the last-good fallback.
                self.cache.write_last_good(
                    &zone.cluster,
                    &sensor,
                    value,
                    now_ms,
                    self.config.control.last_good_hold_period,
                );
                values.insert(sensor, value);
            }
        }
        values
    }

    fn zone_climate_mode(
        &self,
        zone: &Zone,
        clock: WallClock,
    ) -> Result<Option<ClimateMode>, StoreError> {
        let Some(room) = self.store.get_room_schedule(zone)? else {
            return Ok(None);
        };
        let (Some(day_start), Some(day_end)) = (
            time_to_minutes(&room.day_start),
            time_to_minutes(&room.day_end),
        ) else {
            return Ok(None);
        };
        let (mode, _, _) = climate_mode(
            day_start,
            day_end,
            room.pre_day_duration.clamp(0, 1440) as u16,
            room.pre_night_duration.clamp(0, 1440) as u16,
            clock.minute(),
        );
        Ok(Some(mode))
    }

    fn zone_setpoints(
        &self,
        zone: &Zone,
        mode: Option<ClimateMode>,
    ) -> Result<Option<SetpointRecord>, StoreError> {
        if let Some(mode) = mode {
            if let Some(record) = self.store.get_setpoint(zone, Some(mode.as_str()))? {
                return Ok(Some(record));
            }
        }
        // Legacy default row.
        self.store.get_setpoint(zone, None)
    }

    // ── Per-device pipeline ───────────────────────────────────────

    fn process_device(
        &mut self,
        zone: &Zone,
        name: &str,
        device: &DeviceConfig,
        sensor_values: &HashMap<String, f64>,
        setpoint_record: Option<&SetpointRecord>,
        effective: Option<&EffectiveSetpoints>,
        scheduler: &Scheduler,
        rules: &RulesEngine,
        clock: WallClock,
        now_ms: i64,
    ) -> TickContext {
        let mut context = TickContext::default();

        // Dimmable lights report their intensity every tick for dashboards.
        if let Some(dim) = &device.dimming {
            if let Some(intensity) = self.dacs.lock().get_intensity(dim.board_id, dim.channel) {
                context.duty_cycle_percent = Some(intensity);
                context.control_reason = Some("light");
            }
        }

        // 1. Zone-wide gates: failsafe latches and manual zones suspend all
        //    automatic control.
        let zone_mode = self.cache.read_mode(zone);
        if zone_mode == ZoneMode::Failsafe || self.alarms.lock().is_failsafe(zone) {
            context.control_reason = Some("failsafe");
            return context;
        }
        if zone_mode == ZoneMode::Manual {
            context.control_reason = Some("manual");
            return context;
        }

        // 2. Sticky per-device manual mode.
        if self.relays.device_mode(zone, name) == Some(ControlMode::Manual) {
            context.control_reason = Some("manual");
            return context;
        }

        let current_state = self.relays.device_state(zone, name).unwrap_or(0);

        // 3. Rules outrank everything automatic.
        if let Some(matched) = rules.evaluate(zone, sensor_values, scheduler, clock) {
            if matched.device == name {
                context.active_rule_ids.push(matched.rule_id);
                context.control_reason = Some("rule");
                if matched.state != current_state {
                    self.commit_state(
                        zone,
                        name,
                        matched.state,
                        ControlMode::Auto,
                        "rule",
                        None,
                        None,
                        now_ms,
                    );
                }
                return context;
            }
        }

        // 4. Schedules.
        if let Some((scheduled_state, schedule_id)) = scheduler.schedule_state(zone, name, clock) {
            context.active_schedule_ids.push(schedule_id);
            context.control_reason = Some("schedule");
            if let Some(details) = scheduler.active_schedule_details(zone, name, clock) {
                context.schedule_ramp_up_duration = details.ramp_up_duration;
                context.schedule_ramp_down_duration = details.ramp_down_duration;
                context.schedule_photoperiod_hours = Some(details.photoperiod_hours);
            }

            if let Some(dim) = &device.dimming {
                let current_intensity =
                    self.dacs.lock().get_intensity(dim.board_id, dim.channel);
                if let Some(intensity) =
                    scheduler.schedule_intensity(zone, name, clock, current_intensity)
                {
                    return self.apply_light_intensity(
                        zone,
                        name,
                        dim,
                        intensity,
                        current_state,
                        context,
                        now_ms,
                    );
                }
            }

            if scheduled_state != current_state {
                self.commit_state(
                    zone,
                    name,
                    scheduled_state,
                    ControlMode::Scheduled,
                    "schedule",
                    None,
                    None,
                    now_ms,
                );
            }
            return context;
        }

        // 5. Priority-based multi-setpoint PID.
        if device.pid_enabled {
            self.process_pid(
                zone,
                name,
                device,
                sensor_values,
                setpoint_record,
                effective,
                &mut context,
                now_ms,
            );
        }

        // 6. VPD hysteresis for drying devices.
        if matches!(device.device_type, DeviceType::Fan | DeviceType::Dehumidifier) {
            self.process_vpd(zone, name, sensor_values, setpoint_record, &mut context, now_ms);
        }

        context
    }

    fn apply_light_intensity(
        &mut self,
        zone: &Zone,
        name: &str,
        dim: &DimmingConfig,
        intensity: f64,
        current_state: u8,
        mut context: TickContext,
        now_ms: i64,
    ) -> TickContext {
        // Volatile write: the EEPROM only ever holds the safety level.
        let ok = self
            .dacs
            .lock()
            .set_intensity(dim.board_id, dim.channel, intensity, false);
        if !ok {
            warn!("failed to set intensity for {zone}/{name}");
            return context;
        }
        context.duty_cycle_percent = Some(intensity);

        let relay_state = u8::from(intensity > 0.0);
        if relay_state != current_state {
            self.commit_state(
                zone,
                name,
                relay_state,
                ControlMode::Scheduled,
                "schedule",
                None,
                None,
                now_ms,
            );
        }

        // Persist for restart restoration.
        self.cache.write_light_intensity(
            zone,
            name,
            &LightIntensityRecord {
                intensity,
                voltage: intensity / 100.0 * 10.0,
                board_id: dim.board_id,
                channel: dim.channel,
                timestamp_ms: now_ms,
            },
        );
        debug!("schedule intensity {intensity:.1}% applied to {zone}/{name}");
        context
    }

    fn process_pid(
        &mut self,
        zone: &Zone,
        name: &str,
        device: &DeviceConfig,
        sensor_values: &HashMap<String, f64>,
        setpoint_record: Option<&SetpointRecord>,
        effective: Option<&EffectiveSetpoints>,
        context: &mut TickContext,
        now_ms: i64,
    ) {
        let Some(record) = setpoint_record else {
            return;
        };

        let mut selected: Option<(SetpointType, f64, f64)> = None;

        for entry in device.pid_setpoints_ordered() {
            let setpoint_type = entry.setpoint_type;

            // Heating/cooling use the ramped effective value; the others run
            // on nominal (the ramp engine still tracks them for history).
            let setpoint_value = match setpoint_type {
                SetpointType::Heating | SetpointType::Cooling => effective
                    .and_then(|e| e.effective.get(setpoint_type))
                    .or_else(|| record.value(setpoint_type)),
                _ => record.value(setpoint_type),
            };
            let Some(setpoint_value) = setpoint_value else {
                continue;
            };

            let Some(sensor) = self
                .config
                .sensor_for_role(zone, setpoint_type.sensor_role())
                .cloned()
            else {
                continue;
            };

            let Some(measured) = self.sensor_or_last_good(zone, &sensor, sensor_values, now_ms)
            else {
                // Stale sensor: warn once per tick, fall through to the
                // next-priority setpoint.
                self.alarms.lock().raise(
                    zone,
                    &format!("{sensor}_offline"),
                    Severity::Warning,
                    &format!("sensor {sensor} has no recent reading"),
                    now_ms,
                );
                continue;
            };

            let key = (zone.clone(), name.to_string(), setpoint_type);
            let pid = self.pids.entry(key).or_insert_with(|| {
                Pid::new(self.config.pid_gains(device.device_type), device.pwm_period)
            });

            // Hot-reload gains: cache first, store as fallback.
            let device_type = device.device_type.as_str();
            let gains = self
                .cache
                .read_pid_parameters(device_type)
                .map(|p| crate::config::PidGains {
                    kp: p.kp,
                    ki: p.ki,
                    kd: p.kd,
                })
                .or_else(|| {
                    self.store
                        .get_pid_parameters(device_type)
                        .ok()
                        .flatten()
                        .map(|p| crate::config::PidGains {
                            kp: p.kp,
                            ki: p.ki,
                            kd: p.kd,
                        })
                });
            if let Some(gains) = gains {
                let current = pid.gains();
                if current.kp != gains.kp || current.ki != gains.ki || current.kd != gains.kd {
                    info!(
                        "PID gains reloaded for {device_type}: \
                         Kp {}->{}, Ki {}->{}, Kd {}->{}",
                        current.kp, gains.kp, current.ki, gains.ki, current.kd, gains.kd
                    );
                    pid.set_gains(gains);
                }
            }

            let output = pid.compute(setpoint_value, measured, 1.0);
            if output > PID_ACTION_THRESHOLD {
                context.pid_output = Some(output);
                context.pid_kp = Some(pid.kp);
                context.pid_ki = Some(pid.ki);
                context.pid_kd = Some(pid.kd);
                selected = Some((setpoint_type, output, setpoint_value));
                break;
            }
        }

        let Some((setpoint_type, output, setpoint_value)) = selected else {
            return;
        };

        let key = (zone.clone(), name.to_string(), setpoint_type);
        let pid = self.pids.get_mut(&key).expect("selected PID exists");
        let pwm_on = pid.pwm_state(output, now_ms);
        let duty = pid.duty_cycle();
        context.duty_cycle_percent = Some(duty);
        context.control_reason = Some("pid");
        self.duties
            .write()
            .insert((zone.clone(), name.to_string()), duty);

        let new_state = u8::from(pwm_on);
        let current_state = self.relays.device_state(zone, name).unwrap_or(0);
        if new_state != current_state {
            let sensor_value = self
                .config
                .sensor_for_role(zone, setpoint_type.sensor_role())
                .and_then(|s| sensor_values.get(s).copied());
            self.commit_state(
                zone,
                name,
                new_state,
                ControlMode::Auto,
                "pid",
                sensor_value,
                Some(setpoint_value),
                now_ms,
            );
        }
    }

    fn process_vpd(
        &mut self,
        zone: &Zone,
        name: &str,
        sensor_values: &HashMap<String, f64>,
        setpoint_record: Option<&SetpointRecord>,
        context: &mut TickContext,
        now_ms: i64,
    ) {
        let Some(vpd_setpoint) = setpoint_record.and_then(|r| r.vpd) else {
            return;
        };
        let Some(sensor) = self.config.sensor_for_role(zone, "vpd_sensor").cloned() else {
            debug!("no VPD sensor mapping for {zone}");
            return;
        };

        let Some(current_vpd) = self.sensor_or_last_good(zone, &sensor, sensor_values, now_ms)
        else {
            // The drying loop cannot run blind; this is the escalation path.
            self.alarms.lock().raise(
                zone,
                &format!("{sensor}_offline"),
                Severity::Critical,
                &format!("VPD sensor {sensor} offline"),
                now_ms,
            );
            return;
        };

        let current_state = self.relays.device_state(zone, name).unwrap_or(0);
        let target_state = if current_vpd < vpd_setpoint - VPD_HYSTERESIS {
            context.control_reason = Some("vpd_control");
            1
        } else if current_vpd >= vpd_setpoint + VPD_HYSTERESIS {
            context.control_reason = Some("vpd_control");
            0
        } else {
            context.control_reason = Some("vpd_control_hysteresis");
            current_state
        };

        if target_state != current_state {
            info!(
                "VPD control: {zone}/{name} {} (VPD: {current_vpd:.2}kPa, \
                 setpoint: {vpd_setpoint:.2}kPa)",
                if target_state == 1 { "ON" } else { "OFF" }
            );
            self.commit_state(
                zone,
                name,
                target_state,
                ControlMode::Auto,
                "vpd_control",
                Some(current_vpd),
                Some(vpd_setpoint),
                now_ms,
            );
        }
    }

    /// Live value, else last-good within the hold period.
    fn sensor_or_last_good(
        &self,
        zone: &Zone,
        sensor: &str,
        sensor_values: &HashMap<String, f64>,
        now_ms: i64,
    ) -> Option<f64> {
        if let Some(&value) = sensor_values.get(sensor) {
            return Some(value);
        }
        let hold = self.config.control.last_good_hold_period;
        let (ok, age) = self
            .cache
            .last_good_age_ok(&zone.cluster, sensor, hold, now_ms);
        if ok {
            let value = self.cache.read_last_good(&zone.cluster, sensor)?.value;
            debug!(
                "using last good value for {sensor}: {value} (age: {:.1}s)",
                age.unwrap_or_default()
            );
            Some(value)
        } else {
            None
        }
    }

    // ── Commit and logging ────────────────────────────────────────

    /// Hardware → in-memory map → store → cache/event log, best effort.
    fn commit_state(
        &mut self,
        zone: &Zone,
        name: &str,
        state: u8,
        mode: ControlMode,
        reason: &str,
        sensor_value: Option<f64>,
        setpoint: Option<f64>,
        now_ms: i64,
    ) {
        let old_state = self.relays.device_state(zone, name).unwrap_or(0);
        let (ok, refusal) = self.relays.set_device_state(zone, name, state, mode, true);
        let channel = self.relays.channel(zone, name).unwrap_or(0);

        let reason = if !ok {
            let refusal = refusal.unwrap_or_default();
            warn!("failed to set device state for {zone}/{name}: {refusal}");
            if refusal.to_lowercase().contains("interlock") {
                "interlock"
            } else {
                "hardware"
            }
        } else {
            reason
        };

        let new_state = if ok { state } else { old_state };

        if ok {
            if let Err(e) = self.store.set_device_state(
                zone,
                name,
                &DeviceStateRow {
                    channel,
                    state,
                    mode: mode.as_str().to_string(),
                    updated_at: now_ms,
                },
            ) {
                warn!("failed to persist device state for {zone}/{name}: {e}");
            }
        }

        if let Err(e) = self.store.log_control_action(&ControlHistoryRow {
            ts: now_ms,
            location: zone.location.clone(),
            cluster: zone.cluster.clone(),
            device_name: name.to_string(),
            channel,
            old_state,
            new_state,
            mode: mode.as_str().to_string(),
            reason: reason.to_string(),
            sensor_value,
            setpoint,
        }) {
            warn!("failed to log control action for {zone}/{name}: {e}");
        }

        self.cache.append_event(automation_event(
            now_ms,
            zone,
            name,
            new_state,
            mode.as_str(),
            Some(reason),
            None,
            None,
        ));

        let _ = self.broadcast.send(serde_json::json!({
            "type": "device_update",
            "location": zone.location,
            "cluster": zone.cluster,
            "device": name,
            "state": new_state,
            "mode": mode.as_str(),
            "reason": reason,
        }));
    }

    /// Every-tick per-device state row, independent of transitions.
    fn log_device_state(
        &self,
        zone: &Zone,
        name: &str,
        context: &TickContext,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let state = self.relays.device_state(zone, name).unwrap_or(0);
        let mode = self
            .relays
            .device_mode(zone, name)
            .unwrap_or(ControlMode::Auto);

        self.cache.write_automation_state(
            zone,
            name,
            &AutomationStateRecord {
                state,
                mode: mode.as_str().to_string(),
                pid_output: context.pid_output,
                duty_cycle_percent: context.duty_cycle_percent,
                timestamp_ms: now_ms,
            },
        );

        self.store.log_automation_state(&AutomationStateRow {
            ts: now_ms,
            location: zone.location.clone(),
            cluster: zone.cluster.clone(),
            device_name: name.to_string(),
            state,
            mode: mode.as_str().to_string(),
            pid_output: context.pid_output,
            duty_cycle_percent: context.duty_cycle_percent,
            active_rule_ids: context.active_rule_ids.clone(),
            active_schedule_ids: context.active_schedule_ids.clone(),
            control_reason: context.control_reason.map(str::to_string),
            schedule_ramp_up_duration: context.schedule_ramp_up_duration,
            schedule_ramp_down_duration: context.schedule_ramp_down_duration,
            schedule_photoperiod_hours: context.schedule_photoperiod_hours,
            pid_kp: context.pid_kp,
            pid_ki: context.pid_ki,
            pid_kd: context.pid_kd,
        })
    }
}
