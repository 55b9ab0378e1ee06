//! Long-running background tasks: the watchdogged control loop, the
//! control heartbeat, cache→store auto-persist, and the periodic setpoint
//! history logger.
//!
//! No task is allowed to die on an error. The control loop backs off on
//! store failures (actuation suspended, producers keep feeding the cache)
//! and resumes at the normal cadence once a tick succeeds again; on
//! shutdown it drives every device to its safe state before returning.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::watch;

use crate::cache::{LiveCache, PidParamsRecord, HEARTBEAT_CONTROL_TTL};
use crate::config::Config;
use crate::control::engine::ControlEngine;
use crate::control::scheduler::WallClock;
use crate::store::types::PidParamsRow;
use crate::store::{Store, BACKOFF_CAP, BACKOFF_START};

pub const CONTROL_SERVICE: &str = "control";

const HEARTBEAT_EVERY: Duration = Duration::from_secs(2);
const AUTO_PERSIST_EVERY: Duration = Duration::from_secs(60);
const SETPOINT_HISTORY_EVERY: Duration = Duration::from_secs(300);

/// The 1 Hz control loop with reconnect back-off.
pub async fn control_loop(
    mut engine: ControlEngine,
    config: Arc<Config>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = Duration::from_secs(config.control.update_interval.max(1));
    let mut backoff = BACKOFF_START;

    while !*shutdown.borrow() {
        let now_ms = Utc::now().timestamp_millis();
        let clock = WallClock::now();

        match engine.run_tick(now_ms, clock) {
            Ok(()) => {
                backoff = BACKOFF_START;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
            Err(e) => {
                // Store trouble: suspend actuation and spin on reconnect.
                error!(
                    "control tick failed: {e}; suspending actuation for {}s",
                    backoff.as_secs()
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => break,
                }
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }

    info!("control loop stopping; driving devices to safe states");
    engine.all_safe();
}

/// Control-service heartbeat (5 s TTL, written every 2 s).
pub async fn heartbeat_loop(cache: Arc<LiveCache>, mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        cache.write_heartbeat(
            CONTROL_SERVICE,
            HEARTBEAT_CONTROL_TTL,
            Utc::now().timestamp_millis(),
        );
        tokio::select! {
            _ = tokio::time::sleep(HEARTBEAT_EVERY) => {}
            _ = shutdown.changed() => break,
        }
    }
}

/// Periodically sync cache-side PID parameter edits back into the store.
pub async fn auto_persist_loop(
    config: Arc<Config>,
    cache: Arc<LiveCache>,
    store: Arc<Store>,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        tokio::select! {
            _ = tokio::time::sleep(AUTO_PERSIST_EVERY) => {}
            _ = shutdown.changed() => break,
        }

        for device_type in config.control.pid.keys() {
            let Some(cached) = cache.read_pid_parameters(device_type) else {
                continue;
            };
            let persisted = match store.get_pid_parameters(device_type) {
                Ok(row) => row,
                Err(e) => {
                    warn!("auto-persist: read failed for {device_type}: {e}");
                    continue;
                }
            };
            let differs = persisted.as_ref().map_or(true, |row| {
                row.kp != cached.kp || row.ki != cached.ki || row.kd != cached.kd
            });
            if differs {
                let row = PidParamsRow {
                    kp: cached.kp,
                    ki: cached.ki,
                    kd: cached.kd,
                    source: cached.source.clone(),
                    updated_by: None,
                    updated_at: cached.updated_at,
                };
                if let Err(e) = store.set_pid_parameters(device_type, &row) {
                    warn!("auto-persist: write failed for {device_type}: {e}");
                } else {
                    info!("auto-persist: synced PID parameters for {device_type}");
                }
            }
        }
    }
}

/// Log all current setpoints to the history table every five minutes.
pub async fn setpoint_history_loop(store: Arc<Store>, mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        tokio::select! {
            _ = tokio::time::sleep(SETPOINT_HISTORY_EVERY) => {}
            _ = shutdown.changed() => break,
        }
        match store.log_setpoint_history(Utc::now().timestamp_millis()) {
            Ok(count) if count > 0 => info!("setpoint history: logged {count} rows"),
            Ok(_) => {}
            Err(e) => warn!("setpoint history logging failed: {e}"),
        }
    }
}

/// Seed the store from the config file's inline rows where tables are empty,
/// and make sure each configured device type has PID parameters on record.
pub fn sync_config_seeds(config: &Config, store: &Store) -> Result<(), crate::error::StoreError> {
    let now_ms = Utc::now().timestamp_millis();

    for seed in &config.room_schedules {
        let zone = crate::zone::Zone::new(seed.location.clone(), seed.cluster.clone());
        if store.get_room_schedule(&zone)?.is_none() {
            store.set_room_schedule(
                &zone,
                &crate::store::types::RoomScheduleRecord {
                    day_start: seed.day_start.clone(),
                    day_end: seed.day_end.clone(),
                    pre_day_duration: seed.pre_day_duration,
                    pre_night_duration: seed.pre_night_duration,
                    updated_at: now_ms,
                },
            )?;
            info!("seeded room schedule for {zone}");
        }
    }

    if store.all_schedules()?.is_empty() {
        for seed in &config.schedules {
            store.create_schedule(crate::store::types::NewSchedule {
                location: seed.location.clone(),
                cluster: seed.cluster.clone(),
                device_name: seed.device_name.clone(),
                day_of_week: seed.day_of_week,
                start_time: seed.start_time.clone(),
                end_time: seed.end_time.clone(),
                enabled: seed.enabled,
                mode: seed.mode.clone(),
                target_intensity: seed.target_intensity,
                ramp_up_duration: seed.ramp_up_duration,
                ramp_down_duration: seed.ramp_down_duration,
            })?;
        }
        if !config.schedules.is_empty() {
            info!("seeded {} schedules from config", config.schedules.len());
        }
    }

    if store.all_rules()?.is_empty() {
        for seed in &config.rules {
            store.create_rule(crate::store::types::RuleRecord {
                id: 0,
                location: seed.location.clone(),
                cluster: seed.cluster.clone(),
                enabled: seed.enabled,
                condition_sensor: seed.condition_sensor.clone(),
                condition_operator: seed.condition_operator.clone(),
                condition_value: seed.condition_value,
                action_device: seed.action_device.clone(),
                action_state: seed.action_state,
                priority: seed.priority,
                schedule_id: seed.schedule_id,
            })?;
        }
        if !config.rules.is_empty() {
            info!("seeded {} rules from config", config.rules.len());
        }
    }

    for (device_type, gains) in &config.control.pid {
        if store.get_pid_parameters(device_type)?.is_none() {
            store.set_pid_parameters(
                device_type,
                &PidParamsRow {
                    kp: gains.kp,
                    ki: gains.ki,
                    kd: gains.kd,
                    source: "config".to_string(),
                    updated_by: None,
                    updated_at: now_ms,
                },
            )?;
        }
    }

    Ok(())
}

/// Populate the cache's PID parameter keys from the store at startup.
pub fn populate_cache_from_store(
    config: &Config,
    cache: &LiveCache,
    store: &Store,
) -> Result<(), crate::error::StoreError> {
    for device_type in config.control.pid.keys() {
        if let Some(row) = store.get_pid_parameters(device_type)? {
            cache.write_pid_parameters(
                device_type,
                &PidParamsRecord {
                    kp: row.kp,
                    ki: row.ki,
                    kd: row.kd,
                    source: row.source.clone(),
                    updated_at: row.updated_at,
                },
            );
        }
    }
    Ok(())
}
