//! Integration tests: control engine → relay/DAC drivers (simulation mode)
//! with a temp-dir store and an in-process cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};

use canopy::cache::{LiveCache, Severity, ZoneMode};
use canopy::config::Config;
use canopy::control::alarm::AlarmManager;
use canopy::control::engine::{ControlEngine, EngineCommand, EngineLoadProbe};
use canopy::control::interlock::InterlockManager;
use canopy::control::relay::{ControlMode, RelayManager};
use canopy::control::scheduler::WallClock;
use canopy::control::SharedConfigState;
use canopy::drivers::gp8403::DacManager;
use canopy::drivers::mcp23017::Mcp23017;
use canopy::store::types::{NewSchedule, RuleRecord, SetpointPatch};
use canopy::store::Store;
use canopy::tasks;
use canopy::zone::Zone;

// ── Harness ───────────────────────────────────────────────────

struct Harness {
    config: Arc<Config>,
    cache: Arc<LiveCache>,
    store: Arc<Store>,
    state: Arc<SharedConfigState>,
    alarms: Arc<Mutex<AlarmManager>>,
    dacs: Arc<Mutex<DacManager>>,
    engine: ControlEngine,
    commands: mpsc::UnboundedSender<EngineCommand>,
    _dir: tempfile::TempDir,
}

fn harness(yaml: &str) -> Harness {
    let config: Arc<Config> = Arc::new(serde_yaml::from_str(yaml).expect("test config parses"));
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    tasks::sync_config_seeds(&config, &store).unwrap();
    let cache = Arc::new(LiveCache::new());
    tasks::populate_cache_from_store(&config, &cache, &store).unwrap();

    let mcp = Arc::new(Mutex::new(Mcp23017::new(1, 0x20, true)));
    let mut dac_manager = DacManager::new(1, true);
    for board in &config.hardware.dac_boards {
        assert!(dac_manager.add_board(board.board_id, board.address));
    }
    let dacs = Arc::new(Mutex::new(dac_manager));

    let state = Arc::new(SharedConfigState::load(&store).unwrap());
    let (broadcast_tx, _) = broadcast::channel(64);
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let duties = Arc::new(RwLock::new(HashMap::new()));
    let alarms = Arc::new(Mutex::new(AlarmManager::new(cache.clone())));

    let probe = EngineLoadProbe::new(&config, dacs.clone(), duties.clone());
    let interlocks = InterlockManager::from_config(&config, Box::new(probe));
    let relays = RelayManager::new(&config, mcp, interlocks);

    let engine = ControlEngine::new(
        config.clone(),
        state.clone(),
        cache.clone(),
        store.clone(),
        relays,
        dacs.clone(),
        alarms.clone(),
        duties,
        broadcast_tx,
        command_rx,
    );

    Harness {
        config,
        cache,
        store,
        state,
        alarms,
        dacs,
        engine,
        commands: command_tx,
        _dir: dir,
    }
}

fn zone() -> Zone {
    Zone::new("Flower Room", "front")
}

fn noon() -> WallClock {
    WallClock {
        weekday: 0,
        minutes: 720.0,
    }
}

fn base_yaml() -> String {
    r#"
hardware:
  simulation: true
  dac_boards:
    - { board_id: 1, address: 88 }
devices:
  "Flower Room":
    front:
      light_main:
        device_type: light
        channel: 0
        dimming: { board_id: 1, channel: 0 }
      heater_1:
        device_type: heater
        channel: 1
        pid_enabled: true
      fan_1:
        device_type: fan
        channel: 2
        pid_enabled: true
sensor_mapping:
  "Flower Room":
    front:
      temperature_sensor: dry_bulb_f
      humidity_sensor: rh_f
      co2_sensor: co2_f
      vpd_sensor: vpd_f
control:
  pid:
    heater: { kp: 10.0, ki: 0.0, kd: 0.0 }
    fan: { kp: -6.0, ki: 0.0, kd: 0.0 }
"#
    .to_string()
}

// ── Schedules ─────────────────────────────────────────────────

#[test]
fn scheduled_light_sets_intensity_and_relay() {
    let mut h = harness(&base_yaml());
    h.store
        .create_schedule(NewSchedule {
            location: "Flower Room".into(),
            cluster: "front".into(),
            device_name: "light_main".into(),
            day_of_week: None,
            start_time: "06:00".into(),
            end_time: "18:00".into(),
            enabled: true,
            mode: None,
            target_intensity: Some(80.0),
            ramp_up_duration: None,
            ramp_down_duration: None,
        })
        .unwrap();
    h.state.refresh(&h.store).unwrap();

    h.engine.run_tick(1_000, noon()).unwrap();

    assert_eq!(h.dacs.lock().get_intensity(1, 0), Some(80.0));
    assert_eq!(h.engine.relays().device_state(&zone(), "light_main"), Some(1));
    // Intensity persisted for restart restoration.
    let light = h.cache.read_light_intensity(&zone(), "light_main").unwrap();
    assert_eq!(light.intensity, 80.0);
    assert_eq!(light.voltage, 8.0);
}

#[test]
fn night_outside_schedule_keeps_light_off() {
    let mut h = harness(&base_yaml());
    h.store
        .create_schedule(NewSchedule {
            location: "Flower Room".into(),
            cluster: "front".into(),
            device_name: "light_main".into(),
            day_of_week: None,
            start_time: "06:00".into(),
            end_time: "18:00".into(),
            enabled: true,
            mode: None,
            target_intensity: Some(80.0),
            ramp_up_duration: None,
            ramp_down_duration: None,
        })
        .unwrap();
    h.state.refresh(&h.store).unwrap();

    let midnight = WallClock {
        weekday: 0,
        minutes: 10.0,
    };
    h.engine.run_tick(1_000, midnight).unwrap();
    assert_eq!(h.engine.relays().device_state(&zone(), "light_main"), None);
}

// ── Rules ─────────────────────────────────────────────────────

#[test]
fn rule_outranks_schedule() {
    let mut h = harness(&base_yaml());
    // Schedule wants the light on all day...
    h.store
        .create_schedule(NewSchedule {
            location: "Flower Room".into(),
            cluster: "front".into(),
            device_name: "light_main".into(),
            day_of_week: None,
            start_time: "00:00".into(),
            end_time: "23:59".into(),
            enabled: true,
            mode: None,
            target_intensity: Some(100.0),
            ramp_up_duration: None,
            ramp_down_duration: None,
        })
        .unwrap();
    // ...but an over-temperature rule forces it off.
    h.store
        .create_rule(RuleRecord {
            id: 0,
            location: "Flower Room".into(),
            cluster: "front".into(),
            enabled: true,
            condition_sensor: "dry_bulb_f".into(),
            condition_operator: ">".into(),
            condition_value: 32.0,
            action_device: "light_main".into(),
            action_state: 0,
            priority: 10,
            schedule_id: None,
        })
        .unwrap();
    h.state.refresh(&h.store).unwrap();

    h.cache.write_sensor_value("dry_bulb_f", 35.0, 1_000);
    h.engine.run_tick(1_000, noon()).unwrap();

    assert_eq!(h.engine.relays().device_state(&zone(), "light_main"), None);
    // The DAC never received a schedule intensity.
    assert_eq!(h.dacs.lock().get_intensity(1, 0), Some(0.0));
}

// ── Failsafe ──────────────────────────────────────────────────

#[test]
fn failsafe_blocks_all_automation_until_cleared() {
    let mut h = harness(&base_yaml());
    h.store
        .create_schedule(NewSchedule {
            location: "Flower Room".into(),
            cluster: "front".into(),
            device_name: "light_main".into(),
            day_of_week: None,
            start_time: "00:00".into(),
            end_time: "23:59".into(),
            enabled: true,
            mode: None,
            target_intensity: None,
            ramp_up_duration: None,
            ramp_down_duration: None,
        })
        .unwrap();
    h.state.refresh(&h.store).unwrap();

    h.alarms.lock().raise(
        &zone(),
        "co2_sensor_offline",
        Severity::Critical,
        "sensor gone",
        500,
    );

    for tick in 0..3 {
        h.engine.run_tick(1_000 + tick, noon()).unwrap();
        assert_eq!(h.cache.read_mode(&zone()), ZoneMode::Failsafe);
        assert_eq!(h.engine.relays().device_state(&zone(), "light_main"), None);
    }

    // Clearing is refused while the critical alarm is active.
    assert!(h.alarms.lock().clear_failsafe(&zone()).is_err());

    // Recover the sensor, clear the alarm, then clear failsafe.
    h.alarms.lock().clear(&zone(), "co2_sensor_offline");
    h.alarms.lock().clear_failsafe(&zone()).unwrap();
    assert_eq!(h.cache.read_mode(&zone()), ZoneMode::Auto);

    h.engine.run_tick(10_000, noon()).unwrap();
    assert_eq!(h.engine.relays().device_state(&zone(), "light_main"), Some(1));
}

// ── PID ───────────────────────────────────────────────────────

#[test]
fn heater_pid_drives_pwm_from_legacy_setpoint_row() {
    let mut h = harness(&base_yaml());
    h.store
        .set_setpoint(
            &zone(),
            None,
            &SetpointPatch {
                heating_setpoint: Some(24.0),
                ..Default::default()
            },
            0,
        )
        .unwrap();

    // 4 degrees cold with kp=10: 40% duty, ON at the cycle start.
    h.cache.write_sensor_value("dry_bulb_f", 20.0, 1_000);
    h.engine.run_tick(1_000, noon()).unwrap();
    assert_eq!(h.engine.relays().device_state(&zone(), "heater_1"), Some(1));

    let state = h.cache.read_automation_state(&zone(), "heater_1").unwrap();
    assert_eq!(state.duty_cycle_percent, Some(40.0));
    assert_eq!(state.mode, "auto");
}

#[test]
fn pid_priority_falls_through_to_lower_setpoint() {
    let mut h = harness(&base_yaml());
    // Fan: cooling (priority 10, kp -6) then vpd (priority 5).
    h.store
        .set_setpoint(
            &zone(),
            None,
            &SetpointPatch {
                cooling_setpoint: Some(27.0),
                vpd: Some(1.2),
                ..Default::default()
            },
            0,
        )
        .unwrap();

    // Hot room: cooling error -5 → output 30, cooling wins.
    h.cache.write_sensor_value("dry_bulb_f", 32.0, 1_000);
    // VPD sits inside the hysteresis band so the VPD pass holds state.
    h.cache.write_sensor_value("vpd_f", 1.25, 1_000);
    h.engine.run_tick(1_000, noon()).unwrap();
    let state = h.cache.read_automation_state(&zone(), "fan_1").unwrap();
    assert_eq!(state.duty_cycle_percent, Some(30.0));
    assert_eq!(h.engine.relays().device_state(&zone(), "fan_1"), Some(1));
}

#[test]
fn stale_sensor_raises_offline_warning() {
    let mut h = harness(&base_yaml());
    h.store
        .set_setpoint(
            &zone(),
            None,
            &SetpointPatch {
                heating_setpoint: Some(24.0),
                ..Default::default()
            },
            0,
        )
        .unwrap();

    // No temperature reading at all: the heater's only setpoint is skipped
    // and an offline warning is raised.
    h.engine.run_tick(1_000, noon()).unwrap();
    assert_eq!(h.engine.relays().device_state(&zone(), "heater_1"), None);
    let alarms = h.alarms.lock().alarms(&zone());
    assert!(alarms
        .iter()
        .any(|(name, a)| name == "dry_bulb_f_offline" && a.active));
}

// ── VPD control ───────────────────────────────────────────────

#[test]
fn vpd_hysteresis_on_off_hold() {
    let mut h = harness(&base_yaml());
    h.store
        .set_setpoint(
            &zone(),
            None,
            &SetpointPatch {
                vpd: Some(1.2),
                ..Default::default()
            },
            0,
        )
        .unwrap();

    // Below the band: fan on.
    h.cache.write_sensor_value("vpd_f", 0.9, 1_000);
    h.engine.run_tick(1_000, noon()).unwrap();
    assert_eq!(h.engine.relays().device_state(&zone(), "fan_1"), Some(1));

    // Above the band: fan off.
    h.cache.write_sensor_value("vpd_f", 1.4, 2_000);
    h.engine.run_tick(2_000, noon()).unwrap();
    assert_eq!(h.engine.relays().device_state(&zone(), "fan_1"), Some(0));

    // Inside the band: hold.
    h.cache.write_sensor_value("vpd_f", 1.25, 3_000);
    h.engine.run_tick(3_000, noon()).unwrap();
    assert_eq!(h.engine.relays().device_state(&zone(), "fan_1"), Some(0));
}

// ── Manual control and interlocks ─────────────────────────────

#[test]
fn manual_device_mode_is_sticky() {
    let mut h = harness(&base_yaml());
    h.store
        .create_schedule(NewSchedule {
            location: "Flower Room".into(),
            cluster: "front".into(),
            device_name: "light_main".into(),
            day_of_week: None,
            start_time: "00:00".into(),
            end_time: "23:59".into(),
            enabled: true,
            mode: None,
            target_intensity: None,
            ramp_up_duration: None,
            ramp_down_duration: None,
        })
        .unwrap();
    h.state.refresh(&h.store).unwrap();

    // Operator forces the light off, manually.
    h.commands
        .send(EngineCommand::SetDeviceState {
            zone: zone(),
            device: "light_main".into(),
            state: 0,
            mode: ControlMode::Manual,
        })
        .unwrap();

    // The schedule would turn it on, but manual is sticky.
    h.engine.run_tick(1_000, noon()).unwrap();
    assert_eq!(h.engine.relays().device_state(&zone(), "light_main"), Some(0));

    // Releasing back to auto lets the schedule win again.
    h.commands
        .send(EngineCommand::SetDeviceMode {
            zone: zone(),
            device: "light_main".into(),
            mode: ControlMode::Auto,
        })
        .unwrap();
    h.engine.run_tick(2_000, noon()).unwrap();
    assert_eq!(h.engine.relays().device_state(&zone(), "light_main"), Some(1));
}

#[test]
fn interlock_refuses_second_light_while_first_loaded() {
    let yaml = r#"
hardware:
  simulation: true
  dac_boards:
    - { board_id: 1, address: 88 }
devices:
  "Flower Room":
    front:
      light_a:
        device_type: light
        channel: 0
        dimming: { board_id: 1, channel: 0 }
        interlock_max_allowed_load: 0.0
      light_b:
        device_type: light
        channel: 1
        dimming: { board_id: 1, channel: 1 }
        interlock_with: [light_a]
"#;
    let mut h = harness(yaml);

    // Light A on at 50% load.
    h.commands
        .send(EngineCommand::SetDeviceState {
            zone: zone(),
            device: "light_a".into(),
            state: 1,
            mode: ControlMode::Manual,
        })
        .unwrap();
    h.commands
        .send(EngineCommand::SetLightIntensity {
            zone: zone(),
            device: "light_a".into(),
            intensity: 50.0,
        })
        .unwrap();
    h.engine.run_tick(1_000, noon()).unwrap();
    assert_eq!(h.engine.relays().device_state(&zone(), "light_a"), Some(1));

    // Light B may not come on while A is above its allowed load.
    h.commands
        .send(EngineCommand::SetDeviceState {
            zone: zone(),
            device: "light_b".into(),
            state: 1,
            mode: ControlMode::Manual,
        })
        .unwrap();
    h.engine.run_tick(2_000, noon()).unwrap();
    assert_ne!(h.engine.relays().device_state(&zone(), "light_b"), Some(1));
}

// ── Restoration ───────────────────────────────────────────────

#[test]
fn light_intensity_restores_from_cache() {
    let mut h = harness(&base_yaml());
    h.cache.write_light_intensity(
        &zone(),
        "light_main",
        &canopy::cache::LightIntensityRecord {
            intensity: 65.0,
            voltage: 6.5,
            board_id: 1,
            channel: 0,
            timestamp_ms: 1,
        },
    );
    h.engine.restore_light_intensities().unwrap();
    assert_eq!(h.dacs.lock().get_intensity(1, 0), Some(65.0));
}

#[test]
fn device_states_restore_without_interlock_checks() {
    let mut h = harness(&base_yaml());
    h.store
        .set_device_state(
            &zone(),
            "heater_1",
            &canopy::store::types::DeviceStateRow {
                channel: 1,
                state: 1,
                mode: "manual".into(),
                updated_at: 1,
            },
        )
        .unwrap();
    h.engine.restore_device_states().unwrap();
    assert_eq!(h.engine.relays().device_state(&zone(), "heater_1"), Some(1));
    assert_eq!(
        h.engine.relays().device_mode(&zone(), "heater_1"),
        Some(ControlMode::Manual)
    );
    // Config handle is alive for further assertions.
    assert!(h.config.device(&zone(), "heater_1").is_some());
}
