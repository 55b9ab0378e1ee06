//! Pairwise and global device interlocks, optionally load-aware.
//!
//! The manager never talks to the DAC manager or the control engine
//! directly: it holds a [`DeviceLoadProbe`] capability the engine injects
//! once everything is constructed, which breaks the would-be dependency
//! cycle (interlocks need intensities owned by the DAC layer and duty
//! cycles owned by the engine).

use std::collections::HashMap;

use crate::config::Config;
use crate::zone::Zone;

/// Current load of a device in percent: dimming intensity for lights, PWM
/// duty for PID-driven relays, `None` when unknown.
pub trait DeviceLoadProbe: Send + Sync {
    fn load_of(&self, zone: &Zone, device: &str) -> Option<f64>;
}

/// A probe that knows nothing; every interlock degrades to strict ON/OFF.
pub struct NoLoadProbe;

impl DeviceLoadProbe for NoLoadProbe {
    fn load_of(&self, _zone: &Zone, _device: &str) -> Option<f64> {
        None
    }
}

#[derive(Debug, Clone)]
struct GlobalRule {
    when_device: String,
    then_device: String,
    max_allowed_load: f64,
}

pub struct InterlockManager {
    /// (zone, device) → devices whose load blocks it.
    blocked_by: HashMap<(Zone, String), Vec<String>>,
    /// (zone, device) → that device's allowed load when it is the blocker.
    max_load: HashMap<(Zone, String), f64>,
    global_rules: Vec<GlobalRule>,
    probe: Box<dyn DeviceLoadProbe>,
}

impl InterlockManager {
    pub fn from_config(config: &Config, probe: Box<dyn DeviceLoadProbe>) -> Self {
        let mut blocked_by = HashMap::new();
        let mut max_load = HashMap::new();
        for (zone, name, device) in config.iter_devices() {
            if !device.interlock_with.is_empty() {
                blocked_by.insert(
                    (zone.clone(), name.clone()),
                    device.interlock_with.clone(),
                );
            }
            max_load.insert((zone, name.clone()), device.interlock_max_allowed_load);
        }
        let global_rules = config
            .interlocks
            .iter()
            .map(|rule| GlobalRule {
                when_device: rule.when_device.clone(),
                then_device: rule.then_device.clone(),
                max_allowed_load: rule.max_allowed_load,
            })
            .collect();
        Self {
            blocked_by,
            max_load,
            global_rules,
            probe,
        }
    }

    /// Check whether `device` may turn on (or be set to `requested_load`).
    ///
    /// `states` is the relay manager's current (zone, device) → state map.
    /// `Err` carries the operator-facing refusal message.
    pub fn check(
        &self,
        zone: &Zone,
        device: &str,
        states: &HashMap<(Zone, String), u8>,
        requested_load: Option<f64>,
    ) -> Result<(), String> {
        // Per-device interlocks.
        if let Some(blockers) = self.blocked_by.get(&(zone.clone(), device.to_string())) {
            for blocker in blockers {
                let state = states
                    .get(&(zone.clone(), blocker.clone()))
                    .copied()
                    .unwrap_or(0);
                if state != 1 {
                    continue;
                }
                match self.probe.load_of(zone, blocker) {
                    Some(load) => {
                        let max = self
                            .max_load
                            .get(&(zone.clone(), blocker.clone()))
                            .copied()
                            .unwrap_or(0.0);
                        if load > max {
                            return Err(format!(
                                "Interlock: {blocker} is at {load:.1}% (max allowed: {max:.1}%)"
                            ));
                        }
                    }
                    None => {
                        return Err(format!("Interlock: {blocker} is ON"));
                    }
                }
            }
        }

        // Global rules.
        for rule in &self.global_rules {
            if rule.when_device != device && rule.then_device != device {
                continue;
            }
            let when_state = states
                .get(&(zone.clone(), rule.when_device.clone()))
                .copied()
                .unwrap_or(0);
            if when_state != 1 {
                continue;
            }
            let when_load = self.probe.load_of(zone, &rule.when_device);

            if rule.then_device == device {
                match when_load {
                    Some(load) => {
                        if load > rule.max_allowed_load {
                            return Err(format!(
                                "Global interlock: {} is at {load:.1}% (max allowed: {:.1}%)",
                                rule.when_device, rule.max_allowed_load
                            ));
                        }
                    }
                    None => {
                        return Err(format!(
                            "Global interlock: {} is ON",
                            rule.when_device
                        ));
                    }
                }
            }

            if let (Some(requested), Some(load)) = (requested_load, when_load) {
                if requested > rule.max_allowed_load && load > rule.max_allowed_load {
                    return Err(format!(
                        "Global interlock: Cannot set {device} to {requested:.1}% \
                         (max allowed: {:.1}%) when {} is at {load:.1}%",
                        rule.max_allowed_load, rule.when_device
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    struct FixedLoads(HashMap<String, f64>);

    impl DeviceLoadProbe for FixedLoads {
        fn load_of(&self, _zone: &Zone, device: &str) -> Option<f64> {
            self.0.get(device).copied()
        }
    }

    fn config() -> Config {
        serde_yaml::from_str(
            r#"
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
interlocks:
  - { when_device: co2_valve, then_device: exhaust_fan, max_allowed_load: 0.0 }
"#,
        )
        .unwrap()
    }

    fn zone() -> Zone {
        Zone::new("Flower Room", "front")
    }

    fn states(pairs: &[(&str, u8)]) -> HashMap<(Zone, String), u8> {
        pairs
            .iter()
            .map(|(name, state)| ((zone(), name.to_string()), *state))
            .collect()
    }

    #[test]
    fn loaded_blocker_refuses_with_message() {
        let probe = FixedLoads([("light_a".to_string(), 50.0)].into_iter().collect());
        let manager = InterlockManager::from_config(&config(), Box::new(probe));
        let err = manager
            .check(&zone(), "light_b", &states(&[("light_a", 1)]), None)
            .unwrap_err();
        assert_eq!(err, "Interlock: light_a is at 50.0% (max allowed: 0.0%)");
    }

    #[test]
    fn blocker_off_or_idle_passes() {
        let probe = FixedLoads([("light_a".to_string(), 0.0)].into_iter().collect());
        let manager = InterlockManager::from_config(&config(), Box::new(probe));
        // OFF blocker passes.
        assert!(manager
            .check(&zone(), "light_b", &states(&[("light_a", 0)]), None)
            .is_ok());
        // ON but at zero load with max 0.0 also passes (load <= max).
        assert!(manager
            .check(&zone(), "light_b", &states(&[("light_a", 1)]), None)
            .is_ok());
    }

    #[test]
    fn unknown_load_degrades_to_strict() {
        let manager = InterlockManager::from_config(&config(), Box::new(NoLoadProbe));
        let err = manager
            .check(&zone(), "light_b", &states(&[("light_a", 1)]), None)
            .unwrap_err();
        assert_eq!(err, "Interlock: light_a is ON");
    }

    #[test]
    fn global_rule_blocks_then_device() {
        let probe = FixedLoads([("co2_valve".to_string(), 100.0)].into_iter().collect());
        let manager = InterlockManager::from_config(&config(), Box::new(probe));
        let err = manager
            .check(&zone(), "exhaust_fan", &states(&[("co2_valve", 1)]), None)
            .unwrap_err();
        assert!(err.starts_with("Global interlock: co2_valve is at 100.0%"));
        // The reverse direction is not blocked.
        assert!(manager
            .check(&zone(), "co2_valve", &states(&[("co2_valve", 1)]), None)
            .is_ok());
    }

    #[test]
    fn global_rule_checks_requested_load() {
        let probe = FixedLoads([("co2_valve".to_string(), 80.0)].into_iter().collect());
        let manager = InterlockManager::from_config(&config(), Box::new(probe));
        let err = manager
            .check(
                &zone(),
                "exhaust_fan",
                &states(&[("co2_valve", 1)]),
                Some(60.0),
            )
            .unwrap_err();
        assert!(err.starts_with("Global interlock:"));
    }
}
