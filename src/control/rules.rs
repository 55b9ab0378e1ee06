//! Prioritised if-then rules over current sensor values.
//!
//! A rule fires when its condition holds against the zone's sensor map and,
//! if it references a schedule, that exact schedule is currently active for
//! the rule's action device. Of all firing rules the highest priority wins;
//! ties break arbitrarily.

use std::collections::HashMap;

use log::warn;

use crate::control::scheduler::{Scheduler, WallClock};
use crate::store::types::RuleRecord;
use crate::zone::Zone;

/// Tolerance for the equality operator.
const EQ_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub device: String,
    pub state: u8,
    pub rule_id: u64,
}

pub struct RulesEngine {
    rules: Vec<RuleRecord>,
}

impl RulesEngine {
    pub fn new(rules: Vec<RuleRecord>) -> Self {
        Self { rules }
    }

    pub fn update(&mut self, rules: Vec<RuleRecord>) {
        self.rules = rules;
    }

    pub fn rules(&self) -> &[RuleRecord] {
        &self.rules
    }

    /// Evaluate all rules for a zone; returns the highest-priority match.
    pub fn evaluate(
        &self,
        zone: &Zone,
        sensor_values: &HashMap<String, f64>,
        scheduler: &Scheduler,
        clock: WallClock,
    ) -> Option<RuleMatch> {
        let mut best: Option<&RuleRecord> = None;

        for rule in &self.rules {
            if !rule.enabled
                || rule.location != zone.location
                || rule.cluster != zone.cluster
            {
                continue;
            }

            // Schedule-gated rules require their exact schedule active.
            if let Some(schedule_id) = rule.schedule_id {
                let active = scheduler
                    .active_schedule(zone, &rule.action_device, clock)
                    .map(|s| s.id);
                if active != Some(schedule_id) {
                    continue;
                }
            }

            let Some(&value) = sensor_values.get(&rule.condition_sensor) else {
                continue;
            };

            if !condition_holds(&rule.condition_operator, value, rule.condition_value) {
                continue;
            }

            match best {
                Some(current) if current.priority >= rule.priority => {}
                _ => best = Some(rule),
            }
        }

        best.map(|rule| RuleMatch {
            device: rule.action_device.clone(),
            state: rule.action_state,
            rule_id: rule.id,
        })
    }
}

fn condition_holds(operator: &str, value: f64, threshold: f64) -> bool {
    match operator {
        "<" => value < threshold,
        ">" => value > threshold,
        "<=" | "≤" => value <= threshold,
        ">=" | "≥" => value >= threshold,
        "=" | "==" => (value - threshold).abs() < EQ_TOLERANCE,
        other => {
            warn!("unknown rule operator '{other}'");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::ScheduleRecord;

    fn zone() -> Zone {
        Zone::new("Flower Room", "front")
    }

    fn clock() -> WallClock {
        WallClock {
            weekday: 0,
            minutes: 720.0,
        }
    }

    fn rule(id: u64, sensor: &str, op: &str, value: f64, device: &str, state: u8, priority: i32) -> RuleRecord {
        RuleRecord {
            id,
            location: "Flower Room".to_string(),
            cluster: "front".to_string(),
            enabled: true,
            condition_sensor: sensor.to_string(),
            condition_operator: op.to_string(),
            condition_value: value,
            action_device: device.to_string(),
            action_state: state,
            priority,
            schedule_id: None,
        }
    }

    fn sensors(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn highest_priority_wins() {
        let engine = RulesEngine::new(vec![
            rule(1, "co2_f", ">", 1_200.0, "vent_1", 1, 1),
            rule(2, "co2_f", ">", 1_000.0, "co2_valve", 0, 5),
        ]);
        let scheduler = Scheduler::new(vec![]);
        let got = engine
            .evaluate(&zone(), &sensors(&[("co2_f", 1_500.0)]), &scheduler, clock())
            .unwrap();
        assert_eq!(got.rule_id, 2);
        assert_eq!(got.device, "co2_valve");
        assert_eq!(got.state, 0);
    }

    #[test]
    fn missing_sensor_skips_rule() {
        let engine = RulesEngine::new(vec![rule(1, "co2_f", ">", 1_000.0, "vent_1", 1, 1)]);
        let scheduler = Scheduler::new(vec![]);
        assert!(engine
            .evaluate(&zone(), &sensors(&[("rh_f", 55.0)]), &scheduler, clock())
            .is_none());
    }

    #[test]
    fn equality_uses_tolerance() {
        assert!(condition_holds("=", 1.004, 1.0));
        assert!(!condition_holds("=", 1.02, 1.0));
        assert!(condition_holds("<=", 1.0, 1.0));
        assert!(condition_holds("≥", 2.0, 1.0));
    }

    #[test]
    fn disabled_and_foreign_zone_rules_skip() {
        let mut r = rule(1, "co2_f", ">", 0.0, "vent_1", 1, 1);
        r.enabled = false;
        let mut other = rule(2, "co2_f", ">", 0.0, "vent_1", 1, 1);
        other.cluster = "back".to_string();
        let engine = RulesEngine::new(vec![r, other]);
        let scheduler = Scheduler::new(vec![]);
        assert!(engine
            .evaluate(&zone(), &sensors(&[("co2_f", 10.0)]), &scheduler, clock())
            .is_none());
    }

    #[test]
    fn schedule_gate_requires_exact_schedule() {
        let schedule = ScheduleRecord {
            id: 42,
            location: "Flower Room".to_string(),
            cluster: "front".to_string(),
            device_name: "vent_1".to_string(),
            day_of_week: None,
            start_time: "06:00".to_string(),
            end_time: "18:00".to_string(),
            enabled: true,
            mode: None,
            target_intensity: None,
            ramp_up_duration: None,
            ramp_down_duration: None,
        };
        let scheduler = Scheduler::new(vec![schedule]);

        let mut gated = rule(1, "co2_f", ">", 1_000.0, "vent_1", 1, 1);
        gated.schedule_id = Some(42);
        let engine = RulesEngine::new(vec![gated.clone()]);

        // Midday: schedule 42 is active, the rule fires.
        assert!(engine
            .evaluate(&zone(), &sensors(&[("co2_f", 1_500.0)]), &scheduler, clock())
            .is_some());

        // A different schedule id never matches.
        gated.schedule_id = Some(7);
        let engine = RulesEngine::new(vec![gated]);
        assert!(engine
            .evaluate(&zone(), &sensors(&[("co2_f", 1_500.0)]), &scheduler, clock())
            .is_none());
    }
}
