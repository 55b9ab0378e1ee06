//! Alarm tracking and the latched failsafe state machine.
//!
//! Per zone: {normal, failsafe}. A critical alarm latches failsafe and
//! forces `mode:<zone>` to "failsafe"; the latch lives here as well as in
//! the cache so an expired mode key cannot silently unlatch a zone. The
//! latch clears only on an explicit operator request, and only once no
//! active critical alarm remains.

use std::collections::HashSet;
use std::sync::Arc;

use log::{error, info, warn};

use crate::cache::{AlarmRecord, FailsafeRecord, LiveCache, Severity, ZoneMode};
use crate::zone::Zone;

pub struct AlarmManager {
    cache: Arc<LiveCache>,
    latched: HashSet<Zone>,
}

impl AlarmManager {
    pub fn new(cache: Arc<LiveCache>) -> Self {
        Self {
            cache,
            latched: HashSet::new(),
        }
    }

    /// Rebuild the latch set from the cache after a restart.
    pub fn restore(&mut self, zones: &[Zone]) {
        for zone in zones {
            if self.cache.read_failsafe(zone).is_some() {
                warn!("restored failsafe latch for {zone}");
                self.latched.insert(zone.clone());
                self.cache.write_mode(zone, ZoneMode::Failsafe);
            }
        }
    }

    /// Raise (or re-raise) an alarm; critical severity latches failsafe.
    pub fn raise(
        &mut self,
        zone: &Zone,
        name: &str,
        severity: Severity,
        message: &str,
        now_ms: i64,
    ) -> AlarmRecord {
        let record = self.cache.write_alarm(zone, name, severity, message, now_ms);
        if severity == Severity::Critical {
            self.latch_failsafe(zone, "critical_alarm", name, now_ms);
        }
        record
    }

    fn latch_failsafe(&mut self, zone: &Zone, reason: &str, triggered_by: &str, now_ms: i64) {
        // An existing latch keeps its original `since`.
        if self.cache.read_failsafe(zone).is_none() {
            self.cache.write_failsafe(
                zone,
                &FailsafeRecord {
                    reason: reason.to_string(),
                    triggered_by: triggered_by.to_string(),
                    since: now_ms,
                },
            );
        }
        self.cache.write_mode(zone, ZoneMode::Failsafe);
        if self.latched.insert(zone.clone()) {
            error!("FAILSAFE TRIGGERED: {zone} - {reason} (triggered by: {triggered_by})");
        }
    }

    /// Clear one alarm (sets `active = false`; failsafe stays latched).
    pub fn clear(&self, zone: &Zone, name: &str) -> bool {
        self.cache.clear_alarm(zone, name)
    }

    pub fn acknowledge(&self, zone: &Zone, name: &str) -> bool {
        self.cache.acknowledge_alarm(zone, name)
    }

    pub fn alarms(&self, zone: &Zone) -> Vec<(String, AlarmRecord)> {
        self.cache.read_alarms(zone)
    }

    pub fn has_critical(&self, zone: &Zone) -> bool {
        self.cache.has_critical_alarm(zone)
    }

    /// Whether the zone is currently latched into failsafe.
    pub fn is_failsafe(&self, zone: &Zone) -> bool {
        self.latched.contains(zone) || self.cache.read_failsafe(zone).is_some()
    }

    /// Operator request to leave failsafe. Refused while any active
    /// critical alarm remains in the zone.
    pub fn clear_failsafe(&mut self, zone: &Zone) -> Result<(), String> {
        if self.has_critical(zone) {
            warn!("cannot clear failsafe for {zone}: critical alarms still active");
            return Err(format!(
                "critical alarms still active in {zone}"
            ));
        }
        self.cache.clear_failsafe(zone);
        self.latched.remove(zone);
        self.cache.write_mode(zone, ZoneMode::Auto);
        info!("failsafe cleared for {zone}");
        Ok(())
    }

    /// Per-tick upkeep: re-assert the mode key while latched so cache TTL
    /// expiry cannot un-failsafe a zone.
    pub fn tick(&self, zone: &Zone) {
        if self.latched.contains(zone) {
            self.cache.write_mode(zone, ZoneMode::Failsafe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<LiveCache>, AlarmManager) {
        let cache = Arc::new(LiveCache::new());
        let manager = AlarmManager::new(cache.clone());
        (cache, manager)
    }

    fn zone() -> Zone {
        Zone::new("Flower Room", "front")
    }

    #[test]
    fn warning_does_not_latch() {
        let (cache, mut manager) = setup();
        manager.raise(&zone(), "rh_f_offline", Severity::Warning, "stale", 1_000);
        assert!(!manager.is_failsafe(&zone()));
        assert_eq!(cache.read_mode(&zone()), ZoneMode::Auto);
    }

    #[test]
    fn critical_latches_and_forces_mode() {
        let (cache, mut manager) = setup();
        manager.raise(&zone(), "co2_f_offline", Severity::Critical, "gone", 1_000);
        assert!(manager.is_failsafe(&zone()));
        assert_eq!(cache.read_mode(&zone()), ZoneMode::Failsafe);
        let failsafe = cache.read_failsafe(&zone()).unwrap();
        assert_eq!(failsafe.triggered_by, "co2_f_offline");
        assert_eq!(failsafe.since, 1_000);
    }

    #[test]
    fn second_critical_keeps_original_since() {
        let (cache, mut manager) = setup();
        manager.raise(&zone(), "co2_f_offline", Severity::Critical, "gone", 1_000);
        manager.raise(&zone(), "vpd_f_offline", Severity::Critical, "gone", 9_000);
        assert_eq!(cache.read_failsafe(&zone()).unwrap().since, 1_000);
    }

    #[test]
    fn clear_failsafe_refused_while_critical_active() {
        let (cache, mut manager) = setup();
        manager.raise(&zone(), "co2_f_offline", Severity::Critical, "gone", 1_000);
        assert!(manager.clear_failsafe(&zone()).is_err());
        // Clearing the alarm first allows it.
        manager.clear(&zone(), "co2_f_offline");
        assert!(manager.clear_failsafe(&zone()).is_ok());
        assert!(!manager.is_failsafe(&zone()));
        assert_eq!(cache.read_mode(&zone()), ZoneMode::Auto);
    }

    #[test]
    fn tick_reasserts_mode_while_latched() {
        let (cache, mut manager) = setup();
        manager.raise(&zone(), "co2_f_offline", Severity::Critical, "gone", 1_000);
        // Simulate the mode key expiring.
        cache.write_mode(&zone(), ZoneMode::Auto);
        manager.tick(&zone());
        assert_eq!(cache.read_mode(&zone()), ZoneMode::Failsafe);
    }

    #[test]
    fn restore_rebuilds_latch_from_cache() {
        let (cache, _) = setup();
        cache.write_failsafe(
            &zone(),
            &FailsafeRecord {
                reason: "critical_alarm".to_string(),
                triggered_by: "co2_f_offline".to_string(),
                since: 5,
            },
        );
        let mut manager = AlarmManager::new(cache.clone());
        manager.restore(&[zone()]);
        assert!(manager.is_failsafe(&zone()));
        assert_eq!(cache.read_mode(&zone()), ZoneMode::Failsafe);
    }
}
