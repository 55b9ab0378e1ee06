//! Real-time control subsystem: scheduling, setpoint ramps, rules, PID,
//! interlocks, alarms, and the 1 Hz engine that ties them together.

pub mod alarm;
pub mod engine;
pub mod interlock;
pub mod pid;
pub mod relay;
pub mod rules;
pub mod scheduler;
pub mod setpoint;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::StoreError;
use crate::store::types::{RuleRecord, ScheduleRecord};
use crate::store::Store;

/// Immutable view of the operator-editable control config.
#[derive(Debug, Clone, Default)]
pub struct ControlSnapshot {
    pub schedules: Vec<ScheduleRecord>,
    pub rules: Vec<RuleRecord>,
}

/// Atomically swappable snapshot shared between the control loop and the
/// operator surface. Readers see either the old or the new version, never
/// a half-applied edit.
pub struct SharedConfigState {
    inner: RwLock<Arc<ControlSnapshot>>,
}

impl SharedConfigState {
    pub fn load(store: &Store) -> Result<Self, StoreError> {
        let snapshot = ControlSnapshot {
            schedules: store.all_schedules()?,
            rules: store.all_rules()?,
        };
        Ok(Self {
            inner: RwLock::new(Arc::new(snapshot)),
        })
    }

    pub fn snapshot(&self) -> Arc<ControlSnapshot> {
        self.inner.read().clone()
    }

    /// Rebuild from the store after a validated edit landed.
    pub fn refresh(&self, store: &Store) -> Result<(), StoreError> {
        let snapshot = ControlSnapshot {
            schedules: store.all_schedules()?,
            rules: store.all_rules()?,
        };
        *self.inner.write() = Arc::new(snapshot);
        Ok(())
    }
}
