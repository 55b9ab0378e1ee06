//! Effective-setpoint computation with ramped mode transitions.
//!
//! Ramp state is keyed by (zone, setpoint type) — not by mode — so a mode
//! that flaps away and back does not restart a ramp whose target never
//! changed. A ramp restarts only when the target changes: on restart it
//! starts from the current effective value (falling back to the mapped
//! sensor reading, then the target itself), giving a linear glide with no
//! step. Cold start pins the effective value to the nominal value so the
//! first tick after boot never fabricates a ramp.

use std::collections::HashMap;

use log::debug;

use crate::config::SetpointType;
use crate::control::scheduler::ClimateMode;
use crate::store::types::{SetpointRecord, SetpointValues};
use crate::zone::Zone;

#[derive(Debug, Clone)]
struct RampState {
    start_value: f64,
    target: f64,
    ramp_start_ms: i64,
    duration_min: i64,
    current_effective: f64,
}

/// Output of one per-zone computation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectiveSetpoints {
    pub effective: SetpointValues,
    pub nominal: SetpointValues,
    /// In-progress ramp fraction per type; `None` once locked to target.
    pub ramp_progress: SetpointValues,
}

pub struct SetpointEngine {
    ramps: HashMap<(Zone, SetpointType), RampState>,
    last_mode: HashMap<Zone, ClimateMode>,
}

impl SetpointEngine {
    pub fn new() -> Self {
        Self {
            ramps: HashMap::new(),
            last_mode: HashMap::new(),
        }
    }

    /// Compute effective setpoints for a zone at `now_ms`.
    ///
    /// `sensor_value` supplies the current reading for a setpoint type when
    /// a ramp needs a starting point and no prior effective value exists.
    /// Returns the setpoint tuple plus whether the climate mode changed
    /// since the previous call (callers reset PID integrators on that).
    pub fn compute(
        &mut self,
        zone: &Zone,
        now_ms: i64,
        mode: Option<ClimateMode>,
        record: &SetpointRecord,
        sensor_value: impl Fn(SetpointType) -> Option<f64>,
    ) -> (EffectiveSetpoints, bool) {
        let previous_mode = self.last_mode.get(zone).copied();
        let mode_changed = match (previous_mode, mode) {
            (Some(prev), Some(current)) => prev != current,
            _ => false,
        };
        if let Some(current) = mode {
            self.last_mode.insert(zone.clone(), current);
        }

        let ramp_in_duration = record.ramp_in_duration.unwrap_or(0).max(0);
        let mut out = EffectiveSetpoints::default();

        for setpoint_type in SetpointType::ALL {
            let Some(nominal) = record.value(setpoint_type) else {
                continue;
            };
            out.nominal.set(setpoint_type, Some(nominal));

            let key = (zone.clone(), setpoint_type);

            if mode_changed {
                let existing_target = self.ramps.get(&key).map(|s| s.target);
                if existing_target == Some(nominal) {
                    // Same target across the mode flip: keep the ramp, only
                    // pick up a changed duration.
                    if let Some(state) = self.ramps.get_mut(&key) {
                        state.duration_min = ramp_in_duration;
                    }
                } else {
                    let start = self
                        .ramps
                        .get(&key)
                        .map(|s| s.current_effective)
                        .or_else(|| sensor_value(setpoint_type))
                        .unwrap_or(nominal);
                    debug!(
                        "{zone}: {} ramp {start:.2} -> {nominal:.2} over {ramp_in_duration} min",
                        setpoint_type.as_str()
                    );
                    self.ramps.insert(
                        key.clone(),
                        RampState {
                            start_value: start,
                            target: nominal,
                            ramp_start_ms: now_ms,
                            duration_min: ramp_in_duration,
                            current_effective: start,
                        },
                    );
                }
            } else if let Some(state) = self.ramps.get_mut(&key) {
                if state.target != nominal {
                    // Target edited mid-flight: glide from where we are.
                    state.start_value = state.current_effective;
                    state.ramp_start_ms = now_ms;
                    state.duration_min = ramp_in_duration;
                    state.target = nominal;
                } else if state.duration_min != ramp_in_duration {
                    state.duration_min = ramp_in_duration;
                }
            } else {
                // Cold start: effective equals nominal immediately.
                self.ramps.insert(
                    key.clone(),
                    RampState {
                        start_value: nominal,
                        target: nominal,
                        ramp_start_ms: now_ms,
                        duration_min: ramp_in_duration,
                        current_effective: nominal,
                    },
                );
            }

            let state = self.ramps.get_mut(&key).expect("ramp state just ensured");
            let (effective, progress) = if state.duration_min > 0 && state.start_value != state.target {
                let elapsed_min = (now_ms - state.ramp_start_ms) as f64 / 60_000.0;
                let progress = (elapsed_min / state.duration_min as f64).clamp(0.0, 1.0);
                if progress >= 1.0 {
                    (state.target, None)
                } else {
                    (
                        state.start_value + (state.target - state.start_value) * progress,
                        Some(progress),
                    )
                }
            } else {
                (state.target, None)
            };
            state.current_effective = effective;

            out.effective.set(setpoint_type, Some(effective));
            out.ramp_progress.set(setpoint_type, progress);
        }

        (out, mode_changed)
    }

    /// Current effective value for a type, if tracked.
    pub fn current_effective(&self, zone: &Zone, setpoint_type: SetpointType) -> Option<f64> {
        self.ramps
            .get(&(zone.clone(), setpoint_type))
            .map(|s| s.current_effective)
    }
}

impl Default for SetpointEngine {
    fn default() -> Self {
        Self::new()
    }
}
