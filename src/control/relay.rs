//! Relay manager: device → channel mapping, current states, interlock
//! enforcement, and the hardware write path.
//!
//! Commit order on a successful set: hardware first, then the in-memory
//! map. Persisting to the store and reflecting into the live cache is the
//! engine's job — failures roll back nothing (best-effort, the hardware is
//! the source of truth).

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::control::interlock::InterlockManager;
use crate::drivers::mcp23017::Mcp23017;
use crate::zone::Zone;

/// Per-device control mode. Manual is sticky until an operator releases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Auto,
    Manual,
    Scheduled,
}

impl ControlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "manual" => Some(Self::Manual),
            "scheduled" => Some(Self::Scheduled),
            _ => None,
        }
    }
}

pub type DeviceKey = (Zone, String);

pub struct RelayManager {
    mcp: Arc<Mutex<Mcp23017>>,
    channels: HashMap<DeviceKey, u8>,
    active_high: HashMap<DeviceKey, bool>,
    safe_states: HashMap<DeviceKey, u8>,
    interlocks: InterlockManager,
    states: HashMap<DeviceKey, u8>,
    modes: HashMap<DeviceKey, ControlMode>,
}

impl RelayManager {
    pub fn new(config: &Config, mcp: Arc<Mutex<Mcp23017>>, interlocks: InterlockManager) -> Self {
        let mut channels = HashMap::new();
        let mut active_high = HashMap::new();
        let mut safe_states = HashMap::new();
        for (zone, name, device) in config.iter_devices() {
            let key = (zone, name.clone());
            channels.insert(key.clone(), device.channel);
            active_high.insert(key.clone(), device.active_high);
            safe_states.insert(key, device.safe_state);
        }
        Self {
            mcp,
            channels,
            active_high,
            safe_states,
            interlocks,
            states: HashMap::new(),
            modes: HashMap::new(),
        }
    }

    pub fn channel(&self, zone: &Zone, device: &str) -> Option<u8> {
        self.channels
            .get(&(zone.clone(), device.to_string()))
            .copied()
    }

    pub fn device_state(&self, zone: &Zone, device: &str) -> Option<u8> {
        self.states
            .get(&(zone.clone(), device.to_string()))
            .copied()
    }

    pub fn device_mode(&self, zone: &Zone, device: &str) -> Option<ControlMode> {
        self.modes
            .get(&(zone.clone(), device.to_string()))
            .copied()
    }

    pub fn all_states(&self) -> &HashMap<DeviceKey, u8> {
        &self.states
    }

    /// Set a device's relay. Returns `(committed, refusal reason)`.
    ///
    /// Interlocks are only evaluated on the OFF→ON edge and may be skipped
    /// for restoration paths where the world already is what it is.
    pub fn set_device_state(
        &mut self,
        zone: &Zone,
        device: &str,
        state: u8,
        mode: ControlMode,
        check_interlock: bool,
    ) -> (bool, Option<String>) {
        self.set_device_state_with_load(zone, device, state, mode, check_interlock, None)
    }

    /// Like [`Self::set_device_state`], with a requested load for the
    /// global interlock check (dimmable devices).
    pub fn set_device_state_with_load(
        &mut self,
        zone: &Zone,
        device: &str,
        state: u8,
        mode: ControlMode,
        check_interlock: bool,
        requested_load: Option<f64>,
    ) -> (bool, Option<String>) {
        let key = (zone.clone(), device.to_string());
        let Some(&channel) = self.channels.get(&key) else {
            return (false, Some(format!("Device not found: {zone}/{device}")));
        };

        if state == 1 && check_interlock {
            if let Err(reason) = self.interlocks.check(zone, device, &self.states, requested_load)
            {
                return (false, Some(reason));
            }
        }

        let level = if self.active_high.get(&key).copied().unwrap_or(true) {
            state == 1
        } else {
            state != 1
        };

        let ok = self.mcp.lock().set_channel(channel, level);
        if ok {
            self.states.insert(key.clone(), state);
            self.modes.insert(key, mode);
            info!(
                "device {zone}/{device} (channel {channel}) set to {}",
                if state == 1 { "ON" } else { "OFF" }
            );
            (true, None)
        } else {
            (false, Some("Hardware error".to_string()))
        }
    }

    /// Force a device's control mode without touching the relay.
    pub fn set_device_mode(&mut self, zone: &Zone, device: &str, mode: ControlMode) {
        self.modes.insert((zone.clone(), device.to_string()), mode);
    }

    /// Restore persisted states at startup, skipping interlock checks.
    pub fn restore_states(&mut self, rows: Vec<(Zone, String, u8, ControlMode)>) {
        for (zone, device, state, mode) in rows {
            let (ok, reason) = self.set_device_state(&zone, &device, state, mode, false);
            if !ok {
                warn!(
                    "failed to restore state for {zone}/{device}: {}",
                    reason.unwrap_or_default()
                );
            }
        }
    }

    /// Drive every known device to its configured safe state.
    pub fn all_safe(&mut self) {
        let keys: Vec<DeviceKey> = self.channels.keys().cloned().collect();
        for (zone, device) in keys {
            let safe = self
                .safe_states
                .get(&(zone.clone(), device.clone()))
                .copied()
                .unwrap_or(0);
            let (ok, reason) =
                self.set_device_state(&zone, &device, safe, ControlMode::Auto, false);
            if !ok {
                warn!(
                    "failed to drive {zone}/{device} to safe state: {}",
                    reason.unwrap_or_default()
                );
            }
        }
    }
}
