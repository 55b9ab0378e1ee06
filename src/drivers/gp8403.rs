//! GP8403 dual-channel 0-10 V DAC driver (DFR0971 board) and the manager
//! that multiplexes several boards for light dimming.
//!
//! The chip has no readback: `get_voltage`/`get_intensity` return the last
//! commanded value. The 10 V output range may not survive a power cycle, so
//! it is re-asserted before every voltage write. EEPROM persistence is only
//! used for the conservative safety level written at configuration time —
//! schedule ramps write volatile values every tick.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

#[cfg(feature = "hardware")]
use rppal::i2c::I2c;

/// Output range register.
const REG_RANGE: u8 = 0x01;
/// Voltage registers for channels 0 and 1.
const REG_VOLTAGE_CH0: u8 = 0x02;
const REG_VOLTAGE_CH1: u8 = 0x04;
/// Store-to-EEPROM command byte.
const CMD_STORE: u8 = 0x03;

/// 10 V range word. The datasheet value is 0x11, not 0x01.
const RANGE_10V: u16 = 0x11;

/// Full-scale in the wire encoding's millivolt units.
const RANGE_MILLIVOLTS: f64 = 10_000.0;

pub const DEFAULT_ADDRESS: u16 = 0x58;

/// Settle delay after a voltage write.
const SETTLE: Duration = Duration::from_millis(50);
/// Delay after the range word write.
const RANGE_SETTLE: Duration = Duration::from_millis(20);

/// One DFR0971 board: a single I2C address, two output channels.
pub struct DacBoard {
    pub board_id: u8,
    address: u16,
    simulation: bool,
    #[cfg(feature = "hardware")]
    bus: Option<I2c>,
    /// Last commanded voltages (the chip has no readback).
    voltages: [f64; 2],
    range_set: bool,
}

impl DacBoard {
    pub fn new(i2c_bus: u8, address: u16, board_id: u8, simulation: bool) -> Self {
        let mut board = Self {
            board_id,
            address,
            simulation,
            #[cfg(feature = "hardware")]
            bus: None,
            voltages: [0.0, 0.0],
            range_set: false,
        };

        #[cfg(feature = "hardware")]
        if !simulation {
            match Self::open_bus(i2c_bus, address) {
                Ok(bus) => {
                    board.bus = Some(bus);
                    if board.write_range() {
                        info!(
                            "DAC board {board_id} initialised on I2C bus {i2c_bus}, \
                             address {address:#04x}"
                        );
                    } else {
                        warn!("DAC board {board_id} init failed, falling back to simulation");
                        board.bus = None;
                        board.simulation = true;
                    }
                }
                Err(e) => {
                    error!("DAC board {board_id} open failed: {e}");
                    warn!("falling back to simulation mode");
                    board.simulation = true;
                }
            }
        }

        #[cfg(not(feature = "hardware"))]
        {
            let _ = i2c_bus;
            board.simulation = true;
        }

        if board.simulation {
            info!("DAC board {board_id} running in simulation mode (address {address:#04x})");
        }
        board
    }

    #[cfg(feature = "hardware")]
    fn open_bus(i2c_bus: u8, address: u16) -> Result<I2c, rppal::i2c::Error> {
        let mut bus = I2c::with_bus(i2c_bus)?;
        bus.set_slave_address(address)?;
        Ok(bus)
    }

    /// Write the 10 V range word (little-endian, as an SMBus word write).
    fn write_range(&mut self) -> bool {
        if self.simulation {
            self.range_set = true;
            return true;
        }

        #[cfg(feature = "hardware")]
        {
            let Some(bus) = self.bus.as_mut() else {
                return false;
            };
            match bus.smbus_write_word(REG_RANGE, RANGE_10V) {
                Ok(()) => {
                    thread::sleep(RANGE_SETTLE);
                    self.range_set = true;
                    true
                }
                Err(e) => {
                    error!("DAC board {}: range write failed: {e}", self.board_id);
                    false
                }
            }
        }

        #[cfg(not(feature = "hardware"))]
        unreachable!("non-hardware builds always simulate")
    }

    /// Set an output voltage (clamped to 0-10 V). Returns success.
    pub fn set_voltage(&mut self, channel: u8, volts: f64, persist_to_eeprom: bool) -> bool {
        if channel > 1 {
            error!("invalid DAC channel {channel} (must be 0 or 1)");
            return false;
        }
        let volts = volts.clamp(0.0, 10.0);

        if self.simulation {
            self.voltages[channel as usize] = volts;
            debug!(
                "simulation: board {} channel {channel} -> {volts:.2}V",
                self.board_id
            );
            return true;
        }

        #[cfg(feature = "hardware")]
        {
            // Range may not persist across power events; re-assert each write.
            if !self.write_range() {
                return false;
            }

            let wire = wire_value(volts);
            let reg = if channel == 0 {
                REG_VOLTAGE_CH0
            } else {
                REG_VOLTAGE_CH1
            };
            let Some(bus) = self.bus.as_mut() else {
                return false;
            };
            if let Err(e) = bus.smbus_write_word(reg, wire) {
                error!(
                    "DAC board {}: voltage write channel {channel} failed: {e}",
                    self.board_id
                );
                return false;
            }
            thread::sleep(SETTLE);
            self.voltages[channel as usize] = volts;
            info!(
                "DAC board {} channel {channel} -> {volts:.2}V ({:.1}%, wire {wire:#06x})",
                self.board_id,
                volts / 10.0 * 100.0
            );

            if persist_to_eeprom && !self.store_settings() {
                warn!("DAC board {}: EEPROM store failed", self.board_id);
            }
            true
        }

        #[cfg(not(feature = "hardware"))]
        unreachable!("non-hardware builds always simulate")
    }

    /// Set a dimming intensity in percent (0-100 maps to 0-10 V).
    pub fn set_intensity(&mut self, channel: u8, percent: f64, persist_to_eeprom: bool) -> bool {
        self.set_voltage(channel, percent / 100.0 * 10.0, persist_to_eeprom)
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    /// Last commanded voltage for a channel.
    pub fn get_voltage(&self, channel: u8) -> Option<f64> {
        if channel > 1 {
            return None;
        }
        Some(self.voltages[channel as usize])
    }

    /// Last commanded intensity (%) for a channel.
    pub fn get_intensity(&self, channel: u8) -> Option<f64> {
        self.get_voltage(channel).map(|v| v / 10.0 * 100.0)
    }

    /// Persist the current outputs to the chip's EEPROM.
    pub fn store_settings(&mut self) -> bool {
        if self.simulation {
            debug!("simulation: board {} settings stored", self.board_id);
            return true;
        }

        #[cfg(feature = "hardware")]
        {
            let Some(bus) = self.bus.as_mut() else {
                return false;
            };
            match bus.smbus_send_byte(CMD_STORE) {
                Ok(()) => {
                    debug!("DAC board {}: settings stored to EEPROM", self.board_id);
                    true
                }
                Err(e) => {
                    error!("DAC board {}: EEPROM store failed: {e}", self.board_id);
                    false
                }
            }
        }

        #[cfg(not(feature = "hardware"))]
        unreachable!("non-hardware builds always simulate")
    }
}

/// Convert volts to the 16-bit wire encoding.
///
/// data = round(volts * 1000) clamped to 0-10000; dac12 = round(data /
/// 10000 * 4095) clamped to 12 bits; the wire value is dac12 left-shifted
/// four bits for register alignment.
fn wire_value(volts: f64) -> u16 {
    let data = (volts * 1000.0).round().clamp(0.0, RANGE_MILLIVOLTS);
    let dac12 = (data / RANGE_MILLIVOLTS * 4095.0).round().clamp(0.0, 4095.0) as u16;
    dac12 << 4
}

/// Multiplexes several DAC boards keyed by caller-assigned board id.
pub struct DacManager {
    i2c_bus: u8,
    simulation: bool,
    boards: HashMap<u8, DacBoard>,
}

impl DacManager {
    pub fn new(i2c_bus: u8, simulation: bool) -> Self {
        Self {
            i2c_bus,
            simulation,
            boards: HashMap::new(),
        }
    }

    /// Register a board. Returns `false` if the id is already taken.
    pub fn add_board(&mut self, board_id: u8, address: u16) -> bool {
        if self.boards.contains_key(&board_id) {
            error!("DAC board id {board_id} already registered");
            return false;
        }
        let board = DacBoard::new(self.i2c_bus, address, board_id, self.simulation);
        self.boards.insert(board_id, board);
        true
    }

    pub fn set_intensity(
        &mut self,
        board_id: u8,
        channel: u8,
        percent: f64,
        persist_to_eeprom: bool,
    ) -> bool {
        match self.boards.get_mut(&board_id) {
            Some(board) => board.set_intensity(channel, percent, persist_to_eeprom),
            None => {
                error!("unknown DAC board {board_id}");
                false
            }
        }
    }

    pub fn set_voltage(&mut self, board_id: u8, channel: u8, volts: f64, persist: bool) -> bool {
        match self.boards.get_mut(&board_id) {
            Some(board) => board.set_voltage(channel, volts, persist),
            None => {
                error!("unknown DAC board {board_id}");
                false
            }
        }
    }

    /// Set and persist the power-on safety intensity for a channel.
    pub fn set_safety_level(&mut self, board_id: u8, channel: u8, percent: f64) -> bool {
        let ok = self.set_intensity(board_id, channel, percent, true);
        if ok {
            info!("safety level {percent:.1}% stored for board {board_id} channel {channel}");
        }
        ok
    }

    pub fn get_intensity(&self, board_id: u8, channel: u8) -> Option<f64> {
        self.boards.get(&board_id)?.get_intensity(channel)
    }

    pub fn get_voltage(&self, board_id: u8, channel: u8) -> Option<f64> {
        self.boards.get(&board_id)?.get_voltage(channel)
    }

    pub fn board_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.boards.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_encoding() {
        assert_eq!(wire_value(0.0), 0);
        // 10 V is full scale: 4095 << 4.
        assert_eq!(wire_value(10.0), 4095 << 4);
        // 5 V lands on half scale, rounded.
        let half = wire_value(5.0) >> 4;
        assert!((2047..=2048).contains(&half), "half = {half}");
        // Out-of-range input clamps.
        assert_eq!(wire_value(12.0), 4095 << 4);
        assert_eq!(wire_value(-1.0), 0);
    }

    #[test]
    fn intensity_round_trip_via_cache() {
        let mut board = DacBoard::new(1, DEFAULT_ADDRESS, 1, true);
        assert!(board.set_intensity(0, 75.0, false));
        let got = board.get_intensity(0).unwrap();
        assert!((got - 75.0).abs() < 1e-9);
        assert!((board.get_voltage(0).unwrap() - 7.5).abs() < 1e-9);
        // The other channel is untouched.
        assert_eq!(board.get_voltage(1), Some(0.0));
    }

    #[test]
    fn manager_routes_by_board_id() {
        let mut manager = DacManager::new(1, true);
        assert!(manager.add_board(1, DEFAULT_ADDRESS));
        assert!(manager.add_board(2, 0x59));
        assert!(!manager.add_board(1, 0x5a));
        assert!(manager.set_intensity(2, 1, 40.0, false));
        assert_eq!(manager.get_intensity(2, 1), Some(40.0));
        assert_eq!(manager.get_intensity(1, 1), Some(0.0));
        assert!(!manager.set_intensity(9, 0, 10.0, false));
    }

    #[test]
    fn invalid_channel_rejected() {
        let mut board = DacBoard::new(1, DEFAULT_ADDRESS, 1, true);
        assert!(!board.set_voltage(2, 5.0, false));
        assert!(board.get_voltage(2).is_none());
    }
}
