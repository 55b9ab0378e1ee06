//! MCP23017 16-channel I/O expander driver (relay board).
//!
//! Both 8-bit ports are configured as outputs at init and driven low, so
//! every relay starts released. Channel writes are read-modify-write of the
//! owning port byte. Operations report success as `bool`; the relay manager
//! above decides what a failure means.

use log::{debug, error, info, warn};

#[cfg(feature = "hardware")]
use rppal::i2c::I2c;

const IODIRA: u8 = 0x00;
const IODIRB: u8 = 0x01;
const GPIOA: u8 = 0x12;
const GPIOB: u8 = 0x13;

pub struct Mcp23017 {
    address: u16,
    simulation: bool,
    #[cfg(feature = "hardware")]
    bus: Option<I2c>,
    /// Tracked channel states, authoritative in simulation mode.
    states: [bool; 16],
}

impl Mcp23017 {
    /// Open the expander on `i2c_bus` at `address`.
    ///
    /// Hardware init failure falls back to simulation mode rather than
    /// refusing to start: a bench machine without the relay board still
    /// runs the full control stack.
    pub fn new(i2c_bus: u8, address: u16, simulation: bool) -> Self {
        let mut driver = Self {
            address,
            simulation,
            #[cfg(feature = "hardware")]
            bus: None,
            states: [false; 16],
        };

        #[cfg(feature = "hardware")]
        if !simulation {
            match Self::open_bus(i2c_bus, address) {
                Ok(bus) => {
                    driver.bus = Some(bus);
                    if driver.init_hardware() {
                        info!(
                            "MCP23017 initialised on I2C bus {i2c_bus}, address {address:#04x}"
                        );
                    } else {
                        warn!("MCP23017 init failed, falling back to simulation mode");
                        driver.bus = None;
                        driver.simulation = true;
                    }
                }
                Err(e) => {
                    error!("MCP23017 open failed: {e}");
                    warn!("falling back to simulation mode");
                    driver.simulation = true;
                }
            }
        }

        #[cfg(not(feature = "hardware"))]
        {
            let _ = i2c_bus;
            driver.simulation = true;
        }

        if driver.simulation {
            info!("MCP23017 running in simulation mode (address {address:#04x})");
        }
        driver
    }

    #[cfg(feature = "hardware")]
    fn open_bus(i2c_bus: u8, address: u16) -> Result<I2c, rppal::i2c::Error> {
        let mut bus = I2c::with_bus(i2c_bus)?;
        bus.set_slave_address(address)?;
        Ok(bus)
    }

    /// Configure both ports as outputs and drive everything low.
    #[cfg(feature = "hardware")]
    fn init_hardware(&mut self) -> bool {
        let Some(bus) = self.bus.as_mut() else {
            return false;
        };
        for (reg, value) in [(IODIRA, 0x00), (IODIRB, 0x00), (GPIOA, 0x00), (GPIOB, 0x00)] {
            if let Err(e) = bus.smbus_write_byte(reg, value) {
                error!("MCP23017 register {reg:#04x} write failed: {e}");
                return false;
            }
        }
        true
    }

    /// Set one relay channel. Returns `true` on success.
    pub fn set_channel(&mut self, channel: u8, on: bool) -> bool {
        if channel > 15 {
            error!("invalid channel {channel} (must be 0-15)");
            return false;
        }

        if self.simulation {
            self.states[channel as usize] = on;
            debug!("simulation: channel {channel} -> {}", on_off(on));
            return true;
        }

        #[cfg(feature = "hardware")]
        {
            let (port, bit) = port_bit(channel);
            let Some(bus) = self.bus.as_mut() else {
                return false;
            };
            let current = match bus.smbus_read_byte(port) {
                Ok(v) => v,
                Err(e) => {
                    error!("MCP23017 read port {port:#04x} failed: {e}");
                    return false;
                }
            };
            let next = if on {
                current | (1 << bit)
            } else {
                current & !(1 << bit)
            };
            if let Err(e) = bus.smbus_write_byte(port, next) {
                error!("MCP23017 write port {port:#04x} failed: {e}");
                return false;
            }
            self.states[channel as usize] = on;
            debug!("channel {channel} -> {}", on_off(on));
            true
        }

        #[cfg(not(feature = "hardware"))]
        unreachable!("non-hardware builds always simulate")
    }

    /// Current state of one channel (tracked state on read failure).
    pub fn get_channel(&mut self, channel: u8) -> Option<bool> {
        if channel > 15 {
            error!("invalid channel {channel} (must be 0-15)");
            return None;
        }

        if self.simulation {
            return Some(self.states[channel as usize]);
        }

        #[cfg(feature = "hardware")]
        {
            let (port, bit) = port_bit(channel);
            let bus = self.bus.as_mut()?;
            match bus.smbus_read_byte(port) {
                Ok(v) => {
                    let on = v & (1 << bit) != 0;
                    self.states[channel as usize] = on;
                    Some(on)
                }
                Err(e) => {
                    error!("MCP23017 read port {port:#04x} failed: {e}");
                    Some(self.states[channel as usize])
                }
            }
        }

        #[cfg(not(feature = "hardware"))]
        unreachable!("non-hardware builds always simulate")
    }

    /// Drive all sixteen channels from a bitmask (bit 0 = channel 0).
    pub fn set_all(&mut self, mask: u16) -> bool {
        let mut ok = true;
        for channel in 0..16u8 {
            if !self.set_channel(channel, mask & (1 << channel) != 0) {
                ok = false;
            }
        }
        ok
    }

    /// Release every relay.
    pub fn all_off(&mut self) -> bool {
        self.set_all(0)
    }

    /// Snapshot of all tracked channel states.
    pub fn states(&self) -> [bool; 16] {
        self.states
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn is_simulation(&self) -> bool {
        self.simulation
    }
}

fn port_bit(channel: u8) -> (u8, u8) {
    if channel < 8 {
        (GPIOA, channel)
    } else {
        (GPIOB, channel - 8)
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_tracks_states() {
        let mut mcp = Mcp23017::new(1, 0x20, true);
        assert!(mcp.set_channel(0, true));
        assert!(mcp.set_channel(9, true));
        assert_eq!(mcp.get_channel(0), Some(true));
        assert_eq!(mcp.get_channel(9), Some(true));
        assert_eq!(mcp.get_channel(5), Some(false));
    }

    #[test]
    fn rejects_out_of_range_channel() {
        let mut mcp = Mcp23017::new(1, 0x20, true);
        assert!(!mcp.set_channel(16, true));
        assert!(mcp.get_channel(16).is_none());
    }

    #[test]
    fn mask_and_all_off() {
        let mut mcp = Mcp23017::new(1, 0x20, true);
        assert!(mcp.set_all(0b1000_0000_0000_0001));
        assert_eq!(mcp.get_channel(0), Some(true));
        assert_eq!(mcp.get_channel(15), Some(true));
        assert_eq!(mcp.get_channel(7), Some(false));
        assert!(mcp.all_off());
        assert_eq!(mcp.states(), [false; 16]);
    }

    #[test]
    fn port_split() {
        assert_eq!(port_bit(3), (GPIOA, 3));
        assert_eq!(port_bit(8), (GPIOB, 0));
        assert_eq!(port_bit(15), (GPIOB, 7));
    }
}
