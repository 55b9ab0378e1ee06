//! Modbus-RTU master over RS-485.
//!
//! Read-only: the soil probes only ever answer function 0x03 (read holding
//! registers). Framing is [slave, function, start, count] + CRC-16/MODBUS;
//! the response is read as a 3-byte header followed by `byte_count + 2`
//! bytes and CRC-verified before any register is surfaced.

use std::time::Duration;

use log::{error, info};

use crate::error::HardwareError;

#[cfg(feature = "hardware")]
use rppal::uart::{Parity, Queue, Uart};

const FUNCTION_READ_HOLDING: u8 = 0x03;
const CRC_POLY: u16 = 0xA001;

pub const DEFAULT_BAUD: u32 = 9600;

pub struct ModbusRtu {
    port: String,
    baud: u32,
    timeout: Duration,
    #[cfg(feature = "hardware")]
    uart: Option<Uart>,
}

impl ModbusRtu {
    pub fn new(port: &str, baud: u32, timeout: Duration) -> Self {
        Self {
            port: port.to_string(),
            baud,
            timeout,
            #[cfg(feature = "hardware")]
            uart: None,
        }
    }

    /// Open the serial port (8N1).
    pub fn connect(&mut self) -> Result<(), HardwareError> {
        #[cfg(feature = "hardware")]
        {
            let mut uart = Uart::with_path(&self.port, self.baud, Parity::None, 8, 1)
                .map_err(|e| HardwareError::Uart(format!("open {}: {e}", self.port)))?;
            uart.set_read_mode(0, self.timeout)
                .map_err(|e| HardwareError::Uart(format!("set read mode: {e}")))?;
            self.uart = Some(uart);
            info!("connected to {} at {} baud", self.port, self.baud);
            Ok(())
        }

        #[cfg(not(feature = "hardware"))]
        Err(HardwareError::Uart(format!(
            "built without the hardware feature; cannot open {}",
            self.port
        )))
    }

    pub fn disconnect(&mut self) {
        #[cfg(feature = "hardware")]
        {
            self.uart = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        #[cfg(feature = "hardware")]
        {
            self.uart.is_some()
        }
        #[cfg(not(feature = "hardware"))]
        false
    }

    /// Read `count` holding registers starting at `start` from `slave_id`.
    pub fn read_holding_registers(
        &mut self,
        slave_id: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, HardwareError> {
        #[cfg(feature = "hardware")]
        {
            let uart = self.uart.as_mut().ok_or(HardwareError::NotConnected)?;

            let mut request = Vec::with_capacity(8);
            request.push(slave_id);
            request.push(FUNCTION_READ_HOLDING);
            request.extend_from_slice(&start.to_be_bytes());
            request.extend_from_slice(&count.to_be_bytes());
            let crc = crc16(&request);
            request.extend_from_slice(&crc.to_le_bytes());

            // Drop any stale bytes left over from an interrupted exchange.
            uart.flush(Queue::Input)
                .map_err(|e| HardwareError::Uart(format!("flush: {e}")))?;
            uart.write(&request)
                .map_err(|e| HardwareError::Uart(format!("write: {e}")))?;
            uart.drain()
                .map_err(|e| HardwareError::Uart(format!("drain: {e}")))?;

            // Header: slave, function, byte count.
            let mut header = [0u8; 3];
            read_exact(uart, &mut header)?;

            if header[1] == FUNCTION_READ_HOLDING | 0x80 {
                // Exception frame: one code byte plus CRC follows.
                let mut rest = [0u8; 3];
                let _ = read_exact(uart, &mut rest);
                return Err(HardwareError::ModbusException {
                    slave: slave_id,
                    code: header[2],
                });
            }
            if header[0] != slave_id {
                return Err(HardwareError::SlaveMismatch {
                    asked: slave_id,
                    answered: header[0],
                });
            }

            let byte_count = header[2] as usize;
            let mut body = vec![0u8; byte_count + 2];
            read_exact(uart, &mut body)?;

            let mut full = header.to_vec();
            full.extend_from_slice(&body);
            let payload_len = full.len() - 2;
            let got = u16::from_le_bytes([full[payload_len], full[payload_len + 1]]);
            let want = crc16(&full[..payload_len]);
            if got != want {
                return Err(HardwareError::CrcMismatch { got, want });
            }

            let registers = body[..byte_count]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            Ok(registers)
        }

        #[cfg(not(feature = "hardware"))]
        {
            let _ = (slave_id, start, count);
            Err(HardwareError::NotConnected)
        }
    }
}

#[cfg(feature = "hardware")]
fn read_exact(uart: &mut Uart, buf: &mut [u8]) -> Result<(), HardwareError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = uart
            .read(&mut buf[filled..])
            .map_err(|e| HardwareError::Uart(format!("read: {e}")))?;
        if n == 0 {
            error!("Modbus response timed out at {filled} of {} bytes", buf.len());
            return Err(HardwareError::ShortResponse {
                got: filled,
                want: buf.len(),
            });
        }
        filled += n;
    }
    Ok(())
}

/// CRC-16/MODBUS: reflected, polynomial 0xA001, init 0xFFFF.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
