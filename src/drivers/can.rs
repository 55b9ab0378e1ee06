//! SocketCAN reader for the sensor-node bus.
//!
//! Wraps the async CAN socket behind a small frame type so the decoder and
//! ingest pipeline compile (and test) without the hardware stack. A read
//! distinguishes three outcomes: a frame, a timeout (normal at 1 Hz bus
//! idle), and a hard error — with "the link went down" classified apart
//! from transient errors so the producer can escalate.

use std::time::Duration;

use log::{info, warn};

use crate::error::HardwareError;

#[cfg(feature = "hardware")]
use socketcan::{tokio::CanSocket, CanFrame, EmbeddedFrame, Frame};

/// Linux errno for "network is down".
#[cfg(feature = "hardware")]
const ENETDOWN: i32 = 100;

/// An owned copy of a received data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// 11-bit arbitration ID.
    pub id: u32,
    pub data: Vec<u8>,
}

pub struct CanReader {
    interface: String,
    simulation: bool,
    #[cfg(feature = "hardware")]
    socket: Option<CanSocket>,
}

impl CanReader {
    /// Open the named interface, verifying link state first.
    pub fn open(interface: &str, simulation: bool) -> Result<Self, HardwareError> {
        if simulation {
            info!("CAN reader running in simulation mode ({interface})");
            return Ok(Self {
                interface: interface.to_string(),
                simulation: true,
                #[cfg(feature = "hardware")]
                socket: None,
            });
        }

        #[cfg(feature = "hardware")]
        {
            check_link_state(interface)?;
            let socket = CanSocket::open(interface).map_err(|e| HardwareError::CanOpen {
                interface: interface.to_string(),
                reason: e.to_string(),
            })?;
            info!("connected to CAN bus {interface}");
            Ok(Self {
                interface: interface.to_string(),
                simulation: false,
                socket: Some(socket),
            })
        }

        #[cfg(not(feature = "hardware"))]
        {
            warn!("built without the hardware feature; CAN reader simulating {interface}");
            Ok(Self {
                interface: interface.to_string(),
                simulation: true,
            })
        }
    }

    /// Read one data frame.
    ///
    /// `Ok(None)` means the timeout elapsed or a non-data frame arrived.
    pub async fn read(&mut self, timeout: Duration) -> Result<Option<RawFrame>, HardwareError> {
        if self.simulation {
            tokio::time::sleep(timeout).await;
            return Ok(None);
        }

        #[cfg(feature = "hardware")]
        {
            let socket = self.socket.as_mut().ok_or(HardwareError::NotConnected)?;
            match tokio::time::timeout(timeout, socket.read_frame()).await {
                Err(_elapsed) => Ok(None),
                Ok(Ok(CanFrame::Data(frame))) => Ok(Some(RawFrame {
                    id: frame.raw_id() & 0x7ff,
                    data: frame.data().to_vec(),
                })),
                Ok(Ok(_)) => Ok(None),
                Ok(Err(e)) => {
                    if e.raw_os_error() == Some(ENETDOWN) {
                        Err(HardwareError::LinkDown(self.interface.clone()))
                    } else {
                        Err(HardwareError::CanRead(e.to_string()))
                    }
                }
            }
        }

        #[cfg(not(feature = "hardware"))]
        unreachable!("non-hardware builds always simulate")
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

/// Verify the interface exists and is administratively up.
///
/// Reads sysfs rather than shelling out; "unknown" is accepted because CAN
/// interfaces commonly report it when up.
#[cfg(feature = "hardware")]
fn check_link_state(interface: &str) -> Result<(), HardwareError> {
    let path = format!("/sys/class/net/{interface}/operstate");
    match std::fs::read_to_string(&path) {
        Ok(state) => {
            let state = state.trim();
            if state == "up" || state == "unknown" {
                Ok(())
            } else {
                Err(HardwareError::CanOpen {
                    interface: interface.to_string(),
                    reason: format!(
                        "interface is {state}; try: sudo ip link set {interface} up"
                    ),
                })
            }
        }
        Err(_) => Err(HardwareError::CanOpen {
            interface: interface.to_string(),
            reason: "interface does not exist".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulation_read_times_out() {
        let mut reader = CanReader::open("can0", true).unwrap();
        let got = reader.read(Duration::from_millis(5)).await.unwrap();
        assert!(got.is_none());
        assert_eq!(reader.interface(), "can0");
    }
}
