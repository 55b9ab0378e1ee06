//! Canopy — controlled-environment agriculture edge controller.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Inbound I/O                           │
//! │   CAN bus        RS-485 soil probes        METAR HTTP        │
//! │     │                   │                      │             │
//! │     ▼                   ▼                      ▼             │
//! │  ingest::can       ingest::soil         ingest::weather      │
//! │     │   decode + psychrometrics + CO2 filter  │              │
//! │     └──────┬───────────┬──────────────────────┘              │
//! │            ▼           ▼                                     │
//! │      LiveCache      Store (sled)                             │
//! │      + event log    measurements / config / audit            │
//! │            │           │                                     │
//! │            ▼           ▼                                     │
//! │      ControlEngine (1 Hz): mode → setpoint ramps →           │
//! │      rules → schedules → PID/PWM → VPD, under interlocks     │
//! │      and the alarm/failsafe latch                            │
//! │            │                                                 │
//! │            ▼                                                 │
//! │      RelayManager → MCP23017 relays, GP8403 dimmers          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The HTTP surface consumes [`api::ApiService`]; everything else is
//! internal plumbing for the daemon binary.

pub mod api;
pub mod cache;
pub mod config;
pub mod control;
pub mod decode;
pub mod drivers;
pub mod error;
pub mod ingest;
pub mod psychro;
pub mod store;
pub mod tasks;
pub mod zone;

pub use error::{Error, Result};
