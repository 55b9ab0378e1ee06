//! Hardware drivers — the byte-level rim of the system.
//!
//! Every driver carries a simulation mode (in-memory state, no bus traffic)
//! so the daemon starts on a bench machine and the full test suite runs on
//! any host. On real hardware the I2C devices behind one physical bus share
//! a single mutex at the call sites; the drivers themselves stay dumb.

pub mod can;
pub mod gp8403;
pub mod mcp23017;
pub mod modbus;
