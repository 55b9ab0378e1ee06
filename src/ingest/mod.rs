//! Sensor ingest pipeline: long-running producers, one per inbound source,
//! each its own failure domain.
//!
//! Every producer fans out into the live cache (latest value, short TTL),
//! the bounded event log, and the measurement store, in that order; each
//! writes a short-TTL heartbeat so consumers can alarm on its absence. All
//! of them honour the shared shutdown signal and exit within one iteration.

pub mod can;
pub mod soil;
pub mod weather;

/// Uppercase hex dump with spaces, the event log's raw-frame format.
pub fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
