//! Unified error types for the Canopy daemon.
//!
//! One enum per subsystem, all funnelling into [`Error`] so the control
//! loop's error handling stays uniform. Policy lives with the callers:
//! transient I/O retries next cycle, bad data is discarded without reaching
//! any sink, and nothing here is allowed to kill the control loop task.

use thiserror::Error;

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Every fallible operation in the daemon funnels into this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("hardware: {0}")]
    Hardware(#[from] HardwareError),

    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("api: {0}")]
    Api(#[from] ApiError),
}

// ---------------------------------------------------------------------------
// Hardware (I2C, UART, CAN)
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HardwareError {
    /// Serial port open/read/write failed.
    #[error("UART: {0}")]
    Uart(String),

    /// CAN socket could not be opened.
    #[error("CAN open on '{interface}': {reason}")]
    CanOpen { interface: String, reason: String },

    /// The CAN link itself went down (distinct from a read timeout).
    #[error("CAN link '{0}' is down")]
    LinkDown(String),

    /// Transient CAN read error.
    #[error("CAN read: {0}")]
    CanRead(String),

    /// Modbus response CRC did not match.
    #[error("Modbus CRC mismatch (got {got:#06x}, want {want:#06x})")]
    CrcMismatch { got: u16, want: u16 },

    /// Slave returned an exception response (function | 0x80).
    #[error("Modbus exception {code:#04x} from slave {slave}")]
    ModbusException { slave: u8, code: u8 },

    /// Response shorter than the header promised.
    #[error("Modbus short response ({got} of {want} bytes)")]
    ShortResponse { got: usize, want: usize },

    /// Response came back from the wrong slave.
    #[error("Modbus slave mismatch (asked {asked}, answered {answered})")]
    SlaveMismatch { asked: u8, answered: u8 },

    /// Operation attempted without an open connection.
    #[error("not connected")]
    NotConnected,
}

// ---------------------------------------------------------------------------
// Frame decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload too short for the message type.
    #[error("payload too short for {kind}: {got} bytes")]
    ShortPayload { kind: &'static str, got: usize },

    /// CAN ID does not map to any known message type.
    #[error("unknown message type in CAN ID {0:#05x}")]
    UnknownMessageType(u32),
}

// ---------------------------------------------------------------------------
// Persistent store
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sled(#[from] sled::Error),

    #[error("encode: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt record in {tree}: {reason}")]
    Corrupt { tree: &'static str, reason: String },

    #[error("not found: {0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A config field failed range or consistency validation.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// Two devices on the same expander board claim one channel.
    #[error("channel {channel} already assigned to {existing}")]
    ChannelCollision { channel: u8, existing: String },
}

// ---------------------------------------------------------------------------
// Operator surface
// ---------------------------------------------------------------------------

/// Structured rejections returned to the (out-of-scope) HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A value failed validation against safety or PID limits.
    #[error("validation: {0}")]
    Validation(String),

    /// Write arrived faster than the per-field rate limit allows.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Failsafe cannot be cleared while critical alarms are active.
    #[error("critical alarms still active in {0}")]
    CriticalAlarmsActive(String),

    #[error("store: {0}")]
    Store(#[from] StoreError),
}
