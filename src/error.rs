//! # Error Types
//!
//! Error handling for the telescope control protocol.
//!
//! Every failure in this crate is scoped to a single message: none of these
//! variants closes a connection or stops the server on its own. The router maps
//! each category onto the acknowledgement (or silence) the protocol prescribes.
//!
//! ## Error Categories
//! - **Framing**: declared payload length disagrees with the bytes supplied
//! - **Schema**: fixed-size payload has the wrong size or impossible values
//! - **Silent drop**: malformed text payload, answered with nothing at all
//! - **Authorization**: controlled command from a session without control
//! - **Backend**: a capability is unbound or reported failure
//! - **Configuration / I/O**: startup-time problems
//!
//! ## Example Usage
//! ```rust
//! use telescope_control::core::packet::Packet;
//! use telescope_control::error::ProtocolError;
//!
//! let frame = Packet::encode(0x0001, 7, &[]);
//! match Packet::decode(&frame[..frame.len() - 1]) {
//!     Err(ProtocolError::MalformedFrame { .. }) | Err(ProtocolError::InvalidHeader) => {}
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

use crate::driver::Capability;

/// Static error messages, borrowed instead of allocated on error paths.
pub mod constants {
    /// Authority-related error messages
    pub const ERR_AUTHORITY_LOCK: &str = "Failed to acquire session authority lock";
    pub const ERR_UNKNOWN_SESSION: &str = "No session registered for connection";

    /// Registry errors
    pub const ERR_REGISTRY_LOCK: &str = "Failed to acquire connection registry lock";
    pub const ERR_CONNECTION_GONE: &str = "Connection writer queue closed";
    pub const ERR_WRITER_BACKLOG: &str = "Connection writer queue full, frame dropped for";

    /// Payload validation errors
    pub const ERR_TEXT_LENGTH: &str = "Declared text length does not match payload";
    pub const ERR_TEXT_NUL: &str = "Text payload contains an embedded NUL";
    pub const ERR_TEXT_UTF8: &str = "Text payload is not valid UTF-8";
    pub const ERR_NICKNAME_TOO_LONG: &str = "Nickname exceeds maximum length";
    pub const ERR_NICKNAME_CONTROL: &str = "Nickname contains a control character";
    pub const ERR_MESSAGE_TOO_LONG: &str = "Attributed message exceeds text length limit";
    pub const ERR_EMPTY_HORIZON: &str = "Horizon profile contains no points";

    /// Synchronization
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

/// Primary error type for all protocol operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Header is shorter than the fixed header size.
    #[error("Invalid protocol header")]
    InvalidHeader,

    /// Declared payload length disagrees with the bytes actually supplied.
    #[error("Malformed frame: header declares {declared} payload bytes, {actual} supplied")]
    MalformedFrame { declared: usize, actual: usize },

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    /// Fixed-size payload with the wrong size, or structurally impossible values.
    #[error("Invalid payload for service {service:#06x}: {reason}")]
    InvalidPayload { service: u16, reason: String },

    /// Text payload that fails validation. Never answered.
    #[error("Malformed text payload: {0}")]
    MalformedText(&'static str),

    #[error("Service {0:#06x} requires control of the telescope")]
    NoPrivilege(u16),

    #[error("Service {0:#06x} not understood")]
    UnknownService(u16),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Capability {name} cannot be bound to a {bound} callable")]
    CapabilityMismatch { name: String, bound: Capability },

    #[error("Unknown capability name: {0}")]
    UnknownCapability(String),

    #[error("Invalid horizon profile line {line}: {reason}")]
    HorizonParse { line: usize, reason: String },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Result of invoking a capability through the driver table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// No backend module bound this capability.
    #[error("Capability {0} is unavailable")]
    Unavailable(Capability),

    /// The backend ran and reported a non-zero status.
    #[error("Capability {capability} failed with code {code}")]
    Failed { capability: Capability, code: i32 },
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
