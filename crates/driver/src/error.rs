//! Driver error types

use common::TransportError;
use protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the driver hooks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// No room for another session or handle
    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    /// Name resolution miss, or no usable device
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// USB transfer failure
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Unexpected frame layout
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] ProtocolError),

    /// Operation on a detached session or closed handle
    #[error("invalid state: {0}")]
    StateInvalid(&'static str),
}

/// Type alias for driver results
pub type Result<T> = std::result::Result<T, DriverError>;
