//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The other side of the USB bridge is gone
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a USB transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The device is gone
    #[error("device disconnected")]
    Disconnected,

    /// The transfer did not complete in time
    #[error("transfer timed out")]
    Timeout,

    /// The endpoint stalled
    #[error("endpoint stalled")]
    Stall,

    /// A transfer is already queued on the endpoint
    #[error("transfer already in flight on endpoint {endpoint:#04x}")]
    Busy { endpoint: u8 },

    /// The pipe was cancelled and accepts no more transfers
    #[error("transfer cancelled")]
    Cancelled,

    /// The device has no usable configuration
    #[error("device not configured")]
    NotConfigured,

    /// Any other USB failure
    #[error("USB failure: {0}")]
    Usb(String),
}
