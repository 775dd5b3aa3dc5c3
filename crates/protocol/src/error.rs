//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame shorter than the notification it announces
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Terminator byte is not the EOF marker
    #[error("Malformed frame: terminator {found:#04x} (expected {expected:#04x})")]
    MalformedFrame { found: u8, expected: u8 },

    /// Counter value wider than 40 bits
    #[error("Counter value {value} exceeds 40 bits")]
    CounterOverflow { value: u64 },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
