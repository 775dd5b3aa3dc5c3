//! Command and notification definitions
//!
//! Every exchange with the device is a fixed 8-byte frame. The first byte is
//! an opcode; the frame ends with an EOF marker and is filled with padding.
//!
//! Outbound commands travel in HID output reports. Inbound notifications
//! arrive on the interrupt IN endpoint.

use crate::types::Bbu;

/// Frame length in bytes
pub const FRAME_LEN: usize = 8;

/// Wire opcodes and markers
pub mod opcode {
    /// No command
    pub const NONE: u8 = 0xf0;
    /// Frame terminator
    pub const EOF: u8 = 0x0d;
    /// Acknowledgement
    pub const ACK: u8 = 0x21;
    /// Set display mode
    pub const MODE: u8 = 0x41;
    /// Counter pushed by the device
    pub const VALUE: u8 = 0x43;
    /// Read counter request / result
    pub const READ: u8 = 0x52;
    /// Write counter request
    pub const WRITE: u8 = 0x53;
    /// Filler byte
    pub const PADDING: u8 = 0xff;
}

/// Display mode value that keeps the animation running
pub const MODE_ANIMATION_ON: u8 = 0x00;

/// Display mode value that stops the animation
pub const MODE_ANIMATION_OFF: u8 = 0xff;

/// A raw 8-byte frame
pub type Frame = [u8; FRAME_LEN];

/// Commands sent to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Set the display mode
    Mode(u8),
    /// Ask the device to report its counter
    Read,
    /// Replace the device counter
    Write(Bbu),
}

impl Command {
    /// Mode command for the given animation state
    pub fn animation(enabled: bool) -> Self {
        if enabled {
            Command::Mode(MODE_ANIMATION_ON)
        } else {
            Command::Mode(MODE_ANIMATION_OFF)
        }
    }

    /// Opcode of this command
    pub fn opcode(&self) -> u8 {
        match self {
            Command::Mode(_) => opcode::MODE,
            Command::Read => opcode::READ,
            Command::Write(_) => opcode::WRITE,
        }
    }
}

/// Where a counter notification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterSource {
    /// Unsolicited update pushed by the device
    Push,
    /// Reply to a READ command
    ReadResult,
}

/// Notifications received from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// New counter value
    Counter {
        source: CounterSource,
        value: Bbu,
        /// False when the terminator byte was not the EOF marker
        terminated: bool,
    },
    /// The device acknowledged a command
    Ack {
        /// Opcode being acknowledged
        command: u8,
    },
    /// Opcode this driver does not understand
    Unknown(u8),
}

impl Notification {
    /// True for an acknowledgement of a WRITE command
    pub fn is_write_ack(&self) -> bool {
        matches!(self, Notification::Ack { command } if *command == opcode::WRITE)
    }
}
