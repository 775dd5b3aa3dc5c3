//! Protocol library for rust-yurex
//!
//! This crate defines the 8-byte frame protocol spoken by the YUREX BBU
//! counter: the commands the host sends over HID output reports and the
//! notifications the device pushes on its interrupt endpoint.
//!
//! # Example
//!
//! ```
//! use protocol::{Bbu, Command, Notification, encode_command, decode_notification};
//!
//! // Ask the device to adopt a new counter value
//! let frame = encode_command(&Command::Write(Bbu::new(1234).unwrap()));
//!
//! // The device reports its counter using the same byte layout
//! let mut report = frame;
//! report[0] = protocol::opcode::VALUE;
//! match decode_notification(&report).unwrap() {
//!     Notification::Counter { value, .. } => assert_eq!(value.get(), 1234),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;

pub use codec::{check_terminator, decode_notification, encode_command};
pub use error::{ProtocolError, Result};
pub use messages::{
    Command, CounterSource, FRAME_LEN, Frame, MODE_ANIMATION_OFF, MODE_ANIMATION_ON,
    Notification, opcode,
};
pub use types::{BBU_BYTES, Bbu};
