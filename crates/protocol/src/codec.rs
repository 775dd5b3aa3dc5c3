//! Frame encoding and decoding
//!
//! # Frame Layouts
//!
//! ```text
//! MODE   [0x41][mode][EOF ][0xff][0xff][0xff][0xff][0xff]
//! READ   [0x52][EOF ][0xff][0xff][0xff][0xff][0xff][0xff]
//! WRITE  [0x53][b39..b32][b31..b24][b23..b16][b15..b8][b7..b0][EOF][0xff]
//! VALUE  [0x43][b39..b32][b31..b24][b23..b16][b15..b8][b7..b0][EOF][ .. ]
//! READ   [0x52][b39..b32][b31..b24][b23..b16][b15..b8][b7..b0][EOF][ .. ]
//! ACK    [0x21][acked opcode][ .. ]
//! ```

use crate::error::{ProtocolError, Result};
use crate::messages::{Command, CounterSource, FRAME_LEN, Frame, Notification, opcode};
use crate::types::{BBU_BYTES, Bbu};

/// Offset of the terminator in a counter frame
const COUNTER_EOF_OFFSET: usize = 1 + BBU_BYTES;

/// Encode a command into an 8-byte frame
///
/// # Example
/// ```
/// use protocol::{Command, encode_command, opcode};
///
/// let frame = encode_command(&Command::Read);
/// assert_eq!(frame[0], opcode::READ);
/// assert_eq!(frame[1], opcode::EOF);
/// ```
pub fn encode_command(command: &Command) -> Frame {
    let mut frame = [opcode::PADDING; FRAME_LEN];
    frame[0] = command.opcode();

    match command {
        Command::Mode(mode) => {
            frame[1] = *mode;
            frame[2] = opcode::EOF;
        }
        Command::Read => {
            frame[1] = opcode::EOF;
        }
        Command::Write(value) => {
            frame[1..COUNTER_EOF_OFFSET].copy_from_slice(&value.to_be_bytes());
            frame[COUNTER_EOF_OFFSET] = opcode::EOF;
        }
    }

    frame
}

/// Decode a notification received on the interrupt endpoint
///
/// A counter frame whose terminator is not the EOF marker still yields the
/// counter; `terminated` is false so the caller can report it. Frames too
/// short for their opcode are rejected.
///
/// # Example
/// ```
/// use protocol::{Notification, decode_notification};
///
/// let bytes = [0x43, 0x00, 0x00, 0x00, 0x01, 0x00, 0x0d, 0xff];
/// match decode_notification(&bytes).unwrap() {
///     Notification::Counter { value, terminated, .. } => {
///         assert_eq!(value.get(), 256);
///         assert!(terminated);
///     }
///     other => panic!("unexpected {:?}", other),
/// }
/// ```
pub fn decode_notification(bytes: &[u8]) -> Result<Notification> {
    let Some(&op) = bytes.first() else {
        return Err(ProtocolError::IncompleteFrame {
            expected: 1,
            actual: 0,
        });
    };

    match op {
        opcode::VALUE | opcode::READ => {
            let source = if op == opcode::VALUE {
                CounterSource::Push
            } else {
                CounterSource::ReadResult
            };
            let (value, terminated) = decode_counter(bytes)?;
            Ok(Notification::Counter {
                source,
                value,
                terminated,
            })
        }
        opcode::ACK => {
            let command = *bytes.get(1).ok_or(ProtocolError::IncompleteFrame {
                expected: 2,
                actual: bytes.len(),
            })?;
            Ok(Notification::Ack { command })
        }
        other => Ok(Notification::Unknown(other)),
    }
}

/// Check a counter frame's terminator byte
pub fn check_terminator(bytes: &[u8]) -> Result<()> {
    match bytes.get(COUNTER_EOF_OFFSET) {
        Some(&opcode::EOF) => Ok(()),
        Some(&found) => Err(ProtocolError::MalformedFrame {
            found,
            expected: opcode::EOF,
        }),
        None => Err(ProtocolError::IncompleteFrame {
            expected: COUNTER_EOF_OFFSET + 1,
            actual: bytes.len(),
        }),
    }
}

fn decode_counter(bytes: &[u8]) -> Result<(Bbu, bool)> {
    let needed = COUNTER_EOF_OFFSET + 1;
    if bytes.len() < needed {
        return Err(ProtocolError::IncompleteFrame {
            expected: needed,
            actual: bytes.len(),
        });
    }

    let mut counter = [0u8; BBU_BYTES];
    counter.copy_from_slice(&bytes[1..COUNTER_EOF_OFFSET]);
    let terminated = check_terminator(bytes).is_ok();

    Ok((Bbu::from_be_bytes(counter), terminated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_mode() {
        let frame = encode_command(&Command::Mode(0x00));
        assert_eq!(frame, [0x41, 0x00, 0x0d, 0xff, 0xff, 0xff, 0xff, 0xff]);

        let frame = encode_command(&Command::animation(false));
        assert_eq!(frame, [0x41, 0xff, 0x0d, 0xff, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_encode_read() {
        let frame = encode_command(&Command::Read);
        assert_eq!(frame, [0x52, 0x0d, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_encode_write() {
        let value = Bbu::new(0xab_cdef_0123).unwrap();
        let frame = encode_command(&Command::Write(value));
        assert_eq!(frame, [0x53, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x0d, 0xff]);
    }

    #[test]
    fn test_decode_read_result() {
        let bytes = [0x52, 0x00, 0x00, 0x00, 0x30, 0x39, 0x0d, 0x00];
        let decoded = decode_notification(&bytes).unwrap();
        assert_eq!(
            decoded,
            Notification::Counter {
                source: CounterSource::ReadResult,
                value: Bbu::new(12345).unwrap(),
                terminated: true,
            }
        );
    }

    #[test]
    fn test_decode_bad_terminator_keeps_value() {
        let bytes = [0x43, 0x00, 0x00, 0x00, 0x00, 0x07, 0xaa, 0xff];
        match decode_notification(&bytes).unwrap() {
            Notification::Counter {
                value, terminated, ..
            } => {
                assert_eq!(value.get(), 7);
                assert!(!terminated);
            }
            other => panic!("unexpected notification {:?}", other),
        }
        assert_eq!(
            check_terminator(&bytes),
            Err(ProtocolError::MalformedFrame {
                found: 0xaa,
                expected: 0x0d
            })
        );
    }

    #[test]
    fn test_decode_ack() {
        let decoded = decode_notification(&[0x21, 0x53, 0, 0, 0, 0, 0, 0]).unwrap();
        assert!(decoded.is_write_ack());

        let decoded = decode_notification(&[0x21, 0x41, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(decoded, Notification::Ack { command: 0x41 });
        assert!(!decoded.is_write_ack());
    }

    #[test]
    fn test_decode_unknown_and_short() {
        assert_eq!(
            decode_notification(&[0x99, 0, 0, 0, 0, 0, 0, 0]).unwrap(),
            Notification::Unknown(0x99)
        );
        assert!(matches!(
            decode_notification(&[]),
            Err(ProtocolError::IncompleteFrame { actual: 0, .. })
        ));
        assert!(matches!(
            decode_notification(&[0x43, 0x01, 0x02]),
            Err(ProtocolError::IncompleteFrame {
                expected: 7,
                actual: 3
            })
        ));
        assert!(matches!(
            decode_notification(&[0x21]),
            Err(ProtocolError::IncompleteFrame { expected: 2, .. })
        ));
    }
}
