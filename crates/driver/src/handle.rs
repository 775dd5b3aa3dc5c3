//! Per-open handles on the published views
//!
//! A [`SessionHandle`] binds one open of a published name to the session it
//! resolved to. It holds only a weak reference: once the device is detached
//! every operation fails with [`DriverError::StateInvalid`].

use crate::error::{DriverError, Result};
use crate::session::DeviceSession;
use protocol::Bbu;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Which pseudo-file a handle represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// Decimal BBU counter
    Counter,
    /// Animation flag, `0` or `1`
    Animation,
}

/// Context of one open file-like connection
#[derive(Debug)]
pub struct SessionHandle {
    session: Option<Weak<DeviceSession>>,
    view: View,
    /// Line formatted by the last read at offset 0
    buf: Vec<u8>,
}

impl SessionHandle {
    pub(crate) fn new(session: &Arc<DeviceSession>, view: View) -> Self {
        Self {
            session: Some(Arc::downgrade(session)),
            view,
            buf: Vec::with_capacity(16),
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// True until [`SessionHandle::close`]
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn session(&self) -> Result<Arc<DeviceSession>> {
        let session = self
            .session
            .as_ref()
            .ok_or(DriverError::StateInvalid("handle closed"))?
            .upgrade()
            .ok_or(DriverError::StateInvalid("session released"))?;

        if session.is_usable() {
            Ok(session)
        } else {
            Err(DriverError::StateInvalid("session detached"))
        }
    }

    /// Read up to `length` bytes of the formatted line starting at `offset`
    ///
    /// A read at offset 0 formats the current value; later offsets continue
    /// from that same line so a value can be read in chunks. Offsets past the
    /// end of the line yield an empty result.
    pub fn read(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let session = self.session()?;

        if offset == 0 {
            let readings = session.readings()?;
            let line = match self.view {
                View::Counter => format!("{}\n", readings.bbu),
                View::Animation => format!("{}\n", u8::from(readings.animation)),
            };
            self.buf.clear();
            self.buf.extend_from_slice(line.as_bytes());
        }

        let start = match usize::try_from(offset) {
            Ok(start) if start < self.buf.len() => start,
            _ => return Ok(Vec::new()),
        };
        let end = start + length.min(self.buf.len() - start);
        trace!("read {:?} [{}..{}]", self.view, start, end);

        Ok(self.buf[start..end].to_vec())
    }

    /// Apply a write to the view
    ///
    /// Animation: a leading `'0'` turns the animation off, anything else turns
    /// it on. Counter: the leading decimal digits are sent to the device as
    /// the new counter; trailing bytes are ignored. Returns the number of
    /// bytes consumed.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let session = self.session()?;

        let Some(&first) = data.first() else {
            return Ok(0);
        };

        match self.view {
            View::Animation => session.set_animation(first != b'0')?,
            View::Counter => session.write_counter(Bbu::parse_leading_digits(data))?,
        }

        Ok(data.len())
    }

    /// Unbind the handle; the session is unaffected
    pub fn close(&mut self) {
        self.session = None;
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionNames;
    use common::DeviceId;
    use common::test_utils::{MockTransport, value_frame};
    use protocol::opcode;

    fn active_session() -> (Arc<MockTransport>, Arc<DeviceSession>) {
        let mock = Arc::new(MockTransport::yurex());
        let session = DeviceSession::new(
            DeviceId(1),
            SessionNames::new("misc/yurex", DeviceId(1)),
            mock.clone(),
            None,
        );
        session.start().unwrap();
        (mock, session)
    }

    #[test]
    fn test_counter_read_in_chunks() {
        let (mock, session) = active_session();
        mock.complete(&value_frame(1_234_567));

        let mut handle = SessionHandle::new(&session, View::Counter);
        let head = handle.read(0, 3).unwrap();
        let tail = handle.read(3, 64).unwrap();
        assert_eq!(head, b"123");
        assert_eq!(tail, b"4567\n");

        assert!(handle.read(8, 4).unwrap().is_empty());
        assert!(handle.read(u64::MAX, 4).unwrap().is_empty());
        assert!(handle.read(0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_chunked_read_uses_snapshot() {
        let (mock, session) = active_session();
        mock.complete(&value_frame(1000));

        let mut handle = SessionHandle::new(&session, View::Counter);
        assert_eq!(handle.read(0, 2).unwrap(), b"10");
        mock.complete(&value_frame(9999));
        assert_eq!(handle.read(2, 10).unwrap(), b"00\n");
        assert_eq!(handle.read(0, 10).unwrap(), b"9999\n");
    }

    #[test]
    fn test_animation_write_then_read() {
        let (mock, session) = active_session();
        mock.clear_sent();
        let mut handle = SessionHandle::new(&session, View::Animation);

        assert_eq!(handle.read(0, 16).unwrap(), b"1\n");
        assert_eq!(handle.write(b"0\n").unwrap(), 2);
        assert_eq!(handle.read(0, 16).unwrap(), b"0\n");
        assert_eq!(handle.write(b"x").unwrap(), 1);
        assert_eq!(handle.read(0, 16).unwrap(), b"1\n");

        let frames = mock.sent_frames();
        assert_eq!(&frames[0][..3], &[opcode::MODE, 0xff, opcode::EOF]);
        assert_eq!(&frames[1][..3], &[opcode::MODE, 0x00, opcode::EOF]);
    }

    #[test]
    fn test_counter_write_parses_digits() {
        let (mock, session) = active_session();
        mock.clear_sent();
        let mut handle = SessionHandle::new(&session, View::Counter);

        assert_eq!(handle.write(b"258 bbu").unwrap(), 7);
        assert_eq!(
            mock.sent_frames(),
            vec![[opcode::WRITE, 0, 0, 0, 1, 2, opcode::EOF, opcode::PADDING]]
        );
    }

    #[test]
    fn test_empty_write_is_noop() {
        let (mock, session) = active_session();
        mock.clear_sent();
        let mut handle = SessionHandle::new(&session, View::Animation);
        assert_eq!(handle.write(b"").unwrap(), 0);
        assert!(mock.sent_frames().is_empty());
    }

    #[test]
    fn test_operations_fail_after_detach() {
        let (_mock, session) = active_session();
        let mut handle = SessionHandle::new(&session, View::Counter);
        handle.read(0, 4).unwrap();

        session.begin_detach().unwrap();
        assert!(matches!(
            handle.read(0, 4),
            Err(DriverError::StateInvalid(_))
        ));
        assert!(matches!(
            handle.read(1, 4),
            Err(DriverError::StateInvalid(_))
        ));
        assert!(handle.write(b"1").is_err());

        drop(session);
        assert!(matches!(
            handle.read(0, 4),
            Err(DriverError::StateInvalid("session released"))
        ));
    }

    #[test]
    fn test_closed_handle() {
        let (_mock, session) = active_session();
        let mut handle = SessionHandle::new(&session, View::Animation);
        handle.close();
        assert!(!handle.is_open());
        assert!(matches!(
            handle.write(b"0"),
            Err(DriverError::StateInvalid("handle closed"))
        ));
        assert!(session.readings().unwrap().animation);
    }
}
