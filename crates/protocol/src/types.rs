//! Value types carried by protocol frames

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ProtocolError, Result};

/// Number of counter bytes carried in a frame
pub const BBU_BYTES: usize = 5;

/// BBU counter value
///
/// The device keeps a 40-bit unsigned counter. Values are transmitted
/// big-endian in five bytes, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Bbu(u64);

impl Bbu {
    /// Largest value representable in 40 bits
    pub const MAX: Bbu = Bbu((1 << 40) - 1);

    /// Zero counter
    pub const ZERO: Bbu = Bbu(0);

    /// Create a counter value, rejecting anything wider than 40 bits
    pub fn new(value: u64) -> Result<Self> {
        if value > Self::MAX.0 {
            return Err(ProtocolError::CounterOverflow { value });
        }
        Ok(Self(value))
    }

    /// Create a counter value keeping only the low 40 bits
    pub fn truncate(value: u64) -> Self {
        Self(value & Self::MAX.0)
    }

    /// Raw counter value
    pub fn get(self) -> u64 {
        self.0
    }

    /// Big-endian wire bytes
    pub fn to_be_bytes(self) -> [u8; BBU_BYTES] {
        let wide = self.0.to_be_bytes();
        let mut out = [0u8; BBU_BYTES];
        out.copy_from_slice(&wide[8 - BBU_BYTES..]);
        out
    }

    /// Accumulate five big-endian bytes into a counter
    pub fn from_be_bytes(bytes: [u8; BBU_BYTES]) -> Self {
        let value = bytes
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        Self(value)
    }

    /// Parse the leading run of ASCII decimal digits
    ///
    /// Trailing non-digit bytes are ignored. An input with no leading digit
    /// yields zero. Digits accumulate with wrapping 64-bit arithmetic and the
    /// result keeps its low 40 bits, matching what the device would store.
    pub fn parse_leading_digits(input: &[u8]) -> Self {
        let value = input
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .fold(0u64, |acc, b| {
                acc.wrapping_mul(10).wrapping_add(u64::from(b - b'0'))
            });
        Self::truncate(value)
    }
}

impl fmt::Display for Bbu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u64> for Bbu {
    type Error = ProtocolError;

    fn try_from(value: u64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Bbu> for u64 {
    fn from(value: Bbu) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbu_bounds() {
        assert!(Bbu::new(0).is_ok());
        assert_eq!(Bbu::new(Bbu::MAX.get()).unwrap(), Bbu::MAX);
        assert!(matches!(
            Bbu::new(1 << 40),
            Err(ProtocolError::CounterOverflow { value }) if value == 1 << 40
        ));
    }

    #[test]
    fn test_bbu_be_bytes() {
        let bbu = Bbu::new(0x01_2345_6789).unwrap();
        assert_eq!(bbu.to_be_bytes(), [0x01, 0x23, 0x45, 0x67, 0x89]);
        assert_eq!(Bbu::from_be_bytes([0xff; 5]), Bbu::MAX);
    }

    #[test]
    fn test_parse_leading_digits() {
        assert_eq!(Bbu::parse_leading_digits(b"12345\n").get(), 12345);
        assert_eq!(Bbu::parse_leading_digits(b"42abc99").get(), 42);
        assert_eq!(Bbu::parse_leading_digits(b"x42").get(), 0);
        assert_eq!(Bbu::parse_leading_digits(b"").get(), 0);
        // 2^40 wraps to zero once truncated
        assert_eq!(Bbu::parse_leading_digits(b"1099511627776").get(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Bbu::new(987).unwrap().to_string(), "987");
    }
}
