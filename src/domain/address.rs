//! Board addresses
//!
//! A board is identified by its 48-bit Bluetooth MAC. The transport hands
//! addresses around as packed integers, people read them as
//! `E6:1F:69:18:13:38`.

use crate::error::AddressParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest value a 48-bit address can hold
pub const ADDRESS_MAX: u64 = (1 << 48) - 1;

/// 48-bit board address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BoardAddress(u64);

impl BoardAddress {
    /// Build an address from its packed form.
    ///
    /// Fails if the value does not fit in 48 bits.
    pub fn new(packed: u64) -> Result<Self, AddressParseError> {
        if packed > ADDRESS_MAX {
            return Err(AddressParseError::OutOfRange(packed));
        }
        Ok(Self(packed))
    }

    /// Packed integer form, as used by the transport
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Address bytes, most significant first
    pub fn octets(&self) -> [u8; 6] {
        let bytes = self.0.to_be_bytes();
        [bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]
    }
}

impl fmt::Display for BoardAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for BoardAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(AddressParseError::Malformed(s.to_string()));
        }

        let mut packed = 0u64;
        for part in parts {
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(AddressParseError::Malformed(s.to_string()));
            }
            let octet = u8::from_str_radix(part, 16)
                .map_err(|_| AddressParseError::Malformed(s.to_string()))?;
            packed = (packed << 8) | octet as u64;
        }

        Ok(Self(packed))
    }
}

impl TryFrom<u64> for BoardAddress {
    type Error = AddressParseError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for BoardAddress {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BoardAddress> for String {
    fn from(address: BoardAddress) -> Self {
        address.to_string()
    }
}

impl From<BoardAddress> for u64 {
    fn from(address: BoardAddress) -> Self {
        address.0
    }
}
