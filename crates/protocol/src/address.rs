//! Principal addresses
//!
//! Guests identify the acting principal by a fixed 33-byte identifier that the
//! driver writes into guest memory next to the transaction context.

use crate::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of a principal identifier in bytes
pub const ADDRESS_LEN: usize = 33;

/// 33-byte principal identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const LEN: usize = ADDRESS_LEN;

    pub fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Build an address from a slice, which must be exactly 33 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; ADDRESS_LEN] =
            bytes
                .try_into()
                .map_err(|_| ProtocolError::InvalidAddressLength {
                    expected: ADDRESS_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for Address {
    fn default() -> Self {
        Self([0u8; ADDRESS_LEN])
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let digits = s.strip_prefix("0x").unwrap_or(s);
        Self::from_slice(&hex::decode(digits)?)
    }
}

impl TryFrom<String> for Address {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}
