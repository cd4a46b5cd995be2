//! Transaction context record
//!
//! Every entry point receives a pointer to this record as its first argument.
//! The byte layout is fixed here rather than taken from whatever a compiler
//! happens to emit, and it matches a `#[repr(C)] { i64, u32 }` struct on
//! wasm32:
//!
//! | bytes    | field                       |
//! |----------|-----------------------------|
//! | `0..8`   | timestamp, `i64` LE         |
//! | `8..12`  | sender pointer, `u32` LE    |
//! | `12..16` | padding, zero               |

use crate::{ProtocolError, Result};

/// Size of the encoded record, padding included
pub const CONTEXT_SIZE: usize = 16;
/// Byte offset of the timestamp field
pub const TIMESTAMP_OFFSET: usize = 0;
/// Byte offset of the sender pointer field
pub const SENDER_PTR_OFFSET: usize = 8;

/// Calling context handed to a guest entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionContext {
    /// Timestamp of the block the transaction is included in
    pub timestamp: i64,
    /// Guest address of the 33-byte sender identifier
    pub sender_ptr: u32,
}

impl TransactionContext {
    pub fn new(timestamp: i64, sender_ptr: u32) -> Self {
        Self {
            timestamp,
            sender_ptr,
        }
    }

    pub fn to_bytes(&self) -> [u8; CONTEXT_SIZE] {
        let mut bytes = [0u8; CONTEXT_SIZE];
        bytes[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[SENDER_PTR_OFFSET..SENDER_PTR_OFFSET + 4]
            .copy_from_slice(&self.sender_ptr.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CONTEXT_SIZE {
            return Err(ProtocolError::InvalidContextLength {
                expected: CONTEXT_SIZE,
                actual: bytes.len(),
            });
        }

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&bytes[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8]);
        let mut sender_ptr = [0u8; 4];
        sender_ptr.copy_from_slice(&bytes[SENDER_PTR_OFFSET..SENDER_PTR_OFFSET + 4]);

        Ok(Self {
            timestamp: i64::from_le_bytes(timestamp),
            sender_ptr: u32::from_le_bytes(sender_ptr),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_fixed() {
        let ctx = TransactionContext::new(-2, 0x0102_0304);
        let bytes = ctx.to_bytes();

        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..8], &[0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(&bytes[8..12], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_decode_written_record() {
        let ctx = TransactionContext::new(1_700_000_000, 2048);
        assert_eq!(TransactionContext::from_bytes(&ctx.to_bytes()).unwrap(), ctx);
    }

    #[test]
    fn test_short_record_rejected() {
        let err = TransactionContext::from_bytes(&[0u8; 12]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidContextLength { expected: 16, actual: 12 }
        ));
    }
}
