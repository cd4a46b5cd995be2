//! Protocol errors module

use thiserror::Error;

/// Protocol-level errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("ABI decoding failed: {source}")]
    AbiDecode { source: alloy_sol_types::Error },

    #[error("Calldata too short to carry a selector: {len} bytes")]
    MissingSelector { len: usize },

    #[error("Invalid address length: expected {expected} bytes, got {actual}")]
    InvalidAddressLength { expected: usize, actual: usize },

    #[error("Invalid hex encoding: {source}")]
    InvalidHex { source: hex::FromHexError },

    #[error("Invalid transaction context: expected {expected} bytes, got {actual}")]
    InvalidContextLength { expected: usize, actual: usize },
}

impl From<alloy_sol_types::Error> for ProtocolError {
    fn from(err: alloy_sol_types::Error) -> Self {
        ProtocolError::AbiDecode { source: err }
    }
}

impl From<hex::FromHexError> for ProtocolError {
    fn from(err: hex::FromHexError) -> Self {
        ProtocolError::InvalidHex { source: err }
    }
}
