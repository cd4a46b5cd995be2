//! Seqwasm protocol types
//!
//! This crate defines the wire-level types shared by the host runtime and the
//! drivers that call into guest modules: principal addresses, the transaction
//! context record, call payloads, and the ABI shapes of precompile and
//! entry-point inputs.

pub mod abi;
pub mod address;
pub mod context;
pub mod errors;

pub use abi::{CallPayload, VerificationRequest, SELECTOR_LEN};
pub use address::{Address, ADDRESS_LEN};
pub use context::TransactionContext;
pub use errors::ProtocolError;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Version of the host/guest protocol
pub const PROTOCOL_VERSION: &str = "0.1.0";
