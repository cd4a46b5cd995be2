//! Seqwasm WASM host runtime
//!
//! Hosts sandboxed light-client guests: a persistent slot store, a PLONK
//! proof verification precompile and the calling convention that moves
//! payloads and transaction contexts through guest memory.

pub mod context;
pub mod execution;
pub mod memory;
pub mod precompiles;
pub mod sandbox;
pub mod storage;
pub mod validation;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for easy access
pub use execution::{CallContext, CallOutcome, EntryPoint, ExecutionError, GuestInstance, GuestRuntime, RuntimeConfig};
pub use memory::{GuestMemory, MemoryError, MemoryRegion};
pub use precompiles::{PrecompileError, ProofEncoding, ProofVerificationService};
pub use sandbox::{Capability, HostFunctionRegistry, HostServices, ResourceLimits, SandboxError};
pub use storage::{SharedStorage, SlotKey, Storage, StorageService};
pub use validation::{GuestExports, ValidationError, ValidationResult, ValidatorConfig, WasmValidator};
pub use verifier::{PlonkBn254Verifier, ProofVerifier, PublicWitness, VerifierError};

/// Convenience function to validate a guest module with default policy
pub fn validate_guest(wasm_bytes: &[u8]) -> anyhow::Result<ValidationResult> {
    validation::validate_guest(wasm_bytes)
}
