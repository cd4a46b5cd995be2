//! Precompile host functions
//!
//! `gnarkVerify` decodes a verification request, derives the public witness
//! and asks a [`ProofVerifier`] for a decision. Every failure past the memory
//! read is a rejection (`0`), never a trap. The accounting hooks share the
//! `precompiles` import module and do nothing yet.

use std::borrow::Cow;
use std::sync::Arc;

use alloy_primitives::U256;
use seqwasm_protocol::{ProtocolError, VerificationRequest};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::memory::{GuestMemory, MemoryError};
use crate::sandbox::{AccountingImports, PrecompileImports};
use crate::verifier::{PlonkBn254Verifier, ProofVerifier, PublicWitness, VerifierError};

/// Width of the committed values digest in bits
pub const DIGEST_BITS: usize = 253;

/// Order of the BN254 scalar field
pub const BN254_SCALAR_MODULUS: U256 = U256::from_limbs([
    0x43e1f593f0000001,
    0x2833e84879b97091,
    0xb85045b68181585d,
    0x30644e72e131a029,
]);

/// How `proofBytes` is carried inside a request
///
/// Fixed per deployment; the runtime never guesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofEncoding {
    /// Serialized proof as is
    #[default]
    Raw,
    /// Serialized proof as hex text, optional `0x` prefix
    HexText,
}

impl ProofEncoding {
    pub fn decode_proof<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, [u8]>, PrecompileError> {
        match self {
            ProofEncoding::Raw => Ok(Cow::Borrowed(bytes)),
            ProofEncoding::HexText => {
                let text = bytes.trim_ascii();
                let digits = text.strip_prefix(b"0x").unwrap_or(text);
                let proof = hex::decode(digits).map_err(|source| PrecompileError::ProofEncoding { source })?;
                Ok(Cow::Owned(proof))
            }
        }
    }
}

/// Reasons a verification request is rejected
#[derive(Error, Debug)]
pub enum PrecompileError {
    #[error("Malformed verification request: {source}")]
    Decode { source: ProtocolError },

    #[error("Verifying key hash is not a field element: {reason}")]
    InvalidVkeyHash { reason: String },

    #[error("Public values digest exceeds {bits} bits")]
    DigestOverflow { bits: usize },

    #[error("Proof is not valid hex text: {source}")]
    ProofEncoding { source: hex::FromHexError },

    #[error("Verifier: {source}")]
    Verifier { source: VerifierError },
}

/// SHA-256 of the public values, big-endian, low 253 bits kept
pub fn public_values_digest(public_values: &[u8]) -> Result<U256, PrecompileError> {
    let hash = Sha256::digest(public_values);
    let mask = U256::MAX >> (256 - DIGEST_BITS);
    let digest = U256::from_be_slice(&hash) & mask;
    if digest.bit_len() > DIGEST_BITS {
        return Err(PrecompileError::DigestOverflow { bits: DIGEST_BITS });
    }
    Ok(digest)
}

fn invalid_vkey_hash(reason: impl Into<String>) -> PrecompileError {
    PrecompileError::InvalidVkeyHash { reason: reason.into() }
}

/// Split an unsigned integer literal into its digits and radix
///
/// `0x`, `0o` and `0b` (either case) select the base, a bare leading `0`
/// means octal, anything else is decimal. The flag reports whether a prefix
/// was consumed, which allows a `_` right after it.
fn split_radix(literal: &str) -> (&str, u64, bool) {
    let bytes = literal.as_bytes();
    match bytes {
        [b'0', b'x' | b'X', ..] => (&literal[2..], 16, true),
        [b'0', b'o' | b'O', ..] => (&literal[2..], 8, true),
        [b'0', b'b' | b'B', ..] => (&literal[2..], 2, true),
        [b'0', _, ..] => (&literal[1..], 8, true),
        _ => (literal, 10, false),
    }
}

/// Parse `programVKeyHash` text into a BN254 scalar
///
/// Accepts integer literals the way the proving stack reads them: optional
/// sign, base prefix, `_` between digits. Negative values wrap around the
/// modulus. No surrounding whitespace, and the magnitude must fit 256 bits.
pub fn vkey_hash_to_field(bytes: &[u8]) -> Result<U256, PrecompileError> {
    let text = std::str::from_utf8(bytes).map_err(|e| invalid_vkey_hash(e.to_string()))?;

    let (negative, literal) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (digits, radix, prefixed) = split_radix(literal);

    if digits.is_empty() {
        return Err(invalid_vkey_hash("empty value"));
    }
    if digits.ends_with('_') || digits.contains("__") || (!prefixed && digits.starts_with('_')) {
        return Err(invalid_vkey_hash("misplaced digit separator"));
    }
    let digits = digits.replace('_', "");

    let magnitude = U256::from_str_radix(&digits, radix)
        .map_err(|e| invalid_vkey_hash(e.to_string()))?
        .reduce_mod(BN254_SCALAR_MODULUS);
    if negative && !magnitude.is_zero() {
        Ok(BN254_SCALAR_MODULUS - magnitude)
    } else {
        Ok(magnitude)
    }
}

/// `gnarkVerify` host function
#[derive(Clone)]
pub struct ProofVerificationService {
    verifier: Arc<dyn ProofVerifier>,
    encoding: ProofEncoding,
}

impl ProofVerificationService {
    pub fn new(verifier: Arc<dyn ProofVerifier>, encoding: ProofEncoding) -> Self {
        Self { verifier, encoding }
    }

    /// Service backed by the BN254 PLONK verifier
    pub fn plonk(encoding: ProofEncoding) -> Self {
        Self::new(Arc::new(PlonkBn254Verifier), encoding)
    }

    /// Full decision over an encoded request
    pub fn check(&self, input: &[u8]) -> Result<(), PrecompileError> {
        let request =
            VerificationRequest::decode(input).map_err(|source| PrecompileError::Decode { source })?;

        let digest = public_values_digest(&request.public_values)?;
        let vkey_hash = vkey_hash_to_field(&request.program_vkey_hash)?;
        let witness = PublicWitness::new(vkey_hash, digest);

        let proof = self.encoding.decode_proof(&request.proof_bytes)?;
        self.verifier
            .verify(&proof, &request.program_vkey, &witness)
            .map_err(|source| PrecompileError::Verifier { source })
    }
}

impl std::fmt::Debug for ProofVerificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofVerificationService")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl PrecompileImports for ProofVerificationService {
    fn verify(&self, memory: &mut dyn GuestMemory, ptr: u32, len: u32) -> Result<u32, MemoryError> {
        let input = memory.read(ptr, len)?;
        match self.check(&input) {
            Ok(()) => {
                debug!(len, "gnarkVerify accepted");
                Ok(1)
            }
            Err(e) => {
                debug!(len, error = %e, "gnarkVerify rejected");
                Ok(0)
            }
        }
    }
}

/// Reserved balance hooks
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountingHooks;

impl AccountingImports for AccountingHooks {
    fn add_balance(&self) {
        debug!("addBalance called, no-op");
    }

    fn sub_balance(&self) {
        debug!("subBalance called, no-op");
    }
}
