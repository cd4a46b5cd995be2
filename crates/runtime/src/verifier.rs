//! zk-SNARK verifier backend
//!
//! The precompile only needs an accept/reject decision over
//! `(proof, verifying key, public witness)`. [`ProofVerifier`] is that seam;
//! [`PlonkBn254Verifier`] backs it with the gnark-compatible PLONK verifier
//! from `sp1-verifier`.

use std::panic::{self, AssertUnwindSafe};

use alloy_primitives::U256;
use sp1_verifier::PlonkVerifier;
use thiserror::Error;

/// Verifier failures, all reported to the guest as rejection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifierError {
    #[error("Malformed proof or verifying key: {reason}")]
    Malformed { reason: String },

    #[error("Proof rejected: {reason}")]
    Rejected { reason: String },
}

/// Public signals of the wrapper circuit, in circuit order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicWitness {
    pub vkey_hash: U256,
    pub committed_values_digest: U256,
}

impl PublicWitness {
    pub fn new(vkey_hash: U256, committed_values_digest: U256) -> Self {
        Self {
            vkey_hash,
            committed_values_digest,
        }
    }

    /// Big-endian field encodings
    pub fn inputs(&self) -> [[u8; 32]; 2] {
        [
            self.vkey_hash.to_be_bytes::<32>(),
            self.committed_values_digest.to_be_bytes::<32>(),
        ]
    }
}

pub trait ProofVerifier: Send + Sync {
    fn verify(
        &self,
        proof: &[u8],
        verifying_key: &[u8],
        witness: &PublicWitness,
    ) -> Result<(), VerifierError>;
}

/// PLONK over BN254 with gnark-serialized keys and proofs
#[derive(Debug, Clone, Copy, Default)]
pub struct PlonkBn254Verifier;

impl ProofVerifier for PlonkBn254Verifier {
    fn verify(
        &self,
        proof: &[u8],
        verifying_key: &[u8],
        witness: &PublicWitness,
    ) -> Result<(), VerifierError> {
        let inputs = witness.inputs();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            PlonkVerifier::verify_gnark_proof(proof, &inputs, verifying_key)
        }));

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(VerifierError::Rejected {
                reason: format!("{:?}", e),
            }),
            Err(_) => Err(VerifierError::Malformed {
                reason: "backend could not deserialize proof or key".to_string(),
            }),
        }
    }
}
