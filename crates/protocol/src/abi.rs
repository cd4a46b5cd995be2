//! ABI shapes of guest inputs
//!
//! Argument tuples cross the boundary in the standard Solidity ABI encoding.
//! The codec itself is `alloy-sol-types`; this module only declares the
//! shapes, strips selectors, and turns the precompile input into a typed
//! request in a single decode step.

use crate::{ProtocolError, Result};
use alloy_sol_types::{sol, SolCall, SolValue};

/// Length of the method selector prefixed to calldata
pub const SELECTOR_LEN: usize = 4;

sol! {
    /// Input tuple of the `gnarkVerify` precompile.
    #[derive(Debug, PartialEq, Eq)]
    struct GnarkPrecompileInputs {
        bytes programVKeyHash;
        bytes publicValues;
        bytes proofBytes;
        bytes programVKey;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct InitializerInput {
        uint64 height;
        bytes32 header;
        bytes blobstreamProgramVKeyHash;
        bytes blobstreamProgramVKey;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct CommitHeaderRangeInput {
        bytes proof;
        bytes publicValues;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct UpdateGenesisStateInput {
        uint64 height;
        bytes32 header;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct UpdateProgramVkeyInput {
        bytes blobstreamProgramVKeyHash;
        bytes blobstreamProgramVKey;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct UpdateFreezeInput {
        bool freeze;
    }

    function gnarkPrecompile(GnarkPrecompileInputs inputs) returns (bool);
    function initializer(InitializerInput inputs);
    function commitHeaderRange(CommitHeaderRangeInput inputs);
    function updateGenesisState(UpdateGenesisStateInput inputs);
    function updateProgramVkey(UpdateProgramVkeyInput inputs);
    function updateFreeze(UpdateFreezeInput inputs);
}

/// Encoded argument tuple of one entry-point call, selector already removed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallPayload(Vec<u8>);

impl CallPayload {
    /// Wrap bytes that are already a bare argument tuple
    pub fn from_encoded(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Strip exactly one selector from full calldata
    pub fn from_calldata(calldata: &[u8]) -> Result<Self> {
        if calldata.len() < SELECTOR_LEN {
            return Err(ProtocolError::MissingSelector {
                len: calldata.len(),
            });
        }
        Ok(Self(calldata[SELECTOR_LEN..].to_vec()))
    }

    /// Encode a typed call and drop its selector
    pub fn from_call<C: SolCall>(call: &C) -> Self {
        let calldata = call.abi_encode();
        Self(calldata[SELECTOR_LEN..].to_vec())
    }

    /// Encode a single input struct the way guests decode it
    pub fn from_input<T: SolValue>(input: &T) -> Self {
        Self(input.abi_encode())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

/// Typed `gnarkVerify` request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerificationRequest {
    pub program_vkey_hash: Vec<u8>,
    pub public_values: Vec<u8>,
    pub proof_bytes: Vec<u8>,
    pub program_vkey: Vec<u8>,
}

impl VerificationRequest {
    /// Decode a request; malformed input yields an error, never a partial value
    pub fn decode(data: &[u8]) -> Result<Self> {
        let inputs = GnarkPrecompileInputs::abi_decode(data)?;
        Ok(inputs.into())
    }

    pub fn encode(&self) -> Vec<u8> {
        GnarkPrecompileInputs::from(self.clone()).abi_encode()
    }
}

impl From<GnarkPrecompileInputs> for VerificationRequest {
    fn from(inputs: GnarkPrecompileInputs) -> Self {
        Self {
            program_vkey_hash: inputs.programVKeyHash.to_vec(),
            public_values: inputs.publicValues.to_vec(),
            proof_bytes: inputs.proofBytes.to_vec(),
            program_vkey: inputs.programVKey.to_vec(),
        }
    }
}

impl From<VerificationRequest> for GnarkPrecompileInputs {
    fn from(request: VerificationRequest) -> Self {
        Self {
            programVKeyHash: request.program_vkey_hash.into(),
            publicValues: request.public_values.into(),
            proofBytes: request.proof_bytes.into(),
            programVKey: request.program_vkey.into(),
        }
    }
}
