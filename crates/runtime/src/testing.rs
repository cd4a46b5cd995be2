//! Test doubles shared by the unit tests

use seqwasm_protocol::VerificationRequest;

use crate::memory::{write_bytes, GuestMemory, MemoryError, MemoryRegion};
use crate::precompiles::{public_values_digest, vkey_hash_to_field, PrecompileError};
use crate::verifier::{ProofVerifier, PublicWitness, VerifierError};

/// Flat byte buffer with a bump allocator
pub struct VecMemory {
    bytes: Vec<u8>,
    next: u32,
    allocations: Vec<MemoryRegion>,
}

impl VecMemory {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            next: 8,
            allocations: Vec::new(),
        }
    }

    /// Allocate and fill a region, as a guest would before a host call
    pub fn place(&mut self, bytes: &[u8]) -> MemoryRegion {
        write_bytes(self, bytes).expect("test memory too small")
    }

    pub fn allocations(&self) -> &[MemoryRegion] {
        &self.allocations
    }

    fn range(&self, ptr: u32, len: u32) -> Result<std::ops::Range<usize>, MemoryError> {
        let end = u64::from(ptr) + u64::from(len);
        if end > self.bytes.len() as u64 {
            return Err(MemoryError::OutOfBounds { ptr, len });
        }
        Ok(ptr as usize..end as usize)
    }
}

impl GuestMemory for VecMemory {
    fn read(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, MemoryError> {
        let range = self.range(ptr, len)?;
        Ok(self.bytes[range].to_vec())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(offset, bytes.len() as u32)?;
        self.bytes[range].copy_from_slice(bytes);
        Ok(())
    }

    fn allocate(&mut self, len: u32) -> Result<u32, MemoryError> {
        let offset = self.next;
        let end = u64::from(offset) + u64::from(len);
        if end > self.bytes.len() as u64 {
            return Err(MemoryError::AllocatorFailed {
                reason: format!("out of memory allocating {} bytes", len),
            });
        }
        self.next = ((end + 7) & !7) as u32;
        self.allocations.push(MemoryRegion::new(offset, len));
        Ok(offset)
    }
}

/// Accepts exactly one `(proof, key, witness)` triple
pub struct FixedVerifier {
    proof: Vec<u8>,
    verifying_key: Vec<u8>,
    witness: PublicWitness,
}

impl FixedVerifier {
    /// Accept the raw proof of `request` and nothing else
    pub fn accepting(request: &VerificationRequest) -> Result<Self, PrecompileError> {
        Ok(Self {
            proof: request.proof_bytes.clone(),
            verifying_key: request.program_vkey.clone(),
            witness: PublicWitness::new(
                vkey_hash_to_field(&request.program_vkey_hash)?,
                public_values_digest(&request.public_values)?,
            ),
        })
    }
}

impl ProofVerifier for FixedVerifier {
    fn verify(
        &self,
        proof: &[u8],
        verifying_key: &[u8],
        witness: &PublicWitness,
    ) -> Result<(), VerifierError> {
        if verifying_key != self.verifying_key.as_slice() {
            return Err(VerifierError::Malformed {
                reason: "unknown verifying key".to_string(),
            });
        }
        if proof != self.proof.as_slice() || witness != &self.witness {
            return Err(VerifierError::Rejected {
                reason: "proof does not match witness".to_string(),
            });
        }
        Ok(())
    }
}

/// Light-client shaped guest
///
/// Slots: 0 initialized, 1 frozen, 2 guardian, 3 genesis payload,
/// 4 initializer timestamp, 5 last accepted commitment. The deallocator
/// counts frees in the `i32` at address 8.
pub const GUEST_WAT: &str = r#"
(module
  (import "env" "stateGetBytes" (func $get (param i32) (result i64)))
  (import "env" "stateStoreBytes" (func $put (param i32 i32 i32)))
  (import "env" "stateGetDynamicBytes" (func $get_dyn (param i32 i32 i32) (result i64)))
  (import "env" "stateStoreDynamicBytes" (func $put_dyn (param i32 i32 i32 i32 i32)))
  (import "precompiles" "gnarkVerify" (func $verify (param i32 i32) (result i32)))
  (import "precompiles" "addBalance" (func $add_balance))
  (import "precompiles" "subBalance" (func $sub_balance))

  (memory (export "memory") 2)
  (global $heap (mut i32) (i32.const 1024))
  (data (i32.const 16) "\01")

  (func (export "allocate_ptr") (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap
      (i32.and
        (i32.add (i32.add (local.get $ptr) (local.get $len)) (i32.const 7))
        (i32.const -8)))
    (if (i32.gt_u (global.get $heap) (i32.const 131072))
      (then unreachable))
    (local.get $ptr))

  (func (export "deallocate_ptr") (param $ptr i32) (param $len i32)
    (i32.store (i32.const 8)
      (i32.add (i32.load (i32.const 8)) (i32.const 1))))

  ;; first byte of a static slot, 0 when unset
  (func $flag (param $slot i32) (result i32)
    (local $packed i64)
    (local.set $packed (call $get (local.get $slot)))
    (if (result i32) (i64.eqz (i64.and (local.get $packed) (i64.const 0xffffffff)))
      (then (i32.const 0))
      (else (i32.load8_u (i32.wrap_i64 (i64.shr_u (local.get $packed) (i64.const 32)))))))

  (func $eq33 (param $a i32) (param $b i32) (result i32)
    (local $i i32)
    (block $done
      (loop $next
        (br_if $done (i32.ge_u (local.get $i) (i32.const 33)))
        (if (i32.ne
              (i32.load8_u (i32.add (local.get $a) (local.get $i)))
              (i32.load8_u (i32.add (local.get $b) (local.get $i))))
          (then (return (i32.const 0))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next)))
    (i32.const 1))

  (func $is_guardian (param $ctx i32) (result i32)
    (local $packed i64)
    (local.set $packed (call $get (i32.const 2)))
    (if (i64.ne (i64.and (local.get $packed) (i64.const 0xffffffff)) (i64.const 33))
      (then (return (i32.const 0))))
    (call $eq33
      (i32.wrap_i64 (i64.shr_u (local.get $packed) (i64.const 32)))
      (i32.load offset=8 (local.get $ctx))))

  (func (export "initializer") (param $ctx i32) (param $ptr i32) (param $len i32) (result i32)
    (if (call $flag (i32.const 0))
      (then (return (i32.const 0))))
    (call $put (i32.const 2) (i32.load offset=8 (local.get $ctx)) (i32.const 33))
    (call $put (i32.const 3) (local.get $ptr) (local.get $len))
    (call $put (i32.const 4) (local.get $ctx) (i32.const 8))
    (call $put (i32.const 0) (i32.const 16) (i32.const 1))
    (i32.const 1))

  (func (export "update_freeze") (param $ctx i32) (param $ptr i32) (param $len i32) (result i32)
    (if (i32.eqz (call $flag (i32.const 0)))
      (then (return (i32.const 0))))
    (if (i32.eqz (call $is_guardian (local.get $ctx)))
      (then (return (i32.const 0))))
    (if (i32.lt_u (local.get $len) (i32.const 32))
      (then (return (i32.const 0))))
    (call $put (i32.const 1) (i32.add (local.get $ptr) (i32.const 31)) (i32.const 1))
    (i32.const 1))

  (func (export "commit_header_range") (param $ctx i32) (param $ptr i32) (param $len i32) (result i32)
    (local $ok i32)
    (if (i32.eqz (call $flag (i32.const 0)))
      (then (return (i32.const 0))))
    (if (call $flag (i32.const 1))
      (then (return (i32.const 0))))
    (local.set $ok (call $verify (local.get $ptr) (local.get $len)))
    (if (local.get $ok)
      (then (call $put (i32.const 5) (local.get $ptr) (local.get $len))))
    (local.get $ok))

  (func (export "set_balance") (param $ctx i32) (param $ptr i32) (param $len i32) (result i32)
    (call $put_dyn
      (i32.const 7)
      (i32.load offset=8 (local.get $ctx))
      (i32.const 33)
      (local.get $ptr)
      (local.get $len))
    (i32.const 1))

  (func (export "balance_of") (param $ctx i64) (param $ptr i32) (param $len i64) (result i64)
    (local $packed i64)
    (local.set $packed
      (call $get_dyn
        (i32.const 7)
        (i32.load offset=8 (i32.wrap_i64 (local.get $ctx)))
        (i32.const 33)))
    (call $put
      (i32.const 8)
      (i32.wrap_i64 (i64.shr_u (local.get $packed) (i64.const 32)))
      (i32.wrap_i64 (local.get $packed)))
    (i64.extend_i32_u
      (i64.ne (i64.and (local.get $packed) (i64.const 0xffffffff)) (i64.const 0))))

  (func (export "echo_len") (param $ptr i32) (param $len i64) (result i64)
    (local.get $len))

  (func (export "corrupt_store") (param $ctx i32) (param $ptr i32) (param $len i32) (result i32)
    (call $put (i32.const 10) (local.get $ptr) (local.get $len))
    (call $put (i32.const 9) (i32.const -16) (i32.const 64))
    (i32.const 1))

  (func (export "touch_balance") (param $ctx i32) (param $ptr i32) (param $len i32) (result i32)
    (call $add_balance)
    (call $sub_balance)
    (i32.const 1))

  (func (export "spin") (param $ctx i32) (param $ptr i32) (param $len i32) (result i32)
    (loop $forever
      (br $forever))
    (i32.const 0))

  (func (export "float_entry") (param f32 i32 i32) (result i32)
    (i32.const 1))
)
"#;
