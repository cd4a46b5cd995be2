//! Guest execution engine
//!
//! [`GuestRuntime`] owns the engine, validates and compiles guest modules and
//! brings instances up in two phases: host functions are linked against an
//! unbound [`HostState`], the guest is instantiated, then its memory and
//! allocator are bound. [`GuestInstance::call`] drives one entry point:
//! context and payload are written through the guest allocator, the export is
//! invoked with whatever scalar widths it declares, and the regions are
//! released afterwards.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use seqwasm_protocol::{Address, CallPayload};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use wasmtime::{Config, Engine, Instance, Linker, Module, Store, Val, ValType};

use crate::context;
use crate::memory::{write_bytes, GuestMemory, MemoryError, MemoryRegion, WasmMemory};
use crate::precompiles::{ProofEncoding, ProofVerificationService};
use crate::sandbox::{HostFunctionRegistry, HostServices, HostState, ResourceLimits, SandboxError};
use crate::storage::{SharedStorage, StorageService};
use crate::validation::{GuestExports, ValidationError, ValidatorConfig, WasmValidator};
use crate::verifier::ProofVerifier;

/// Maximum call payload size in bytes (1MB)
const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Validation failed: {source}")]
    ValidationFailed { source: ValidationError },

    #[error("Module compilation failed: {reason}")]
    CompilationFailed { reason: String },

    #[error("Host linking failed: {source}")]
    Link { source: SandboxError },

    #[error("Module instantiation failed: {reason}")]
    InstantiationFailed { reason: String },

    #[error("Guest does not export {name}")]
    MissingExport { name: String },

    #[error("Export {name} has an unsupported signature: {reason}")]
    UnsupportedSignature { name: String, reason: String },

    #[error("Entry point {entry} takes a transaction context but none was supplied")]
    MissingContext { entry: String },

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Guest memory protocol violated: {source}")]
    Memory { source: MemoryError },

    #[error("Guest trapped in {entry}: {reason}")]
    Trap { entry: String, reason: String },

    #[error("Fuel accounting failed: {reason}")]
    Fuel { reason: String },
}

impl ExecutionError {
    /// Protocol violations that must abort the driver
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutionError::Trap { .. } | ExecutionError::Memory { .. })
    }
}

impl From<MemoryError> for ExecutionError {
    fn from(source: MemoryError) -> Self {
        ExecutionError::Memory { source }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Whether to enable fuel metering
    pub enable_fuel: bool,
    /// Maximum call payload size
    pub max_payload_size: usize,
    /// How proofs are carried in verification requests
    pub proof_encoding: ProofEncoding,
    /// Guest export names
    pub exports: GuestExports,
    /// Per-instance resource limits
    pub limits: ResourceLimits,
    /// Module validation policy
    pub validator: ValidatorConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enable_fuel: true,
            max_payload_size: MAX_PAYLOAD_SIZE,
            proof_encoding: ProofEncoding::default(),
            exports: GuestExports::default(),
            limits: ResourceLimits::default(),
            validator: ValidatorConfig::default(),
        }
    }
}

/// Light-client entry points a guest may export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    Initializer,
    CommitHeaderRange,
    UpdateGenesisState,
    UpdateProgramVkey,
    UpdateFreeze,
    VerifyAttestation,
}

impl EntryPoint {
    pub fn all() -> &'static [EntryPoint] {
        &[
            EntryPoint::Initializer,
            EntryPoint::CommitHeaderRange,
            EntryPoint::UpdateGenesisState,
            EntryPoint::UpdateProgramVkey,
            EntryPoint::UpdateFreeze,
            EntryPoint::VerifyAttestation,
        ]
    }

    /// Export name in the guest module
    pub fn export_name(&self) -> &'static str {
        match self {
            EntryPoint::Initializer => "initializer",
            EntryPoint::CommitHeaderRange => "commit_header_range",
            EntryPoint::UpdateGenesisState => "update_genesis_state",
            EntryPoint::UpdateProgramVkey => "update_program_vkey",
            EntryPoint::UpdateFreeze => "update_freeze",
            EntryPoint::VerifyAttestation => "verify_attestation",
        }
    }

    /// Whether the entry point changes light-client state
    pub fn is_mutating(&self) -> bool {
        !matches!(self, EntryPoint::VerifyAttestation)
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.export_name())
    }
}

impl FromStr for EntryPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.chars().filter(|c| *c != '_').collect::<String>().to_lowercase();
        EntryPoint::all()
            .iter()
            .copied()
            .find(|entry| entry.export_name().replace('_', "") == normalized)
            .ok_or_else(|| format!("unknown entry point: {}", s))
    }
}

/// Calling context supplied by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallContext {
    pub sender: Address,
    pub timestamp: i64,
}

impl CallContext {
    pub fn new(sender: Address, timestamp: i64) -> Self {
        Self { sender, timestamp }
    }
}

/// Result of one entry-point call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutcome {
    /// `1` success, `0` rejection
    pub result_code: u64,
    pub fuel_used: u64,
    pub host_calls: u64,
    pub duration_ms: u64,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        self.result_code == 1
    }
}

/// Scalar widths of an entry point
#[derive(Debug, Clone)]
struct EntrySignature {
    params: Vec<ValType>,
    result: ValType,
}

impl EntrySignature {
    fn takes_context(&self) -> bool {
        self.params.len() == 3
    }

    fn resolve(name: &str, params: Vec<ValType>, results: Vec<ValType>) -> Result<Self, ExecutionError> {
        let unsupported = |reason: &str| ExecutionError::UnsupportedSignature {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if params.len() != 2 && params.len() != 3 {
            return Err(unsupported("expected (ctx?, ptr, len) parameters"));
        }
        if !params.iter().all(is_integer) {
            return Err(unsupported("parameters must be i32 or i64"));
        }
        let result = match results.as_slice() {
            [ty] if is_integer(ty) => ty.clone(),
            _ => return Err(unsupported("expected a single i32 or i64 result")),
        };

        Ok(Self { params, result })
    }

    fn args(&self, values: &[u32]) -> Vec<Val> {
        self.params
            .iter()
            .zip(values)
            .map(|(ty, value)| match ty {
                ValType::I64 => Val::I64(i64::from(*value)),
                _ => Val::I32(*value as i32),
            })
            .collect()
    }

    fn result_slot(&self) -> Val {
        match self.result {
            ValType::I64 => Val::I64(0),
            _ => Val::I32(0),
        }
    }
}

fn is_integer(ty: &ValType) -> bool {
    matches!(ty, ValType::I32 | ValType::I64)
}

/// Main runtime for guest modules
pub struct GuestRuntime {
    engine: Engine,
    config: RuntimeConfig,
    validator: WasmValidator,
    registry: HostFunctionRegistry,
}

impl GuestRuntime {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> anyhow::Result<Self> {
        let mut wasmtime_config = Config::new();
        wasmtime_config.consume_fuel(config.enable_fuel);

        let engine = Engine::new(&wasmtime_config).context("Failed to create Wasmtime engine")?;
        let registry = HostFunctionRegistry::new(&config.limits);
        let validator = WasmValidator::with_engine(
            engine.clone(),
            config.validator.clone(),
            config.exports.clone(),
            registry.clone(),
        );

        Ok(Self {
            engine,
            config,
            validator,
            registry,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn validator(&self) -> &WasmValidator {
        &self.validator
    }

    /// Compile and validate a guest (binary or text format)
    pub fn load(&self, wasm_bytes: &[u8]) -> Result<Module, ExecutionError> {
        let module = Module::new(&self.engine, wasm_bytes).map_err(|e| ExecutionError::CompilationFailed {
            reason: format!("{:#}", e),
        })?;

        let result = self.validator.validate_module(&module, wasm_bytes.len());
        if let Some(first) = result.errors.into_iter().next() {
            return Err(ExecutionError::ValidationFailed { source: first });
        }
        for warning in &result.warnings {
            warn!(warning = %warning, "Guest validation warning");
        }

        Ok(module)
    }

    /// Host services over `storage` with the PLONK verifier
    pub fn services(&self, storage: SharedStorage) -> HostServices {
        HostServices::new(
            StorageService::new(storage),
            ProofVerificationService::plonk(self.config.proof_encoding),
        )
    }

    /// Host services over `storage` with a custom verifier backend
    pub fn services_with_verifier(&self, storage: SharedStorage, verifier: Arc<dyn ProofVerifier>) -> HostServices {
        HostServices::new(
            StorageService::new(storage),
            ProofVerificationService::new(verifier, self.config.proof_encoding),
        )
    }

    /// Instantiate a guest against the given services
    pub fn instantiate(&self, module: &Module, services: HostServices) -> Result<GuestInstance, ExecutionError> {
        let mut store = Store::new(&self.engine, HostState::new(services, &self.config.limits));
        store.limiter(|state| state.limits_mut());
        if self.config.enable_fuel {
            store
                .set_fuel(self.config.limits.fuel_limit)
                .map_err(|e| ExecutionError::Fuel { reason: e.to_string() })?;
        }

        let mut linker = Linker::new(&self.engine);
        self.registry
            .link(&mut linker)
            .map_err(|source| ExecutionError::Link { source })?;

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| ExecutionError::InstantiationFailed {
                reason: format!("{:#}", e),
            })?;

        let exports = &self.config.exports;
        let memory = instance
            .get_memory(&mut store, &exports.memory)
            .ok_or_else(|| ExecutionError::MissingExport {
                name: exports.memory.clone(),
            })?;
        let allocate = instance
            .get_typed_func::<u32, u32>(&mut store, &exports.allocate)
            .map_err(|e| ExecutionError::UnsupportedSignature {
                name: exports.allocate.clone(),
                reason: e.to_string(),
            })?;
        let deallocate = match instance.get_func(&mut store, &exports.deallocate) {
            Some(func) => Some(func.typed::<(u32, u32), ()>(&store).map_err(|e| {
                ExecutionError::UnsupportedSignature {
                    name: exports.deallocate.clone(),
                    reason: e.to_string(),
                }
            })?),
            None => {
                warn!(export = %exports.deallocate, "Guest has no deallocator, regions will leak");
                None
            }
        };

        store.data_mut().guest_mut().bind(memory, allocate, deallocate);
        info!(
            memory_bytes = memory.data_size(&store),
            fuel = self.config.enable_fuel,
            "Guest instance ready"
        );

        Ok(GuestInstance {
            store,
            instance,
            enable_fuel: self.config.enable_fuel,
            fuel_limit: self.config.limits.fuel_limit,
            max_payload_size: self.config.max_payload_size,
        })
    }

    /// Load, then instantiate with PLONK verification over `storage`
    pub fn instantiate_bytes(&self, wasm_bytes: &[u8], storage: SharedStorage) -> Result<GuestInstance, ExecutionError> {
        let module = self.load(wasm_bytes)?;
        self.instantiate(&module, self.services(storage))
    }
}

/// A live guest with its host state
pub struct GuestInstance {
    store: Store<HostState>,
    instance: Instance,
    enable_fuel: bool,
    fuel_limit: u64,
    max_payload_size: usize,
}

impl GuestInstance {
    pub fn call_entry(
        &mut self,
        entry: EntryPoint,
        ctx: Option<&CallContext>,
        payload: &CallPayload,
    ) -> Result<CallOutcome, ExecutionError> {
        self.call(entry.export_name(), ctx, payload)
    }

    /// Invoke the export `name` as an entry point
    ///
    /// A context is written only when the export takes one. A trap aborts the
    /// call; storage writes made before it stay in place.
    pub fn call(
        &mut self,
        name: &str,
        ctx: Option<&CallContext>,
        payload: &CallPayload,
    ) -> Result<CallOutcome, ExecutionError> {
        if payload.len() > self.max_payload_size {
            return Err(ExecutionError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }

        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| ExecutionError::MissingExport { name: name.to_string() })?;
        let ty = func.ty(&self.store);
        let signature = EntrySignature::resolve(name, ty.params().collect(), ty.results().collect())?;

        let ctx = match (signature.takes_context(), ctx) {
            (true, None) => {
                return Err(ExecutionError::MissingContext {
                    entry: name.to_string(),
                })
            }
            (true, Some(ctx)) => Some(ctx),
            (false, _) => None,
        };

        if self.enable_fuel {
            self.store
                .set_fuel(self.fuel_limit)
                .map_err(|e| ExecutionError::Fuel { reason: e.to_string() })?;
        }
        let start = Instant::now();
        let calls_before = self.store.data().host_calls();

        let mut regions: Vec<MemoryRegion> = Vec::with_capacity(3);
        let mut values: Vec<u32> = Vec::with_capacity(3);
        {
            let mut memory = WasmMemory::new(&mut self.store)?;
            if let Some(ctx) = ctx {
                let written = context::build(&mut memory, &ctx.sender, ctx.timestamp)?;
                regions.extend(written.regions());
                values.push(written.context_ptr());
            }
            let payload_region = write_bytes(&mut memory, payload.as_bytes())?;
            regions.push(payload_region);
            values.push(payload_region.offset);
            values.push(payload_region.len);
        }

        let args = signature.args(&values);
        let mut results = [signature.result_slot()];
        if let Err(e) = func.call(&mut self.store, &args, &mut results) {
            let reason = format!("{:#}", e);
            error!(entry = name, reason = %reason, "Guest trapped, call aborted");
            return Err(ExecutionError::Trap {
                entry: name.to_string(),
                reason,
            });
        }

        let result_code = match results[0] {
            Val::I64(v) => v as u64,
            Val::I32(v) => u64::from(v as u32),
            _ => 0,
        };

        self.release(name, &regions)?;

        let fuel_used = if self.enable_fuel {
            self.fuel_limit
                .saturating_sub(self.store.get_fuel().unwrap_or(self.fuel_limit))
        } else {
            0
        };
        let outcome = CallOutcome {
            result_code,
            fuel_used,
            host_calls: self.store.data().host_calls() - calls_before,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        debug!(
            entry = name,
            result = outcome.result_code,
            fuel = outcome.fuel_used,
            host_calls = outcome.host_calls,
            "Entry point returned"
        );
        Ok(outcome)
    }

    fn release(&mut self, name: &str, regions: &[MemoryRegion]) -> Result<(), ExecutionError> {
        let Some(deallocate) = self.store.data().guest().deallocate_fn() else {
            return Ok(());
        };

        for region in regions.iter().filter(|r| r.len > 0) {
            deallocate
                .call(&mut self.store, (region.offset, region.len))
                .map_err(|e| ExecutionError::Trap {
                    entry: name.to_string(),
                    reason: format!("deallocate failed: {:#}", e),
                })?;
        }
        Ok(())
    }

    /// Copy bytes out of guest memory
    pub fn read_memory(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, ExecutionError> {
        let mut memory = WasmMemory::new(&mut self.store)?;
        Ok(memory.read(ptr, len)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::testing::{FixedVerifier, GUEST_WAT};
    use seqwasm_protocol::abi::{updateFreezeCall, UpdateFreezeInput};
    use seqwasm_protocol::{VerificationRequest, ADDRESS_LEN};
    use std::sync::Mutex;

    const FREED_COUNTER: u32 = 8;

    fn guardian() -> CallContext {
        CallContext::new(Address::new([0x07; ADDRESS_LEN]), 1_700_000_000)
    }

    fn stranger() -> CallContext {
        CallContext::new(Address::new([0x09; ADDRESS_LEN]), 1_700_000_100)
    }

    fn proof_request() -> VerificationRequest {
        VerificationRequest {
            program_vkey_hash: b"0x00c0ffee".to_vec(),
            public_values: b"trusted header 42 -> target header 99".to_vec(),
            proof_bytes: vec![0x33; 96],
            program_vkey: vec![0x44; 64],
        }
    }

    fn freeze(value: bool) -> CallPayload {
        CallPayload::from_call(&updateFreezeCall {
            inputs: UpdateFreezeInput { freeze: value },
        })
    }

    struct Harness {
        instance: GuestInstance,
        storage: SharedStorage,
    }

    fn harness_with(config: RuntimeConfig) -> Harness {
        let runtime = GuestRuntime::with_config(config).unwrap();
        let module = runtime.load(GUEST_WAT.as_bytes()).unwrap();
        let storage = Arc::new(Mutex::new(Storage::new()));
        let verifier = FixedVerifier::accepting(&proof_request()).unwrap();
        let services = runtime.services_with_verifier(Arc::clone(&storage), Arc::new(verifier));
        let instance = runtime.instantiate(&module, services).unwrap();
        Harness { instance, storage }
    }

    fn harness() -> Harness {
        harness_with(RuntimeConfig::default())
    }

    fn commit(h: &mut Harness, request: &VerificationRequest) -> u64 {
        h.instance
            .call_entry(
                EntryPoint::CommitHeaderRange,
                Some(&guardian()),
                &CallPayload::from_encoded(request.encode()),
            )
            .unwrap()
            .result_code
    }

    fn initialize(h: &mut Harness) -> CallOutcome {
        h.instance
            .call_entry(
                EntryPoint::Initializer,
                Some(&guardian()),
                &CallPayload::from_encoded(b"genesis".to_vec()),
            )
            .unwrap()
    }

    #[test]
    fn test_runtime_creation() {
        let runtime = GuestRuntime::new();
        assert!(runtime.is_ok());
    }

    #[test]
    fn test_host_call_from_start_function_fails_instantiation() {
        let wat = r#"(module
            (import "env" "stateStoreBytes" (func $put (param i32 i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "boot")
            (func (export "allocate_ptr") (param i32) (result i32) (i32.const 64))
            (func $boot (call $put (i32.const 1) (i32.const 0) (i32.const 4)))
            (start $boot))"#;

        let runtime = GuestRuntime::new().unwrap();
        let module = runtime.load(wat.as_bytes()).unwrap();
        let storage = Arc::new(Mutex::new(Storage::new()));
        let result = runtime.instantiate(&module, runtime.services(Arc::clone(&storage)));

        match result {
            Err(ExecutionError::InstantiationFailed { reason }) => assert!(reason.contains("not bound")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("start function reached storage before bind"),
        }
        assert!(storage.lock().unwrap().is_empty());
    }

    #[test]
    fn test_runtime_config_serde_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"proof_encoding": "hex_text"}"#).unwrap();
        assert_eq!(config.proof_encoding, ProofEncoding::HexText);
        assert!(config.enable_fuel);
        assert_eq!(config.max_payload_size, MAX_PAYLOAD_SIZE);
        assert_eq!(config.exports.allocate, "allocate_ptr");
    }

    #[test]
    fn test_entry_point_names() {
        assert_eq!(EntryPoint::CommitHeaderRange.export_name(), "commit_header_range");
        assert_eq!("commitHeaderRange".parse::<EntryPoint>().unwrap(), EntryPoint::CommitHeaderRange);
        assert_eq!("update_freeze".parse::<EntryPoint>().unwrap(), EntryPoint::UpdateFreeze);
        assert!("memory".parse::<EntryPoint>().is_err());
        assert!(!EntryPoint::VerifyAttestation.is_mutating());
    }

    #[test]
    fn test_load_rejects_invalid_guest() {
        let runtime = GuestRuntime::new().unwrap();
        let wat = r#"(module (import "env" "exit" (func)) (memory (export "memory") 1))"#;
        assert!(matches!(
            runtime.load(wat.as_bytes()),
            Err(ExecutionError::ValidationFailed { .. })
        ));
        assert!(matches!(
            runtime.load(b"\x00asm garbage"),
            Err(ExecutionError::CompilationFailed { .. })
        ));
    }

    #[test]
    fn test_initializer_records_guardian_and_context() {
        let mut h = harness();
        let outcome = initialize(&mut h);

        assert!(outcome.is_success());
        // flag read plus four writes
        assert_eq!(outcome.host_calls, 5);
        assert!(outcome.fuel_used > 0);

        let storage = h.storage.lock().unwrap();
        assert_eq!(storage.get_static(0), vec![1]);
        assert_eq!(storage.get_static(2), guardian().sender.as_bytes());
        assert_eq!(storage.get_static(3), b"genesis");
        assert_eq!(storage.get_static(4), guardian().timestamp.to_le_bytes());
    }

    #[test]
    fn test_second_initializer_rejected() {
        let mut h = harness();
        assert!(initialize(&mut h).is_success());
        assert_eq!(initialize(&mut h).result_code, 0);
    }

    #[test]
    fn test_commit_before_initializer_rejected() {
        let mut h = harness();
        assert_eq!(commit(&mut h, &proof_request()), 0);
    }

    #[test]
    fn test_freeze_gating() {
        let mut h = harness();
        initialize(&mut h);
        assert_eq!(commit(&mut h, &proof_request()), 1);

        let frozen = h
            .instance
            .call_entry(EntryPoint::UpdateFreeze, Some(&guardian()), &freeze(true))
            .unwrap();
        assert!(frozen.is_success());
        assert_eq!(commit(&mut h, &proof_request()), 0);

        let thawed = h
            .instance
            .call_entry(EntryPoint::UpdateFreeze, Some(&guardian()), &freeze(false))
            .unwrap();
        assert!(thawed.is_success());
        assert_eq!(commit(&mut h, &proof_request()), 1);
    }

    #[test]
    fn test_authorization_gating() {
        let mut h = harness();
        initialize(&mut h);

        let outcome = h
            .instance
            .call_entry(EntryPoint::UpdateFreeze, Some(&stranger()), &freeze(true))
            .unwrap();
        assert_eq!(outcome.result_code, 0);
        assert!(h.storage.lock().unwrap().get_static(1).is_empty());
        assert_eq!(commit(&mut h, &proof_request()), 1);
    }

    #[test]
    fn test_tampered_proof_rejected_end_to_end() {
        let mut h = harness();
        initialize(&mut h);

        let mut tampered = proof_request();
        tampered.proof_bytes[0] ^= 0xff;
        assert_eq!(commit(&mut h, &tampered), 0);

        let mut tampered = proof_request();
        tampered.public_values[5] ^= 0x01;
        assert_eq!(commit(&mut h, &tampered), 0);

        assert!(h.storage.lock().unwrap().get_static(5).is_empty());
    }

    #[test]
    fn test_garbage_request_rejected_end_to_end() {
        let mut h = harness();
        initialize(&mut h);
        let outcome = h
            .instance
            .call_entry(
                EntryPoint::CommitHeaderRange,
                Some(&guardian()),
                &CallPayload::from_encoded(vec![0xab; 40]),
            )
            .unwrap();
        assert_eq!(outcome.result_code, 0);
    }

    #[test]
    fn test_dynamic_storage_with_wide_signature() {
        let mut h = harness();
        let set = h
            .instance
            .call("set_balance", Some(&guardian()), &CallPayload::from_encoded(b"1000".to_vec()))
            .unwrap();
        assert!(set.is_success());

        let other = h
            .instance
            .call("balance_of", Some(&stranger()), &CallPayload::default())
            .unwrap();
        assert_eq!(other.result_code, 0);

        let own = h
            .instance
            .call("balance_of", Some(&guardian()), &CallPayload::default())
            .unwrap();
        assert_eq!(own.result_code, 1);

        let storage = h.storage.lock().unwrap();
        assert_eq!(storage.get_dynamic(7, guardian().sender.as_bytes()), b"1000");
        assert_eq!(storage.get_static(8), b"1000");
    }

    #[test]
    fn test_two_parameter_entry_needs_no_context() {
        let mut h = harness();
        let outcome = h
            .instance
            .call("echo_len", None, &CallPayload::from_encoded(vec![0; 77]))
            .unwrap();
        assert_eq!(outcome.result_code, 77);
        assert_eq!(outcome.host_calls, 0);
    }

    #[test]
    fn test_missing_context_rejected() {
        let mut h = harness();
        let err = h
            .instance
            .call_entry(EntryPoint::Initializer, None, &CallPayload::default())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::MissingContext { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_call_regions_are_released() {
        let mut h = harness();
        initialize(&mut h);
        let freed = h.instance.read_memory(FREED_COUNTER, 4).unwrap();
        assert_eq!(u32::from_le_bytes(freed.try_into().unwrap()), 3);

        h.instance
            .call("echo_len", None, &CallPayload::from_encoded(vec![1, 2]))
            .unwrap();
        let freed = h.instance.read_memory(FREED_COUNTER, 4).unwrap();
        assert_eq!(u32::from_le_bytes(freed.try_into().unwrap()), 4);
    }

    #[test]
    fn test_bad_pointer_traps_without_rollback() {
        let mut h = harness();
        let err = h
            .instance
            .call("corrupt_store", Some(&guardian()), &CallPayload::from_encoded(b"kept".to_vec()))
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Trap { .. }));
        assert!(err.is_fatal());
        assert_eq!(h.storage.lock().unwrap().get_static(10), b"kept");
    }

    #[test]
    fn test_fuel_exhaustion_traps() {
        let mut config = RuntimeConfig::default();
        config.limits.fuel_limit = 50_000;
        let mut h = harness_with(config);

        let err = h
            .instance
            .call("spin", Some(&guardian()), &CallPayload::default())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Trap { .. }));
    }

    #[test]
    fn test_accounting_hooks_are_callable() {
        let mut h = harness();
        let outcome = h
            .instance
            .call("touch_balance", Some(&guardian()), &CallPayload::default())
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.host_calls, 2);
        assert!(h.storage.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_and_unsupported_exports() {
        let mut h = harness();
        assert!(matches!(
            h.instance.call("missing", None, &CallPayload::default()),
            Err(ExecutionError::MissingExport { .. })
        ));
        assert!(matches!(
            h.instance.call("float_entry", Some(&guardian()), &CallPayload::default()),
            Err(ExecutionError::UnsupportedSignature { .. })
        ));
    }

    #[test]
    fn test_payload_size_limit() {
        let mut config = RuntimeConfig::default();
        config.max_payload_size = 16;
        let mut h = harness_with(config);
        let err = h
            .instance
            .call("echo_len", None, &CallPayload::from_encoded(vec![0; 17]))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::PayloadTooLarge { size: 17, max: 16 }));
    }
}
