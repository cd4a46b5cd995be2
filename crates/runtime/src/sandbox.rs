//! Host function registry
//!
//! The guest sees a fixed import surface: storage under `env`, the proof
//! precompile and accounting hooks under `precompiles`. Each part is a trait
//! with one concrete service, gated by a [`Capability`]. [`HostState`] carries
//! the services, store limits, and the guest allocator bound after
//! instantiation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use wasmtime::{Caller, FuncType, Linker, StoreLimits, StoreLimitsBuilder, ValType};

use crate::memory::{GuestBindings, GuestMemory, MemoryError, WasmMemory};
use crate::precompiles::{AccountingHooks, ProofVerificationService};
use crate::storage::StorageService;

/// Import module of the storage functions
pub const STATE_MODULE: &str = "env";
/// Import module of the precompiles and accounting hooks
pub const PRECOMPILE_MODULE: &str = "precompiles";

/// Host capabilities that can be granted to a guest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Contract storage
    State,
    /// zk proof verification
    Precompiles,
    /// Balance hooks (reserved)
    Accounting,
}

impl Capability {
    pub fn all() -> Vec<Capability> {
        vec![Capability::State, Capability::Precompiles, Capability::Accounting]
    }

    pub fn description(&self) -> &'static str {
        match self {
            Capability::State => "Static and mapping storage slots",
            Capability::Precompiles => "zk proof verification precompile",
            Capability::Accounting => "Reserved balance transfer hooks",
        }
    }
}

/// Scalar type at the import boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmKind {
    I32,
    I64,
}

impl WasmKind {
    pub fn matches(&self, ty: &ValType) -> bool {
        matches!(
            (self, ty),
            (WasmKind::I32, ValType::I32) | (WasmKind::I64, ValType::I64)
        )
    }
}

fn kinds_match(kinds: &[WasmKind], types: impl ExactSizeIterator<Item = ValType>) -> bool {
    kinds.len() == types.len() && kinds.iter().zip(types).all(|(kind, ty)| kind.matches(&ty))
}

/// One entry of the import surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostImport {
    pub module: &'static str,
    pub name: &'static str,
    pub capability: Capability,
    pub params: &'static [WasmKind],
    pub results: &'static [WasmKind],
}

impl HostImport {
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.module, self.name)
    }

    /// Whether `ty` is the signature the host links under this name
    pub fn matches_type(&self, ty: &FuncType) -> bool {
        kinds_match(self.params, ty.params()) && kinds_match(self.results, ty.results())
    }

    pub fn signature(&self) -> String {
        format!("{:?} -> {:?}", self.params, self.results)
    }
}

/// Every import the host can provide
pub const IMPORT_SURFACE: &[HostImport] = &[
    HostImport {
        module: STATE_MODULE,
        name: "stateGetBytes",
        capability: Capability::State,
        params: &[WasmKind::I32],
        results: &[WasmKind::I64],
    },
    HostImport {
        module: STATE_MODULE,
        name: "stateStoreBytes",
        capability: Capability::State,
        params: &[WasmKind::I32, WasmKind::I32, WasmKind::I32],
        results: &[],
    },
    HostImport {
        module: STATE_MODULE,
        name: "stateGetDynamicBytes",
        capability: Capability::State,
        params: &[WasmKind::I32, WasmKind::I32, WasmKind::I32],
        results: &[WasmKind::I64],
    },
    HostImport {
        module: STATE_MODULE,
        name: "stateStoreDynamicBytes",
        capability: Capability::State,
        params: &[
            WasmKind::I32,
            WasmKind::I32,
            WasmKind::I32,
            WasmKind::I32,
            WasmKind::I32,
        ],
        results: &[],
    },
    HostImport {
        module: PRECOMPILE_MODULE,
        name: "gnarkVerify",
        capability: Capability::Precompiles,
        params: &[WasmKind::I32, WasmKind::I32],
        results: &[WasmKind::I32],
    },
    HostImport {
        module: PRECOMPILE_MODULE,
        name: "addBalance",
        capability: Capability::Accounting,
        params: &[],
        results: &[],
    },
    HostImport {
        module: PRECOMPILE_MODULE,
        name: "subBalance",
        capability: Capability::Accounting,
        params: &[],
        results: &[],
    },
];

/// Resource limits for one guest instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum linear memory in MB
    pub memory_limit_mb: u32,
    /// Fuel per entry-point call
    pub fuel_limit: u64,
    /// Granted capabilities
    pub capabilities: Vec<Capability>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_limit_mb: 64,
            fuel_limit: 5_000_000_000,
            capabilities: Capability::all(),
        }
    }
}

impl ResourceLimits {
    /// Generous limits for local runs
    pub fn development() -> Self {
        Self {
            memory_limit_mb: 256,
            fuel_limit: u64::MAX,
            capabilities: Capability::all(),
        }
    }

    /// Storage and proofs only, tighter memory
    pub fn production() -> Self {
        Self {
            memory_limit_mb: 32,
            fuel_limit: 2_000_000_000,
            capabilities: vec![Capability::State, Capability::Precompiles],
        }
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn add_capability(&mut self, capability: Capability) {
        if !self.has_capability(capability) {
            self.capabilities.push(capability);
        }
    }

    pub fn remove_capability(&mut self, capability: Capability) {
        self.capabilities.retain(|&c| c != capability);
    }

    pub fn memory_limit_bytes(&self) -> usize {
        self.memory_limit_mb as usize * 1024 * 1024
    }
}

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Import {import} is not provided by the host")]
    ImportNotAllowed { import: String },

    #[error("Import {import} needs capability {capability:?}, which is not granted")]
    CapabilityNotGranted { import: String, capability: Capability },

    #[error("Failed to link {import}: {reason}")]
    LinkFailed { import: String, reason: String },
}

/// Storage functions under `env`
pub trait StateImports: Send + Sync {
    /// `stateGetBytes(slot) -> packed`
    fn get_static(&self, memory: &mut dyn GuestMemory, id: u32) -> Result<u64, MemoryError>;

    /// `stateStoreBytes(slot, ptr, len)`
    fn store_static(
        &self,
        memory: &mut dyn GuestMemory,
        id: u32,
        ptr: u32,
        len: u32,
    ) -> Result<(), MemoryError>;

    /// `stateGetDynamicBytes(slot, keyPtr, keyLen) -> packed`
    fn get_dynamic(
        &self,
        memory: &mut dyn GuestMemory,
        id: u32,
        key_ptr: u32,
        key_len: u32,
    ) -> Result<u64, MemoryError>;

    /// `stateStoreDynamicBytes(slot, keyPtr, keyLen, valPtr, valLen)`
    fn store_dynamic(
        &self,
        memory: &mut dyn GuestMemory,
        id: u32,
        key_ptr: u32,
        key_len: u32,
        value_ptr: u32,
        value_len: u32,
    ) -> Result<(), MemoryError>;
}

/// Proof verification under `precompiles`
pub trait PrecompileImports: Send + Sync {
    /// `gnarkVerify(ptr, len) -> 0 | 1`
    fn verify(&self, memory: &mut dyn GuestMemory, ptr: u32, len: u32) -> Result<u32, MemoryError>;
}

/// Balance hooks under `precompiles`
pub trait AccountingImports: Send + Sync {
    fn add_balance(&self);
    fn sub_balance(&self);
}

/// Concrete services behind the import surface
#[derive(Clone)]
pub struct HostServices {
    pub state: Arc<dyn StateImports>,
    pub precompiles: Arc<dyn PrecompileImports>,
    pub accounting: Arc<dyn AccountingImports>,
}

impl HostServices {
    pub fn new(storage: StorageService, proofs: ProofVerificationService) -> Self {
        Self {
            state: Arc::new(storage),
            precompiles: Arc::new(proofs),
            accounting: Arc::new(AccountingHooks),
        }
    }
}

/// Per-store host data
pub struct HostState {
    services: HostServices,
    pub(crate) guest: GuestBindings,
    limits: StoreLimits,
    host_calls: u64,
}

impl HostState {
    pub fn new(services: HostServices, limits: &ResourceLimits) -> Self {
        Self {
            services,
            guest: GuestBindings::default(),
            limits: StoreLimitsBuilder::new()
                .memory_size(limits.memory_limit_bytes())
                .build(),
            host_calls: 0,
        }
    }

    /// Host functions invoked so far on this store
    pub fn host_calls(&self) -> u64 {
        self.host_calls
    }

    pub fn guest(&self) -> &GuestBindings {
        &self.guest
    }

    pub(crate) fn guest_mut(&mut self) -> &mut GuestBindings {
        &mut self.guest
    }

    pub(crate) fn limits_mut(&mut self) -> &mut StoreLimits {
        &mut self.limits
    }

    fn enter(&mut self) -> HostServices {
        self.host_calls += 1;
        self.services.clone()
    }
}

fn violation(import: &str, err: MemoryError) -> wasmtime::Error {
    error!(import, error = %err, "Protocol violation, trapping guest");
    wasmtime::Error::new(err)
}

/// Links the granted part of [`IMPORT_SURFACE`]
#[derive(Debug, Clone)]
pub struct HostFunctionRegistry {
    capabilities: Vec<Capability>,
}

impl HostFunctionRegistry {
    pub fn new(limits: &ResourceLimits) -> Self {
        Self {
            capabilities: limits.capabilities.clone(),
        }
    }

    pub fn grants(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Imports this registry will link
    pub fn imports(&self) -> impl Iterator<Item = &'static HostImport> + '_ {
        IMPORT_SURFACE
            .iter()
            .filter(move |import| self.grants(import.capability))
    }

    /// Resolve a guest import against the granted surface
    pub fn check_import(&self, module: &str, name: &str) -> Result<&'static HostImport, SandboxError> {
        let import = IMPORT_SURFACE
            .iter()
            .find(|import| import.module == module && import.name == name)
            .ok_or_else(|| SandboxError::ImportNotAllowed {
                import: format!("{}::{}", module, name),
            })?;

        if !self.grants(import.capability) {
            return Err(SandboxError::CapabilityNotGranted {
                import: import.qualified_name(),
                capability: import.capability,
            });
        }
        Ok(import)
    }

    pub fn link(&self, linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
        if self.grants(Capability::State) {
            self.link_state(linker)?;
        }
        if self.grants(Capability::Precompiles) {
            self.link_precompiles(linker)?;
        }
        if self.grants(Capability::Accounting) {
            self.link_accounting(linker)?;
        }
        Ok(())
    }

    fn link_state(&self, linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
        linker
            .func_wrap(
                STATE_MODULE,
                "stateGetBytes",
                |mut caller: Caller<'_, HostState>, slot: u32| -> wasmtime::Result<u64> {
                    let services = caller.data_mut().enter();
                    let mut memory = WasmMemory::new(&mut caller)
                        .map_err(|e| violation("stateGetBytes", e))?;
                    services
                        .state
                        .get_static(&mut memory, slot)
                        .map_err(|e| violation("stateGetBytes", e))
                },
            )
            .map_err(|e| link_failed("stateGetBytes", e))?;

        linker
            .func_wrap(
                STATE_MODULE,
                "stateStoreBytes",
                |mut caller: Caller<'_, HostState>, slot: u32, ptr: u32, len: u32| -> wasmtime::Result<()> {
                    let services = caller.data_mut().enter();
                    let mut memory = WasmMemory::new(&mut caller)
                        .map_err(|e| violation("stateStoreBytes", e))?;
                    services
                        .state
                        .store_static(&mut memory, slot, ptr, len)
                        .map_err(|e| violation("stateStoreBytes", e))
                },
            )
            .map_err(|e| link_failed("stateStoreBytes", e))?;

        linker
            .func_wrap(
                STATE_MODULE,
                "stateGetDynamicBytes",
                |mut caller: Caller<'_, HostState>, slot: u32, key_ptr: u32, key_len: u32| -> wasmtime::Result<u64> {
                    let services = caller.data_mut().enter();
                    let mut memory = WasmMemory::new(&mut caller)
                        .map_err(|e| violation("stateGetDynamicBytes", e))?;
                    services
                        .state
                        .get_dynamic(&mut memory, slot, key_ptr, key_len)
                        .map_err(|e| violation("stateGetDynamicBytes", e))
                },
            )
            .map_err(|e| link_failed("stateGetDynamicBytes", e))?;

        linker
            .func_wrap(
                STATE_MODULE,
                "stateStoreDynamicBytes",
                |mut caller: Caller<'_, HostState>,
                 slot: u32,
                 key_ptr: u32,
                 key_len: u32,
                 value_ptr: u32,
                 value_len: u32|
                 -> wasmtime::Result<()> {
                    let services = caller.data_mut().enter();
                    let mut memory = WasmMemory::new(&mut caller)
                        .map_err(|e| violation("stateStoreDynamicBytes", e))?;
                    services
                        .state
                        .store_dynamic(&mut memory, slot, key_ptr, key_len, value_ptr, value_len)
                        .map_err(|e| violation("stateStoreDynamicBytes", e))
                },
            )
            .map_err(|e| link_failed("stateStoreDynamicBytes", e))?;

        Ok(())
    }

    fn link_precompiles(&self, linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
        linker
            .func_wrap(
                PRECOMPILE_MODULE,
                "gnarkVerify",
                |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> wasmtime::Result<u32> {
                    let services = caller.data_mut().enter();
                    let mut memory = WasmMemory::new(&mut caller)
                        .map_err(|e| violation("gnarkVerify", e))?;
                    services
                        .precompiles
                        .verify(&mut memory, ptr, len)
                        .map_err(|e| violation("gnarkVerify", e))
                },
            )
            .map_err(|e| link_failed("gnarkVerify", e))?;
        Ok(())
    }

    fn link_accounting(&self, linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
        linker
            .func_wrap(PRECOMPILE_MODULE, "addBalance", |mut caller: Caller<'_, HostState>| {
                caller.data_mut().enter().accounting.add_balance();
            })
            .map_err(|e| link_failed("addBalance", e))?;

        linker
            .func_wrap(PRECOMPILE_MODULE, "subBalance", |mut caller: Caller<'_, HostState>| {
                caller.data_mut().enter().accounting.sub_balance();
            })
            .map_err(|e| link_failed("subBalance", e))?;
        Ok(())
    }
}

fn link_failed(name: &str, err: wasmtime::Error) -> SandboxError {
    SandboxError::LinkFailed {
        import: name.to_string(),
        reason: err.to_string(),
    }
}
