//! Guest module validation
//!
//! Checks a guest before it is instantiated: size, that it compiles, that it
//! exports linear memory and the allocator pair, and that every import is a
//! granted entry of the host import surface with the exact signature the host
//! links.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wasmtime::{Engine, ExternType, FuncType, Module, ValType};

use crate::execution::EntryPoint;
use crate::sandbox::{HostFunctionRegistry, ResourceLimits, SandboxError};

/// Maximum guest module size in bytes (4MB default, configurable)
pub const DEFAULT_MAX_MODULE_SIZE: usize = 4 * 1024 * 1024;

/// Names of the guest exports the host relies on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestExports {
    pub memory: String,
    pub allocate: String,
    pub deallocate: String,
}

impl Default for GuestExports {
    fn default() -> Self {
        Self {
            memory: "memory".to_string(),
            allocate: "allocate_ptr".to_string(),
            deallocate: "deallocate_ptr".to_string(),
        }
    }
}

/// Validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Module size {size} bytes exceeds maximum {max_size} bytes")]
    SizeExceeded { size: usize, max_size: usize },

    #[error("Missing required export: {export}")]
    MissingRequiredExport { export: String },

    #[error("Export {export} has the wrong type: expected {expected}")]
    ExportTypeMismatch { export: String, expected: String },

    #[error("Unauthorized import {import}: {reason}")]
    UnauthorizedImport { import: String, reason: String },

    #[error("Import {import} has signature {actual}, host provides {expected}")]
    ImportSignatureMismatch {
        import: String,
        expected: String,
        actual: String,
    },

    #[error("Module compilation failed: {reason}")]
    CompilationFailed { reason: String },
}

/// Outcome of validating one module
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the module passed validation
    pub is_valid: bool,
    /// Size of the module in bytes
    pub size_bytes: usize,
    /// Size of the module in KB
    pub size_kb: f64,
    /// Export names found in the module
    pub exports: Vec<String>,
    /// Imports found, as `module::name`
    pub imports: Vec<String>,
    /// Known light-client entry points the module exports
    pub entry_points: Vec<EntryPoint>,
    /// Non-fatal findings
    pub warnings: Vec<String>,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn success(size_bytes: usize, exports: Vec<String>, imports: Vec<String>) -> Self {
        Self {
            is_valid: true,
            size_bytes,
            size_kb: size_bytes as f64 / 1024.0,
            entry_points: exports.iter().filter_map(|name| name.parse().ok()).collect(),
            exports,
            imports,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn failure(size_bytes: usize, errors: Vec<ValidationError>) -> Self {
        Self {
            is_valid: false,
            size_bytes,
            size_kb: size_bytes as f64 / 1024.0,
            exports: Vec::new(),
            imports: Vec::new(),
            entry_points: Vec::new(),
            warnings: Vec::new(),
            errors,
        }
    }
}

/// Configuration for the guest validator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Maximum module size in bytes
    pub max_size_bytes: usize,
    /// Reject imports outside the granted surface
    pub strict_imports: bool,
    /// Require memory and allocator exports
    pub require_standard_exports: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_MODULE_SIZE,
            strict_imports: true,
            require_standard_exports: true,
        }
    }
}

/// Guest validator bound to one engine and import surface
pub struct WasmValidator {
    engine: Engine,
    config: ValidatorConfig,
    exports: GuestExports,
    registry: HostFunctionRegistry,
}

impl WasmValidator {
    /// Validator with default settings on a default engine
    pub fn new() -> Result<Self> {
        Ok(Self::with_engine(
            Engine::default(),
            ValidatorConfig::default(),
            GuestExports::default(),
            HostFunctionRegistry::new(&ResourceLimits::default()),
        ))
    }

    pub fn with_config(config: ValidatorConfig) -> Result<Self> {
        let mut validator = Self::new()?;
        validator.config = config;
        Ok(validator)
    }

    /// Validator sharing an existing engine
    pub fn with_engine(
        engine: Engine,
        config: ValidatorConfig,
        exports: GuestExports,
        registry: HostFunctionRegistry,
    ) -> Self {
        Self {
            engine,
            config,
            exports,
            registry,
        }
    }

    /// Validate a module from bytes (binary or text format)
    pub fn validate(&self, wasm_bytes: &[u8]) -> Result<ValidationResult> {
        let size_bytes = wasm_bytes.len();

        if size_bytes > self.config.max_size_bytes {
            return Ok(ValidationResult::failure(
                size_bytes,
                vec![ValidationError::SizeExceeded {
                    size: size_bytes,
                    max_size: self.config.max_size_bytes,
                }],
            ));
        }

        let module = match Module::new(&self.engine, wasm_bytes) {
            Ok(module) => module,
            Err(e) => {
                return Ok(ValidationResult::failure(
                    size_bytes,
                    vec![ValidationError::CompilationFailed {
                        reason: format!("{:#}", e),
                    }],
                ));
            }
        };

        Ok(self.validate_module(&module, size_bytes))
    }

    /// Validate an already compiled module
    pub fn validate_module(&self, module: &Module, size_bytes: usize) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if size_bytes > self.config.max_size_bytes {
            errors.push(ValidationError::SizeExceeded {
                size: size_bytes,
                max_size: self.config.max_size_bytes,
            });
        } else if size_bytes > self.config.max_size_bytes * 80 / 100 {
            warnings.push(format!(
                "Module size ({:.1}KB) is approaching limit ({:.1}KB)",
                size_bytes as f64 / 1024.0,
                self.config.max_size_bytes as f64 / 1024.0
            ));
        }

        let exports: Vec<String> = module.exports().map(|e| e.name().to_string()).collect();
        let imports: Vec<String> = module
            .imports()
            .map(|i| format!("{}::{}", i.module(), i.name()))
            .collect();

        if self.config.require_standard_exports {
            self.check_exports(module, &mut errors, &mut warnings);
        }
        if self.config.strict_imports {
            self.check_imports(module, &mut errors);
        }

        if errors.is_empty() {
            let mut result = ValidationResult::success(size_bytes, exports, imports);
            if result.entry_points.is_empty() {
                warnings.push("Module exports no known entry point".to_string());
            }
            result.warnings = warnings;
            result
        } else {
            ValidationResult::failure(size_bytes, errors)
        }
    }

    fn check_exports(&self, module: &Module, errors: &mut Vec<ValidationError>, warnings: &mut Vec<String>) {
        match module.get_export(&self.exports.memory) {
            Some(ExternType::Memory(_)) => {}
            Some(_) => errors.push(ValidationError::ExportTypeMismatch {
                export: self.exports.memory.clone(),
                expected: "memory".to_string(),
            }),
            None => errors.push(ValidationError::MissingRequiredExport {
                export: self.exports.memory.clone(),
            }),
        }

        match module.get_export(&self.exports.allocate) {
            Some(ExternType::Func(ty)) => {
                let params: Vec<ValType> = ty.params().collect();
                let results: Vec<ValType> = ty.results().collect();
                if !matches!(params.as_slice(), [ValType::I32]) || !matches!(results.as_slice(), [ValType::I32]) {
                    errors.push(ValidationError::ExportTypeMismatch {
                        export: self.exports.allocate.clone(),
                        expected: "func (i32) -> i32".to_string(),
                    });
                }
            }
            Some(_) => errors.push(ValidationError::ExportTypeMismatch {
                export: self.exports.allocate.clone(),
                expected: "func (i32) -> i32".to_string(),
            }),
            None => errors.push(ValidationError::MissingRequiredExport {
                export: self.exports.allocate.clone(),
            }),
        }

        if module.get_export(&self.exports.deallocate).is_none() {
            warnings.push(format!(
                "No {} export, call regions will not be reclaimed",
                self.exports.deallocate
            ));
        }
    }

    fn check_imports(&self, module: &Module, errors: &mut Vec<ValidationError>) {
        for import in module.imports() {
            let name = format!("{}::{}", import.module(), import.name());

            let expected = match self.registry.check_import(import.module(), import.name()) {
                Ok(expected) => expected,
                Err(e) => {
                    let reason = match e {
                        SandboxError::CapabilityNotGranted { capability, .. } => {
                            format!("capability {:?} not granted", capability)
                        }
                        _ => "not part of the host import surface".to_string(),
                    };
                    errors.push(ValidationError::UnauthorizedImport { import: name, reason });
                    continue;
                }
            };

            match import.ty() {
                ExternType::Func(ty) if expected.matches_type(&ty) => {}
                ExternType::Func(ty) => errors.push(ValidationError::ImportSignatureMismatch {
                    import: name,
                    expected: expected.signature(),
                    actual: describe(&ty),
                }),
                _ => errors.push(ValidationError::ImportSignatureMismatch {
                    import: name,
                    expected: expected.signature(),
                    actual: "non-function import".to_string(),
                }),
            }
        }
    }
}

fn describe(ty: &FuncType) -> String {
    format!(
        "{:?} -> {:?}",
        ty.params().collect::<Vec<_>>(),
        ty.results().collect::<Vec<_>>()
    )
}

/// Validate guest bytes with default settings
pub fn validate_guest(wasm_bytes: &[u8]) -> Result<ValidationResult> {
    WasmValidator::new()?.validate(wasm_bytes)
}
