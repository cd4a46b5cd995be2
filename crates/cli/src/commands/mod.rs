//! CLI command modules

pub mod call;
pub mod run;
pub mod validate;

pub use call::{execute_call_command, CallArgs};
pub use run::{execute_run_command, RunArgs};
pub use validate::validate_guest_file;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use seqwasm_protocol::{Address, CallPayload};
use seqwasm_runtime::{EntryPoint, ExecutionError, ResourceLimits, RuntimeConfig};

/// Named resource limit presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LimitsPreset {
    Development,
    Production,
}

impl LimitsPreset {
    pub fn limits(self) -> ResourceLimits {
        match self {
            LimitsPreset::Development => ResourceLimits::development(),
            LimitsPreset::Production => ResourceLimits::production(),
        }
    }
}

/// Where a command takes its runtime configuration from
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    pub path: Option<String>,
    /// Replaces the configured resource limits
    pub limits: Option<LimitsPreset>,
}

impl ConfigSource {
    pub fn load(&self) -> Result<RuntimeConfig> {
        let mut config = load_config(self.path.as_deref())?;
        if let Some(preset) = self.limits {
            config.limits = preset.limits();
        }
        Ok(config)
    }
}

/// Load a runtime configuration file, or defaults when none is given
pub fn load_config(path: Option<&str>) -> Result<RuntimeConfig> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse runtime config: {}", path))
}

/// Read a guest module from disk
pub fn read_guest(path: &str) -> Result<Vec<u8>> {
    if !Path::new(path).exists() {
        anyhow::bail!("Guest module not found: {}", path);
    }
    fs::read(path).with_context(|| format!("Failed to read guest module: {}", path))
}

/// Decode hex with an optional `0x` prefix
pub fn parse_hex(value: &str) -> Result<Vec<u8>> {
    let value = value.trim();
    let digits = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(digits).with_context(|| format!("Invalid hex: {}", value))
}

/// Build a payload from either selector-stripped bytes or full calldata
pub fn parse_payload(payload: Option<&str>, calldata: Option<&str>) -> Result<CallPayload> {
    match (payload, calldata) {
        (Some(payload), _) => Ok(CallPayload::from_encoded(parse_hex(payload)?)),
        (None, Some(calldata)) => Ok(CallPayload::from_calldata(&parse_hex(calldata)?)?),
        (None, None) => Ok(CallPayload::default()),
    }
}

pub fn parse_sender(sender: Option<&str>) -> Result<Address> {
    match sender {
        Some(sender) => sender
            .parse()
            .with_context(|| format!("Invalid sender address '{}'. Expected 33 bytes of hex", sender)),
        None => Ok(Address::default()),
    }
}

/// Export name for a catalogued entry point, or the name as given
pub fn resolve_export(entry: &str) -> String {
    entry
        .parse::<EntryPoint>()
        .map(|entry| entry.export_name().to_string())
        .unwrap_or_else(|_| entry.to_string())
}

/// Whether the error came from a guest that broke the calling protocol
pub fn is_fatal(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ExecutionError>()
        .is_some_and(ExecutionError::is_fatal)
}
