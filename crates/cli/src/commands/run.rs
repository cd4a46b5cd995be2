//! Run command implementation
//!
//! Drives one guest instance through a JSON script:
//!
//! ```json
//! {
//!   "sender": "07...07",
//!   "seed": [{ "slot": 0, "value": "01" }, { "slot": 7, "key": "07...07", "value": "e803" }],
//!   "calls": [
//!     { "entry": "initializer", "payload": "0x...", "timestamp": 1700000000 },
//!     { "entry": "commitHeaderRange", "calldata": "0x...", "expect": 1 }
//!   ]
//! }
//! ```
//!
//! Calls run in order against one store. Result codes and the final storage
//! snapshot are printed; a trap stops the script.

use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use seqwasm_protocol::Address;
use seqwasm_runtime::{CallContext, GuestRuntime, RuntimeConfig, SharedStorage, SlotKey, Storage};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{parse_hex, parse_payload, read_guest, resolve_export, ConfigSource};

/// Arguments for the run command
pub struct RunArgs {
    pub guest: String,
    pub script: String,
    pub config: ConfigSource,
}

/// A scripted session against one guest instance
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    /// Default sender for calls that name none
    #[serde(default)]
    pub sender: Option<Address>,
    /// Cells written before the first call
    #[serde(default)]
    pub seed: Vec<SeedCell>,
    pub calls: Vec<ScriptCall>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedCell {
    pub slot: u32,
    /// Mapping key as hex, a static slot when absent
    #[serde(default)]
    pub key: Option<String>,
    /// Cell value as hex
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptCall {
    pub entry: String,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub calldata: Option<String>,
    #[serde(default)]
    pub sender: Option<Address>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Required result code
    #[serde(default)]
    pub expect: Option<u64>,
}

/// Result of one scripted call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    pub entry: String,
    pub result_code: u64,
    pub fuel_used: u64,
    pub host_calls: u64,
}

impl Script {
    pub fn load(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read script: {}", path))?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse script: {}", path))
    }

    /// Storage holding the seed cells
    pub fn seeded_storage(&self) -> Result<Storage> {
        let cells = self
            .seed
            .iter()
            .map(|cell| {
                let slot = match &cell.key {
                    Some(key) => SlotKey::Dynamic {
                        id: cell.slot,
                        key: parse_hex(key)?,
                    },
                    None => SlotKey::Static(cell.slot),
                };
                Ok((slot, parse_hex(&cell.value)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Storage::from_entries(cells))
    }
}

/// Run every call of `script` in order, stopping at the first failure
pub fn run_script(
    config: RuntimeConfig,
    guest_bytes: &[u8],
    script: &Script,
    storage: SharedStorage,
) -> Result<Vec<CallRecord>> {
    let runtime = GuestRuntime::with_config(config)?;
    let mut instance = runtime.instantiate_bytes(guest_bytes, storage)?;
    let start_time = chrono::Utc::now().timestamp();

    let mut records = Vec::with_capacity(script.calls.len());
    for (index, call) in script.calls.iter().enumerate() {
        let entry = resolve_export(&call.entry);
        let payload = parse_payload(call.payload.as_deref(), call.calldata.as_deref())
            .with_context(|| format!("Call #{} ({}) has a bad payload", index, entry))?;
        let ctx = CallContext::new(
            call.sender.or(script.sender).unwrap_or_default(),
            call.timestamp.unwrap_or(start_time + index as i64),
        );

        let outcome = instance
            .call(&entry, Some(&ctx), &payload)
            .with_context(|| format!("Call #{} ({}) failed", index, entry))?;
        info!(index, entry = %entry, result = outcome.result_code, "Scripted call returned");

        if let Some(expected) = call.expect {
            if outcome.result_code != expected {
                anyhow::bail!(
                    "Call #{} ({}) returned {}, expected {}",
                    index,
                    entry,
                    outcome.result_code,
                    expected
                );
            }
        }

        records.push(CallRecord {
            entry,
            result_code: outcome.result_code,
            fuel_used: outcome.fuel_used,
            host_calls: outcome.host_calls,
        });
    }

    Ok(records)
}

fn snapshot(storage: &SharedStorage) -> Result<BTreeMap<String, String>> {
    Ok(storage
        .lock()
        .map_err(|_| anyhow::anyhow!("Storage lock poisoned"))?
        .snapshot())
}

/// Execute the run command
pub fn execute_run_command(args: RunArgs) -> Result<()> {
    let config = args.config.load()?;
    let guest_bytes = read_guest(&args.guest)?;
    let script = Script::load(&args.script)?;

    println!("📜 Running {} calls from {}", script.calls.len(), args.script);
    println!("📁 Guest: {}", args.guest);
    println!();

    let storage = Arc::new(Mutex::new(script.seeded_storage()?));
    let result = run_script(config, &guest_bytes, &script, Arc::clone(&storage));

    match &result {
        Ok(records) => {
            for (index, record) in records.iter().enumerate() {
                println!("   #{} {} -> {}", index, record.entry, record.result_code);
            }
            println!();
            println!("📦 Final storage:");
        }
        Err(_) => println!("❌ Script aborted, storage at abort:"),
    }
    println!("{}", serde_json::to_string_pretty(&snapshot(&storage)?)?);

    result.map(|_| ())
}
