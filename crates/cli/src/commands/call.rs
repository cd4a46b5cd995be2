//! Call command implementation
//!
//! Instantiates a guest on an empty store, invokes one entry point and
//! prints the outcome together with the resulting storage.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::Serialize;
use seqwasm_runtime::{CallContext, CallOutcome, GuestRuntime, Storage};

use super::{parse_payload, parse_sender, read_guest, resolve_export, ConfigSource};

/// Arguments for the call command
pub struct CallArgs {
    pub guest: String,
    pub entry: String,
    /// Selector-stripped payload as hex
    pub payload: Option<String>,
    /// Full calldata as hex
    pub calldata: Option<String>,
    pub sender: Option<String>,
    pub timestamp: Option<i64>,
    pub config: ConfigSource,
}

#[derive(Debug, Serialize)]
struct CallReport {
    entry: String,
    outcome: CallOutcome,
    storage: BTreeMap<String, String>,
}

/// Execute the call command
pub fn execute_call_command(args: CallArgs) -> Result<()> {
    let config = args.config.load()?;
    let guest_bytes = read_guest(&args.guest)?;
    let payload = parse_payload(args.payload.as_deref(), args.calldata.as_deref())?;
    let ctx = CallContext::new(
        parse_sender(args.sender.as_deref())?,
        args.timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp()),
    );
    let entry = resolve_export(&args.entry);

    println!("📞 Calling {} on {}", entry, args.guest);
    println!("📝 Payload: {} bytes", payload.len());
    println!();

    let runtime = GuestRuntime::with_config(config)?;
    let storage = Arc::new(Mutex::new(Storage::new()));
    let mut instance = runtime.instantiate_bytes(&guest_bytes, Arc::clone(&storage))?;

    let result = instance.call(&entry, Some(&ctx), &payload);
    let snapshot = storage
        .lock()
        .map_err(|_| anyhow::anyhow!("Storage lock poisoned"))?
        .snapshot();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            println!("❌ Call aborted, storage at abort:");
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            return Err(e).with_context(|| format!("Call to {} failed", entry));
        }
    };

    let status = if outcome.is_success() { "✅ accepted" } else { "⛔ rejected" };
    println!("{} (result {})", status, outcome.result_code);
    let report = CallReport {
        entry,
        outcome,
        storage: snapshot,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
