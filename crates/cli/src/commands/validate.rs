//! Validate command implementation
//!
//! Checks a guest against the configured export names, size limit and
//! granted host capabilities without instantiating it.

use anyhow::Result;
use seqwasm_runtime::{GuestRuntime, ValidationResult};

use super::{read_guest, ConfigSource};

/// Validate a guest file without executing it
pub fn validate_guest_file(guest_path: &str, config: &ConfigSource) -> Result<()> {
    println!("🔍 Validating guest: {}", guest_path);

    let config = config.load()?;
    let guest_bytes = read_guest(guest_path)?;
    let runtime = GuestRuntime::with_config(config)?;
    let result = runtime.validator().validate(&guest_bytes)?;

    report(&result);
    if !result.is_valid {
        anyhow::bail!("Guest validation failed");
    }
    Ok(())
}

fn report(result: &ValidationResult) {
    if result.is_valid {
        println!("✅ Guest validation passed");
        println!("   Size: {:.2} KB", result.size_kb);
        println!("   Entry points: {:?}", result.entry_points);
        println!("   Exports: {:?}", result.exports);
        println!("   Imports: {:?}", result.imports);
    } else {
        println!("❌ Guest validation failed");
        for error in &result.errors {
            println!("   Error: {}", error);
        }
    }

    if !result.warnings.is_empty() {
        println!("⚠️  Warnings:");
        for warning in &result.warnings {
            println!("   - {}", warning);
        }
    }
}
