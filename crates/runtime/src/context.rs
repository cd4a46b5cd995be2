//! Transaction context supplier
//!
//! Writes the sender identifier and the fixed-layout context record into guest
//! memory before an entry point runs. The record layout lives in
//! [`seqwasm_protocol::context`].

use seqwasm_protocol::{Address, TransactionContext};
use tracing::debug;

use crate::memory::{write_bytes, GuestMemory, MemoryError, MemoryRegion};

/// Guest regions holding one call's context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextRegions {
    pub sender: MemoryRegion,
    pub context: MemoryRegion,
}

impl ContextRegions {
    /// Pointer passed as the entry point's first argument
    pub fn context_ptr(&self) -> u32 {
        self.context.offset
    }

    pub fn regions(&self) -> [MemoryRegion; 2] {
        [self.sender, self.context]
    }
}

/// Write `sender`, then a context record pointing at it
pub fn build<M>(memory: &mut M, sender: &Address, timestamp: i64) -> Result<ContextRegions, MemoryError>
where
    M: GuestMemory + ?Sized,
{
    let sender_region = write_bytes(memory, sender.as_bytes())?;
    let record = TransactionContext::new(timestamp, sender_region.offset);
    let context = write_bytes(memory, &record.to_bytes())?;

    debug!(
        sender = %sender,
        timestamp,
        context_ptr = context.offset,
        "Transaction context written"
    );

    Ok(ContextRegions {
        sender: sender_region,
        context,
    })
}
