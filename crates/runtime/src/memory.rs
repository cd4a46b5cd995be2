//! Memory exchange with the guest
//!
//! Byte buffers cross the sandbox boundary through guest linear memory only.
//! The host never picks addresses itself: it asks the guest's exported
//! allocator for space, writes there, and hands back a packed
//! `(offset << 32) | length` word. Buffers coming from the guest arrive as
//! `(ptr, len)` scalars.
//!
//! Every failure here is a protocol violation. Host functions turn a
//! [`MemoryError`] into a trap, which aborts the whole call.

use thiserror::Error;
use wasmtime::{AsContextMut, Memory, TypedFunc};

use crate::sandbox::HostState;

/// Memory exchange failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Guest memory access out of bounds: ptr={ptr} len={len}")]
    OutOfBounds { ptr: u32, len: u32 },

    #[error("Guest allocator failed: {reason}")]
    AllocatorFailed { reason: String },

    #[error("Guest memory and allocator are not bound yet")]
    Unbound,

    #[error("Buffer of {len} bytes does not fit a 32-bit length")]
    BufferTooLarge { len: usize },
}

/// A live `(offset, length)` range owned by the guest allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryRegion {
    pub offset: u32,
    pub len: u32,
}

impl MemoryRegion {
    pub fn new(offset: u32, len: u32) -> Self {
        Self { offset, len }
    }

    /// Pack into the single-word return convention
    pub fn pack(&self) -> u64 {
        (u64::from(self.offset) << 32) | u64::from(self.len)
    }

    pub fn unpack(packed: u64) -> Self {
        Self {
            offset: (packed >> 32) as u32,
            len: packed as u32,
        }
    }
}

/// View of one guest's linear memory plus its allocator
pub trait GuestMemory {
    /// Read `len` bytes starting at `ptr`
    fn read(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, MemoryError>;

    /// Write `bytes` starting at `offset`
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), MemoryError>;

    /// Ask the guest allocator for `len` bytes
    fn allocate(&mut self, len: u32) -> Result<u32, MemoryError>;
}

/// Allocate a fresh region and copy `bytes` into it
pub fn write_bytes<M>(memory: &mut M, bytes: &[u8]) -> Result<MemoryRegion, MemoryError>
where
    M: GuestMemory + ?Sized,
{
    let len = u32::try_from(bytes.len()).map_err(|_| MemoryError::BufferTooLarge { len: bytes.len() })?;
    let offset = memory.allocate(len)?;
    memory.write(offset, bytes)?;
    Ok(MemoryRegion::new(offset, len))
}

/// Hand a byte result back to the guest as a packed word
pub fn return_bytes<M>(memory: &mut M, bytes: &[u8]) -> Result<u64, MemoryError>
where
    M: GuestMemory + ?Sized,
{
    write_bytes(memory, bytes).map(|region| region.pack())
}

/// Guest exports bound after instantiation
///
/// Host functions are linked before the guest exists, so these start out
/// empty and are filled in once the instance is up.
#[derive(Clone, Default)]
pub struct GuestBindings {
    memory: Option<Memory>,
    allocate: Option<TypedFunc<u32, u32>>,
    deallocate: Option<TypedFunc<(u32, u32), ()>>,
}

impl GuestBindings {
    pub fn bind(
        &mut self,
        memory: Memory,
        allocate: TypedFunc<u32, u32>,
        deallocate: Option<TypedFunc<(u32, u32), ()>>,
    ) {
        self.memory = Some(memory);
        self.allocate = Some(allocate);
        self.deallocate = deallocate;
    }

    pub fn memory(&self) -> Option<Memory> {
        self.memory
    }

    pub fn allocate_fn(&self) -> Option<TypedFunc<u32, u32>> {
        self.allocate.clone()
    }

    pub fn deallocate_fn(&self) -> Option<TypedFunc<(u32, u32), ()>> {
        self.deallocate.clone()
    }
}

/// [`GuestMemory`] over a live wasmtime store or host-call `Caller`
///
/// Fails with [`MemoryError::Unbound`] while the guest is still being
/// instantiated, e.g. when a start function calls back into the host.
pub struct WasmMemory<C> {
    ctx: C,
    memory: Memory,
    allocate: TypedFunc<u32, u32>,
}

impl<C: AsContextMut<Data = HostState>> WasmMemory<C> {
    pub fn new(ctx: C) -> Result<Self, MemoryError> {
        let bound = {
            let store = ctx.as_context();
            let guest = store.data().guest();
            guest.memory().zip(guest.allocate_fn())
        };
        let (memory, allocate) = bound.ok_or(MemoryError::Unbound)?;
        Ok(Self { ctx, memory, allocate })
    }

    fn check_bounds(&self, ptr: u32, len: u32) -> Result<usize, MemoryError> {
        let end = u64::from(ptr) + u64::from(len);
        if end > self.memory.data_size(&self.ctx) as u64 {
            return Err(MemoryError::OutOfBounds { ptr, len });
        }
        Ok(ptr as usize)
    }
}

impl<C: AsContextMut<Data = HostState>> GuestMemory for WasmMemory<C> {
    fn read(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, MemoryError> {
        let start = self.check_bounds(ptr, len)?;
        let mut buffer = vec![0u8; len as usize];
        self.memory
            .read(&self.ctx, start, &mut buffer)
            .map_err(|_| MemoryError::OutOfBounds { ptr, len })?;
        Ok(buffer)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        let len = u32::try_from(bytes.len()).map_err(|_| MemoryError::BufferTooLarge { len: bytes.len() })?;
        let start = self.check_bounds(offset, len)?;
        self.memory
            .write(&mut self.ctx, start, bytes)
            .map_err(|_| MemoryError::OutOfBounds { ptr: offset, len })
    }

    fn allocate(&mut self, len: u32) -> Result<u32, MemoryError> {
        self.allocate
            .call(&mut self.ctx, len)
            .map_err(|e| MemoryError::AllocatorFailed {
                reason: e.to_string(),
            })
    }
}
