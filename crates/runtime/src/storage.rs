//! Emulated contract storage
//!
//! Cells are addressed by a [`SlotKey`]: a static slot id, or a slot id plus
//! an arbitrary byte key for mapping-style storage. The key is kept whole, so
//! distinct `(id, key)` pairs never share a cell. Unset cells read as empty.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::memory::{return_bytes, GuestMemory, MemoryError};
use crate::sandbox::StateImports;

/// Address of one storage cell
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotKey {
    Static(u32),
    Dynamic { id: u32, key: Vec<u8> },
}

/// Canonical textual form: decimal id followed by the lowercase hex key.
///
/// Display only. Slot `1` with key `0x2345` and slot `123` with key `0x45`
/// print alike, so cells are never looked up by this string.
impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Static(id) => write!(f, "{}", id),
            SlotKey::Dynamic { id, key } => write!(f, "{}{}", id, hex::encode(key)),
        }
    }
}

/// Address of the mapping cell `(id, key)`
pub fn derive_slot_key(id: u32, key: &[u8]) -> SlotKey {
    SlotKey::Dynamic {
        id,
        key: key.to_vec(),
    }
}

/// In-memory cell store for one guest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Storage {
    cells: BTreeMap<SlotKey, Vec<u8>>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing cells
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (SlotKey, Vec<u8>)>,
    {
        Self {
            cells: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, slot: &SlotKey) -> Vec<u8> {
        self.cells.get(slot).cloned().unwrap_or_default()
    }

    pub fn put(&mut self, slot: SlotKey, value: Vec<u8>) {
        self.cells.insert(slot, value);
    }

    pub fn get_static(&self, id: u32) -> Vec<u8> {
        self.get(&SlotKey::Static(id))
    }

    pub fn put_static(&mut self, id: u32, value: Vec<u8>) {
        self.put(SlotKey::Static(id), value);
    }

    pub fn get_dynamic(&self, id: u32, key: &[u8]) -> Vec<u8> {
        self.get(&derive_slot_key(id, key))
    }

    pub fn put_dynamic(&mut self, id: u32, key: &[u8], value: Vec<u8>) {
        self.put(derive_slot_key(id, key), value);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cells keyed by their textual form, values hex encoded
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.cells
            .iter()
            .map(|(slot, value)| (slot.to_string(), hex::encode(value)))
            .collect()
    }
}

/// Store handle shared between a driver and the host functions of one instance
pub type SharedStorage = Arc<Mutex<Storage>>;

/// Storage host functions
#[derive(Debug, Clone, Default)]
pub struct StorageService {
    storage: SharedStorage,
}

impl StorageService {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    pub fn handle(&self) -> SharedStorage {
        Arc::clone(&self.storage)
    }

    fn cells(&self) -> MutexGuard<'_, Storage> {
        // Writes replace whole cells, so a poisoned map is still consistent
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateImports for StorageService {
    fn get_static(&self, memory: &mut dyn GuestMemory, id: u32) -> Result<u64, MemoryError> {
        let value = self.cells().get_static(id);
        debug!(slot = id, len = value.len(), "stateGetBytes");
        return_bytes(memory, &value)
    }

    fn store_static(
        &self,
        memory: &mut dyn GuestMemory,
        id: u32,
        ptr: u32,
        len: u32,
    ) -> Result<(), MemoryError> {
        let value = memory.read(ptr, len)?;
        debug!(slot = id, len, "stateStoreBytes");
        self.cells().put_static(id, value);
        Ok(())
    }

    fn get_dynamic(
        &self,
        memory: &mut dyn GuestMemory,
        id: u32,
        key_ptr: u32,
        key_len: u32,
    ) -> Result<u64, MemoryError> {
        let key = memory.read(key_ptr, key_len)?;
        let value = self.cells().get_dynamic(id, &key);
        debug!(slot = id, key = %hex::encode(&key), len = value.len(), "stateGetDynamicBytes");
        return_bytes(memory, &value)
    }

    fn store_dynamic(
        &self,
        memory: &mut dyn GuestMemory,
        id: u32,
        key_ptr: u32,
        key_len: u32,
        value_ptr: u32,
        value_len: u32,
    ) -> Result<(), MemoryError> {
        let key = memory.read(key_ptr, key_len)?;
        let value = memory.read(value_ptr, value_len)?;
        debug!(slot = id, key = %hex::encode(&key), len = value_len, "stateStoreDynamicBytes");
        self.cells().put_dynamic(id, &key, value);
        Ok(())
    }
}
