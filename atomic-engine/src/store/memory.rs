//! 内存存储实现

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::store::{OperationStore, StoreError};

/// 基于 HashMap 的内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl OperationStore for MemoryStore {
    fn get_raw(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().get(id).cloned())
    }

    fn put_raw(&self, id: &str, payload: &[u8]) -> Result<(), StoreError> {
        self.entries.write().insert(id.to_string(), payload.to_vec());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().remove(id).is_some())
    }

    fn ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
