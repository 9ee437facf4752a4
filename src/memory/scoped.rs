//! Scoped view onto `SharedMemory`: a node may read only its declared input
//! keys and write only its declared output keys (spec §3.1).

use std::collections::HashSet;

use serde_json::Value;

use super::{MemoryError, SharedMemory};

pub struct ScopedMemory {
    memory: SharedMemory,
    input_keys: HashSet<String>,
    output_keys: HashSet<String>,
}

impl ScopedMemory {
    pub(super) fn new(memory: SharedMemory, input_keys: Vec<String>, output_keys: Vec<String>) -> Self {
        Self {
            memory,
            input_keys: input_keys.into_iter().collect(),
            output_keys: output_keys.into_iter().collect(),
        }
    }

    /// Reads a declared input key. `None` means the key is absent from
    /// memory, not a permission error — callers (node implementations)
    /// report that as a validation *warning*, not a hard failure (spec
    /// §4.1 step 5).
    pub async fn read(&self, key: &str) -> Result<Option<Value>, MemoryError> {
        if !self.input_keys.contains(key) {
            return Err(MemoryError::ReadNotAllowed(key.to_string()));
        }
        Ok(self.memory.get(key).await)
    }

    pub async fn write(&self, key: &str, value: Value) -> Result<(), MemoryError> {
        if !self.output_keys.contains(key) {
            return Err(MemoryError::WriteNotAllowed(key.to_string()));
        }
        self.memory.set(key, value).await;
        Ok(())
    }

    pub fn declared_input_keys(&self) -> &HashSet<String> {
        &self.input_keys
    }

    pub fn declared_output_keys(&self) -> &HashSet<String> {
        &self.output_keys
    }
}
