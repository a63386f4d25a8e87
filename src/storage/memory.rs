use super::CacheBackend;
use crate::core::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Process-local backend; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheBackend {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read()?.get(key).cloned())
    }

    fn write(&self, key: &str, payload: &str) -> Result<()> {
        self.entries
            .write()?
            .insert(key.to_string(), payload.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read()?.keys().cloned().collect())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read()?.contains_key(key))
    }
}
