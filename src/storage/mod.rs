//! Namespaced durable key/value cache used as warm-start source and write fallback.
//!
//! The cache is pure storage: callers hand it the complete array for a
//! namespace and get the complete array back. Merging is the caller's job.

pub mod memory;
pub mod persistence;

pub use memory::MemoryCacheBackend;
pub use persistence::FileCacheBackend;

use crate::core::{CacheNamespace, Entity, EntityKind, Result, SyncError};
use log::warn;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Raw string storage keyed by rendered namespace.
pub trait CacheBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, payload: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.read(key)?.is_some())
    }
}

/// Typed façade over a [`CacheBackend`].
#[derive(Clone)]
pub struct LocalCache {
    backend: Arc<dyn CacheBackend>,
}

impl LocalCache {
    pub fn new(backend: impl CacheBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryCacheBackend::new())
    }

    pub fn open_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Ok(Self::new(FileCacheBackend::open(dir)?))
    }

    /// Returns the stored array, `None` when the namespace was never written.
    ///
    /// Unparseable payloads yield [`SyncError::CacheCorruption`].
    pub fn get<T: EntityKind>(&self, namespace: &CacheNamespace) -> Result<Option<Vec<Entity<T>>>> {
        let key = namespace.to_string();
        let Some(payload) = self.backend.read(&key)? else {
            return Ok(None);
        };
        serde_json::from_str(&payload)
            .map(Some)
            .map_err(|err| SyncError::CacheCorruption(key, err.to_string()))
    }

    /// Replaces the whole array stored under `namespace`.
    pub fn set<T: EntityKind>(&self, namespace: &CacheNamespace, entities: &[Entity<T>]) -> Result<()> {
        let payload = serde_json::to_string(entities).map_err(|err| {
            SyncError::Conversion(format!(
                "Failed to serialize cache namespace '{}': {}",
                namespace, err
            ))
        })?;
        self.backend.write(&namespace.to_string(), &payload)
    }

    pub fn delete(&self, namespace: &CacheNamespace) -> Result<()> {
        self.backend.remove(&namespace.to_string())
    }

    pub fn contains(&self, namespace: &CacheNamespace) -> Result<bool> {
        self.backend.contains(&namespace.to_string())
    }

    /// Reads a namespace without knowing its entity type.
    pub fn get_json(&self, namespace: &CacheNamespace) -> Result<Option<Value>> {
        let key = namespace.to_string();
        let Some(payload) = self.backend.read(&key)? else {
            return Ok(None);
        };
        serde_json::from_str(&payload)
            .map(Some)
            .map_err(|err| SyncError::CacheCorruption(key, err.to_string()))
    }

    pub fn namespaces(&self) -> Result<Vec<CacheNamespace>> {
        let mut namespaces = Vec::new();
        for key in self.backend.keys()? {
            match key.parse::<CacheNamespace>() {
                Ok(namespace) => namespaces.push(namespace),
                Err(err) => warn!("skipping foreign cache key '{}': {}", key, err),
            }
        }
        namespaces.sort();
        Ok(namespaces)
    }

    /// Like [`LocalCache::get`] but absorbs every failure as an empty array.
    pub fn load_or_empty<T: EntityKind>(&self, namespace: &CacheNamespace) -> Vec<Entity<T>> {
        match self.get(namespace) {
            Ok(entities) => entities.unwrap_or_default(),
            Err(err) => {
                warn!("treating cache namespace '{}' as empty: {}", namespace, err);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
        due: Option<DateTime<Utc>>,
    }

    impl EntityKind for Note {
        type Draft = String;
        type Patch = String;
        const KIND: &'static str = "notes";
        const ID_PREFIX: &'static str = "note";

        fn validate_draft(_draft: &String) -> Result<()> {
            Ok(())
        }

        fn from_draft(draft: String, _now: DateTime<Utc>) -> Self {
            Self { text: draft, due: None }
        }

        fn apply_patch(&mut self, patch: &String, _now: DateTime<Utc>) {
            self.text = patch.clone();
        }
    }

    #[test]
    fn round_trips_dates() {
        let cache = LocalCache::in_memory();
        let ns = CacheNamespace::new("notes", "w1");
        let now = Utc::now();
        let note = Entity::new(
            "n1",
            "w1",
            Note {
                text: "hello".into(),
                due: Some(now),
            },
            now,
        );

        cache.set(&ns, std::slice::from_ref(&note)).unwrap();
        let loaded: Vec<Entity<Note>> = cache.get(&ns).unwrap().unwrap();
        assert_eq!(loaded, vec![note]);
    }

    #[test]
    fn missing_namespace_is_absent() {
        let cache = LocalCache::in_memory();
        let ns = CacheNamespace::new("notes", "nope");
        assert!(cache.get::<Note>(&ns).unwrap().is_none());
        assert!(!cache.contains(&ns).unwrap());
    }

    #[test]
    fn corrupted_payload_is_reported_and_absorbed() {
        let backend = MemoryCacheBackend::new();
        backend.write("notes::w1", "{not json").unwrap();
        let cache = LocalCache::new(backend);
        let ns = CacheNamespace::new("notes", "w1");

        assert!(matches!(
            cache.get::<Note>(&ns),
            Err(SyncError::CacheCorruption(_, _))
        ));
        assert!(cache.load_or_empty::<Note>(&ns).is_empty());

        cache.set::<Note>(&ns, &[]).unwrap();
        assert_eq!(cache.get::<Note>(&ns).unwrap(), Some(Vec::new()));
    }
}
