use crate::core::{Result, SyncError};
use crate::storage::LocalCache;
use crate::sync::SandboxRules;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration
///
/// Built in code with the builder methods or loaded from a JSON document:
///
/// ```json
/// {
///   "cacheDir": "/var/lib/app/cache",
///   "remoteTimeoutMs": 8000,
///   "sandbox": { "reservedScopeIds": ["demo-wedding"] }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Identities and scopes that run local-only
    pub sandbox: SandboxRules,

    /// Directory of the durable cache; `None` keeps the cache in memory
    pub cache_dir: Option<PathBuf>,

    /// A remote call running longer than this counts as a remote failure
    pub remote_timeout: Option<Duration>,

    /// Length of the random suffix of locally generated ids
    pub local_id_random_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxRules::default(),
            cache_dir: None,
            remote_timeout: Some(Duration::from_secs(10)),
            local_id_random_len: 9,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
struct RawSyncConfig {
    sandbox: Option<SandboxRules>,
    cache_dir: Option<PathBuf>,
    remote_timeout_ms: Option<u64>,
    local_id_random_len: Option<usize>,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sandbox rules
    pub fn sandbox(mut self, rules: SandboxRules) -> Self {
        self.sandbox = rules;
        self
    }

    /// Set the cache directory
    pub fn cache_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cache_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the remote call timeout
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = Some(timeout);
        self
    }

    /// Wait for remote calls indefinitely
    pub fn no_remote_timeout(mut self) -> Self {
        self.remote_timeout = None;
        self
    }

    /// Set the random suffix length of local ids
    pub fn local_id_random_len(mut self, len: usize) -> Self {
        self.local_id_random_len = len;
        self
    }

    /// Parse from a JSON document; absent keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawSyncConfig = serde_json::from_str(json)
            .map_err(|e| SyncError::Config(format!("Invalid sync config: {}", e)))?;

        let mut config = Self::default();
        if let Some(sandbox) = raw.sandbox {
            config.sandbox = sandbox;
        }
        config.cache_dir = raw.cache_dir;
        if let Some(ms) = raw.remote_timeout_ms {
            config.remote_timeout = if ms == 0 {
                None
            } else {
                Some(Duration::from_millis(ms))
            };
        }
        if let Some(len) = raw.local_id_random_len {
            config.local_id_random_len = len;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read config '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !(4..=32).contains(&self.local_id_random_len) {
            return Err(SyncError::Config(format!(
                "localIdRandomLen must be between 4 and 32, got {}",
                self.local_id_random_len
            )));
        }
        Ok(())
    }

    /// Opens the durable cache described by this configuration.
    pub fn open_cache(&self) -> Result<LocalCache> {
        match &self.cache_dir {
            Some(dir) => LocalCache::open_dir(dir),
            None => Ok(LocalCache::in_memory()),
        }
    }
}
