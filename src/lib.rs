// ============================================================================
// ScopeSync Library
// ============================================================================

pub mod config;
pub mod core;
pub mod domain;
pub mod remote;
pub mod storage;
pub mod sync;

pub use config::SyncConfig;
pub use core::{
    CacheNamespace, Entity, EntityKind, Identity, ParentScope, Result, ScopeInit, SyncError,
    Timestamp,
};
pub use remote::{InMemoryRemoteStore, RemoteDocument, RemoteFields, RemoteStore, SnapshotStream};
pub use storage::{CacheBackend, FileCacheBackend, LocalCache, MemoryCacheBackend};
pub use sync::{
    Authority, ConsistencyPolicy, DemoSandbox, OperationResult, OperationSource, SandboxRules,
    ScopeActivation, SyncEngine, ViewState, WarmStart,
};
