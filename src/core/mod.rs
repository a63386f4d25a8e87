pub mod entity;
pub mod error;
pub mod scope;

pub use entity::{Entity, EntityKind, Timestamp};
pub use error::{Result, SyncError};
pub use scope::{CacheNamespace, Identity, ParentScope, ScopeInit};
