//! Contract of the remote real-time document store.

pub mod memory;

pub use memory::{InMemoryRemoteStore, RemoteCallCounts};

use crate::core::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

/// Untyped document body as the remote store sees it.
pub type RemoteFields = Map<String, Value>;

/// Name of the field every remote document uses to point at its parent scope.
pub const PARENT_SCOPE_FIELD: &str = "parentScopeId";

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub id: String,
    pub fields: RemoteFields,
}

impl RemoteDocument {
    pub fn new(id: impl Into<String>, fields: RemoteFields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn parent_scope_id(&self) -> Option<&str> {
        self.fields.get(PARENT_SCOPE_FIELD).and_then(Value::as_str)
    }
}

/// Live query results. Each item is a full snapshot of the scope or a subscription error.
///
/// Dropping the stream is the teardown signal for the remote side.
pub type SnapshotStream = BoxStream<'static, Result<Vec<RemoteDocument>>>;

/// A generic trait for the remote document store.
///
/// Any error returned from a write is read as "remote unavailable" by the
/// write path; implementations need not classify failures further.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Opens a live query over `kind` documents whose parent scope is `scope_id`.
    async fn subscribe(&self, kind: &str, scope_id: &str) -> Result<SnapshotStream>;

    /// Creates a document and returns it with its store-assigned id.
    async fn create(&self, kind: &str, fields: RemoteFields) -> Result<RemoteDocument>;

    /// Merges `fields` into an existing document. `null` values delete the field.
    async fn update(&self, kind: &str, id: &str, fields: RemoteFields) -> Result<()>;

    async fn delete(&self, kind: &str, id: &str) -> Result<()>;
}
