use crate::core::{Result, SyncError};
use crate::remote::{RemoteDocument, RemoteFields};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub type Timestamp = DateTime<Utc>;

/// A domain record owned by one parent scope.
///
/// `id` and `parent_scope_id` never change after assignment and `updated_at`
/// only moves forward, so both are reachable through accessors only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity<T> {
    id: String,
    parent_scope_id: String,
    #[serde(flatten)]
    pub fields: T,
    created_at: Timestamp,
    updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl<T> Entity<T> {
    pub fn new(
        id: impl Into<String>,
        parent_scope_id: impl Into<String>,
        fields: T,
        now: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            parent_scope_id: parent_scope_id.into(),
            fields,
            created_at: now,
            updated_at: now,
            sort_order: None,
        }
    }

    /// Entity whose id will be assigned by the remote store.
    pub(crate) fn unassigned(parent_scope_id: impl Into<String>, fields: T, now: Timestamp) -> Self {
        Self::new(String::new(), parent_scope_id, fields, now)
    }

    pub(crate) fn assign_id(mut self, id: impl Into<String>) -> Self {
        debug_assert!(self.id.is_empty(), "entity id is already assigned");
        self.id = id.into();
        self
    }

    pub fn with_sort_order(mut self, sort_order: Option<i64>) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn with_timestamps(mut self, created_at: Timestamp, updated_at: Timestamp) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at.max(created_at);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_scope_id(&self) -> &str {
        &self.parent_scope_id
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// Advances `updated_at`; a clock that went backwards leaves it untouched.
    pub fn touch(&mut self, now: Timestamp) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// Per-collection adapter plugged into the generic sync engine.
///
/// An implementation supplies the domain field type, how drafts and patches
/// turn into entities, and the converter pair used at the remote boundary.
/// The converters default to the serde representation of [`Entity`].
pub trait EntityKind:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Caller-supplied fields for a new entity.
    type Draft: Send + 'static;
    /// Partial update; `None` members leave the field untouched.
    type Patch: Clone + fmt::Debug + Serialize + Send + Sync + 'static;

    /// Collection name, also the cache namespace prefix.
    const KIND: &'static str;
    /// Prefix of ids generated on the fallback path.
    const ID_PREFIX: &'static str;

    fn validate_draft(draft: &Self::Draft) -> Result<()>;

    fn from_draft(draft: Self::Draft, now: Timestamp) -> Self;

    fn validate_patch(_patch: &Self::Patch) -> Result<()> {
        Ok(())
    }

    fn apply_patch(&mut self, patch: &Self::Patch, now: Timestamp);

    fn initial_sort_order(_fields: &Self, _existing: &[Entity<Self>]) -> Option<i64> {
        None
    }

    /// Representative entities used to seed sandboxed scopes.
    fn fixtures(_scope_id: &str, _now: Timestamp) -> Vec<Entity<Self>> {
        Vec::new()
    }

    fn to_remote(entity: &Entity<Self>) -> Result<RemoteFields> {
        let value = serde_json::to_value(entity).map_err(|err| {
            SyncError::Conversion(format!(
                "Failed to encode {} '{}': {}",
                Self::KIND,
                entity.id(),
                err
            ))
        })?;
        let Value::Object(mut fields) = value else {
            return Err(SyncError::Conversion(format!(
                "{} '{}' did not encode to an object",
                Self::KIND,
                entity.id()
            )));
        };
        fields.remove("id");
        Ok(fields)
    }

    fn from_remote(document: RemoteDocument) -> Result<Entity<Self>> {
        let RemoteDocument { id, mut fields } = document;
        fields.insert("id".to_string(), Value::String(id.clone()));
        serde_json::from_value(Value::Object(fields)).map_err(|err| {
            SyncError::Conversion(format!(
                "Malformed {} document '{}': {}",
                Self::KIND,
                id,
                err
            ))
        })
    }

    fn patch_to_remote(patch: &Self::Patch, updated_at: Timestamp) -> Result<RemoteFields> {
        let value = serde_json::to_value(patch).map_err(|err| {
            SyncError::Conversion(format!("Failed to encode {} patch: {}", Self::KIND, err))
        })?;
        let Value::Object(mut fields) = value else {
            return Err(SyncError::Conversion(format!(
                "{} patch did not encode to an object",
                Self::KIND
            )));
        };
        fields.insert(
            "updatedAt".to_string(),
            serde_json::to_value(updated_at)
                .map_err(|err| SyncError::Conversion(err.to_string()))?,
        );
        Ok(fields)
    }
}
