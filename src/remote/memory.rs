use super::{RemoteDocument, RemoteFields, RemoteStore, SnapshotStream};
use crate::core::{Result, SyncError};
use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Number of calls received per remote operation, including rejected ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCallCounts {
    pub subscribe: usize,
    pub create: usize,
    pub update: usize,
    pub delete: usize,
}

impl RemoteCallCounts {
    pub fn total(&self) -> usize {
        self.subscribe + self.create + self.update + self.delete
    }
}

struct Subscriber {
    kind: String,
    scope_id: String,
    sender: UnboundedSender<Result<Vec<RemoteDocument>>>,
}

struct RemoteState {
    collections: HashMap<String, Vec<RemoteDocument>>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
    fail_writes: bool,
    fail_subscribe: bool,
    auto_publish: bool,
    calls: RemoteCallCounts,
}

impl RemoteState {
    fn snapshot(&self, kind: &str, scope_id: &str) -> Vec<RemoteDocument> {
        self.collections
            .get(kind)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| doc.parent_scope_id() == Some(scope_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn publish(&mut self, kind: &str, scope_id: &str) {
        let snapshot = self.snapshot(kind, scope_id);
        self.subscribers.retain(|sub| !sub.sender.is_closed());
        for sub in &self.subscribers {
            if sub.kind == kind && sub.scope_id == scope_id {
                let _ = sub.sender.unbounded_send(Ok(snapshot.clone()));
            }
        }
    }

    fn changed(&mut self, kind: &str, scope_id: Option<String>) {
        if !self.auto_publish {
            return;
        }
        if let Some(scope_id) = scope_id {
            self.publish(kind, &scope_id);
        }
    }
}

/// An in-process real-time document store.
///
/// Every write publishes a fresh snapshot to the matching live queries, like a
/// hosted document database would. Failure injection, write gating and call
/// counters make it the test double for the engine's remote path.
#[derive(Clone)]
pub struct InMemoryRemoteStore {
    state: Arc<Mutex<RemoteState>>,
    id_prefix: Arc<str>,
    write_gate: Arc<watch::Sender<bool>>,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::with_id_prefix("r")
    }

    /// Ids are assigned as `<prefix><counter>`, e.g. `r1`, `r2`.
    pub fn with_id_prefix(prefix: &str) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(RemoteState {
                collections: HashMap::new(),
                subscribers: Vec::new(),
                next_id: 0,
                fail_writes: false,
                fail_subscribe: false,
                auto_publish: true,
                calls: RemoteCallCounts::default(),
            })),
            id_prefix: Arc::from(prefix),
            write_gate: Arc::new(gate),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RemoteState>> {
        Ok(self.state.lock()?)
    }

    pub fn set_fail_writes(&self, fail: bool) -> Result<()> {
        self.lock()?.fail_writes = fail;
        Ok(())
    }

    pub fn set_fail_subscribe(&self, fail: bool) -> Result<()> {
        self.lock()?.fail_subscribe = fail;
        Ok(())
    }

    /// When disabled, snapshots are only delivered through [`InMemoryRemoteStore::publish`].
    pub fn set_auto_publish(&self, enabled: bool) -> Result<()> {
        self.lock()?.auto_publish = enabled;
        Ok(())
    }

    /// Parks every write call until [`InMemoryRemoteStore::release_writes`].
    pub fn hold_writes(&self) {
        self.write_gate.send_replace(true);
    }

    pub fn release_writes(&self) {
        self.write_gate.send_replace(false);
    }

    /// Stores a document directly, bypassing call counters and failure injection.
    pub fn insert(&self, kind: &str, document: RemoteDocument) -> Result<()> {
        let mut state = self.lock()?;
        let scope_id = document.parent_scope_id().map(str::to_string);
        let docs = state.collections.entry(kind.to_string()).or_default();
        docs.retain(|doc| doc.id != document.id);
        docs.push(document);
        state.changed(kind, scope_id);
        Ok(())
    }

    pub fn documents(&self, kind: &str) -> Result<Vec<RemoteDocument>> {
        Ok(self
            .lock()?
            .collections
            .get(kind)
            .cloned()
            .unwrap_or_default())
    }

    pub fn document(&self, kind: &str, id: &str) -> Result<Option<RemoteDocument>> {
        Ok(self
            .lock()?
            .collections
            .get(kind)
            .and_then(|docs| docs.iter().find(|doc| doc.id == id).cloned()))
    }

    /// Pushes the current snapshot of `(kind, scope_id)` to its live queries.
    pub fn publish(&self, kind: &str, scope_id: &str) -> Result<()> {
        self.lock()?.publish(kind, scope_id);
        Ok(())
    }

    /// Delivers a subscription error to the live queries of `(kind, scope_id)`.
    pub fn fail_subscriptions(&self, kind: &str, scope_id: &str, message: &str) -> Result<()> {
        let state = self.lock()?;
        for sub in &state.subscribers {
            if sub.kind == kind && sub.scope_id == scope_id {
                let _ = sub
                    .sender
                    .unbounded_send(Err(SyncError::remote(message.to_string())));
            }
        }
        Ok(())
    }

    pub fn active_subscriptions(&self, kind: &str, scope_id: &str) -> Result<usize> {
        Ok(self
            .lock()?
            .subscribers
            .iter()
            .filter(|sub| sub.kind == kind && sub.scope_id == scope_id && !sub.sender.is_closed())
            .count())
    }

    pub fn call_counts(&self) -> Result<RemoteCallCounts> {
        Ok(self.lock()?.calls)
    }

    async fn pass_write_gate(&self) {
        let mut gate = self.write_gate.subscribe();
        let _ = gate.wait_for(|held| !*held).await;
    }

    fn check_writable(&self, operation: &str) -> Result<()> {
        if self.lock()?.fail_writes {
            return Err(SyncError::remote(format!(
                "{} rejected: remote store is unreachable",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn subscribe(&self, kind: &str, scope_id: &str) -> Result<SnapshotStream> {
        let mut state = self.lock()?;
        state.calls.subscribe += 1;
        if state.fail_subscribe {
            return Err(SyncError::remote(format!(
                "permission denied for {} of scope '{}'",
                kind, scope_id
            )));
        }

        let (sender, receiver) = unbounded();
        let _ = sender.unbounded_send(Ok(state.snapshot(kind, scope_id)));
        state.subscribers.push(Subscriber {
            kind: kind.to_string(),
            scope_id: scope_id.to_string(),
            sender,
        });
        Ok(receiver.boxed())
    }

    async fn create(&self, kind: &str, fields: RemoteFields) -> Result<RemoteDocument> {
        self.lock()?.calls.create += 1;
        self.pass_write_gate().await;
        self.check_writable("create")?;

        let mut state = self.lock()?;
        state.next_id += 1;
        let document = RemoteDocument::new(format!("{}{}", self.id_prefix, state.next_id), fields);
        let scope_id = document.parent_scope_id().map(str::to_string);
        state
            .collections
            .entry(kind.to_string())
            .or_default()
            .push(document.clone());
        state.changed(kind, scope_id);
        Ok(document)
    }

    async fn update(&self, kind: &str, id: &str, fields: RemoteFields) -> Result<()> {
        self.lock()?.calls.update += 1;
        self.pass_write_gate().await;
        self.check_writable("update")?;

        let mut state = self.lock()?;
        let document = state
            .collections
            .get_mut(kind)
            .and_then(|docs| docs.iter_mut().find(|doc| doc.id == id))
            .ok_or_else(|| SyncError::NotFound(id.to_string(), kind.to_string()))?;
        for (key, value) in fields {
            if value == Value::Null {
                document.fields.remove(&key);
            } else {
                document.fields.insert(key, value);
            }
        }
        let scope_id = document.parent_scope_id().map(str::to_string);
        state.changed(kind, scope_id);
        Ok(())
    }

    async fn delete(&self, kind: &str, id: &str) -> Result<()> {
        self.lock()?.calls.delete += 1;
        self.pass_write_gate().await;
        self.check_writable("delete")?;

        let mut state = self.lock()?;
        let Some(docs) = state.collections.get_mut(kind) else {
            return Ok(());
        };
        let Some(position) = docs.iter().position(|doc| doc.id == id) else {
            return Ok(());
        };
        let removed = docs.remove(position);
        let scope_id = removed.parent_scope_id().map(str::to_string);
        state.changed(kind, scope_id);
        Ok(())
    }
}
