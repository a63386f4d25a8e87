use super::lease::ScopeLease;
use super::policy::WriteRoute;
use super::store::EntityStore;
use crate::core::{CacheNamespace, Entity, EntityKind, Result, SyncError, Timestamp};
use crate::remote::RemoteStore;
use crate::storage::LocalCache;
use chrono::Utc;
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

/// Which path satisfied a mutation. Observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationSource {
    Remote,
    Fallback,
    /// Nothing was written: unknown id or no active scope.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult<V> {
    pub value: V,
    pub source: OperationSource,
}

impl<V> OperationResult<V> {
    pub fn remote(value: V) -> Self {
        Self {
            value,
            source: OperationSource::Remote,
        }
    }

    pub fn fallback(value: V) -> Self {
        Self {
            value,
            source: OperationSource::Fallback,
        }
    }

    pub fn skipped(value: V) -> Self {
        Self {
            value,
            source: OperationSource::Skipped,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.source == OperationSource::Remote
    }

    pub fn is_fallback(&self) -> bool {
        self.source == OperationSource::Fallback
    }

    pub fn is_skipped(&self) -> bool {
        self.source == OperationSource::Skipped
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> OperationResult<U> {
        OperationResult {
            value: f(self.value),
            source: self.source,
        }
    }
}

/// Generates `<prefix>_<unix millis>_<random hex>` ids for locally created entities.
#[derive(Debug, Clone)]
pub struct LocalIdGenerator {
    random_len: usize,
}

impl Default for LocalIdGenerator {
    fn default() -> Self {
        Self::new(9)
    }
}

impl LocalIdGenerator {
    pub fn new(random_len: usize) -> Self {
        Self {
            random_len: random_len.clamp(4, 32),
        }
    }

    pub fn next(&self, prefix: &str, now: Timestamp) -> String {
        let random = Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}",
            prefix,
            now.timestamp_millis(),
            &random[..self.random_len]
        )
    }
}

/// The only component that mutates persisted entity data.
///
/// Every operation tries the remote store first and falls back to the local
/// cache plus a direct store mutation when the remote call fails. A remote
/// success is left to the next snapshot unless the live query is known to be
/// broken; accepted updates stay readable through [`EntityStore::get`] until
/// then. Sandboxed scopes always take the local branch.
pub struct WritePathCoordinator<T: EntityKind> {
    remote: Arc<dyn RemoteStore>,
    cache: LocalCache,
    store: Arc<EntityStore<T>>,
    ids: LocalIdGenerator,
    remote_timeout: Option<Duration>,
}

impl<T: EntityKind> WritePathCoordinator<T> {
    pub fn new(remote: Arc<dyn RemoteStore>, cache: LocalCache, store: Arc<EntityStore<T>>) -> Self {
        Self {
            remote,
            cache,
            store,
            ids: LocalIdGenerator::default(),
            remote_timeout: None,
        }
    }

    pub fn with_id_generator(mut self, ids: LocalIdGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub async fn create(
        &self,
        lease: &ScopeLease,
        draft: T::Draft,
    ) -> Result<OperationResult<Entity<T>>> {
        T::validate_draft(&draft)?;
        let span = info_span!("sync.create", kind = T::KIND, scope_id = %lease.scope_id());

        async move {
            let now = Utc::now();
            let fields = T::from_draft(draft, now);
            let existing = self.known_entities(lease)?;
            let sort_order = T::initial_sort_order(&fields, &existing);
            let entity = Entity::unassigned(lease.scope_id(), fields, now).with_sort_order(sort_order);

            if lease.policy()?.write_route() == WriteRoute::LocalOnly {
                let entity = entity.assign_id(self.ids.next(T::ID_PREFIX, now));
                self.apply_local_upsert(lease, entity.clone())?;
                event!(Level::DEBUG, entity_id = %entity.id(), "sandbox create applied locally");
                return Ok(OperationResult::fallback(entity));
            }

            let attempt = async {
                let fields = T::to_remote(&entity)?;
                self.call_remote("create", self.remote.create(T::KIND, fields))
                    .await
            }
            .await;

            match attempt {
                Ok(document) => {
                    let policy = lease.update_policy(|policy| policy.record_write(true))?;
                    let confirmed = entity.assign_id(document.id);
                    if policy.echo_remote_writes() {
                        self.apply_local_upsert(lease, confirmed.clone())?;
                    }
                    event!(Level::DEBUG, entity_id = %confirmed.id(), "remote create confirmed");
                    Ok(OperationResult::remote(confirmed))
                }
                Err(err) => {
                    warn!(
                        "remote create of {} in scope '{}' failed, using local fallback: {}",
                        T::KIND,
                        lease.scope_id(),
                        err
                    );
                    lease.update_policy(|policy| policy.record_write(false))?;
                    let entity = entity.assign_id(self.ids.next(T::ID_PREFIX, now));
                    self.apply_local_upsert(lease, entity.clone())?;
                    event!(Level::INFO, entity_id = %entity.id(), "create satisfied by fallback");
                    Ok(OperationResult::fallback(entity))
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn update(
        &self,
        lease: &ScopeLease,
        id: &str,
        patch: T::Patch,
    ) -> Result<OperationResult<()>> {
        T::validate_patch(&patch)?;
        let span = info_span!("sync.update", kind = T::KIND, scope_id = %lease.scope_id(), entity_id = %id);

        async move {
            let Some(current) = self.current_entity(lease, id)? else {
                warn!(
                    "update of {} '{}' in scope '{}' ignored: not found",
                    T::KIND,
                    id,
                    lease.scope_id()
                );
                return Ok(OperationResult::skipped(()));
            };
            let now = Utc::now();

            if lease.policy()?.write_route() == WriteRoute::LocalOnly {
                self.merge_locally(lease, current, &patch, now)?;
                return Ok(OperationResult::fallback(()));
            }

            let attempt = async {
                let fields = T::patch_to_remote(&patch, now)?;
                self.call_remote("update", self.remote.update(T::KIND, id, fields))
                    .await
            }
            .await;

            match attempt {
                Ok(()) => {
                    let policy = lease.update_policy(|policy| policy.record_write(true))?;
                    if policy.echo_remote_writes() {
                        self.merge_locally(lease, current, &patch, now)?;
                    } else {
                        self.confirm_remote(lease, current, &patch, now)?;
                    }
                    event!(Level::DEBUG, "remote update confirmed");
                    Ok(OperationResult::remote(()))
                }
                Err(err) => {
                    warn!(
                        "remote update of {} '{}' failed, using local fallback: {}",
                        T::KIND,
                        id,
                        err
                    );
                    lease.update_policy(|policy| policy.record_write(false))?;
                    self.merge_locally(lease, current, &patch, now)?;
                    event!(Level::INFO, "update satisfied by fallback");
                    Ok(OperationResult::fallback(()))
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn delete(&self, lease: &ScopeLease, id: &str) -> Result<OperationResult<()>> {
        let span = info_span!("sync.delete", kind = T::KIND, scope_id = %lease.scope_id(), entity_id = %id);

        async move {
            if self.current_entity(lease, id)?.is_none() {
                warn!(
                    "delete of {} '{}' in scope '{}' ignored: not found",
                    T::KIND,
                    id,
                    lease.scope_id()
                );
                return Ok(OperationResult::skipped(()));
            }

            if lease.policy()?.write_route() == WriteRoute::LocalOnly {
                self.apply_local_remove(lease, id)?;
                return Ok(OperationResult::fallback(()));
            }

            match self
                .call_remote("delete", self.remote.delete(T::KIND, id))
                .await
            {
                Ok(()) => {
                    let policy = lease.update_policy(|policy| policy.record_write(true))?;
                    if policy.echo_remote_writes() {
                        self.apply_local_remove(lease, id)?;
                    }
                    event!(Level::DEBUG, "remote delete confirmed");
                    Ok(OperationResult::remote(()))
                }
                Err(err) => {
                    warn!(
                        "remote delete of {} '{}' failed, using local fallback: {}",
                        T::KIND,
                        id,
                        err
                    );
                    lease.update_policy(|policy| policy.record_write(false))?;
                    self.apply_local_remove(lease, id)?;
                    event!(Level::INFO, "delete satisfied by fallback");
                    Ok(OperationResult::fallback(()))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn call_remote<R>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<R>>,
    ) -> Result<R> {
        match self.remote_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                SyncError::remote(format!("{} timed out after {:?}", operation, limit))
            })?,
            None => call.await,
        }
    }

    fn namespace(lease: &ScopeLease) -> CacheNamespace {
        CacheNamespace::new(T::KIND, lease.scope_id())
    }

    /// Entities the scope currently holds: the store while the lease is live, the cache otherwise.
    fn known_entities(&self, lease: &ScopeLease) -> Result<Vec<Entity<T>>> {
        if lease.is_current() {
            self.store.entities()
        } else {
            Ok(self.cache.load_or_empty(&Self::namespace(lease)))
        }
    }

    fn current_entity(&self, lease: &ScopeLease, id: &str) -> Result<Option<Entity<T>>> {
        if !lease.is_current() {
            return Ok(None);
        }
        self.store.get(id)
    }

    fn merge_locally(
        &self,
        lease: &ScopeLease,
        mut entity: Entity<T>,
        patch: &T::Patch,
        now: Timestamp,
    ) -> Result<()> {
        entity.fields.apply_patch(patch, now);
        entity.touch(now);
        self.apply_local_upsert(lease, entity)
    }

    /// Keeps the merged result of an accepted remote update readable until its snapshot lands.
    fn confirm_remote(
        &self,
        lease: &ScopeLease,
        mut entity: Entity<T>,
        patch: &T::Patch,
        now: Timestamp,
    ) -> Result<()> {
        if !lease.is_current() {
            return Ok(());
        }
        entity.fields.apply_patch(patch, now);
        entity.touch(now);
        self.store.confirm(lease.scope_id(), entity, now)?;
        Ok(())
    }

    fn apply_local_upsert(&self, lease: &ScopeLease, entity: Entity<T>) -> Result<()> {
        let namespace = Self::namespace(lease);
        let mut cached = self.cache.load_or_empty::<T>(&namespace);
        match cached.iter_mut().find(|e| e.id() == entity.id()) {
            Some(slot) => *slot = entity.clone(),
            None => cached.push(entity.clone()),
        }
        self.persist(&namespace, &cached);

        if lease.is_current() {
            self.store.upsert(lease.scope_id(), entity)?;
        } else {
            debug!("scope '{}' superseded; store left untouched", lease.scope_id());
        }
        Ok(())
    }

    fn apply_local_remove(&self, lease: &ScopeLease, id: &str) -> Result<()> {
        let namespace = Self::namespace(lease);
        let mut cached = self.cache.load_or_empty::<T>(&namespace);
        cached.retain(|e| e.id() != id);
        self.persist(&namespace, &cached);

        if lease.is_current() {
            self.store.remove(lease.scope_id(), id)?;
        }
        Ok(())
    }

    fn persist(&self, namespace: &CacheNamespace, entities: &[Entity<T>]) {
        if let Err(err) = self.cache.set(namespace, entities) {
            warn!("local cache write to '{}' failed: {}", namespace, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_carry_prefix_and_are_unique() {
        let ids = LocalIdGenerator::default();
        let now = Utc::now();
        let a = ids.next("task", now);
        let b = ids.next("task", now);
        assert!(a.starts_with(&format!("task_{}_", now.timestamp_millis())));
        assert_eq!(a.rsplit('_').next().unwrap().len(), 9);
        assert_ne!(a, b);
    }
}
