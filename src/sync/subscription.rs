use super::lease::ScopeLease;
use super::store::EntityStore;
use crate::core::{CacheNamespace, EntityKind, Result};
use crate::remote::{RemoteDocument, RemoteStore, SnapshotStream};
use crate::storage::LocalCache;
use futures::StreamExt;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::AbortHandle;

/// Cancellation token of one live query.
///
/// `cancel` is idempotent and stays safe after the scope has been superseded.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    scope_id: String,
    generation: u64,
    cancelled: Arc<AtomicBool>,
    task: Option<AbortHandle>,
    cached_entities: usize,
}

impl SubscriptionHandle {
    fn new(lease: &ScopeLease, task: Option<AbortHandle>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            scope_id: lease.scope_id().to_string(),
            generation: lease.generation(),
            cancelled,
            task,
            cached_entities: 0,
        }
    }

    /// Handle for an activation that never opened a live query.
    pub(crate) fn inert(lease: &ScopeLease) -> Self {
        Self::new(lease, None, Arc::new(AtomicBool::new(false)))
    }

    fn with_cached_entities(mut self, count: usize) -> Self {
        self.cached_entities = count;
        self
    }

    /// How many cached entities seeded the store before the first snapshot.
    pub fn cached_entities(&self) -> usize {
        self.cached_entities
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_live(&self) -> bool {
        self.task.is_some() && !self.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Opens the live query of the active scope and pumps its snapshots into the store.
pub struct RemoteSubscriptionManager<T: EntityKind> {
    remote: Arc<dyn RemoteStore>,
    cache: LocalCache,
    store: Arc<EntityStore<T>>,
}

impl<T: EntityKind> RemoteSubscriptionManager<T> {
    pub fn new(remote: Arc<dyn RemoteStore>, cache: LocalCache, store: Arc<EntityStore<T>>) -> Self {
        Self {
            remote,
            cache,
            store,
        }
    }

    /// Seeds the store from the cache so the view has data before the first
    /// snapshot. Returns how many cached entities were loaded.
    pub fn warm_start(&self, lease: &ScopeLease) -> Result<usize> {
        let namespace = CacheNamespace::new(T::KIND, lease.scope_id());
        let cached = self.cache.load_or_empty::<T>(&namespace);
        let count = cached.len();
        if count > 0 && self.store.seed(lease.scope_id(), cached)? {
            debug!("warm start of '{}' with {} cached entities", namespace, count);
        }
        Ok(count)
    }

    /// Warm-starts from the cache, then opens the live query.
    ///
    /// A failed subscribe is absorbed: the store keeps its cached state, the
    /// lease's policy turns degraded and an inert handle is returned.
    pub async fn activate(&self, lease: &ScopeLease) -> Result<SubscriptionHandle> {
        let cached = self.warm_start(lease)?;

        let stream = match self.remote.subscribe(T::KIND, lease.scope_id()).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(
                    "live query for {} of scope '{}' failed, serving {} cached entities: {}",
                    T::KIND,
                    lease.scope_id(),
                    cached,
                    err
                );
                lease.update_policy(|policy| policy.record_subscription(false))?;
                self.store.set_loading(lease.scope_id(), false)?;
                return Ok(SubscriptionHandle::inert(lease).with_cached_entities(cached));
            }
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(pump(
            stream,
            Arc::clone(&self.store),
            self.cache.clone(),
            lease.clone(),
            Arc::clone(&cancelled),
        ));

        Ok(
            SubscriptionHandle::new(lease, Some(task.abort_handle()), cancelled)
                .with_cached_entities(cached),
        )
    }

    pub fn deactivate(&self, handle: &SubscriptionHandle) {
        handle.cancel();
        debug!(
            "deactivated live query for {} of scope '{}'",
            T::KIND,
            handle.scope_id()
        );
    }
}

async fn pump<T: EntityKind>(
    mut stream: SnapshotStream,
    store: Arc<EntityStore<T>>,
    cache: LocalCache,
    lease: ScopeLease,
    cancelled: Arc<AtomicBool>,
) {
    let namespace = CacheNamespace::new(T::KIND, lease.scope_id());
    while let Some(item) = stream.next().await {
        if cancelled.load(Ordering::Acquire) || !lease.is_current() {
            return;
        }
        let outcome = match item {
            Ok(documents) => apply_snapshot(&store, &cache, &lease, &namespace, documents),
            Err(err) => {
                warn!("live query for '{}' reported an error: {}", namespace, err);
                mark_degraded(&store, &lease)
            }
        };
        if let Err(err) = outcome {
            warn!("failed to apply update for '{}': {}", namespace, err);
        }
    }

    if !cancelled.load(Ordering::Acquire) && lease.is_current() {
        warn!("live query for '{}' ended unexpectedly", namespace);
        if let Err(err) = mark_degraded(&store, &lease) {
            warn!("failed to mark '{}' degraded: {}", namespace, err);
        }
    }
}

fn mark_degraded<T: EntityKind>(store: &EntityStore<T>, lease: &ScopeLease) -> Result<()> {
    lease.update_policy(|policy| policy.record_subscription(false))?;
    store.set_loading(lease.scope_id(), false)
}

/// Converts a snapshot, merges it into the store and writes the result through to the cache.
fn apply_snapshot<T: EntityKind>(
    store: &EntityStore<T>,
    cache: &LocalCache,
    lease: &ScopeLease,
    namespace: &CacheNamespace,
    documents: Vec<RemoteDocument>,
) -> Result<()> {
    let mut entities = Vec::with_capacity(documents.len());
    for document in documents {
        let id = document.id.clone();
        match T::from_remote(document) {
            Ok(entity) if entity.parent_scope_id() == lease.scope_id() => entities.push(entity),
            Ok(entity) => warn!(
                "dropping {} '{}' of scope '{}' from snapshot of '{}'",
                T::KIND,
                id,
                entity.parent_scope_id(),
                lease.scope_id()
            ),
            Err(err) => warn!("dropping malformed document from '{}': {}", namespace, err),
        }
    }

    let policy = lease.update_policy(|policy| policy.record_subscription(true))?;
    let Some(merged) = store.replace_all(lease.scope_id(), entities, policy.merge_mode())? else {
        return Ok(());
    };
    debug!("snapshot of '{}' applied: {} entities", namespace, merged.len());

    if let Err(err) = cache.set(namespace, &merged) {
        warn!("write-through to '{}' failed: {}", namespace, err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ParentScope;
    use crate::domain::Task;
    use crate::remote::InMemoryRemoteStore;
    use crate::sync::lease::LeaseIssuer;
    use std::time::Duration;

    async fn wait_until_closed(remote: &InMemoryRemoteStore, scope_id: &str) {
        for _ in 0..400 {
            if remote.active_subscriptions(Task::KIND, scope_id).unwrap() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("live query of '{}' is still open", scope_id);
    }

    fn manager(remote: &InMemoryRemoteStore) -> (RemoteSubscriptionManager<Task>, Arc<EntityStore<Task>>) {
        let dyn_remote: Arc<dyn RemoteStore> = Arc::new(remote.clone());
        let store = Arc::new(EntityStore::new());
        let manager = RemoteSubscriptionManager::new(dyn_remote, LocalCache::in_memory(), Arc::clone(&store));
        (manager, store)
    }

    #[tokio::test]
    async fn cancel_twice_closes_the_query_once() {
        let remote = InMemoryRemoteStore::new();
        let (manager, store) = manager(&remote);
        let leases = LeaseIssuer::new();

        let lease = leases.issue(ParentScope::new("a", false));
        store.activate("a").unwrap();
        let handle = manager.activate(&lease).await.unwrap();
        assert!(handle.is_live());
        assert_eq!(remote.active_subscriptions(Task::KIND, "a").unwrap(), 1);

        let copy = handle.clone();
        handle.cancel();
        handle.cancel();
        copy.cancel();
        assert!(handle.is_cancelled());
        assert!(copy.is_cancelled());
        assert!(!handle.is_live());
        wait_until_closed(&remote, "a").await;
    }

    #[tokio::test]
    async fn cancel_after_scope_was_superseded() {
        let remote = InMemoryRemoteStore::new();
        let (manager, store) = manager(&remote);
        let leases = LeaseIssuer::new();

        let first = leases.issue(ParentScope::new("a", false));
        store.activate("a").unwrap();
        let stale = manager.activate(&first).await.unwrap();

        let second = leases.issue(ParentScope::new("b", false));
        store.activate("b").unwrap();
        let current = manager.activate(&second).await.unwrap();
        assert!(!first.is_current());

        manager.deactivate(&stale);
        stale.cancel();
        assert!(stale.is_cancelled());
        wait_until_closed(&remote, "a").await;

        assert!(current.is_live());
        assert_eq!(remote.active_subscriptions(Task::KIND, "b").unwrap(), 1);
        assert_eq!(store.owner().unwrap().as_deref(), Some("b"));

        leases.revoke();
        manager.deactivate(&current);
        manager.deactivate(&current);
        assert!(current.is_cancelled());
        wait_until_closed(&remote, "b").await;
    }

    #[tokio::test]
    async fn inert_handle_cancels_without_a_task() {
        let remote = InMemoryRemoteStore::new();
        remote.set_fail_subscribe(true).unwrap();
        let (manager, store) = manager(&remote);
        let leases = LeaseIssuer::new();

        let lease = leases.issue(ParentScope::new("a", false));
        store.activate("a").unwrap();
        let handle = manager.activate(&lease).await.unwrap();
        assert!(!handle.is_live());

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(remote.active_subscriptions(Task::KIND, "a").unwrap(), 0);
    }
}
