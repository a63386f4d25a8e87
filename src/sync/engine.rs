use super::coordinator::{LocalIdGenerator, OperationResult, WritePathCoordinator};
use super::lease::{LeaseIssuer, ScopeLease};
use super::policy::{Authority, ConsistencyPolicy};
use super::sandbox::DemoSandbox;
use super::store::{EntityStore, ViewState};
use super::subscription::{RemoteSubscriptionManager, SubscriptionHandle};
use crate::config::SyncConfig;
use crate::core::{Entity, EntityKind, ParentScope, Result, ScopeInit, SyncError, Timestamp};
use crate::remote::RemoteStore;
use crate::storage::LocalCache;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Where the working set of a freshly activated scope came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmStart {
    /// Nothing cached; the view waits for the first snapshot.
    Empty,
    /// Entities loaded from the local cache.
    Cache(usize),
    /// Sandbox fixtures written for the first time.
    Fixtures(usize),
}

/// Summary of one `activate` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeActivation {
    pub scope: ParentScope,
    pub generation: u64,
    pub activated_at: Timestamp,
    pub warm_start: WarmStart,
    /// Whether a live query is feeding the store.
    pub live: bool,
}

struct ActiveScope {
    lease: ScopeLease,
    handle: Option<SubscriptionHandle>,
}

/// Synchronization engine for one entity collection.
///
/// Owns the store of the active scope and wires the live query, the write
/// path and the sandbox around it. One engine serves one collection kind;
/// an application creates one per collection and activates them together.
pub struct SyncEngine<T: EntityKind> {
    store: Arc<EntityStore<T>>,
    cache: LocalCache,
    sandbox: DemoSandbox,
    subscriptions: RemoteSubscriptionManager<T>,
    coordinator: WritePathCoordinator<T>,
    leases: LeaseIssuer,
    active: Mutex<Option<ActiveScope>>,
}

impl<T: EntityKind> SyncEngine<T> {
    pub fn new(remote: Arc<dyn RemoteStore>, cache: LocalCache, config: &SyncConfig) -> Self {
        let store = Arc::new(EntityStore::new());
        let subscriptions =
            RemoteSubscriptionManager::new(Arc::clone(&remote), cache.clone(), Arc::clone(&store));
        let coordinator = WritePathCoordinator::new(remote, cache.clone(), Arc::clone(&store))
            .with_id_generator(LocalIdGenerator::new(config.local_id_random_len))
            .with_remote_timeout(config.remote_timeout);

        Self {
            store,
            cache,
            sandbox: DemoSandbox::new(config.sandbox.clone()),
            subscriptions,
            coordinator,
            leases: LeaseIssuer::new(),
            active: Mutex::new(None),
        }
    }

    /// Engine with the default configuration.
    pub fn with_defaults(remote: Arc<dyn RemoteStore>, cache: LocalCache) -> Self {
        Self::new(remote, cache, &SyncConfig::default())
    }

    /// Opens the cache the configuration names and builds the engine on it.
    pub fn from_config(remote: Arc<dyn RemoteStore>, config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        let cache = config.open_cache()?;
        Ok(Self::new(remote, cache, config))
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Switches the engine to a new parent scope.
    ///
    /// The previous scope's live query is cancelled before anything of the
    /// new scope is loaded, and results of the previous scope's in-flight
    /// writes no longer reach the store.
    pub async fn activate(&self, init: ScopeInit) -> Result<ScopeActivation> {
        init.validate()?;
        let sandboxed = self.sandbox.evaluate(&init);
        let scope = ParentScope::new(init.scope_id, sandboxed);
        let activated_at = Utc::now();

        let lease = {
            let mut active = self.active.lock()?;
            if let Some(previous) = active.take() {
                self.release(previous);
            }
            let lease = self.leases.issue(scope.clone());
            self.store.activate(scope.id())?;
            *active = Some(ActiveScope {
                lease: lease.clone(),
                handle: None,
            });
            lease
        };
        info!(
            "activating {} for scope '{}' (sandboxed: {})",
            T::KIND,
            scope.id(),
            sandboxed
        );

        if sandboxed {
            let warm_start = self.activate_sandbox(&lease, activated_at)?;
            return Ok(ScopeActivation {
                scope,
                generation: lease.generation(),
                activated_at,
                warm_start,
                live: false,
            });
        }

        let handle = self.subscriptions.activate(&lease).await?;
        let warm_start = match handle.cached_entities() {
            0 => WarmStart::Empty,
            count => WarmStart::Cache(count),
        };
        let live = handle.is_live();

        {
            let mut active = self.active.lock()?;
            match active.as_mut() {
                Some(current) if current.lease.generation() == lease.generation() => {
                    current.handle = Some(handle);
                }
                _ => {
                    debug!("scope '{}' superseded during activation", scope.id());
                    self.subscriptions.deactivate(&handle);
                }
            }
        }

        Ok(ScopeActivation {
            scope,
            generation: lease.generation(),
            activated_at,
            warm_start,
            live,
        })
    }

    fn activate_sandbox(&self, lease: &ScopeLease, now: Timestamp) -> Result<WarmStart> {
        let (entities, warm_start) =
            match self.sandbox.seed_if_absent::<T>(&self.cache, lease.scope_id(), now) {
                Ok(outcome) => {
                    let seeded = outcome.was_seeded();
                    let entities = outcome.into_entities();
                    let count = entities.len();
                    let warm_start = if seeded {
                        WarmStart::Fixtures(count)
                    } else if count == 0 {
                        WarmStart::Empty
                    } else {
                        WarmStart::Cache(count)
                    };
                    (entities, warm_start)
                }
                Err(err) => {
                    warn!(
                        "sandbox cache of scope '{}' unreadable, serving fixtures in memory: {}",
                        lease.scope_id(),
                        err
                    );
                    let fixtures = T::fixtures(lease.scope_id(), now);
                    let count = fixtures.len();
                    (fixtures, WarmStart::Fixtures(count))
                }
            };

        self.store.seed(lease.scope_id(), entities)?;
        self.store.set_loading(lease.scope_id(), false)?;
        Ok(warm_start)
    }

    /// Drops the active scope: cancels its live query and empties the store.
    pub fn deactivate(&self) -> Result<()> {
        let previous = self.active.lock()?.take();
        if let Some(previous) = previous {
            info!(
                "deactivating {} for scope '{}'",
                T::KIND,
                previous.lease.scope_id()
            );
            self.release(previous);
            self.leases.revoke();
            self.store.clear()?;
        }
        Ok(())
    }

    fn release(&self, previous: ActiveScope) {
        if let Some(handle) = previous.handle {
            self.subscriptions.deactivate(&handle);
        }
    }

    fn current_lease(&self) -> Result<Option<ScopeLease>> {
        Ok(self
            .active
            .lock()?
            .as_ref()
            .map(|active| active.lease.clone()))
    }

    pub fn active_scope(&self) -> Result<Option<ParentScope>> {
        Ok(self.current_lease()?.map(|lease| lease.scope().clone()))
    }

    pub fn policy(&self) -> Result<Option<ConsistencyPolicy>> {
        self.current_lease()?
            .map(|lease| lease.policy())
            .transpose()
    }

    /// Which source currently defines the view; `None` without an active scope.
    pub fn authority(&self) -> Result<Option<Authority>> {
        Ok(self.policy()?.map(|policy| policy.authority()))
    }

    pub fn view(&self) -> Result<ViewState<T>> {
        self.store.view()
    }

    /// Receiver that ticks on every store change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.store.changes()
    }

    pub fn entities(&self) -> Result<Vec<Entity<T>>> {
        self.store.entities()
    }

    pub fn get(&self, id: &str) -> Result<Option<Entity<T>>> {
        self.store.get(id)
    }

    pub fn get_filtered(&self, predicate: impl Fn(&Entity<T>) -> bool) -> Result<Vec<Entity<T>>> {
        self.store.filtered(predicate)
    }

    pub fn is_loading(&self) -> Result<bool> {
        Ok(self.store.view()?.loading)
    }

    pub fn clear_error(&self) -> Result<()> {
        self.store.clear_error()
    }

    pub async fn create(&self, draft: T::Draft) -> Result<OperationResult<Entity<T>>> {
        let Some(lease) = self.current_lease()? else {
            return Err(SyncError::NoActiveScope);
        };
        let result = self.coordinator.create(&lease, draft).await;
        self.surface(&lease, result)
    }

    /// Applies a partial update. An id the store does not hold is skipped.
    pub async fn update(&self, id: &str, patch: T::Patch) -> Result<OperationResult<()>> {
        let Some(lease) = self.current_lease()? else {
            warn!("update of {} '{}' ignored: no active scope", T::KIND, id);
            return Ok(OperationResult::skipped(()));
        };
        let result = self.coordinator.update(&lease, id, patch).await;
        self.surface(&lease, result)
    }

    pub async fn remove(&self, id: &str) -> Result<OperationResult<()>> {
        let Some(lease) = self.current_lease()? else {
            warn!("delete of {} '{}' ignored: no active scope", T::KIND, id);
            return Ok(OperationResult::skipped(()));
        };
        let result = self.coordinator.delete(&lease, id).await;
        self.surface(&lease, result)
    }

    /// Updates each id in turn with the same patch.
    pub async fn bulk_update(
        &self,
        ids: &[String],
        patch: T::Patch,
    ) -> Result<Vec<OperationResult<()>>> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(self.update(id, patch.clone()).await?);
        }
        Ok(results)
    }

    pub async fn bulk_remove(&self, ids: &[String]) -> Result<Vec<OperationResult<()>>> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(self.remove(id).await?);
        }
        Ok(results)
    }

    /// Records caller errors on the view before handing them back.
    fn surface<V>(&self, lease: &ScopeLease, result: Result<V>) -> Result<V> {
        if let Err(err) = &result {
            if err.is_caller_error() && lease.is_current() {
                self.store.set_error(lease.scope_id(), Some(err.to_string()))?;
            }
        }
        result
    }
}

impl<T: EntityKind> Drop for SyncEngine<T> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(previous) = active.take() {
                self.release(previous);
            }
        }
    }
}
