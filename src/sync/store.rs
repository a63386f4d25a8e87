use super::policy::MergeMode;
use crate::core::{Entity, EntityKind, Result, Timestamp};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tokio::sync::watch;

/// What the view layer renders for one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState<T> {
    pub scope_id: Option<String>,
    pub entities: Vec<Entity<T>>,
    pub loading: bool,
    pub error: Option<String>,
}

struct StoreState<T> {
    scope_id: Option<String>,
    entities: Vec<Entity<T>>,
    /// Ids written optimistically and not yet confirmed by a snapshot.
    pending: HashSet<String>,
    /// Remote-confirmed writes a snapshot has not caught up with yet, keyed by
    /// id with the time the remote accepted them.
    confirmed: HashMap<String, (Entity<T>, Timestamp)>,
    loading: bool,
    error: Option<String>,
}

impl<T> StoreState<T> {
    fn owned_by(&self, scope_id: &str) -> bool {
        self.scope_id.as_deref() == Some(scope_id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entities.iter().position(|e| e.id() == id)
    }

    fn insert_ordered(&mut self, entity: Entity<T>) {
        let at = entity
            .sort_order
            .and_then(|order| {
                self.entities
                    .iter()
                    .position(|e| e.sort_order.is_some_and(|other| other > order))
            })
            .unwrap_or(self.entities.len());
        self.entities.insert(at, entity);
    }

    fn reset(&mut self, scope_id: Option<String>, loading: bool) {
        self.scope_id = scope_id;
        self.entities.clear();
        self.pending.clear();
        self.confirmed.clear();
        self.loading = loading;
        self.error = None;
    }
}

/// In-memory collection for the active parent scope.
///
/// Every mutation names the scope it was issued for and is ignored when that
/// scope no longer owns the store. Readers get owned copies; each change bumps
/// the version published on [`EntityStore::changes`].
pub struct EntityStore<T: EntityKind> {
    state: RwLock<StoreState<T>>,
    changes: watch::Sender<u64>,
}

impl<T: EntityKind> Default for EntityStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: EntityKind> EntityStore<T> {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: RwLock::new(StoreState {
                scope_id: None,
                entities: Vec::new(),
                pending: HashSet::new(),
                confirmed: HashMap::new(),
                loading: false,
                error: None,
            }),
            changes,
        }
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.changes.borrow()
    }

    /// Hands the store to `scope_id`, dropping everything held for the previous owner.
    pub fn activate(&self, scope_id: &str) -> Result<()> {
        self.state.write()?.reset(Some(scope_id.to_string()), true);
        self.notify();
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.state.write()?.reset(None, false);
        self.notify();
        Ok(())
    }

    pub fn owner(&self) -> Result<Option<String>> {
        Ok(self.state.read()?.scope_id.clone())
    }

    /// Full replacement from a remote snapshot.
    ///
    /// An optimistic entity survives only if its `updated_at` is strictly newer
    /// than the snapshot's copy; ties go to the snapshot. With
    /// [`MergeMode::RetainUnsynced`] optimistic entities missing from the
    /// snapshot are kept as well. A confirmed write is released once the
    /// snapshot's copy is at least as new, or the snapshot no longer holds the
    /// id. Returns the merged array when applied.
    pub fn replace_all(
        &self,
        scope_id: &str,
        entities: Vec<Entity<T>>,
        mode: MergeMode,
    ) -> Result<Option<Vec<Entity<T>>>> {
        let merged = {
            let mut state = self.state.write()?;
            if !state.owned_by(scope_id) {
                return Ok(None);
            }

            let entities = dedupe(entities);
            let snapshot_times: HashMap<&str, Timestamp> = entities
                .iter()
                .map(|e| (e.id(), e.updated_at()))
                .collect();
            state.confirmed.retain(|id, (_, at)| {
                snapshot_times
                    .get(id.as_str())
                    .is_some_and(|remote_at| *remote_at < *at)
            });
            drop(snapshot_times);

            let mut merged = Vec::with_capacity(entities.len());
            let mut seen: HashMap<String, usize> = HashMap::new();
            for remote in entities {
                let id = remote.id().to_string();
                let keep_local = state.pending.contains(&id)
                    && state
                        .position(&id)
                        .is_some_and(|i| state.entities[i].updated_at() > remote.updated_at());
                let chosen = if keep_local {
                    state
                        .position(&id)
                        .map(|i| state.entities[i].clone())
                        .unwrap_or(remote)
                } else {
                    state.pending.remove(&id);
                    remote
                };
                seen.insert(id, merged.len());
                merged.push(chosen);
            }

            if mode == MergeMode::RetainUnsynced {
                for local in &state.entities {
                    if state.pending.contains(local.id()) && !seen.contains_key(local.id()) {
                        merged.push(local.clone());
                    }
                }
            }

            let retained: HashSet<&str> = merged.iter().map(|e| e.id()).collect();
            let pending = std::mem::take(&mut state.pending);
            state.pending = pending
                .into_iter()
                .filter(|id| retained.contains(id.as_str()))
                .collect();
            drop(retained);

            state.entities = merged.clone();
            state.loading = false;
            merged
        };
        self.notify();
        Ok(Some(merged))
    }

    /// Replaces the array with trusted local data (cache warm start, sandbox seed).
    pub fn seed(&self, scope_id: &str, entities: Vec<Entity<T>>) -> Result<bool> {
        {
            let mut state = self.state.write()?;
            if !state.owned_by(scope_id) {
                return Ok(false);
            }
            state.entities = dedupe(entities);
            state.pending.clear();
            state.confirmed.clear();
        }
        self.notify();
        Ok(true)
    }

    /// Inserts or overwrites by id. Entities with a sort order go before the
    /// first entity with a larger one; everything else is appended. An
    /// overwrite that changes the sort order moves the entity.
    pub fn upsert(&self, scope_id: &str, entity: Entity<T>) -> Result<bool> {
        {
            let mut state = self.state.write()?;
            if !state.owned_by(scope_id) {
                return Ok(false);
            }
            state.pending.insert(entity.id().to_string());
            state.confirmed.remove(entity.id());
            match state.position(entity.id()) {
                Some(i) if state.entities[i].sort_order == entity.sort_order => {
                    state.entities[i] = entity
                }
                Some(i) => {
                    state.entities.remove(i);
                    state.insert_ordered(entity);
                }
                None => state.insert_ordered(entity),
            }
        }
        self.notify();
        Ok(true)
    }

    pub fn remove(&self, scope_id: &str, id: &str) -> Result<bool> {
        {
            let mut state = self.state.write()?;
            if !state.owned_by(scope_id) {
                return Ok(false);
            }
            let Some(i) = state.position(id) else {
                return Ok(false);
            };
            state.entities.remove(i);
            state.pending.remove(id);
            state.confirmed.remove(id);
        }
        self.notify();
        Ok(true)
    }

    /// Records a write the remote accepted at `at` but no snapshot has shown yet.
    ///
    /// The rendered array stays with the snapshot; only [`EntityStore::get`]
    /// sees the confirmed copy, so read-modify-write callers build on it.
    pub fn confirm(&self, scope_id: &str, entity: Entity<T>, at: Timestamp) -> Result<bool> {
        let mut state = self.state.write()?;
        if !state.owned_by(scope_id) || state.position(entity.id()).is_none() {
            return Ok(false);
        }
        state
            .confirmed
            .insert(entity.id().to_string(), (entity, at));
        Ok(true)
    }

    pub fn is_confirmed(&self, id: &str) -> Result<bool> {
        Ok(self.state.read()?.confirmed.contains_key(id))
    }

    /// Latest known copy of `id`: a confirmed remote write if one is
    /// outstanding, the rendered entity otherwise.
    pub fn get(&self, id: &str) -> Result<Option<Entity<T>>> {
        let state = self.state.read()?;
        if let Some((entity, _)) = state.confirmed.get(id) {
            return Ok(Some(entity.clone()));
        }
        Ok(state.position(id).map(|i| state.entities[i].clone()))
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.state.read()?.position(id).is_some())
    }

    pub fn entities(&self) -> Result<Vec<Entity<T>>> {
        Ok(self.state.read()?.entities.clone())
    }

    pub fn filtered(&self, predicate: impl Fn(&Entity<T>) -> bool) -> Result<Vec<Entity<T>>> {
        Ok(self
            .state
            .read()?
            .entities
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.state.read()?.entities.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn is_pending(&self, id: &str) -> Result<bool> {
        Ok(self.state.read()?.pending.contains(id))
    }

    pub fn view(&self) -> Result<ViewState<T>> {
        let state = self.state.read()?;
        Ok(ViewState {
            scope_id: state.scope_id.clone(),
            entities: state.entities.clone(),
            loading: state.loading,
            error: state.error.clone(),
        })
    }

    pub fn set_loading(&self, scope_id: &str, loading: bool) -> Result<()> {
        {
            let mut state = self.state.write()?;
            if !state.owned_by(scope_id) || state.loading == loading {
                return Ok(());
            }
            state.loading = loading;
        }
        self.notify();
        Ok(())
    }

    pub fn set_error(&self, scope_id: &str, error: Option<String>) -> Result<()> {
        {
            let mut state = self.state.write()?;
            if !state.owned_by(scope_id) {
                return Ok(());
            }
            state.error = error;
        }
        self.notify();
        Ok(())
    }

    pub fn clear_error(&self) -> Result<()> {
        self.state.write()?.error = None;
        self.notify();
        Ok(())
    }
}

/// Keeps the first position of each id with the value of its last occurrence.
fn dedupe<T>(entities: Vec<Entity<T>>) -> Vec<Entity<T>> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(entities.len());
    let mut unique: Vec<Entity<T>> = Vec::with_capacity(entities.len());
    for entity in entities {
        match index.get(entity.id()) {
            Some(&i) => unique[i] = entity,
            None => {
                index.insert(entity.id().to_string(), unique.len());
                unique.push(entity);
            }
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Timestamp;
    use chrono::{Duration, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        label: String,
    }

    impl EntityKind for Item {
        type Draft = String;
        type Patch = String;
        const KIND: &'static str = "items";
        const ID_PREFIX: &'static str = "item";

        fn validate_draft(_draft: &String) -> Result<()> {
            Ok(())
        }

        fn from_draft(draft: String, _now: Timestamp) -> Self {
            Self { label: draft }
        }

        fn apply_patch(&mut self, patch: &String, _now: Timestamp) {
            self.label = patch.clone();
        }
    }

    fn item(id: &str, label: &str, at: Timestamp) -> Entity<Item> {
        Entity::new(id, "w1", Item { label: label.into() }, at)
    }

    fn ids(store: &EntityStore<Item>) -> Vec<String> {
        store
            .entities()
            .unwrap()
            .iter()
            .map(|e| e.id().to_string())
            .collect()
    }

    #[test]
    fn upsert_overwrites_without_duplicates() {
        let store = EntityStore::new();
        store.activate("w1").unwrap();
        let now = Utc::now();
        store.upsert("w1", item("a", "one", now)).unwrap();
        store.upsert("w1", item("b", "two", now)).unwrap();
        store.upsert("w1", item("a", "uno", now)).unwrap();

        assert_eq!(ids(&store), vec!["a", "b"]);
        assert_eq!(store.get("a").unwrap().unwrap().fields.label, "uno");
    }

    #[test]
    fn upsert_respects_sort_order() {
        let store = EntityStore::new();
        store.activate("w1").unwrap();
        let now = Utc::now();
        store.upsert("w1", item("a", "a", now).with_sort_order(Some(0))).unwrap();
        store.upsert("w1", item("c", "c", now).with_sort_order(Some(2))).unwrap();
        store.upsert("w1", item("b", "b", now).with_sort_order(Some(1))).unwrap();
        store.upsert("w1", item("z", "z", now)).unwrap();

        assert_eq!(ids(&store), vec!["a", "b", "c", "z"]);
    }

    #[test]
    fn upsert_moves_entity_when_sort_order_changes() {
        let store = EntityStore::new();
        store.activate("w1").unwrap();
        let now = Utc::now();
        store.upsert("w1", item("a", "a", now).with_sort_order(Some(0))).unwrap();
        store.upsert("w1", item("b", "b", now).with_sort_order(Some(1))).unwrap();
        store.upsert("w1", item("c", "c", now).with_sort_order(Some(2))).unwrap();

        store.upsert("w1", item("a", "a", now).with_sort_order(Some(5))).unwrap();
        assert_eq!(ids(&store), vec!["b", "c", "a"]);

        store.upsert("w1", item("c", "c", now).with_sort_order(Some(0))).unwrap();
        assert_eq!(ids(&store), vec!["c", "b", "a"]);
    }

    #[test]
    fn confirmed_write_is_read_until_snapshot_catches_up() {
        let store = EntityStore::new();
        store.activate("w1").unwrap();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(1);
        store
            .replace_all("w1", vec![item("a", "old", t0)], MergeMode::RemoteWins)
            .unwrap();

        let mut confirmed = item("a", "new", t0);
        confirmed.touch(t1);
        assert!(store.confirm("w1", confirmed, t1).unwrap());
        assert_eq!(store.get("a").unwrap().unwrap().fields.label, "new");
        assert_eq!(store.entities().unwrap()[0].fields.label, "old");

        // A snapshot taken before the write does not release it.
        store
            .replace_all("w1", vec![item("a", "old", t0)], MergeMode::RemoteWins)
            .unwrap();
        assert!(store.is_confirmed("a").unwrap());
        assert_eq!(store.get("a").unwrap().unwrap().fields.label, "new");

        let mut caught_up = item("a", "new", t0);
        caught_up.touch(t1);
        store
            .replace_all("w1", vec![caught_up], MergeMode::RemoteWins)
            .unwrap();
        assert!(!store.is_confirmed("a").unwrap());
        assert_eq!(store.get("a").unwrap().unwrap().fields.label, "new");
    }

    #[test]
    fn confirmed_write_is_released_when_snapshot_drops_the_id() {
        let store = EntityStore::new();
        store.activate("w1").unwrap();
        let t0 = Utc::now();
        store
            .replace_all("w1", vec![item("a", "old", t0)], MergeMode::RemoteWins)
            .unwrap();
        store
            .confirm("w1", item("a", "new", t0), t0 + Duration::seconds(1))
            .unwrap();
        assert!(!store.confirm("w2", item("a", "x", t0), t0).unwrap());
        assert!(!store.confirm("w1", item("zz", "x", t0), t0).unwrap());

        store.replace_all("w1", Vec::new(), MergeMode::RemoteWins).unwrap();
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn foreign_scope_mutations_are_ignored() {
        let store = EntityStore::new();
        store.activate("w1").unwrap();
        let now = Utc::now();
        assert!(!store.upsert("w2", item("a", "x", now)).unwrap());
        assert!(store
            .replace_all("w2", vec![item("b", "y", now)], MergeMode::RemoteWins)
            .unwrap()
            .is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn snapshot_wins_ties_and_older_optimistic_values() {
        let store = EntityStore::new();
        store.activate("w1").unwrap();
        let t0 = Utc::now();
        store.upsert("w1", item("a", "local", t0)).unwrap();

        store
            .replace_all("w1", vec![item("a", "remote", t0)], MergeMode::RemoteWins)
            .unwrap();
        assert_eq!(store.get("a").unwrap().unwrap().fields.label, "remote");
        assert!(!store.is_pending("a").unwrap());
    }

    #[test]
    fn newer_optimistic_value_survives_stale_snapshot() {
        let store = EntityStore::new();
        store.activate("w1").unwrap();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(1);
        store.upsert("w1", item("a", "local", t1)).unwrap();

        store
            .replace_all("w1", vec![item("a", "remote", t0)], MergeMode::RemoteWins)
            .unwrap();
        assert_eq!(store.get("a").unwrap().unwrap().fields.label, "local");
        assert!(store.is_pending("a").unwrap());

        let t2 = t1 + Duration::seconds(1);
        store
            .replace_all("w1", vec![item("a", "remote", t2)], MergeMode::RemoteWins)
            .unwrap();
        assert_eq!(store.get("a").unwrap().unwrap().fields.label, "remote");
    }

    #[test]
    fn unsynced_entities_follow_merge_mode() {
        let store = EntityStore::new();
        store.activate("w1").unwrap();
        let now = Utc::now();
        store.upsert("w1", item("local", "l", now)).unwrap();

        store
            .replace_all("w1", vec![item("r1", "r", now)], MergeMode::RetainUnsynced)
            .unwrap();
        assert_eq!(ids(&store), vec!["r1", "local"]);

        store
            .replace_all("w1", vec![item("r1", "r", now)], MergeMode::RemoteWins)
            .unwrap();
        assert_eq!(ids(&store), vec!["r1"]);
    }

    #[test]
    fn duplicate_snapshot_ids_collapse() {
        let store = EntityStore::new();
        store.activate("w1").unwrap();
        let now = Utc::now();
        store
            .replace_all(
                "w1",
                vec![item("a", "first", now), item("b", "b", now), item("a", "second", now)],
                MergeMode::RemoteWins,
            )
            .unwrap();
        assert_eq!(ids(&store), vec!["a", "b"]);
        assert_eq!(store.get("a").unwrap().unwrap().fields.label, "second");
    }

    #[test]
    fn changes_bump_version() {
        let store: EntityStore<Item> = EntityStore::new();
        let rx = store.changes();
        let before = *rx.borrow();
        store.activate("w1").unwrap();
        store.upsert("w1", item("a", "x", Utc::now())).unwrap();
        assert!(*rx.borrow() >= before + 2);
    }
}
