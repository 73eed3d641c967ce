//! Legacy store held in process memory, used by tests and embedders.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::model::{Change, ChangeBundle, ChangeId};

use super::{LegacyError, LegacyStore};

#[derive(Debug, Default)]
pub struct InMemoryLegacyStore {
    bundles: Mutex<BTreeMap<ChangeId, ChangeBundle>>,
    /// Extra index rows returned by `query_by_id`, modelling a stale index.
    index_duplicates: Mutex<BTreeMap<ChangeId, Vec<Change>>>,
    unavailable: AtomicBool,
    reads: AtomicUsize,
}

impl InMemoryLegacyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bundles(&self) -> Result<MutexGuard<'_, BTreeMap<ChangeId, ChangeBundle>>, LegacyError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LegacyError::Unavailable("store marked unavailable".into()));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.bundles
            .lock()
            .map_err(|_| LegacyError::Unavailable("legacy store lock poisoned".into()))
    }

    /// Insert or replace a change with all of its child rows.
    ///
    /// # Errors
    ///
    /// Fails when the store is marked unavailable.
    pub fn put(&self, bundle: ChangeBundle) -> Result<(), LegacyError> {
        self.bundles()?.insert(bundle.change.id, bundle);
        Ok(())
    }

    /// Replace only the change row, keeping child rows.
    ///
    /// # Errors
    ///
    /// Fails when the store is marked unavailable.
    pub fn put_change(&self, change: Change) -> Result<(), LegacyError> {
        let mut bundles = self.bundles()?;
        match bundles.get_mut(&change.id) {
            Some(bundle) => bundle.change = change,
            None => {
                bundles.insert(change.id, ChangeBundle::empty(change));
            }
        }
        Ok(())
    }

    /// Make `query_by_id` return an additional record for `change.id`.
    pub fn add_index_duplicate(&self, change: Change) {
        if let Ok(mut dups) = self.index_duplicates.lock() {
            dups.entry(change.id).or_default().push(change);
        }
    }

    /// Make every subsequent read fail with [`LegacyError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful store accesses so far.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl LegacyStore for InMemoryLegacyStore {
    fn get(&self, id: ChangeId) -> Result<Option<Change>, LegacyError> {
        Ok(self.bundles()?.get(&id).map(|b| b.change.clone()))
    }

    fn get_many(&self, ids: &[ChangeId]) -> Result<Vec<Change>, LegacyError> {
        let bundles = self.bundles()?;
        Ok(ids
            .iter()
            .filter_map(|id| bundles.get(id).map(|b| b.change.clone()))
            .collect())
    }

    fn all(&self) -> Result<Vec<Change>, LegacyError> {
        Ok(self.bundles()?.values().map(|b| b.change.clone()).collect())
    }

    fn query_by_id(&self, id: ChangeId) -> Result<Vec<Change>, LegacyError> {
        let mut found: Vec<Change> = self.get(id)?.into_iter().collect();
        if let Ok(dups) = self.index_duplicates.lock() {
            if let Some(extra) = dups.get(&id) {
                found.extend(extra.iter().cloned());
            }
        }
        Ok(found)
    }

    fn bundle(&self, id: ChangeId) -> Result<Option<ChangeBundle>, LegacyError> {
        Ok(self.bundles()?.get(&id).cloned())
    }

    fn set_note_db_state(&self, id: ChangeId, state: Option<&str>) -> Result<(), LegacyError> {
        let mut bundles = self.bundles()?;
        let bundle = bundles
            .get_mut(&id)
            .ok_or_else(|| LegacyError::Corrupt(format!("change {id} vanished during update")))?;
        bundle.change.note_db_state = state.map(str::to_string);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountId, ProjectName};
    use chrono::{TimeZone, Utc};

    fn change(id: i32) -> Change {
        Change::new(
            ChangeId::new(id),
            ProjectName::new("p"),
            AccountId::new(1),
            format!("change {id}"),
            Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts"),
        )
    }

    #[test]
    fn get_many_skips_missing_and_keeps_request_order() {
        let store = InMemoryLegacyStore::new();
        store.put_change(change(1)).expect("put");
        store.put_change(change(2)).expect("put");

        let ids: Vec<_> = store
            .get_many(&[ChangeId::new(2), ChangeId::new(999), ChangeId::new(1)])
            .expect("get_many")
            .into_iter()
            .map(|c| c.id.get())
            .collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn unavailable_store_fails_reads() {
        let store = InMemoryLegacyStore::new();
        store.put_change(change(1)).expect("put");
        store.set_unavailable(true);
        assert!(matches!(
            store.get(ChangeId::new(1)),
            Err(LegacyError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.get(ChangeId::new(1)).expect("get").is_some());
    }

    #[test]
    fn index_duplicates_surface_in_query_by_id() {
        let store = InMemoryLegacyStore::new();
        store.put_change(change(5)).expect("put");
        assert_eq!(store.query_by_id(ChangeId::new(5)).expect("query").len(), 1);
        store.add_index_duplicate(change(5));
        assert_eq!(store.query_by_id(ChangeId::new(5)).expect("query").len(), 2);
    }

    #[test]
    fn set_note_db_state_updates_row() {
        let store = InMemoryLegacyStore::new();
        store.put_change(change(3)).expect("put");
        store
            .set_note_db_state(ChangeId::new(3), Some("abc"))
            .expect("set state");
        let row = store.get(ChangeId::new(3)).expect("get").expect("present");
        assert_eq!(row.note_db_state.as_deref(), Some("abc"));
    }
}
