//! Process-wide cache of parsed change snapshots.
//!
//! Entries are keyed by `(project, change, revision)`. A revision is a
//! content address, so an entry can never go stale: the same key always
//! maps to the same parsed content. Eviction is plain LRU by entry count.
//!
//! # Concurrency
//!
//! Parsing runs outside the lock. Two loads that miss on the same key may
//! both parse; the first insert wins and both callers get equal content.
//! Only fully built values are ever inserted.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;
use tracing::Span;

use crate::error::NotesError;
use crate::model::{ChangeId, ProjectName};
use crate::repo::ObjectId;

use super::document::ParsedChange;

/// Default number of cached snapshots.
pub const DEFAULT_CAPACITY: usize = 1024;

type CacheKey = (ProjectName, ChangeId, ObjectId);

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct SnapshotCache {
    entries: Mutex<LruCache<CacheKey, ParsedChange>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SnapshotCache {
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<CacheKey, ParsedChange>>, NotesError> {
        self.entries
            .lock()
            .map_err(|_| NotesError::InvalidState("snapshot cache lock poisoned".into()))
    }

    /// Return the snapshot for `revision`, parsing and inserting it on a
    /// miss.
    ///
    /// # Errors
    ///
    /// Propagates `parse` failures; returns [`NotesError::InvalidState`] if
    /// the parsed snapshot reports a different revision.
    pub fn get<F>(
        &self,
        span: &Span,
        project: &ProjectName,
        change_id: ChangeId,
        revision: ObjectId,
        parse: F,
    ) -> Result<ParsedChange, NotesError>
    where
        F: FnOnce() -> Result<ParsedChange, NotesError>,
    {
        let key = (project.clone(), change_id, revision);
        if let Some(hit) = self.lock()?.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                parent: span,
                change_id = change_id.get(),
                revision = %revision.short(),
                "change notes cache hit"
            );
            return Ok(hit.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            parent: span,
            change_id = change_id.get(),
            revision = %revision.short(),
            "change notes cache miss"
        );
        let parsed = parse()?;
        if parsed.snapshot.revision() != Some(revision) {
            return Err(NotesError::InvalidState(format!(
                "parsed snapshot of change {change_id} does not match revision {revision}"
            )));
        }

        let mut entries = self.lock()?;
        if let Some(existing) = entries.get(&key) {
            return Ok(existing.clone());
        }
        entries.put(key, parsed.clone());
        Ok(parsed)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.lock().map_or(0, |entries| entries.len()),
        }
    }
}
