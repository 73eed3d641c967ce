//! Memoized ref lookups for the duration of one load.

use std::collections::HashMap;

use super::{ObjectId, RepoError, Repository};

/// Source of ref targets consulted while checking staleness.
pub trait RefCache {
    fn get(&mut self, name: &str) -> Result<Option<ObjectId>, RepoError>;
}

/// Reads through to a repository handle, remembering every answer so the
/// same ref observes one value for the lifetime of the cache.
pub struct RepoRefCache<'a> {
    repo: &'a dyn Repository,
    ids: HashMap<String, Option<ObjectId>>,
}

impl<'a> RepoRefCache<'a> {
    #[must_use]
    pub fn new(repo: &'a dyn Repository) -> Self {
        Self {
            repo,
            ids: HashMap::new(),
        }
    }
}

impl RefCache for RepoRefCache<'_> {
    fn get(&mut self, name: &str) -> Result<Option<ObjectId>, RepoError> {
        if let Some(id) = self.ids.get(name) {
            return Ok(*id);
        }
        let id = self.repo.exact_ref(name)?;
        self.ids.insert(name.to_string(), id);
        Ok(id)
    }
}

/// A caller-supplied, immutable ref table; refs missing from it are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedRefCache {
    ids: HashMap<String, ObjectId>,
}

impl FixedRefCache {
    pub fn new(ids: impl IntoIterator<Item = (String, ObjectId)>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Capture every ref under `prefix` from a repository in one listing.
    ///
    /// # Errors
    ///
    /// Returns the repository error if listing fails.
    pub fn from_repo(repo: &dyn Repository, prefix: &str) -> Result<Self, RepoError> {
        Ok(Self::new(repo.refs_by_prefix(prefix)?))
    }
}

impl RefCache for FixedRefCache {
    fn get(&mut self, name: &str) -> Result<Option<ObjectId>, RepoError> {
        Ok(self.ids.get(name).copied())
    }
}
