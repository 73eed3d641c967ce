//! In-process notes repositories.
//!
//! [`InMemoryRepoManager`] owns one shared store per project. Every
//! [`MemoryRepository`] handle snapshots the ref table when opened, so a
//! handle behaves like an on-disk repository whose packed refs were read
//! once: other writers become visible only after
//! [`Repository::scan_for_changes`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::model::ProjectName;

use super::{Commit, ObjectId, RepoError, RepoManager, Repository};

#[derive(Debug, Default)]
struct RepoStore {
    objects: HashMap<ObjectId, Commit>,
    refs: BTreeMap<String, ObjectId>,
}

type SharedStore = Arc<Mutex<RepoStore>>;

fn lock_store(store: &SharedStore) -> Result<MutexGuard<'_, RepoStore>, RepoError> {
    store
        .lock()
        .map_err(|_| RepoError::Io("repository store lock poisoned".into()))
}

// ---------------------------------------------------------------------------
// InMemoryRepoManager
// ---------------------------------------------------------------------------

/// Repository manager backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryRepoManager {
    repos: RwLock<BTreeMap<ProjectName, SharedStore>>,
}

impl InMemoryRepoManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty repository; creating an existing one is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Io`] if the registry lock is poisoned.
    pub fn create_project(&self, project: &ProjectName) -> Result<(), RepoError> {
        let mut repos = self
            .repos
            .write()
            .map_err(|_| RepoError::Io("repository registry lock poisoned".into()))?;
        repos.entry(project.clone()).or_default();
        Ok(())
    }

    fn store(&self, project: &ProjectName) -> Result<SharedStore, RepoError> {
        let repos = self
            .repos
            .read()
            .map_err(|_| RepoError::Io("repository registry lock poisoned".into()))?;
        repos
            .get(project)
            .cloned()
            .ok_or_else(|| RepoError::RepositoryNotFound(project.clone()))
    }

    /// Open a concrete handle, for callers that need the concrete type.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::RepositoryNotFound`] for unknown projects.
    pub fn open(&self, project: &ProjectName) -> Result<MemoryRepository, RepoError> {
        let store = self.store(project)?;
        MemoryRepository::open(project.clone(), store)
    }
}

impl RepoManager for InMemoryRepoManager {
    fn open_repository(&self, project: &ProjectName) -> Result<Box<dyn Repository>, RepoError> {
        Ok(Box::new(self.open(project)?))
    }

    fn list_projects(&self) -> Result<Vec<ProjectName>, RepoError> {
        let repos = self
            .repos
            .read()
            .map_err(|_| RepoError::Io("repository registry lock poisoned".into()))?;
        Ok(repos.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryRepository
// ---------------------------------------------------------------------------

/// A handle on one in-memory repository with its own ref view.
#[derive(Debug)]
pub struct MemoryRepository {
    project: ProjectName,
    store: SharedStore,
    view: BTreeMap<String, ObjectId>,
}

impl MemoryRepository {
    fn open(project: ProjectName, store: SharedStore) -> Result<Self, RepoError> {
        let view = lock_store(&store)?.refs.clone();
        Ok(Self {
            project,
            store,
            view,
        })
    }
}

fn validate_ref_name(name: &str) -> Result<(), RepoError> {
    let valid = name.starts_with("refs/")
        && !name.ends_with('/')
        && !name.contains("//")
        && !name.contains("..")
        && !name.chars().any(|c| c.is_whitespace() || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(RepoError::InvalidRefName(name.to_string()))
    }
}

impl Repository for MemoryRepository {
    fn project(&self) -> &ProjectName {
        &self.project
    }

    fn exact_ref(&self, name: &str) -> Result<Option<ObjectId>, RepoError> {
        Ok(self.view.get(name).copied())
    }

    fn refs_by_prefix(&self, prefix: &str) -> Result<BTreeMap<String, ObjectId>, RepoError> {
        Ok(self
            .view
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, id)| (name.clone(), *id))
            .collect())
    }

    fn read_commit(&self, id: &ObjectId) -> Result<Commit, RepoError> {
        lock_store(&self.store)?
            .objects
            .get(id)
            .cloned()
            .ok_or(RepoError::MissingObject(*id))
    }

    fn insert_commit(&mut self, commit: Commit) -> Result<ObjectId, RepoError> {
        let mut store = lock_store(&self.store)?;
        if let Some(parent) = commit.parent {
            if !store.objects.contains_key(&parent) {
                return Err(RepoError::MissingObject(parent));
            }
        }
        let id = commit.id;
        store.objects.entry(id).or_insert(commit);
        Ok(id)
    }

    fn update_ref(
        &mut self,
        name: &str,
        expected: Option<&ObjectId>,
        new: Option<&ObjectId>,
    ) -> Result<(), RepoError> {
        validate_ref_name(name)?;
        let mut store = lock_store(&self.store)?;

        let actual = store.refs.get(name).copied();
        if actual.as_ref() != expected {
            return Err(RepoError::LockFailure {
                name: name.to_string(),
                expected: expected.copied(),
                actual,
            });
        }

        match new {
            Some(id) => {
                if !store.objects.contains_key(id) {
                    return Err(RepoError::MissingObject(*id));
                }
                store.refs.insert(name.to_string(), *id);
                self.view.insert(name.to_string(), *id);
            }
            None => {
                store.refs.remove(name);
                self.view.remove(name);
            }
        }
        Ok(())
    }

    fn scan_for_changes(&mut self) -> Result<(), RepoError> {
        self.view = lock_store(&self.store)?.refs.clone();
        Ok(())
    }
}
