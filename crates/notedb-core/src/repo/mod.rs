//! Content-addressed notes repositories.
//!
//! A repository stores immutable commits addressed by the BLAKE3 hash of
//! their content, plus a ref namespace mapping names to commit ids.
//!
//! # Invariants
//!
//! - Commit ids cover parent, message and payload; identical content always
//!   yields the identical id.
//! - Ref updates are compare-and-swap on the expected old value. A mismatch
//!   fails with [`RepoError::LockFailure`] and leaves the ref untouched.
//! - A [`Repository`] handle reads refs from the view it captured when it
//!   was opened (or last refreshed with [`Repository::scan_for_changes`]);
//!   writes from other handles are invisible until the next refresh.

pub mod memory;
pub mod ref_cache;

use std::collections::BTreeMap;
use std::fmt;

use crate::model::ProjectName;

pub use memory::{InMemoryRepoManager, MemoryRepository};
pub use ref_cache::{FixedRefCache, RefCache, RepoRefCache};

// ---------------------------------------------------------------------------
// ObjectId
// ---------------------------------------------------------------------------

/// BLAKE3 content address of a commit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse 64 lowercase or uppercase hex characters.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex)
            .ok()
            .map(|hash| Self(*hash.as_bytes()))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Abbreviated form for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(10);
        hex
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short())
    }
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

/// An immutable commit in a notes repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub id: ObjectId,
    pub parent: Option<ObjectId>,
    pub message: String,
    pub payload: Vec<u8>,
}

impl Commit {
    /// Build a commit, computing its content address.
    pub fn new(parent: Option<ObjectId>, message: impl Into<String>, payload: Vec<u8>) -> Self {
        let message = message.into();
        let id = compute_commit_id(parent.as_ref(), &message, &payload);
        Self {
            id,
            parent,
            message,
            payload,
        }
    }
}

/// Hash parent, message and payload with length framing so field
/// boundaries cannot be shifted.
#[must_use]
pub fn compute_commit_id(parent: Option<&ObjectId>, message: &str, payload: &[u8]) -> ObjectId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"notedb-commit\0");
    match parent {
        Some(p) => {
            hasher.update(&[1]);
            hasher.update(p.as_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
    hasher.update(&(message.len() as u64).to_le_bytes());
    hasher.update(message.as_bytes());
    hasher.update(&(payload.len() as u64).to_le_bytes());
    hasher.update(payload);
    ObjectId(*hasher.finalize().as_bytes())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    #[error("repository {0} not found")]
    RepositoryNotFound(ProjectName),

    #[error("missing object {0}")]
    MissingObject(ObjectId),

    /// Compare-and-swap lost: the ref was not at the expected value.
    #[error("lock failure updating {name}: expected {expected:?}, found {actual:?}")]
    LockFailure {
        name: String,
        expected: Option<ObjectId>,
        actual: Option<ObjectId>,
    },

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("repository I/O error: {0}")]
    Io(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One open handle on a notes repository. Owned by a single load.
pub trait Repository: Send {
    fn project(&self) -> &ProjectName;

    /// Current target of `name` in this handle's view.
    fn exact_ref(&self, name: &str) -> Result<Option<ObjectId>, RepoError>;

    /// All refs in this handle's view whose names start with `prefix`.
    fn refs_by_prefix(&self, prefix: &str) -> Result<BTreeMap<String, ObjectId>, RepoError>;

    fn read_commit(&self, id: &ObjectId) -> Result<Commit, RepoError>;

    /// Store a commit; storing identical content twice is a no-op.
    fn insert_commit(&mut self, commit: Commit) -> Result<ObjectId, RepoError>;

    /// Atomically move `name` from `expected` to `new`. `None` as `expected`
    /// requires the ref to be absent; `None` as `new` deletes it.
    fn update_ref(
        &mut self,
        name: &str,
        expected: Option<&ObjectId>,
        new: Option<&ObjectId>,
    ) -> Result<(), RepoError>;

    /// Refresh this handle's ref view after writes made through other
    /// handles.
    fn scan_for_changes(&mut self) -> Result<(), RepoError>;
}

/// Opens repositories by project name.
pub trait RepoManager: Send + Sync {
    fn open_repository(&self, project: &ProjectName) -> Result<Box<dyn Repository>, RepoError>;

    fn list_projects(&self) -> Result<Vec<ProjectName>, RepoError>;
}
