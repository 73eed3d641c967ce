//! Regenerating notes refs from the legacy store.
//!
//! The rebuilder is the only writer on the load path. It derives the target
//! log state purely from the legacy bundle, writes it as content-addressed
//! commits, then moves refs with compare-and-swap. Concurrent rebuilders in
//! other processes are not locked out: a lost swap surfaces as
//! [`RebuildError::Io`] and the loader rechecks staleness.
//!
//! # Idempotence
//!
//! Rebuilt commits have no parent and a deterministic payload, so the same
//! legacy state always yields the same commit id. When a ref already points
//! at that id the swap is skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::legacy::{LegacyError, LegacyStore};
use crate::model::{AccountId, ChangeId, ProjectName};
use crate::refs::{change_meta_ref, draft_comments_prefix, draft_comments_ref};
use crate::repo::{Commit, ObjectId, RepoError, RepoManager, Repository};

use super::document::{DraftDocument, NotesDocument};
use super::pointer::ConsistencyPointer;

#[derive(Debug, thiserror::Error)]
pub enum RebuildError {
    #[error("change {0} has no legacy record")]
    NoSuchChange(ChangeId),

    /// Repository failure, including a lost compare-and-swap.
    #[error("notes I/O during rebuild: {0}")]
    Io(#[from] RepoError),

    #[error(transparent)]
    Legacy(#[from] LegacyError),

    #[error("cannot encode change {change_id}: {reason}")]
    Malformed { change_id: ChangeId, reason: String },
}

impl RebuildError {
    /// Whether the failure may be a lost race that a recheck can resolve.
    #[must_use]
    pub const fn is_retryable_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Rebuilds the notes of one change from the legacy store.
pub trait Rebuilder: Send + Sync {
    /// Returns the pointer now stored on the legacy record.
    ///
    /// # Errors
    ///
    /// See [`RebuildError`].
    fn rebuild(
        &self,
        legacy: &dyn LegacyStore,
        change_id: ChangeId,
    ) -> Result<ConsistencyPointer, RebuildError>;
}

/// Rebuilder writing [`NotesDocument`]s to the change's project and
/// [`DraftDocument`]s to the shared draft repository.
pub struct LegacyRebuilder {
    repo_manager: Arc<dyn RepoManager>,
    all_users: ProjectName,
}

impl std::fmt::Debug for LegacyRebuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyRebuilder")
            .field("all_users", &self.all_users)
            .finish_non_exhaustive()
    }
}

fn commit_message(change_id: ChangeId) -> String {
    format!("Rebuild notes for change {change_id}")
}

/// Point `name` at `target` unless it already does.
fn swap_ref(
    repo: &mut dyn Repository,
    name: &str,
    target: Option<&ObjectId>,
) -> Result<(), RepoError> {
    let current = repo.exact_ref(name)?;
    if current.as_ref() == target {
        return Ok(());
    }
    repo.update_ref(name, current.as_ref(), target)
}

impl LegacyRebuilder {
    pub fn new(repo_manager: Arc<dyn RepoManager>, all_users: ProjectName) -> Self {
        Self {
            repo_manager,
            all_users,
        }
    }

    fn rebuild_drafts(
        &self,
        change_id: ChangeId,
        drafts: BTreeMap<AccountId, DraftDocument>,
    ) -> Result<BTreeMap<AccountId, ObjectId>, RebuildError> {
        let mut repo = match self.repo_manager.open_repository(&self.all_users) {
            Ok(repo) => repo,
            Err(RepoError::RepositoryNotFound(_)) if drafts.is_empty() => {
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut draft_ids = BTreeMap::new();
        for (author, document) in drafts {
            let payload = document.encode().map_err(|e| RebuildError::Malformed {
                change_id,
                reason: e.to_string(),
            })?;
            let id = repo.insert_commit(Commit::new(None, commit_message(change_id), payload))?;
            swap_ref(&mut *repo, &draft_comments_ref(change_id, author), Some(&id))?;
            draft_ids.insert(author, id);
        }

        let stale: Vec<String> = repo
            .refs_by_prefix(&draft_comments_prefix(change_id))?
            .into_keys()
            .filter(|name| {
                change_id
                    .draft_author_from_ref(name)
                    .is_none_or(|author| !draft_ids.contains_key(&author))
            })
            .collect();
        for name in stale {
            swap_ref(&mut *repo, &name, None)?;
        }
        Ok(draft_ids)
    }
}

impl Rebuilder for LegacyRebuilder {
    fn rebuild(
        &self,
        legacy: &dyn LegacyStore,
        change_id: ChangeId,
    ) -> Result<ConsistencyPointer, RebuildError> {
        let bundle = legacy
            .bundle(change_id)?
            .ok_or(RebuildError::NoSuchChange(change_id))?;

        let payload = NotesDocument::from_bundle(&bundle)
            .encode()
            .map_err(|e| RebuildError::Malformed {
                change_id,
                reason: e.to_string(),
            })?;
        let mut repo = self.repo_manager.open_repository(&bundle.change.project)?;
        let meta_id = repo.insert_commit(Commit::new(None, commit_message(change_id), payload))?;
        swap_ref(&mut *repo, &change_meta_ref(change_id), Some(&meta_id))?;

        let draft_ids = self.rebuild_drafts(change_id, DraftDocument::from_bundle(&bundle))?;

        let pointer = ConsistencyPointer::new(change_id, meta_id, draft_ids);
        legacy.set_note_db_state(change_id, Some(&pointer.to_string()))?;
        Ok(pointer)
    }
}
