//! The load skeleton shared by change notes and draft notes.
//!
//! Each kind of notes supplies its capabilities through [`NotesKind`]; the
//! generic [`load`] drives them:
//!
//! ```text
//! read_changes off ──────────────────────────────► load_defaults(LegacyOnly)
//! open repo ─► open_handle ─► revision None ─────► load_defaults(source)
//!                          └► revision Some(id) ─► on_load(id)
//! ```

use crate::error::NotesError;
use crate::model::ProjectName;
use crate::repo::{ObjectId, RepoError, Repository};

use super::NotesArgs;

/// Which branch of the load produced the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// No pointer and no ref: a brand-new change.
    Defaults,
    /// The ref was already up to date.
    Current,
    /// The rebuilder produced the revision.
    Rebuilt,
    /// The rebuild failed but a concurrent writer had already caught up.
    RecoveredRace,
    /// The caller disabled rebuilding; whatever the ref held was used.
    AutoRebuildDisabled,
    /// Reads are still served by the legacy store.
    LegacyOnly,
    /// Built from index data without touching either store.
    Indexed,
}

/// The revision chosen by `open_handle`, or `None` for an empty log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadHandle {
    revision: Option<ObjectId>,
    source: LoadSource,
}

impl LoadHandle {
    #[must_use]
    pub const fn new(revision: Option<ObjectId>, source: LoadSource) -> Self {
        Self { revision, source }
    }

    #[must_use]
    pub const fn revision(&self) -> Option<ObjectId> {
        self.revision
    }

    #[must_use]
    pub const fn source(&self) -> LoadSource {
        self.source
    }
}

/// Per-kind behavior plugged into [`load`].
pub trait NotesKind {
    /// Ref holding this kind's log.
    fn ref_name(&self) -> String;

    /// Repository holding [`NotesKind::ref_name`].
    fn project(&self) -> &ProjectName;

    /// Reset to the empty state.
    fn load_defaults(&mut self, source: LoadSource);

    /// Current target of the ref.
    ///
    /// # Errors
    ///
    /// Propagates ref lookup failures.
    fn read_ref(&mut self, repo: &dyn Repository) -> Result<Option<ObjectId>, RepoError> {
        repo.exact_ref(&self.ref_name())
    }

    /// Choose the revision to load, rebuilding first if needed.
    ///
    /// # Errors
    ///
    /// Any load failure.
    fn open_handle(&mut self, repo: &mut dyn Repository) -> Result<LoadHandle, NotesError>;

    /// Populate state from the revision in `handle`.
    ///
    /// # Errors
    ///
    /// Any parse or cache failure.
    fn on_load(&mut self, repo: &dyn Repository, handle: &LoadHandle) -> Result<(), NotesError>;
}

/// Run one load of `kind`.
///
/// # Errors
///
/// Propagates repository open failures and the kind's own errors.
pub fn load<K: NotesKind + ?Sized>(kind: &mut K, args: &NotesArgs) -> Result<(), NotesError> {
    if !args.config.migration.read_changes {
        kind.load_defaults(LoadSource::LegacyOnly);
        return Ok(());
    }
    let mut repo = args.repo_manager.open_repository(kind.project())?;
    let handle = kind.open_handle(&mut *repo)?;
    if handle.revision().is_none() {
        kind.load_defaults(handle.source());
        return Ok(());
    }
    kind.on_load(&*repo, &handle)
}
