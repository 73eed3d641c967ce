//! Per-author draft comments, stored in the shared draft repository.
//!
//! Drafts rebuild on staleness like change notes do, but without the race
//! recheck: any rebuild I/O failure is fatal for the draft load.

use std::sync::Arc;

use crate::error::NotesError;
use crate::model::{AccountId, Change, ProjectName};
use crate::refs::draft_comments_ref;
use crate::repo::{RepoRefCache, Repository};

use super::load::{self, LoadHandle, LoadSource, NotesKind};
use super::pointer::{ConsistencyPointer, PointerState};
use super::rebuild::RebuildError;
use super::snapshot::DraftSnapshot;
use super::NotesArgs;

pub struct DraftCommentNotes {
    args: Arc<NotesArgs>,
    change: Change,
    author: AccountId,
    auto_rebuild: bool,
    state: Arc<DraftSnapshot>,
    source: LoadSource,
}

impl std::fmt::Debug for DraftCommentNotes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DraftCommentNotes")
            .field("change_id", &self.change.id)
            .field("author", &self.author)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl DraftCommentNotes {
    #[must_use]
    pub fn new(args: Arc<NotesArgs>, change: Change, author: AccountId, auto_rebuild: bool) -> Self {
        let state = Arc::new(DraftSnapshot::empty(change.id, author));
        Self {
            args,
            change,
            author,
            auto_rebuild,
            state,
            source: LoadSource::Indexed,
        }
    }

    /// # Errors
    ///
    /// Any [`NotesError`] from the load.
    pub fn load(mut self) -> Result<Self, NotesError> {
        let args = Arc::clone(&self.args);
        load::load(&mut self, &args)?;
        Ok(self)
    }

    #[must_use]
    pub const fn author(&self) -> AccountId {
        self.author
    }

    #[must_use]
    pub const fn snapshot(&self) -> &Arc<DraftSnapshot> {
        &self.state
    }

    #[must_use]
    pub const fn load_source(&self) -> LoadSource {
        self.source
    }

    fn rebuild_and_open(&mut self, repo: &mut dyn Repository) -> Result<LoadHandle, NotesError> {
        let id = self.change.id;
        tracing::info!(
            parent: &self.args.span,
            change_id = id.get(),
            author = self.author.get(),
            "rebuilding stale draft comments"
        );
        match self.args.rebuilder.rebuild(self.args.legacy.as_ref(), id) {
            Ok(pointer) => {
                repo.scan_for_changes()?;
                self.change.note_db_state = Some(pointer.to_string());
                let revision = pointer.draft_ids().get(&self.author).copied();
                let source = if revision.is_some() {
                    LoadSource::Rebuilt
                } else {
                    LoadSource::Defaults
                };
                Ok(LoadHandle::new(revision, source))
            }
            Err(RebuildError::NoSuchChange(_)) => {
                let current = self.read_ref(&*repo)?;
                Ok(LoadHandle::new(current, LoadSource::Current))
            }
            Err(e) => Err(NotesError::Rebuild(e)),
        }
    }
}

impl NotesKind for DraftCommentNotes {
    fn ref_name(&self) -> String {
        draft_comments_ref(self.change.id, self.author)
    }

    fn project(&self) -> &ProjectName {
        &self.args.all_users
    }

    fn load_defaults(&mut self, source: LoadSource) {
        self.state = Arc::new(DraftSnapshot::empty(self.change.id, self.author));
        self.source = source;
    }

    fn open_handle(&mut self, repo: &mut dyn Repository) -> Result<LoadHandle, NotesError> {
        let current = self.read_ref(&*repo)?;
        if !self.auto_rebuild {
            return Ok(LoadHandle::new(current, LoadSource::AutoRebuildDisabled));
        }
        let up_to_date = match ConsistencyPointer::parse(&self.change) {
            PointerState::Absent => true,
            PointerState::Present(pointer) => {
                pointer.are_drafts_up_to_date(&mut RepoRefCache::new(&*repo), self.author)?
            }
            PointerState::Malformed(_) => false,
        };
        if up_to_date {
            let source = if current.is_some() {
                LoadSource::Current
            } else {
                LoadSource::Defaults
            };
            return Ok(LoadHandle::new(current, source));
        }
        self.rebuild_and_open(repo)
    }

    fn on_load(&mut self, repo: &dyn Repository, handle: &LoadHandle) -> Result<(), NotesError> {
        let Some(revision) = handle.revision() else {
            self.load_defaults(handle.source());
            return Ok(());
        };
        let drafts = self
            .args
            .parser
            .parse_drafts(repo, self.change.id, self.author, revision)?;
        self.state = Arc::new(drafts);
        self.source = handle.source();
        Ok(())
    }
}
