//! Read-side view of one change, backed by the notes log.
//!
//! # Load state machine
//!
//! ```text
//! Initial ─► HandleOpened ─┬─► auto-rebuild off ──────────► Loaded
//!                          ├─► no pointer, no ref ────────► Loaded (defaults)
//!                          ├─► up to date ────────────────► Loaded (current)
//!                          └─► stale ─► Rebuilding ─┬─► ok ► Loaded (rebuilt)
//!                                                   └─► I/O ► Recheck ─┬─► Loaded
//!                                                                      └─► Failed
//! ```
//!
//! A failed recheck always re-raises the original rebuild error; secondary
//! failures during the recheck are logged and dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::NotesError;
use crate::model::{
    AccountId, Change, ChangeId, ChangeMessage, Comment, PatchSet, PatchSetApproval, PatchSetId,
    ProjectName, ReviewerSet, RevId, SubmitRecord,
};
use crate::refs::change_meta_ref;
use crate::repo::{ObjectId, RefCache, RepoError, RepoRefCache, Repository};

use super::drafts::DraftCommentNotes;
use super::load::{self, LoadHandle, LoadSource, NotesKind};
use super::pointer::{ConsistencyPointer, PointerState};
use super::rebuild::RebuildError;
use super::snapshot::{DraftSnapshot, NotesSnapshot, RevisionNotes};
use super::NotesArgs;

pub struct ChangeNotes {
    args: Arc<NotesArgs>,
    change: Change,
    auto_rebuild: bool,
    /// Caller-supplied ref values; only set when auto-rebuild is disabled.
    refs: Option<Box<dyn RefCache + Send>>,
    state: Arc<NotesSnapshot>,
    revision_notes: Arc<RevisionNotes>,
    drafts: Option<DraftCommentNotes>,
    source: LoadSource,
}

impl std::fmt::Debug for ChangeNotes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotes")
            .field("change_id", &self.change.id)
            .field("project", &self.change.project)
            .field("revision", &self.state.revision())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl ChangeNotes {
    /// Unloaded notes; call [`ChangeNotes::load`] before reading.
    #[must_use]
    pub fn new(args: Arc<NotesArgs>, change: Change) -> Self {
        let auto_rebuild = args.config.migration.auto_rebuild;
        Self::with_options(args, change, auto_rebuild, None)
    }

    pub(crate) fn with_options(
        args: Arc<NotesArgs>,
        change: Change,
        auto_rebuild: bool,
        refs: Option<Box<dyn RefCache + Send>>,
    ) -> Self {
        let state = Arc::new(NotesSnapshot::empty(&change));
        Self {
            args,
            change,
            auto_rebuild,
            refs,
            state,
            revision_notes: Arc::new(RevisionNotes::default()),
            drafts: None,
            source: LoadSource::Indexed,
        }
    }

    /// Run the load state machine.
    ///
    /// # Errors
    ///
    /// Any [`NotesError`] from the load.
    pub fn load(mut self) -> Result<Self, NotesError> {
        let args = Arc::clone(&self.args);
        load::load(&mut self, &args)?;
        Ok(self)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub const fn change(&self) -> &Change {
        &self.change
    }

    #[must_use]
    pub const fn change_id(&self) -> ChangeId {
        self.change.id
    }

    #[must_use]
    pub const fn project_name(&self) -> &ProjectName {
        &self.change.project
    }

    /// Revision the snapshot was computed from; `None` for an empty log.
    #[must_use]
    pub fn revision(&self) -> Option<ObjectId> {
        self.state.revision()
    }

    #[must_use]
    pub const fn load_source(&self) -> LoadSource {
        self.source
    }

    #[must_use]
    pub fn snapshot(&self) -> &NotesSnapshot {
        &self.state
    }

    #[must_use]
    pub fn patch_sets(&self) -> &BTreeMap<PatchSetId, PatchSet> {
        self.state.patch_sets()
    }

    #[must_use]
    pub fn approvals(&self) -> &BTreeMap<PatchSetId, Vec<PatchSetApproval>> {
        self.state.approvals()
    }

    #[must_use]
    pub fn reviewers(&self) -> &ReviewerSet {
        self.state.reviewers()
    }

    /// Hashtags in alphabetical order.
    #[must_use]
    pub fn hashtags(&self) -> BTreeSet<String> {
        self.state.sorted_hashtags()
    }

    /// Everyone who has ever been a reviewer.
    #[must_use]
    pub fn all_past_reviewers(&self) -> &[AccountId] {
        self.state.all_past_reviewers()
    }

    /// Records stored by the most recent submit.
    #[must_use]
    pub fn submit_records(&self) -> &[SubmitRecord] {
        self.state.submit_records()
    }

    /// Oldest first.
    #[must_use]
    pub fn change_messages(&self) -> &[ChangeMessage] {
        self.state.change_messages()
    }

    #[must_use]
    pub fn change_messages_by_patch_set(&self) -> &BTreeMap<PatchSetId, Vec<ChangeMessage>> {
        self.state.messages_by_patch_set()
    }

    /// Published inline comments per revision.
    #[must_use]
    pub fn comments(&self) -> &BTreeMap<RevId, Vec<Comment>> {
        self.revision_notes.comments()
    }

    /// Read-only revision notes; edits start from
    /// [`RevisionNotes::to_builder`].
    #[must_use]
    pub fn revision_notes(&self) -> &RevisionNotes {
        &self.revision_notes
    }

    #[must_use]
    pub fn current_patch_set(&self) -> Option<&PatchSet> {
        self.change
            .current_patch_set
            .and_then(|id| self.state.patch_sets().get(&id))
    }

    /// Draft comments of `author`, minus any whose key is already published.
    ///
    /// Drafts are loaded on first use and kept until another author is asked
    /// for.
    ///
    /// # Errors
    ///
    /// Any failure loading the author's drafts.
    pub fn get_draft_comments(
        &mut self,
        author: AccountId,
    ) -> Result<BTreeMap<RevId, Vec<Comment>>, NotesError> {
        let drafts = self.load_draft_comments(author)?;
        let published = self.revision_notes.comments();
        let mut filtered = BTreeMap::new();
        for (rev, comments) in drafts.comments() {
            let keep: Vec<Comment> = comments
                .iter()
                .filter(|draft| {
                    !published
                        .get(rev)
                        .is_some_and(|list| list.iter().any(|p| p.key == draft.key))
                })
                .cloned()
                .collect();
            if !keep.is_empty() {
                filtered.insert(rev.clone(), keep);
            }
        }
        Ok(filtered)
    }

    /// Whether `comment` exists as a published comment or as a draft of its
    /// author.
    ///
    /// # Errors
    ///
    /// Any failure loading the author's drafts.
    pub fn contains_comment(&mut self, comment: &Comment) -> Result<bool, NotesError> {
        if self.contains_published_comment(comment) {
            return Ok(true);
        }
        Ok(self.load_draft_comments(comment.author)?.contains(&comment.key))
    }

    #[must_use]
    pub fn contains_published_comment(&self, comment: &Comment) -> bool {
        self.state.contains_published(&comment.key)
    }

    fn load_draft_comments(&mut self, author: AccountId) -> Result<Arc<DraftSnapshot>, NotesError> {
        let reuse = self
            .drafts
            .as_ref()
            .is_some_and(|drafts| drafts.author() == author);
        if !reuse {
            let drafts = DraftCommentNotes::new(
                Arc::clone(&self.args),
                self.change.clone(),
                author,
                self.auto_rebuild,
            )
            .load()?;
            self.drafts = Some(drafts);
        }
        self.drafts
            .as_ref()
            .map(|drafts| Arc::clone(drafts.snapshot()))
            .ok_or_else(|| NotesError::InvalidState("draft comments not loaded".into()))
    }

    // -----------------------------------------------------------------------
    // Rebuild
    // -----------------------------------------------------------------------

    fn rebuild_and_open(
        &mut self,
        repo: &mut dyn Repository,
        old_id: Option<ObjectId>,
    ) -> Result<LoadHandle, NotesError> {
        let id = self.change.id;
        tracing::info!(
            parent: &self.args.span,
            change_id = id.get(),
            project = %self.change.project,
            "rebuilding stale change notes"
        );
        match self.args.rebuilder.rebuild(self.args.legacy.as_ref(), id) {
            Ok(pointer) => match repo.scan_for_changes() {
                Ok(()) => {
                    self.change.note_db_state = Some(pointer.to_string());
                    Ok(LoadHandle::new(
                        Some(pointer.change_meta_id()),
                        LoadSource::Rebuilt,
                    ))
                }
                Err(e) => self.recheck_up_to_date(repo, RebuildError::Io(e)),
            },
            Err(RebuildError::NoSuchChange(_)) => Ok(LoadHandle::new(old_id, LoadSource::Current)),
            Err(e) if e.is_retryable_io() => self.recheck_up_to_date(repo, e),
            Err(e) => Err(NotesError::Rebuild(e)),
        }
    }

    /// After a rebuild I/O error, decide whether another writer already
    /// brought the change up to date.
    fn recheck_up_to_date(
        &mut self,
        repo: &mut dyn Repository,
        original: RebuildError,
    ) -> Result<LoadHandle, NotesError> {
        if self.refs.is_some() {
            return Err(NotesError::InvalidState(format!(
                "recheck of change {} reached with a caller-supplied ref cache",
                self.change.id
            )));
        }
        let id = self.change.id;
        let span = &self.args.span;

        let reread = match self.args.legacy.get(id) {
            Ok(Some(change)) => change,
            Ok(None) => {
                tracing::error!(
                    parent: span,
                    change_id = id.get(),
                    error = %original,
                    "change vanished while rechecking after rebuild error; rethrowing original"
                );
                return Err(NotesError::Rebuild(original));
            }
            Err(e) => {
                tracing::error!(
                    parent: span,
                    change_id = id.get(),
                    recheck_error = %e,
                    error = %original,
                    "error rechecking if change is up to date; rethrowing original"
                );
                return Err(NotesError::Rebuild(original));
            }
        };

        let (current, up_to_date) = match refresh_and_check(repo, &reread) {
            Ok(checked) => checked,
            Err(e) => {
                tracing::error!(
                    parent: span,
                    change_id = id.get(),
                    recheck_error = %e,
                    error = %original,
                    "error rechecking if change is up to date; rethrowing original"
                );
                return Err(NotesError::Rebuild(original));
            }
        };

        if !up_to_date {
            tracing::warn!(
                parent: span,
                change_id = id.get(),
                error = %original,
                "rechecked change after a rebuild error, but it was not up to date; rethrowing"
            );
            return Err(NotesError::Rebuild(original));
        }

        tracing::info!(
            parent: span,
            change_id = id.get(),
            error = %original,
            "rebuild lost a race but the change is up to date; continuing"
        );
        self.change = reread;
        Ok(LoadHandle::new(current, LoadSource::RecoveredRace))
    }
}

/// Refresh `repo`, then read the change's meta ref and test `change`'s
/// pointer against it.
fn refresh_and_check(
    repo: &mut dyn Repository,
    change: &Change,
) -> Result<(Option<ObjectId>, bool), RepoError> {
    repo.scan_for_changes()?;
    let mut refs = RepoRefCache::new(&*repo);
    let current = refs.get(&change_meta_ref(change.id))?;
    let up_to_date = ConsistencyPointer::parse(change).is_change_up_to_date(&mut refs, change.id)?;
    Ok((current, up_to_date))
}

impl NotesKind for ChangeNotes {
    fn ref_name(&self) -> String {
        change_meta_ref(self.change.id)
    }

    fn project(&self) -> &ProjectName {
        &self.change.project
    }

    fn load_defaults(&mut self, source: LoadSource) {
        self.state = Arc::new(NotesSnapshot::empty(&self.change));
        self.revision_notes = Arc::new(RevisionNotes::default());
        self.source = source;
    }

    fn read_ref(&mut self, repo: &dyn Repository) -> Result<Option<ObjectId>, RepoError> {
        let name = self.ref_name();
        match self.refs.as_deref_mut() {
            Some(refs) => refs.get(&name),
            None => repo.exact_ref(&name),
        }
    }

    fn open_handle(&mut self, repo: &mut dyn Repository) -> Result<LoadHandle, NotesError> {
        let current = self.read_ref(&*repo)?;
        if !self.auto_rebuild {
            return Ok(LoadHandle::new(current, LoadSource::AutoRebuildDisabled));
        }

        let pointer = ConsistencyPointer::parse(&self.change);
        if pointer.is_absent() && current.is_none() {
            return Ok(LoadHandle::new(None, LoadSource::Defaults));
        }

        let id = self.change.id;
        let up_to_date = match self.refs.as_deref_mut() {
            Some(refs) => pointer.is_change_up_to_date(refs, id)?,
            None => pointer.is_change_up_to_date(&mut RepoRefCache::new(&*repo), id)?,
        };
        if up_to_date {
            return Ok(LoadHandle::new(current, LoadSource::Current));
        }
        if let PointerState::Malformed(reason) = &pointer {
            tracing::warn!(
                parent: &self.args.span,
                change_id = id.get(),
                reason = %reason,
                "unreadable consistency pointer; rebuilding"
            );
        }
        self.rebuild_and_open(repo, current)
    }

    fn on_load(&mut self, repo: &dyn Repository, handle: &LoadHandle) -> Result<(), NotesError> {
        let Some(revision) = handle.revision() else {
            self.load_defaults(handle.source());
            return Ok(());
        };
        let args = Arc::clone(&self.args);
        let change_id = self.change.id;
        let parsed = args.cache.get(&args.span, &self.change.project, change_id, revision, || {
            args.parser.parse_change(repo, change_id, revision)
        })?;
        parsed.snapshot.copy_columns_to(&mut self.change);
        self.state = parsed.snapshot;
        self.revision_notes = parsed.revision_notes;
        self.source = handle.source();
        Ok(())
    }
}
