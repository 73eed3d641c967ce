//! Change notes: loading, rebuilding and caching the notes log of a change.
//!
//! A load starts from a legacy change row, checks the row's consistency
//! pointer against live refs, rebuilds when stale, and reads the parsed
//! snapshot through the shared [`SnapshotCache`].

pub mod cache;
pub mod change_notes;
pub mod document;
pub mod drafts;
pub mod factory;
pub mod load;
pub mod ordering;
pub mod pointer;
pub mod rebuild;
pub mod snapshot;

use std::sync::Arc;

use tracing::Span;

use crate::config::NotesConfig;
use crate::legacy::LegacyStore;
use crate::model::ProjectName;
use crate::repo::RepoManager;

pub use cache::{CacheStats, SnapshotCache};
pub use change_notes::ChangeNotes;
pub use document::{JsonNoteParser, NoteParser, ParsedChange};
pub use drafts::DraftCommentNotes;
pub use factory::Factory;
pub use load::{LoadHandle, LoadSource, NotesKind};
pub use pointer::{ConsistencyPointer, PointerState};
pub use rebuild::{LegacyRebuilder, RebuildError, Rebuilder};
pub use snapshot::{DraftSnapshot, NotesSnapshot, RevisionNotes, RevisionNotesBuilder};

/// Collaborators shared by every load.
///
/// `span` is the logging context: all load-path events are emitted as its
/// children.
pub struct NotesArgs {
    pub config: NotesConfig,
    pub repo_manager: Arc<dyn RepoManager>,
    pub legacy: Arc<dyn LegacyStore>,
    pub rebuilder: Arc<dyn Rebuilder>,
    pub parser: Arc<dyn NoteParser>,
    pub cache: SnapshotCache,
    pub all_users: ProjectName,
    pub span: Span,
}

impl std::fmt::Debug for NotesArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotesArgs")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("all_users", &self.all_users)
            .finish_non_exhaustive()
    }
}

impl NotesArgs {
    /// Wire the default rebuilder, parser and cache from `config`.
    pub fn new(
        config: NotesConfig,
        repo_manager: Arc<dyn RepoManager>,
        legacy: Arc<dyn LegacyStore>,
        span: Span,
    ) -> Self {
        let all_users = ProjectName::new(config.repos.all_users.clone());
        let rebuilder = Arc::new(LegacyRebuilder::new(
            Arc::clone(&repo_manager),
            all_users.clone(),
        ));
        Self {
            cache: SnapshotCache::new(config.cache.capacity),
            config,
            repo_manager,
            legacy,
            rebuilder,
            parser: Arc::new(JsonNoteParser),
            all_users,
            span,
        }
    }

    #[must_use]
    pub fn with_rebuilder(mut self, rebuilder: Arc<dyn Rebuilder>) -> Self {
        self.rebuilder = rebuilder;
        self
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn NoteParser>) -> Self {
        self.parser = parser;
        self
    }
}
