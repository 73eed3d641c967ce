//! Construction of [`ChangeNotes`], one at a time or in bulk.
//!
//! The factory works in two modes depending on the migration phase:
//!
//! - **log-backed** (`migration.enabled()`): every change is loaded through
//!   the notes state machine; ids without a legacy record are dropped from
//!   bulk results.
//! - **legacy-only**: legacy rows are read in batches of
//!   `scan.batch_size` and wrapped without touching the log.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::error::NotesError;
use crate::model::{Change, ChangeId, ProjectName};
use crate::refs::REFS_CHANGES;
use crate::repo::{RefCache, Repository};

use super::change_notes::ChangeNotes;
use super::NotesArgs;

#[derive(Debug, Clone)]
pub struct Factory {
    args: Arc<NotesArgs>,
    executor: Option<Handle>,
}

/// Every change id with a ref under `refs/changes/` in `repo`.
///
/// # Errors
///
/// Propagates ref listing failures.
pub fn scan_change_ids(repo: &dyn Repository) -> Result<BTreeSet<ChangeId>, NotesError> {
    Ok(repo
        .refs_by_prefix(REFS_CHANGES)?
        .keys()
        .filter_map(|name| ChangeId::from_ref(name))
        .collect())
}

impl Factory {
    #[must_use]
    pub const fn new(args: Arc<NotesArgs>) -> Self {
        Self {
            args,
            executor: None,
        }
    }

    /// Run [`Factory::create_async`] loads on `executor` instead of the
    /// current runtime.
    #[must_use]
    pub fn with_executor(mut self, executor: Handle) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub const fn args(&self) -> &Arc<NotesArgs> {
        &self.args
    }

    fn batch_size(&self) -> usize {
        self.args.config.scan.batch_size.max(1)
    }

    fn load(&self, change: Change) -> Result<ChangeNotes, NotesError> {
        ChangeNotes::new(Arc::clone(&self.args), change).load()
    }

    fn require_legacy_only(&self, operation: &str) -> Result<(), NotesError> {
        if self.args.config.migration.read_changes {
            return Err(NotesError::InvalidState(format!(
                "do not call {operation} when reading changes from the notes log"
            )));
        }
        Ok(())
    }

    /// Wrap a batch-read legacy row; legacy-only mode.
    fn create_from_change_legacy_only(&self, change: Change) -> Result<ChangeNotes, NotesError> {
        self.require_legacy_only("create_from_change_legacy_only")?;
        self.load(change)
    }

    // -----------------------------------------------------------------------
    // Single change
    // -----------------------------------------------------------------------

    /// Look `id` up through the index and load it.
    ///
    /// # Errors
    ///
    /// [`NotesError::NotFound`] when zero or several records match.
    pub fn create_checked(&self, id: ChangeId) -> Result<ChangeNotes, NotesError> {
        let mut matches = self.args.legacy.query_by_id(id)?;
        if matches.len() > 1 {
            tracing::error!(
                parent: &self.args.span,
                change_id = id.get(),
                count = matches.len(),
                "multiple changes found for id"
            );
            return Err(NotesError::NotFound(id));
        }
        let change = matches.pop().ok_or(NotesError::NotFound(id))?;
        self.load(change)
    }

    /// Load `id` if it exists and belongs to `project`.
    ///
    /// # Errors
    ///
    /// [`NotesError::NotFound`] when missing or owned by another project.
    pub fn create_checked_in(
        &self,
        project: &ProjectName,
        id: ChangeId,
    ) -> Result<ChangeNotes, NotesError> {
        match self.args.legacy.get(id)? {
            Some(change) if &change.project == project => self.load(change),
            _ => Err(NotesError::NotFound(id)),
        }
    }

    /// Reload a change the caller already holds.
    ///
    /// # Errors
    ///
    /// [`NotesError::NotFound`] if the change no longer exists in its project.
    pub fn create_checked_change(&self, change: &Change) -> Result<ChangeNotes, NotesError> {
        self.create_checked_in(&change.project, change.id)
    }

    /// Read `id` from the legacy store and load it, asserting `project`.
    ///
    /// # Errors
    ///
    /// [`NotesError::NotFound`] if missing, [`NotesError::ProjectMismatch`] if
    /// owned by another project.
    pub fn create(&self, project: &ProjectName, id: ChangeId) -> Result<ChangeNotes, NotesError> {
        let change = self.args.legacy.get(id)?.ok_or(NotesError::NotFound(id))?;
        check_project(project, &change)?;
        self.load(change)
    }

    /// Notes built from index data; nothing is read from either store.
    #[must_use]
    pub fn create_from_indexed_change(&self, change: Change) -> ChangeNotes {
        ChangeNotes::new(Arc::clone(&self.args), change)
    }

    /// Load notes for a change that was just inserted.
    ///
    /// # Errors
    ///
    /// Any load failure.
    pub fn create_for_new(&self, change: Change) -> Result<ChangeNotes, NotesError> {
        self.load(change)
    }

    /// Load with rebuilding disabled, resolving refs through `refs`.
    ///
    /// # Errors
    ///
    /// Any load failure.
    pub fn create_with_auto_rebuilding_disabled(
        &self,
        change: Change,
        refs: Box<dyn RefCache + Send>,
    ) -> Result<ChangeNotes, NotesError> {
        ChangeNotes::with_options(Arc::clone(&self.args), change, false, Some(refs)).load()
    }

    /// Legacy-only lookup by id.
    ///
    /// # Errors
    ///
    /// [`NotesError::InvalidState`] when reading from the log,
    /// [`NotesError::NotFound`] when missing.
    pub fn create_from_id_only_when_legacy_only(
        &self,
        id: ChangeId,
    ) -> Result<ChangeNotes, NotesError> {
        self.require_legacy_only("create_from_id_only_when_legacy_only")?;
        let change = self.args.legacy.get(id)?.ok_or(NotesError::NotFound(id))?;
        self.load(change)
    }

    /// Fetch the legacy row and load it on a blocking worker of the executor.
    ///
    /// Neither the fetch nor the load runs on the calling task.
    ///
    /// # Errors
    ///
    /// The errors of [`Factory::create`]; a failed or cancelled worker is
    /// reported as [`NotesError::Executor`].
    pub async fn create_async(
        &self,
        project: ProjectName,
        id: ChangeId,
    ) -> Result<ChangeNotes, NotesError> {
        let executor = match &self.executor {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|e| NotesError::Executor(e.to_string()))?,
        };
        let factory = self.clone();
        let worker = executor.clone();
        executor
            .spawn_blocking(move || {
                let change = worker
                    .block_on(factory.args.legacy.get_async(id))?
                    .ok_or(NotesError::NotFound(id))?;
                check_project(&project, &change)?;
                factory.load(change)
            })
            .await
            .map_err(|e| NotesError::Executor(e.to_string()))?
    }

    // -----------------------------------------------------------------------
    // Bulk
    // -----------------------------------------------------------------------

    /// Notes for every id that exists; missing ids are silently dropped.
    ///
    /// # Errors
    ///
    /// Any failure other than a missing change.
    pub fn create_bulk(&self, ids: &[ChangeId]) -> Result<Vec<ChangeNotes>, NotesError> {
        if self.args.config.migration.enabled() {
            let mut notes = Vec::with_capacity(ids.len());
            for id in ids {
                match self.create_checked(*id) {
                    Ok(cn) => notes.push(cn),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            return Ok(notes);
        }

        let mut notes = Vec::with_capacity(ids.len());
        for batch in ids.chunks(self.batch_size()) {
            for change in self.args.legacy.get_many(batch)? {
                notes.push(self.create_from_change_legacy_only(change)?);
            }
        }
        Ok(notes)
    }

    /// Notes for `ids` within `project` that satisfy `predicate`.
    ///
    /// # Errors
    ///
    /// In log-backed mode, any [`Factory::create`] failure other than a
    /// missing change; in legacy-only mode, legacy read failures.
    pub fn create_in_project<P>(
        &self,
        project: &ProjectName,
        ids: &[ChangeId],
        predicate: P,
    ) -> Result<Vec<ChangeNotes>, NotesError>
    where
        P: Fn(&ChangeNotes) -> bool,
    {
        let mut notes = Vec::new();
        if self.args.config.migration.enabled() {
            for id in ids {
                match self.create(project, *id) {
                    Ok(cn) => {
                        if predicate(&cn) {
                            notes.push(cn);
                        }
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            return Ok(notes);
        }

        for batch in ids.chunks(self.batch_size()) {
            for change in self.args.legacy.get_many(batch)? {
                if &change.project != project {
                    continue;
                }
                let cn = self.create_from_change_legacy_only(change)?;
                if predicate(&cn) {
                    notes.push(cn);
                }
            }
        }
        Ok(notes)
    }

    /// Notes for every change on the site that satisfies `predicate`, grouped
    /// by project.
    ///
    /// # Errors
    ///
    /// Repository or legacy read failures, and load failures.
    pub fn create_all<P>(
        &self,
        predicate: P,
    ) -> Result<BTreeMap<ProjectName, Vec<ChangeNotes>>, NotesError>
    where
        P: Fn(&ChangeNotes) -> bool,
    {
        let mut by_project: BTreeMap<ProjectName, Vec<ChangeNotes>> = BTreeMap::new();
        if self.args.config.migration.read_changes {
            for project in self.args.repo_manager.list_projects()? {
                let repo = self.args.repo_manager.open_repository(&project)?;
                let notes = self.scan_log(&*repo, &project, &predicate)?;
                if !notes.is_empty() {
                    by_project.insert(project, notes);
                }
            }
            return Ok(by_project);
        }

        for change in self.args.legacy.all()? {
            let cn = self.create_from_change_legacy_only(change)?;
            if predicate(&cn) {
                by_project
                    .entry(cn.project_name().clone())
                    .or_default()
                    .push(cn);
            }
        }
        Ok(by_project)
    }

    // -----------------------------------------------------------------------
    // Scan
    // -----------------------------------------------------------------------

    /// Open `project` and scan it.
    ///
    /// # Errors
    ///
    /// See [`Factory::scan_repository`].
    pub fn scan<P>(&self, project: &ProjectName, predicate: P) -> Result<Vec<ChangeNotes>, NotesError>
    where
        P: Fn(&ChangeNotes) -> bool,
    {
        let repo = self.args.repo_manager.open_repository(project)?;
        self.scan_repository(&*repo, project, predicate)
    }

    /// Notes for every change with a ref in `repo`, filtered by `predicate`.
    ///
    /// Reading from the log, each id is loaded through [`Factory::create`].
    /// Otherwise the ids drive batched legacy reads.
    ///
    /// # Errors
    ///
    /// Ref listing, legacy read and load failures.
    pub fn scan_repository<P>(
        &self,
        repo: &dyn Repository,
        project: &ProjectName,
        predicate: P,
    ) -> Result<Vec<ChangeNotes>, NotesError>
    where
        P: Fn(&ChangeNotes) -> bool,
    {
        if self.args.config.migration.read_changes {
            return self.scan_log(repo, project, &predicate);
        }

        let ids: Vec<ChangeId> = scan_change_ids(repo)?.into_iter().collect();
        let mut notes = Vec::with_capacity(ids.len());
        for batch in ids.chunks(self.batch_size()) {
            for change in self.args.legacy.get_many(batch)? {
                let cn = self.create_from_change_legacy_only(change)?;
                if predicate(&cn) {
                    notes.push(cn);
                }
            }
        }
        Ok(notes)
    }

    fn scan_log<P>(
        &self,
        repo: &dyn Repository,
        project: &ProjectName,
        predicate: &P,
    ) -> Result<Vec<ChangeNotes>, NotesError>
    where
        P: Fn(&ChangeNotes) -> bool,
    {
        let ids = scan_change_ids(repo)?;
        let mut notes = Vec::with_capacity(ids.len());
        for id in ids {
            match self.create(project, id) {
                Ok(cn) => {
                    if predicate(&cn) {
                        notes.push(cn);
                    }
                }
                // A ref whose legacy row is gone.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(notes)
    }
}

fn check_project(expected: &ProjectName, change: &Change) -> Result<(), NotesError> {
    if &change.project == expected {
        Ok(())
    } else {
        Err(NotesError::ProjectMismatch {
            change_id: change.id,
            expected: expected.clone(),
            actual: change.project.clone(),
        })
    }
}
