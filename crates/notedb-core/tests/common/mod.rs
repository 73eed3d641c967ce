//! Shared fixtures for notedb-core integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use tracing::Span;

use notedb_core::config::NotesConfig;
use notedb_core::legacy::{InMemoryLegacyStore, LegacyStore};
use notedb_core::model::{
    AccountId, Change, ChangeBundle, ChangeId, ChangeMessage, Comment, CommentKey, PatchSet,
    PatchSetApproval, PatchSetId, ProjectName, RevId,
};
use notedb_core::notes::{ConsistencyPointer, LegacyRebuilder, NotesArgs, RebuildError, Rebuilder};
use notedb_core::refs::change_meta_ref;
use notedb_core::repo::{Commit, InMemoryRepoManager, ObjectId, RepoError, Repository};
use notedb_core::Factory;

pub const OWNER: AccountId = AccountId::new(1000);
pub const REVIEWER: AccountId = AccountId::new(1001);
pub const DRAFTER: AccountId = AccountId::new(1002);

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("valid timestamp")
}

pub fn project() -> ProjectName {
    ProjectName::new("tools/project-a")
}

pub fn other_project() -> ProjectName {
    ProjectName::new("tools/project-b")
}

pub fn all_users() -> ProjectName {
    ProjectName::new("All-Users")
}

/// Config with notes reads switched on or off.
pub fn config(read_changes: bool) -> NotesConfig {
    let mut config = NotesConfig::default();
    config.migration.read_changes = read_changes;
    config.migration.write_changes = read_changes;
    config
}

// ---------------------------------------------------------------------------
// Rebuilder wrappers
// ---------------------------------------------------------------------------

/// Counts calls and delegates.
pub struct CountingRebuilder {
    inner: Arc<dyn Rebuilder>,
    calls: AtomicUsize,
}

impl CountingRebuilder {
    pub fn new(inner: Arc<dyn Rebuilder>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Rebuilder for CountingRebuilder {
    fn rebuild(
        &self,
        legacy: &dyn LegacyStore,
        change_id: ChangeId,
    ) -> Result<ConsistencyPointer, RebuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.rebuild(legacy, change_id)
    }
}

/// Lets the real rebuild land, then reports a lost compare-and-swap, as if
/// a concurrent writer had won.
pub struct RacingRebuilder {
    inner: Arc<dyn Rebuilder>,
}

impl RacingRebuilder {
    pub fn new(inner: Arc<dyn Rebuilder>) -> Self {
        Self { inner }
    }
}

impl Rebuilder for RacingRebuilder {
    fn rebuild(
        &self,
        legacy: &dyn LegacyStore,
        change_id: ChangeId,
    ) -> Result<ConsistencyPointer, RebuildError> {
        self.inner.rebuild(legacy, change_id)?;
        Err(RebuildError::Io(RepoError::LockFailure {
            name: change_meta_ref(change_id),
            expected: None,
            actual: None,
        }))
    }
}

/// Fails with the given error without writing anything; optionally takes
/// the legacy store offline first.
pub struct FailingRebuilder {
    error: fn() -> RebuildError,
    take_offline: Option<Arc<InMemoryLegacyStore>>,
}

impl FailingRebuilder {
    pub fn new(error: fn() -> RebuildError) -> Self {
        Self {
            error,
            take_offline: None,
        }
    }

    pub fn taking_offline(error: fn() -> RebuildError, legacy: Arc<InMemoryLegacyStore>) -> Self {
        Self {
            error,
            take_offline: Some(legacy),
        }
    }
}

impl Rebuilder for FailingRebuilder {
    fn rebuild(
        &self,
        _legacy: &dyn LegacyStore,
        _change_id: ChangeId,
    ) -> Result<ConsistencyPointer, RebuildError> {
        if let Some(legacy) = &self.take_offline {
            legacy.set_unavailable(true);
        }
        Err((self.error)())
    }
}

pub fn io_error() -> RebuildError {
    RebuildError::Io(RepoError::Io("disk on fire".into()))
}

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

pub struct Site {
    pub repos: Arc<InMemoryRepoManager>,
    pub legacy: Arc<InMemoryLegacyStore>,
    pub rebuilder: Arc<CountingRebuilder>,
    pub args: Arc<NotesArgs>,
    pub factory: Factory,
}

impl Site {
    pub fn new(config: NotesConfig) -> Self {
        Self::with_rebuilder(config, |inner, _| inner)
    }

    /// Build a site whose rebuilder is `wrap(real rebuilder, legacy)`,
    /// counted.
    pub fn with_rebuilder(
        config: NotesConfig,
        wrap: impl FnOnce(Arc<dyn Rebuilder>, &Arc<InMemoryLegacyStore>) -> Arc<dyn Rebuilder>,
    ) -> Self {
        Self::with_span(config, wrap, Span::none())
    }

    pub fn with_span(
        config: NotesConfig,
        wrap: impl FnOnce(Arc<dyn Rebuilder>, &Arc<InMemoryLegacyStore>) -> Arc<dyn Rebuilder>,
        span: Span,
    ) -> Self {
        let repos = Arc::new(InMemoryRepoManager::new());
        for name in [project(), other_project(), all_users()] {
            repos.create_project(&name).expect("create project");
        }
        let legacy = Arc::new(InMemoryLegacyStore::new());
        let real: Arc<dyn Rebuilder> = Arc::new(LegacyRebuilder::new(repos.clone(), all_users()));
        let rebuilder = Arc::new(CountingRebuilder::new(wrap(real, &legacy)));
        let args = Arc::new(
            NotesArgs::new(config, repos.clone(), legacy.clone(), span)
                .with_rebuilder(rebuilder.clone()),
        );
        let factory = Factory::new(Arc::clone(&args));
        Self {
            repos,
            legacy,
            rebuilder,
            args,
            factory,
        }
    }

    /// A rebuilder writing to this site, outside the counted one.
    pub fn direct_rebuilder(&self) -> LegacyRebuilder {
        LegacyRebuilder::new(self.repos.clone(), all_users())
    }

    pub fn seed(&self, bundle: ChangeBundle) {
        self.legacy.put(bundle).expect("seed legacy store");
    }

    pub fn change(&self, id: i32) -> Change {
        self.legacy
            .get(ChangeId::new(id))
            .expect("legacy read")
            .expect("change exists")
    }

    pub fn meta_ref(&self, project: &ProjectName, id: i32) -> Option<ObjectId> {
        self.repos
            .open(project)
            .expect("open repo")
            .exact_ref(&change_meta_ref(ChangeId::new(id)))
            .expect("read ref")
    }

    /// Point the meta ref at an arbitrary commit that is not a rebuild.
    pub fn force_meta_ref(&self, id: i32, payload: &[u8]) -> ObjectId {
        let mut repo = self.repos.open(&project()).expect("open repo");
        let name = change_meta_ref(ChangeId::new(id));
        let current = repo.exact_ref(&name).expect("read ref");
        let commit = repo
            .insert_commit(Commit::new(None, "foreign write", payload.to_vec()))
            .expect("insert");
        repo.update_ref(&name, current.as_ref(), Some(&commit))
            .expect("update ref");
        commit
    }

    /// Rebuild `id` outside the counted rebuilder, leaving it up to date.
    pub fn rebuild_now(&self, id: i32) -> ConsistencyPointer {
        self.direct_rebuilder()
            .rebuild(&*self.legacy, ChangeId::new(id))
            .expect("direct rebuild")
    }

    /// Store `pointer` on the legacy row of its change.
    pub fn set_pointer(&self, pointer: &ConsistencyPointer) {
        self.legacy
            .set_note_db_state(pointer.change_id(), Some(&pointer.to_string()))
            .expect("set pointer");
    }

    /// Store a pointer that names a commit nobody wrote.
    pub fn mark_stale(&self, id: i32) -> ObjectId {
        let bogus = Commit::new(None, "never written", id.to_le_bytes().to_vec()).id;
        self.set_pointer(&ConsistencyPointer::new(ChangeId::new(id), bogus, BTreeMap::new()));
        bogus
    }
}

// ---------------------------------------------------------------------------
// Bundles
// ---------------------------------------------------------------------------

fn ps(id: i32, num: i32) -> PatchSetId {
    PatchSetId::new(ChangeId::new(id), num)
}

pub fn comment(id: i32, uuid: &str, author: AccountId, message: &str) -> Comment {
    Comment {
        key: CommentKey {
            patch_set_id: ps(id, 1),
            filename: "src/lib.rs".into(),
            uuid: uuid.into(),
        },
        line: 12,
        author,
        written_on: ts(50),
        message: message.into(),
        revision: RevId::new("rev-1"),
        parent_uuid: None,
    }
}

/// A minimal change with one patch set.
pub fn simple_bundle(id: i32, project: ProjectName) -> ChangeBundle {
    let mut change = Change::new(ChangeId::new(id), project, OWNER, format!("change {id}"), ts(0));
    change.current_patch_set = Some(ps(id, 1));
    let mut bundle = ChangeBundle::empty(change);
    bundle.patch_sets.push(PatchSet {
        id: ps(id, 1),
        revision: RevId::new("rev-1"),
        uploader: OWNER,
        created_on: ts(0),
    });
    bundle
}

/// A change with votes, messages, hashtags, a published comment and two
/// drafts, one of which shares its key with the published comment.
pub fn rich_bundle(id: i32) -> ChangeBundle {
    let mut bundle = simple_bundle(id, project());
    bundle.change.current_patch_set = Some(ps(id, 2));
    bundle.patch_sets.push(PatchSet {
        id: ps(id, 2),
        revision: RevId::new("rev-2"),
        uploader: OWNER,
        created_on: ts(20),
    });

    for (label, account, secs) in [
        ("Verified", REVIEWER, 40),
        ("Code-Review", REVIEWER, 30),
        ("Code-Review-tie", OWNER, 30),
    ] {
        bundle.approvals.push(PatchSetApproval {
            patch_set_id: ps(id, 2),
            account_id: account,
            label: label.into(),
            value: 1,
            granted: ts(secs),
        });
    }

    for (uuid, secs, patch_set) in [
        ("msg-late", 60, Some(ps(id, 2))),
        ("msg-first", 10, Some(ps(id, 1))),
        ("msg-second", 10, None),
    ] {
        bundle.messages.push(ChangeMessage {
            uuid: uuid.into(),
            author: Some(OWNER),
            written_on: ts(secs),
            message: format!("message {uuid}"),
            patch_set_id: patch_set,
        });
    }

    bundle.hashtags = vec!["zebra".into(), "apple".into(), "mango".into()];
    bundle.comments.push(comment(id, "c-published", DRAFTER, "looks good"));
    bundle.drafts.push(comment(id, "c-published", DRAFTER, "stale draft"));
    bundle.drafts.push(comment(id, "c-draft", DRAFTER, "still thinking"));
    bundle
}

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

/// Shared in-memory sink for `tracing_subscriber::fmt` output.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer")).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a debug-level subscriber writing into the returned buffer.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, buffer.contents())
}
