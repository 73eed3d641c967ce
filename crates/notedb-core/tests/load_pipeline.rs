//! End-to-end loads of change notes against in-memory stores.

mod common;

use std::collections::BTreeMap;

use common::{
    DRAFTER, OWNER, REVIEWER, Site, comment, config, other_project, project, rich_bundle,
    simple_bundle,
};
use notedb_core::model::{ChangeId, RevId};
use notedb_core::notes::{ConsistencyPointer, LoadSource, PointerState};
use notedb_core::refs::change_meta_ref;
use notedb_core::repo::FixedRefCache;
use notedb_core::{ErrorCode, NotesError};

fn id(n: i32) -> ChangeId {
    ChangeId::new(n)
}

// ---------------------------------------------------------------------------
// Staleness decisions
// ---------------------------------------------------------------------------

#[test]
fn no_pointer_and_no_ref_loads_defaults_without_rebuild() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));

    let notes = site.factory.create(&project(), id(7)).expect("load");

    assert_eq!(notes.load_source(), LoadSource::Defaults);
    assert_eq!(notes.revision(), None);
    assert!(notes.patch_sets().is_empty());
    assert!(notes.change_messages().is_empty());
    assert_eq!(notes.change().subject, "change 7");
    assert_eq!(site.rebuilder.calls(), 0);
}

#[test]
fn up_to_date_pointer_reads_current_log() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));
    let pointer = site.rebuild_now(7);

    let notes = site.factory.create(&project(), id(7)).expect("load");

    assert_eq!(notes.load_source(), LoadSource::Current);
    assert_eq!(notes.revision(), Some(pointer.change_meta_id()));
    assert_eq!(notes.patch_sets().len(), 2);
    assert_eq!(site.rebuilder.calls(), 0);
}

#[test]
fn stale_pointer_rebuilds_exactly_once() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));
    site.mark_stale(7);

    let first = site.factory.create(&project(), id(7)).expect("first load");
    assert_eq!(first.load_source(), LoadSource::Rebuilt);
    assert_eq!(first.revision(), site.meta_ref(&project(), 7));
    assert_eq!(site.rebuilder.calls(), 1);

    let second = site.factory.create(&project(), id(7)).expect("second load");
    assert_eq!(second.load_source(), LoadSource::Current);
    assert_eq!(second.revision(), first.revision());
    assert_eq!(site.rebuilder.calls(), 1);
}

#[test]
fn diverged_ref_is_replaced_by_recomputed_log() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(42));
    let recorded = site.mark_stale(42);
    let foreign = site.force_meta_ref(42, b"{\"written\":\"elsewhere\"}");
    assert_ne!(recorded, foreign);

    let notes = site.factory.create(&project(), id(42)).expect("load");

    let rebuilt = notes.revision().expect("rebuilt revision");
    assert_ne!(rebuilt, recorded);
    assert_ne!(rebuilt, foreign);
    assert_eq!(site.meta_ref(&project(), 42), Some(rebuilt));
    assert_eq!(notes.load_source(), LoadSource::Rebuilt);

    let stored = site.change(42);
    assert_eq!(
        stored.note_db_state.as_deref(),
        notes.change().note_db_state.as_deref()
    );
}

#[test]
fn unreadable_pointer_triggers_rebuild() {
    let site = Site::new(config(true));
    let mut bundle = simple_bundle(9, project());
    bundle.change.note_db_state = Some("not a pointer at all".into());
    site.seed(bundle);

    let notes = site.factory.create(&project(), id(9)).expect("load");

    assert_eq!(notes.load_source(), LoadSource::Rebuilt);
    assert_eq!(site.rebuilder.calls(), 1);
}

// ---------------------------------------------------------------------------
// Snapshot content
// ---------------------------------------------------------------------------

#[test]
fn approvals_and_messages_are_ordered_by_time() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));
    site.mark_stale(7);

    let notes = site.factory.create(&project(), id(7)).expect("load");

    let ps2 = notes.change().current_patch_set.expect("current patch set");
    let labels: Vec<&str> = notes.approvals()[&ps2]
        .iter()
        .map(|a| a.label.as_str())
        .collect();
    assert_eq!(labels, vec!["Code-Review", "Code-Review-tie", "Verified"]);

    let uuids: Vec<&str> = notes
        .change_messages()
        .iter()
        .map(|m| m.uuid.as_str())
        .collect();
    assert_eq!(uuids, vec!["msg-first", "msg-second", "msg-late"]);

    let by_ps: BTreeMap<i32, usize> = notes
        .change_messages_by_patch_set()
        .iter()
        .map(|(ps, msgs)| (ps.num, msgs.len()))
        .collect();
    assert_eq!(by_ps, BTreeMap::from([(1, 1), (2, 1)]));
}

#[test]
fn hashtags_are_sorted_and_reviewers_come_from_votes() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));
    site.mark_stale(7);

    let notes = site.factory.create(&project(), id(7)).expect("load");

    let tags: Vec<String> = notes.hashtags().into_iter().collect();
    assert_eq!(tags, vec!["apple", "mango", "zebra"]);

    let reviewers = notes.reviewers().all();
    assert!(reviewers.contains(&REVIEWER));
    assert!(reviewers.contains(&OWNER));
    assert!(notes.all_past_reviewers().contains(&REVIEWER));
    assert!(notes.submit_records().is_empty());
}

#[test]
fn log_columns_override_legacy_row() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));
    site.rebuild_now(7);

    let mut row = site.change(7);
    row.subject = "edited only in the legacy row".into();
    site.legacy.put_change(row).expect("update row");

    let notes = site.factory.create(&project(), id(7)).expect("load");

    assert_eq!(notes.load_source(), LoadSource::Current);
    assert_eq!(notes.change().subject, "change 7");
    assert_eq!(
        notes.current_patch_set().map(|ps| ps.revision.clone()),
        Some(RevId::new("rev-2"))
    );
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[test]
fn repeated_loads_share_the_cached_snapshot() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));
    site.rebuild_now(7);

    let first = site.factory.create(&project(), id(7)).expect("first");
    let second = site.factory.create(&project(), id(7)).expect("second");

    assert!(std::ptr::eq(first.snapshot(), second.snapshot()));
    let stats = site.args.cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
}

#[test]
fn new_revision_misses_and_old_snapshot_is_untouched() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));
    site.rebuild_now(7);
    let before = site.factory.create(&project(), id(7)).expect("before");

    let mut bundle = rich_bundle(7);
    bundle.hashtags.push("banana".into());
    site.seed(bundle);
    site.mark_stale(7);

    let after = site.factory.create(&project(), id(7)).expect("after");

    assert_ne!(before.revision(), after.revision());
    assert!(!before.hashtags().contains("banana"));
    assert!(after.hashtags().contains("banana"));
    assert_eq!(site.args.cache.stats().misses, 2);
    assert_eq!(site.args.cache.stats().entries, 2);
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

#[test]
fn drafts_exclude_keys_already_published() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));
    site.rebuild_now(7);

    let mut notes = site.factory.create(&project(), id(7)).expect("load");
    let drafts = notes.get_draft_comments(DRAFTER).expect("drafts");

    let uuids: Vec<&str> = drafts
        .values()
        .flatten()
        .map(|c| c.key.uuid.as_str())
        .collect();
    assert_eq!(uuids, vec!["c-draft"]);
    assert_eq!(notes.comments()[&RevId::new("rev-1")].len(), 1);
}

#[test]
fn author_without_drafts_gets_empty_map() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));
    site.rebuild_now(7);

    let mut notes = site.factory.create(&project(), id(7)).expect("load");

    assert!(notes.get_draft_comments(REVIEWER).expect("drafts").is_empty());
}

#[test]
fn contains_comment_checks_published_then_drafts() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));
    site.rebuild_now(7);

    let mut notes = site.factory.create(&project(), id(7)).expect("load");

    let published = comment(7, "c-published", DRAFTER, "looks good");
    assert!(notes.contains_published_comment(&published));
    assert!(notes.contains_comment(&published).expect("published"));

    let draft = comment(7, "c-draft", DRAFTER, "still thinking");
    assert!(!notes.contains_published_comment(&draft));
    assert!(notes.contains_comment(&draft).expect("draft"));

    let unknown = comment(7, "c-unknown", DRAFTER, "?");
    assert!(!notes.contains_comment(&unknown).expect("unknown"));
}

#[test]
fn stale_draft_ref_is_rebuilt_on_read() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));
    let pointer = site.rebuild_now(7);

    // Drop the draft ref id from the pointer so the live ref looks foreign.
    site.set_pointer(&ConsistencyPointer::new(
        id(7),
        pointer.change_meta_id(),
        BTreeMap::new(),
    ));

    let mut notes = site.factory.create(&project(), id(7)).expect("load");
    assert_eq!(notes.load_source(), LoadSource::Current);

    let drafts = notes.get_draft_comments(DRAFTER).expect("drafts");
    assert_eq!(drafts.values().flatten().count(), 1);
    assert_eq!(site.rebuilder.calls(), 1);

    let stored = site.change(7);
    let restored = ConsistencyPointer::parse(&stored);
    assert!(matches!(
        restored,
        PointerState::Present(ref p) if p.draft_ids().contains_key(&DRAFTER)
    ));
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

#[test]
fn legacy_only_mode_never_touches_the_log() {
    let site = Site::new(config(false));
    site.seed(rich_bundle(7));
    site.mark_stale(7);

    let notes = site.factory.create(&project(), id(7)).expect("load");

    assert_eq!(notes.load_source(), LoadSource::LegacyOnly);
    assert!(notes.patch_sets().is_empty());
    assert_eq!(site.rebuilder.calls(), 0);
    assert!(site.meta_ref(&project(), 7).is_none());
}

#[test]
fn auto_rebuild_disabled_reads_supplied_refs() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));
    let pointer = site.rebuild_now(7);
    site.mark_stale(7);

    let refs = FixedRefCache::new([(change_meta_ref(id(7)), pointer.change_meta_id())]);
    let notes = site
        .factory
        .create_with_auto_rebuilding_disabled(site.change(7), Box::new(refs))
        .expect("load");

    assert_eq!(notes.load_source(), LoadSource::AutoRebuildDisabled);
    assert_eq!(notes.revision(), Some(pointer.change_meta_id()));
    assert_eq!(site.rebuilder.calls(), 0);
}

#[test]
fn auto_rebuild_disabled_with_no_ref_yields_defaults() {
    let site = Site::new(config(true));
    site.seed(rich_bundle(7));
    site.mark_stale(7);

    let notes = site
        .factory
        .create_with_auto_rebuilding_disabled(site.change(7), Box::new(FixedRefCache::default()))
        .expect("load");

    assert_eq!(notes.load_source(), LoadSource::AutoRebuildDisabled);
    assert_eq!(notes.revision(), None);
    assert_eq!(site.rebuilder.calls(), 0);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn garbage_log_content_is_malformed() {
    let site = Site::new(config(true));
    site.seed(simple_bundle(7, project()));
    let foreign = site.force_meta_ref(7, b"not json");
    site.set_pointer(&ConsistencyPointer::new(id(7), foreign, BTreeMap::new()));

    let err = site.factory.create(&project(), id(7)).expect_err("malformed");

    assert!(matches!(
        err,
        NotesError::MalformedLogData { change_id, .. } if change_id == id(7)
    ));
    assert_eq!(err.code(), ErrorCode::MalformedLogData);
}

#[test]
fn wrong_project_is_rejected() {
    let site = Site::new(config(true));
    site.seed(simple_bundle(7, project()));

    let err = site.factory.create(&other_project(), id(7)).expect_err("mismatch");

    match err {
        NotesError::ProjectMismatch {
            change_id,
            expected,
            actual,
        } => {
            assert_eq!(change_id, id(7));
            assert_eq!(expected, other_project());
            assert_eq!(actual, project());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_change_is_not_found() {
    let site = Site::new(config(true));

    let err = site.factory.create(&project(), id(404)).expect_err("missing");

    assert!(err.is_not_found());
}
