//! Immutable views computed from one notes revision.
//!
//! A [`NotesSnapshot`] is built once by [`SnapshotBuilder`] and never
//! mutated afterwards; it always carries the revision it was computed from.
//! Edit construction works on a separate [`RevisionNotesBuilder`], never on
//! cached state.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::model::{
    AccountId, Change, ChangeId, ChangeMessage, ChangeStatus, Comment, CommentKey, PatchSet,
    PatchSetApproval, PatchSetId, ReviewerEntry, ReviewerSet, ReviewerState, RevId, SubmitRecord,
};
use crate::repo::ObjectId;

use super::ordering::{sort_approvals_by_time, sort_messages_by_time};

/// Change row columns whose authoritative value lives in the notes log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeColumns {
    pub status: ChangeStatus,
    pub subject: String,
    pub topic: Option<String>,
    pub current_patch_set: Option<PatchSetId>,
    pub last_updated_on: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// NotesSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotesSnapshot {
    change_id: ChangeId,
    revision: Option<ObjectId>,
    columns: Option<ChangeColumns>,
    patch_sets: BTreeMap<PatchSetId, PatchSet>,
    approvals: BTreeMap<PatchSetId, Vec<PatchSetApproval>>,
    reviewers: ReviewerSet,
    all_past_reviewers: Vec<AccountId>,
    hashtags: Vec<String>,
    submit_records: Vec<SubmitRecord>,
    change_messages: Vec<ChangeMessage>,
    messages_by_patch_set: BTreeMap<PatchSetId, Vec<ChangeMessage>>,
    published_comments: BTreeMap<RevId, Vec<Comment>>,
}

impl NotesSnapshot {
    /// Snapshot of a change with no notes log.
    #[must_use]
    pub fn empty(change: &Change) -> Self {
        Self {
            change_id: change.id,
            revision: None,
            columns: None,
            patch_sets: BTreeMap::new(),
            approvals: BTreeMap::new(),
            reviewers: ReviewerSet::default(),
            all_past_reviewers: Vec::new(),
            hashtags: Vec::new(),
            submit_records: Vec::new(),
            change_messages: Vec::new(),
            messages_by_patch_set: BTreeMap::new(),
            published_comments: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn change_id(&self) -> ChangeId {
        self.change_id
    }

    /// Notes revision this snapshot was computed from; `None` when empty.
    #[must_use]
    pub const fn revision(&self) -> Option<ObjectId> {
        self.revision
    }

    #[must_use]
    pub const fn columns(&self) -> Option<&ChangeColumns> {
        self.columns.as_ref()
    }

    #[must_use]
    pub const fn patch_sets(&self) -> &BTreeMap<PatchSetId, PatchSet> {
        &self.patch_sets
    }

    /// Approvals per patch set, each list oldest grant first.
    #[must_use]
    pub const fn approvals(&self) -> &BTreeMap<PatchSetId, Vec<PatchSetApproval>> {
        &self.approvals
    }

    #[must_use]
    pub const fn reviewers(&self) -> &ReviewerSet {
        &self.reviewers
    }

    #[must_use]
    pub fn all_past_reviewers(&self) -> &[AccountId] {
        &self.all_past_reviewers
    }

    /// Deduplicated hashtags in log order; callers wanting the sorted view
    /// use [`NotesSnapshot::sorted_hashtags`].
    #[must_use]
    pub fn hashtags(&self) -> &[String] {
        &self.hashtags
    }

    #[must_use]
    pub fn sorted_hashtags(&self) -> BTreeSet<String> {
        self.hashtags.iter().cloned().collect()
    }

    #[must_use]
    pub fn submit_records(&self) -> &[SubmitRecord] {
        &self.submit_records
    }

    #[must_use]
    pub fn change_messages(&self) -> &[ChangeMessage] {
        &self.change_messages
    }

    #[must_use]
    pub const fn messages_by_patch_set(&self) -> &BTreeMap<PatchSetId, Vec<ChangeMessage>> {
        &self.messages_by_patch_set
    }

    #[must_use]
    pub const fn published_comments(&self) -> &BTreeMap<RevId, Vec<Comment>> {
        &self.published_comments
    }

    #[must_use]
    pub fn contains_published(&self, key: &CommentKey) -> bool {
        self.published_comments
            .values()
            .flatten()
            .any(|c| &c.key == key)
    }

    /// Overwrite the log-owned columns of `change`.
    pub fn copy_columns_to(&self, change: &mut Change) {
        if let Some(columns) = &self.columns {
            change.status = columns.status;
            change.subject.clone_from(&columns.subject);
            change.topic.clone_from(&columns.topic);
            change.current_patch_set = columns.current_patch_set;
            change.last_updated_on = columns.last_updated_on;
        }
    }
}

// ---------------------------------------------------------------------------
// SnapshotBuilder
// ---------------------------------------------------------------------------

/// Accumulates parsed log entries; [`SnapshotBuilder::build`] applies the
/// canonical orderings.
#[derive(Debug)]
pub struct SnapshotBuilder {
    change_id: ChangeId,
    revision: Option<ObjectId>,
    columns: Option<ChangeColumns>,
    patch_sets: BTreeMap<PatchSetId, PatchSet>,
    approvals: Vec<PatchSetApproval>,
    reviewers: Vec<ReviewerEntry>,
    past_reviewers: Vec<AccountId>,
    hashtags: Vec<String>,
    submit_records: Vec<SubmitRecord>,
    messages: Vec<ChangeMessage>,
    comments: RevisionNotesBuilder,
}

impl SnapshotBuilder {
    #[must_use]
    pub fn new(change_id: ChangeId) -> Self {
        Self {
            change_id,
            revision: None,
            columns: None,
            patch_sets: BTreeMap::new(),
            approvals: Vec::new(),
            reviewers: Vec::new(),
            past_reviewers: Vec::new(),
            hashtags: Vec::new(),
            submit_records: Vec::new(),
            messages: Vec::new(),
            comments: RevisionNotesBuilder::default(),
        }
    }

    pub const fn revision(&mut self, revision: ObjectId) -> &mut Self {
        self.revision = Some(revision);
        self
    }

    pub fn columns(&mut self, columns: ChangeColumns) -> &mut Self {
        self.columns = Some(columns);
        self
    }

    /// Add a patch set.
    ///
    /// # Errors
    ///
    /// Returns a description when the patch set id is already present.
    pub fn patch_set(&mut self, ps: PatchSet) -> Result<&mut Self, String> {
        if self.patch_sets.contains_key(&ps.id) {
            return Err(format!("duplicate patch set {}", ps.id.num));
        }
        self.patch_sets.insert(ps.id, ps);
        Ok(self)
    }

    pub fn approval(&mut self, approval: PatchSetApproval) -> &mut Self {
        self.approvals.push(approval);
        self
    }

    pub fn reviewer(&mut self, entry: ReviewerEntry) -> &mut Self {
        if entry.state == ReviewerState::Reviewer
            && !self.past_reviewers.contains(&entry.account_id)
        {
            self.past_reviewers.push(entry.account_id);
        }
        self.reviewers.push(entry);
        self
    }

    /// Add a hashtag; repeats are ignored.
    pub fn hashtag(&mut self, tag: impl Into<String>) -> &mut Self {
        let tag = tag.into();
        if !self.hashtags.contains(&tag) {
            self.hashtags.push(tag);
        }
        self
    }

    pub fn submit_records(&mut self, records: Vec<SubmitRecord>) -> &mut Self {
        self.submit_records = records;
        self
    }

    pub fn message(&mut self, message: ChangeMessage) -> &mut Self {
        self.messages.push(message);
        self
    }

    pub fn comment(&mut self, comment: Comment) -> &mut Self {
        self.comments.put_comment(comment);
        self
    }

    #[must_use]
    pub fn has_patch_set(&self, id: &PatchSetId) -> bool {
        self.patch_sets.contains_key(id)
    }

    /// Freeze into a snapshot plus the read-only per-revision comment notes.
    #[must_use]
    pub fn build(self) -> (NotesSnapshot, RevisionNotes) {
        let mut approvals = self.approvals;
        sort_approvals_by_time(&mut approvals);
        let mut approvals_by_ps: BTreeMap<PatchSetId, Vec<PatchSetApproval>> = BTreeMap::new();
        for approval in approvals {
            approvals_by_ps
                .entry(approval.patch_set_id)
                .or_default()
                .push(approval);
        }

        let mut messages = self.messages;
        sort_messages_by_time(&mut messages);
        let mut messages_by_patch_set: BTreeMap<PatchSetId, Vec<ChangeMessage>> = BTreeMap::new();
        for message in &messages {
            if let Some(ps) = message.patch_set_id {
                messages_by_patch_set
                    .entry(ps)
                    .or_default()
                    .push(message.clone());
            }
        }

        let revision_notes = self.comments.build();
        let snapshot = NotesSnapshot {
            change_id: self.change_id,
            revision: self.revision,
            columns: self.columns,
            patch_sets: self.patch_sets,
            approvals: approvals_by_ps,
            reviewers: ReviewerSet::from_entries(self.reviewers),
            all_past_reviewers: self.past_reviewers,
            hashtags: self.hashtags,
            submit_records: self.submit_records,
            change_messages: messages,
            messages_by_patch_set,
            published_comments: revision_notes.comments.clone(),
        };
        (snapshot, revision_notes)
    }
}

// ---------------------------------------------------------------------------
// Revision notes
// ---------------------------------------------------------------------------

/// Published comments keyed by the revision they are attached to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionNotes {
    comments: BTreeMap<RevId, Vec<Comment>>,
}

impl RevisionNotes {
    #[must_use]
    pub const fn comments(&self) -> &BTreeMap<RevId, Vec<Comment>> {
        &self.comments
    }

    #[must_use]
    pub fn get(&self, rev: &RevId) -> &[Comment] {
        self.comments.get(rev).map_or(&[], Vec::as_slice)
    }

    /// Start an independent mutable copy for edit construction.
    #[must_use]
    pub fn to_builder(&self) -> RevisionNotesBuilder {
        RevisionNotesBuilder {
            comments: self.comments.clone(),
        }
    }
}

/// Mutable per-revision comment map used while constructing edits.
#[derive(Debug, Clone, Default)]
pub struct RevisionNotesBuilder {
    comments: BTreeMap<RevId, Vec<Comment>>,
}

impl RevisionNotesBuilder {
    /// Insert a comment, replacing any comment with the same key on the same
    /// revision.
    pub fn put_comment(&mut self, comment: Comment) {
        let list = self.comments.entry(comment.revision.clone()).or_default();
        match list.iter_mut().find(|c| c.key == comment.key) {
            Some(existing) => *existing = comment,
            None => list.push(comment),
        }
    }

    /// Remove the comment with `key`; returns whether one was removed.
    pub fn delete_comment(&mut self, key: &CommentKey) -> bool {
        let mut removed = false;
        for list in self.comments.values_mut() {
            let before = list.len();
            list.retain(|c| &c.key != key);
            removed |= list.len() != before;
        }
        self.comments.retain(|_, list| !list.is_empty());
        removed
    }

    #[must_use]
    pub fn build(self) -> RevisionNotes {
        RevisionNotes {
            comments: self.comments,
        }
    }
}

// ---------------------------------------------------------------------------
// DraftSnapshot
// ---------------------------------------------------------------------------

/// One author's draft comments on one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSnapshot {
    change_id: ChangeId,
    author: AccountId,
    revision: Option<ObjectId>,
    comments: BTreeMap<RevId, Vec<Comment>>,
}

impl DraftSnapshot {
    #[must_use]
    pub const fn empty(change_id: ChangeId, author: AccountId) -> Self {
        Self {
            change_id,
            author,
            revision: None,
            comments: BTreeMap::new(),
        }
    }

    pub fn new(
        change_id: ChangeId,
        author: AccountId,
        revision: ObjectId,
        comments: impl IntoIterator<Item = Comment>,
    ) -> Self {
        let mut by_rev: BTreeMap<RevId, Vec<Comment>> = BTreeMap::new();
        for comment in comments {
            by_rev.entry(comment.revision.clone()).or_default().push(comment);
        }
        Self {
            change_id,
            author,
            revision: Some(revision),
            comments: by_rev,
        }
    }

    #[must_use]
    pub const fn change_id(&self) -> ChangeId {
        self.change_id
    }

    #[must_use]
    pub const fn author(&self) -> AccountId {
        self.author
    }

    #[must_use]
    pub const fn revision(&self) -> Option<ObjectId> {
        self.revision
    }

    #[must_use]
    pub const fn comments(&self) -> &BTreeMap<RevId, Vec<Comment>> {
        &self.comments
    }

    #[must_use]
    pub fn contains(&self, key: &CommentKey) -> bool {
        self.comments.values().flatten().any(|c| &c.key == key)
    }
}
