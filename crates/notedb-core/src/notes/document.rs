//! JSON note documents stored as commit payloads.
//!
//! A change log revision holds one [`NotesDocument`]; a draft ref holds one
//! [`DraftDocument`] per (change, author). Documents are produced by the
//! rebuilder and decoded by [`JsonNoteParser`].
//!
//! Encoding is deterministic: the same legacy bundle always produces the
//! same bytes, which keeps rebuilds idempotent under content addressing.
//!
//! # Validation
//!
//! Decoding checks structure only:
//!
//! - the format version is known
//! - the document belongs to the requested change (and author, for drafts)
//! - patch set numbers are unique
//! - approvals, messages and comments reference known patch sets
//! - the current patch set, if set, exists
//!
//! Violations surface as [`NotesError::MalformedLogData`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NotesError;
use crate::model::{
    AccountId, ChangeBundle, ChangeId, ChangeMessage, ChangeStatus, Comment, PatchSet,
    PatchSetApproval, PatchSetId, ProjectName, ReviewerEntry, ReviewerState, SubmitRecord,
    SubmitStatus,
};
use crate::repo::{ObjectId, Repository};

use super::snapshot::{
    ChangeColumns, DraftSnapshot, NotesSnapshot, RevisionNotes, RevisionNotesBuilder,
    SnapshotBuilder,
};

/// Current note document format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesDocument {
    pub version: u32,
    pub change_id: ChangeId,
    pub project: ProjectName,
    pub status: ChangeStatus,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_patch_set: Option<i32>,
    pub last_updated_on: DateTime<Utc>,
    #[serde(default)]
    pub patch_sets: Vec<PatchSet>,
    #[serde(default)]
    pub approvals: Vec<PatchSetApproval>,
    #[serde(default)]
    pub reviewers: Vec<ReviewerEntry>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub submit_records: Vec<SubmitRecord>,
    #[serde(default)]
    pub messages: Vec<ChangeMessage>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftDocument {
    pub version: u32,
    pub change_id: ChangeId,
    pub author: AccountId,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl NotesDocument {
    /// Replay a legacy bundle into a document.
    ///
    /// Reviewers are derived from voters; a merged change carries a single
    /// closed submit record. Comments with a repeated key keep the last one.
    #[must_use]
    pub fn from_bundle(bundle: &ChangeBundle) -> Self {
        let change = &bundle.change;

        let mut patch_sets = bundle.patch_sets.clone();
        patch_sets.sort_by_key(|ps| ps.id.num);

        let mut reviewers: Vec<ReviewerEntry> = Vec::new();
        for approval in &bundle.approvals {
            match reviewers
                .iter_mut()
                .find(|r| r.account_id == approval.account_id)
            {
                Some(existing) if existing.updated < approval.granted => {
                    existing.updated = approval.granted;
                }
                Some(_) => {}
                None => reviewers.push(ReviewerEntry {
                    state: ReviewerState::Reviewer,
                    account_id: approval.account_id,
                    updated: approval.granted,
                }),
            }
        }

        let submit_records = if change.status == ChangeStatus::Merged {
            vec![SubmitRecord {
                status: SubmitStatus::Closed,
                labels: Vec::new(),
                error_message: None,
            }]
        } else {
            Vec::new()
        };

        let mut comments = RevisionNotesBuilder::default();
        for comment in &bundle.comments {
            comments.put_comment(comment.clone());
        }
        let comments = comments
            .build()
            .comments()
            .values()
            .flatten()
            .cloned()
            .collect();

        Self {
            version: FORMAT_VERSION,
            change_id: change.id,
            project: change.project.clone(),
            status: change.status,
            subject: change.subject.clone(),
            topic: change.topic.clone(),
            current_patch_set: change.current_patch_set.map(|ps| ps.num),
            last_updated_on: change.last_updated_on,
            patch_sets,
            approvals: bundle.approvals.clone(),
            reviewers,
            hashtags: bundle.hashtags.clone(),
            submit_records,
            messages: bundle.messages.clone(),
            comments,
        }
    }

    /// # Errors
    ///
    /// Returns a serialization error; not expected for well-formed values.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// # Errors
    ///
    /// Returns a description of why `bytes` is not a notes document.
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        serde_json::from_slice(bytes).map_err(|e| format!("invalid notes document: {e}"))
    }

    /// Validate and freeze into a snapshot at `revision`.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError::MalformedLogData`] on any structural violation.
    pub fn into_snapshot(
        self,
        change_id: ChangeId,
        revision: ObjectId,
    ) -> Result<(NotesSnapshot, RevisionNotes), NotesError> {
        let bad = |reason: String| NotesError::malformed(change_id, reason);

        if self.version != FORMAT_VERSION {
            return Err(bad(format!("unsupported format version {}", self.version)));
        }
        if self.change_id != change_id {
            return Err(bad(format!("document is for change {}", self.change_id)));
        }

        let mut builder = SnapshotBuilder::new(change_id);
        builder.revision(revision);

        for ps in self.patch_sets {
            if ps.id.change_id != change_id {
                return Err(bad(format!("patch set {} belongs to another change", ps.id)));
            }
            builder.patch_set(ps).map_err(bad)?;
        }

        let current_patch_set = match self.current_patch_set {
            Some(num) => {
                let id = PatchSetId::new(change_id, num);
                if !builder.has_patch_set(&id) {
                    return Err(bad(format!("missing current patch set {num}")));
                }
                Some(id)
            }
            None => None,
        };
        builder.columns(ChangeColumns {
            status: self.status,
            subject: self.subject,
            topic: self.topic,
            current_patch_set,
            last_updated_on: self.last_updated_on,
        });

        for approval in self.approvals {
            if !builder.has_patch_set(&approval.patch_set_id) {
                return Err(bad(format!(
                    "approval references unknown patch set {}",
                    approval.patch_set_id
                )));
            }
            builder.approval(approval);
        }
        for message in self.messages {
            if let Some(ps) = message.patch_set_id.filter(|ps| !builder.has_patch_set(ps)) {
                return Err(bad(format!("message references unknown patch set {ps}")));
            }
            builder.message(message);
        }
        for comment in self.comments {
            if !builder.has_patch_set(&comment.key.patch_set_id) {
                return Err(bad(format!(
                    "comment references unknown patch set {}",
                    comment.key.patch_set_id
                )));
            }
            builder.comment(comment);
        }
        for reviewer in self.reviewers {
            builder.reviewer(reviewer);
        }
        for tag in self.hashtags {
            builder.hashtag(tag);
        }
        builder.submit_records(self.submit_records);

        Ok(builder.build())
    }
}

impl DraftDocument {
    /// One document per author, grouped from the bundle's drafts.
    #[must_use]
    pub fn from_bundle(bundle: &ChangeBundle) -> BTreeMap<AccountId, Self> {
        let mut by_author: BTreeMap<AccountId, Self> = BTreeMap::new();
        for draft in &bundle.drafts {
            by_author
                .entry(draft.author)
                .or_insert_with(|| Self {
                    version: FORMAT_VERSION,
                    change_id: bundle.change.id,
                    author: draft.author,
                    comments: Vec::new(),
                })
                .comments
                .push(draft.clone());
        }
        by_author
    }

    /// # Errors
    ///
    /// Returns a serialization error; not expected for well-formed values.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// # Errors
    ///
    /// Returns a description of why `bytes` is not a draft document.
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        serde_json::from_slice(bytes).map_err(|e| format!("invalid draft document: {e}"))
    }

    /// # Errors
    ///
    /// Returns [`NotesError::MalformedLogData`] if the document belongs to a
    /// different change or author.
    pub fn into_snapshot(
        self,
        change_id: ChangeId,
        author: AccountId,
        revision: ObjectId,
    ) -> Result<DraftSnapshot, NotesError> {
        if self.version != FORMAT_VERSION {
            return Err(NotesError::malformed(
                change_id,
                format!("unsupported draft format version {}", self.version),
            ));
        }
        if self.change_id != change_id || self.author != author {
            return Err(NotesError::malformed(
                change_id,
                format!(
                    "draft document is for change {} author {}",
                    self.change_id, self.author
                ),
            ));
        }
        if let Some(c) = self
            .comments
            .iter()
            .find(|c| c.key.patch_set_id.change_id != change_id || c.author != author)
        {
            return Err(NotesError::malformed(
                change_id,
                format!("draft {} does not belong to this change and author", c.key.uuid),
            ));
        }
        Ok(DraftSnapshot::new(change_id, author, revision, self.comments))
    }
}

// ---------------------------------------------------------------------------
// NoteParser
// ---------------------------------------------------------------------------

/// Parsed state of one change revision, shared through the snapshot cache.
#[derive(Debug, Clone)]
pub struct ParsedChange {
    pub snapshot: Arc<NotesSnapshot>,
    pub revision_notes: Arc<RevisionNotes>,
}

/// Turns log revisions into snapshots.
pub trait NoteParser: Send + Sync {
    /// # Errors
    ///
    /// [`NotesError::Repository`] when the revision cannot be read,
    /// [`NotesError::MalformedLogData`] when its content is invalid.
    fn parse_change(
        &self,
        repo: &dyn Repository,
        change_id: ChangeId,
        revision: ObjectId,
    ) -> Result<ParsedChange, NotesError>;

    /// # Errors
    ///
    /// Same as [`NoteParser::parse_change`].
    fn parse_drafts(
        &self,
        repo: &dyn Repository,
        change_id: ChangeId,
        author: AccountId,
        revision: ObjectId,
    ) -> Result<DraftSnapshot, NotesError>;
}

/// Parser for the documents written by the legacy rebuilder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonNoteParser;

impl NoteParser for JsonNoteParser {
    fn parse_change(
        &self,
        repo: &dyn Repository,
        change_id: ChangeId,
        revision: ObjectId,
    ) -> Result<ParsedChange, NotesError> {
        let commit = repo.read_commit(&revision)?;
        let document = NotesDocument::decode(&commit.payload)
            .map_err(|reason| NotesError::malformed(change_id, reason))?;
        let (snapshot, revision_notes) = document.into_snapshot(change_id, revision)?;
        Ok(ParsedChange {
            snapshot: Arc::new(snapshot),
            revision_notes: Arc::new(revision_notes),
        })
    }

    fn parse_drafts(
        &self,
        repo: &dyn Repository,
        change_id: ChangeId,
        author: AccountId,
        revision: ObjectId,
    ) -> Result<DraftSnapshot, NotesError> {
        let commit = repo.read_commit(&revision)?;
        DraftDocument::decode(&commit.payload)
            .map_err(|reason| NotesError::malformed(change_id, reason))?
            .into_snapshot(change_id, author, revision)
    }
}
