//! Review data carried by a change: patch sets, votes, messages, comments.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AccountId, PatchSetId, RevId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    pub id: PatchSetId,
    pub revision: RevId,
    pub uploader: AccountId,
    pub created_on: DateTime<Utc>,
}

/// A vote on one label, cast on one patch set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSetApproval {
    pub patch_set_id: PatchSetId,
    pub account_id: AccountId,
    pub label: String,
    pub value: i16,
    pub granted: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub uuid: String,
    /// `None` for messages posted by the server itself.
    pub author: Option<AccountId>,
    pub written_on: DateTime<Utc>,
    pub message: String,
    pub patch_set_id: Option<PatchSetId>,
}

/// Identity of an inline comment. Drafts and published comments are matched
/// on this key, never on the rest of the comment body.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommentKey {
    pub patch_set_id: PatchSetId,
    pub filename: String,
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub key: CommentKey,
    pub line: i32,
    pub author: AccountId,
    pub written_on: DateTime<Utc>,
    pub message: String,
    /// Revision the comment is attached to.
    pub revision: RevId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitStatus {
    Ok,
    NotReady,
    Closed,
    RuleError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitLabel {
    pub label: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_by: Option<AccountId>,
}

/// Result of evaluating submit rules at submit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRecord {
    pub status: SubmitStatus,
    #[serde(default)]
    pub labels: Vec<SubmitLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewerState {
    Reviewer,
    Cc,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerEntry {
    pub state: ReviewerState,
    pub account_id: AccountId,
    pub updated: DateTime<Utc>,
}

/// Reviewers of a change keyed by (state, account), with the time each
/// entry was last updated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewerSet {
    table: BTreeMap<(ReviewerState, AccountId), DateTime<Utc>>,
}

impl ReviewerSet {
    /// Build from entries; an account appears under at most one state, the
    /// most recently updated one wins.
    pub fn from_entries(entries: impl IntoIterator<Item = ReviewerEntry>) -> Self {
        let mut latest: BTreeMap<AccountId, (ReviewerState, DateTime<Utc>)> = BTreeMap::new();
        for entry in entries {
            match latest.get(&entry.account_id) {
                Some((_, ts)) if *ts > entry.updated => {}
                _ => {
                    latest.insert(entry.account_id, (entry.state, entry.updated));
                }
            }
        }
        let table = latest
            .into_iter()
            .map(|(account, (state, ts))| ((state, account), ts))
            .collect();
        Self { table }
    }

    #[must_use]
    pub fn by_state(&self, state: ReviewerState) -> BTreeSet<AccountId> {
        self.table
            .keys()
            .filter(|(s, _)| *s == state)
            .map(|(_, account)| *account)
            .collect()
    }

    /// Accounts in any state other than `Removed`.
    #[must_use]
    pub fn all(&self) -> BTreeSet<AccountId> {
        self.table
            .keys()
            .filter(|(s, _)| *s != ReviewerState::Removed)
            .map(|(_, account)| *account)
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = ReviewerEntry> + '_ {
        self.table.iter().map(|((state, account_id), updated)| ReviewerEntry {
            state: *state,
            account_id: *account_id,
            updated: *updated,
        })
    }
}
