//! The legacy change record and the full legacy bundle used for rebuilds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AccountId, ChangeId, PatchSetId, ProjectName};
use super::review::{ChangeMessage, Comment, PatchSet, PatchSetApproval};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    New,
    Draft,
    Merged,
    Abandoned,
}

impl ChangeStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Draft => "DRAFT",
            Self::Merged => "MERGED",
            Self::Abandoned => "ABANDONED",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "NEW" => Some(Self::New),
            "DRAFT" => Some(Self::Draft),
            "MERGED" => Some(Self::Merged),
            "ABANDONED" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

/// A change row as stored in the legacy database.
///
/// `note_db_state` is the opaque consistency pointer written by the
/// rebuilder; `None` for changes that predate the migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub id: ChangeId,
    pub project: ProjectName,
    pub owner: AccountId,
    pub status: ChangeStatus,
    pub subject: String,
    pub topic: Option<String>,
    pub current_patch_set: Option<PatchSetId>,
    pub created_on: DateTime<Utc>,
    pub last_updated_on: DateTime<Utc>,
    pub note_db_state: Option<String>,
}

impl Change {
    pub fn new(
        id: ChangeId,
        project: ProjectName,
        owner: AccountId,
        subject: impl Into<String>,
        created_on: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            project,
            owner,
            status: ChangeStatus::New,
            subject: subject.into(),
            topic: None,
            current_patch_set: None,
            created_on,
            last_updated_on: created_on,
            note_db_state: None,
        }
    }
}

/// Everything the legacy store knows about one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBundle {
    pub change: Change,
    pub patch_sets: Vec<PatchSet>,
    pub approvals: Vec<PatchSetApproval>,
    pub messages: Vec<ChangeMessage>,
    pub comments: Vec<Comment>,
    pub drafts: Vec<Comment>,
    pub hashtags: Vec<String>,
}

impl ChangeBundle {
    #[must_use]
    pub const fn empty(change: Change) -> Self {
        Self {
            change,
            patch_sets: Vec::new(),
            approvals: Vec::new(),
            messages: Vec::new(),
            comments: Vec::new(),
            drafts: Vec::new(),
            hashtags: Vec::new(),
        }
    }
}
