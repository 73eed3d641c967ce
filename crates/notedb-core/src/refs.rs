//! Ref naming for change meta refs and per-author draft refs.
//!
//! ```text
//! refs/changes/42/42/meta                 change notes log
//! refs/changes/42/42/3                    patch set 3 (not a notes ref)
//! refs/draft-comments/42/42/1000001       drafts of account 1000001 (All-Users)
//! ```
//!
//! The shard component is the last two decimal digits of the change id,
//! zero-padded.

use crate::model::{AccountId, ChangeId};

pub const REFS_CHANGES: &str = "refs/changes/";
pub const REFS_DRAFT_COMMENTS: &str = "refs/draft-comments/";
pub const META_SUFFIX: &str = "meta";

fn shard(id: ChangeId) -> String {
    format!("{:02}", id.get().rem_euclid(100))
}

/// Meta ref holding the notes log of a change.
#[must_use]
pub fn change_meta_ref(id: ChangeId) -> String {
    format!("{REFS_CHANGES}{}/{id}/{META_SUFFIX}", shard(id))
}

/// Prefix under which all draft refs of a change live.
#[must_use]
pub fn draft_comments_prefix(id: ChangeId) -> String {
    format!("{REFS_DRAFT_COMMENTS}{}/{id}/", shard(id))
}

/// Draft comments ref of one author on one change.
#[must_use]
pub fn draft_comments_ref(id: ChangeId, author: AccountId) -> String {
    format!("{}{author}", draft_comments_prefix(id))
}

/// Parse a strictly positive decimal with no sign and no leading zero.
fn parse_positive(raw: &str) -> Option<i32> {
    if raw.is_empty() || raw.starts_with('0') || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<i32>().ok().filter(|n| *n > 0)
}

impl ChangeId {
    /// Extract the change id from a ref under `refs/changes/`.
    ///
    /// Accepts the meta ref and patch set refs; anything else (bad shard,
    /// extra components, leading zeros) yields `None`.
    #[must_use]
    pub fn from_ref(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(REFS_CHANGES)?;
        let mut parts = rest.split('/');
        let shard_part = parts.next()?;
        let id_part = parts.next()?;
        let tail = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        let id = Self::new(parse_positive(id_part)?);
        if shard_part != shard(id) {
            return None;
        }
        if tail == META_SUFFIX || parse_positive(tail).is_some() {
            Some(id)
        } else {
            None
        }
    }

    /// Extract the author from a draft comments ref of this change.
    #[must_use]
    pub fn draft_author_from_ref(self, name: &str) -> Option<AccountId> {
        let author = name.strip_prefix(&draft_comments_prefix(self))?;
        parse_positive(author).map(AccountId::new)
    }
}
