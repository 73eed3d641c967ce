//! Consistency pointer stored on the legacy change row.
//!
//! The pointer records which notes refs reflect the row's latest write:
//!
//! ```text
//! <change meta id>[,<account>=<draft id>]*
//! ```
//!
//! Draft entries are sorted by account id so a given set of ref states has
//! exactly one encoding. Ids are 64-char hex content addresses.
//!
//! # Staleness rules
//!
//! - Present pointer: up to date iff every encoded ref is live at exactly
//!   the encoded id. A ref that no longer resolves is stale.
//! - Absent pointer: the change predates migration. If a meta ref exists the
//!   log is treated as authoritative as-is; if not there is nothing to load.
//! - Malformed pointer: never up to date, so a rebuild rewrites it.

use std::collections::BTreeMap;
use std::fmt;

use crate::model::{AccountId, Change, ChangeId};
use crate::refs::{change_meta_ref, draft_comments_ref};
use crate::repo::{ObjectId, RefCache, RepoError};

/// Parsed consistency pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyPointer {
    change_id: ChangeId,
    change_meta_id: ObjectId,
    draft_ids: BTreeMap<AccountId, ObjectId>,
}

/// Outcome of reading the pointer column of a change row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerState {
    /// No migration metadata on the row.
    Absent,
    Present(ConsistencyPointer),
    /// The column is set but cannot be decoded.
    Malformed(String),
}

impl ConsistencyPointer {
    #[must_use]
    pub const fn new(
        change_id: ChangeId,
        change_meta_id: ObjectId,
        draft_ids: BTreeMap<AccountId, ObjectId>,
    ) -> Self {
        Self {
            change_id,
            change_meta_id,
            draft_ids,
        }
    }

    /// Read the pointer from a legacy change row.
    #[must_use]
    pub fn parse(change: &Change) -> PointerState {
        match change.note_db_state.as_deref().map(str::trim) {
            None | Some("") => PointerState::Absent,
            Some(raw) => match Self::decode(change.id, raw) {
                Ok(pointer) => PointerState::Present(pointer),
                Err(reason) => PointerState::Malformed(reason),
            },
        }
    }

    fn decode(change_id: ChangeId, raw: &str) -> Result<Self, String> {
        let mut parts = raw.split(',');
        let meta = parts.next().unwrap_or_default();
        let change_meta_id = ObjectId::from_hex(meta)
            .ok_or_else(|| format!("invalid change meta id {meta:?}"))?;

        let mut draft_ids = BTreeMap::new();
        for part in parts {
            let (account, id) = part
                .split_once('=')
                .ok_or_else(|| format!("invalid draft entry {part:?}"))?;
            let account = account
                .parse::<i32>()
                .map(AccountId::new)
                .map_err(|_| format!("invalid draft account {account:?}"))?;
            let id = ObjectId::from_hex(id).ok_or_else(|| format!("invalid draft id {id:?}"))?;
            if draft_ids.insert(account, id).is_some() {
                return Err(format!("duplicate draft entry for account {account}"));
            }
        }

        Ok(Self {
            change_id,
            change_meta_id,
            draft_ids,
        })
    }

    #[must_use]
    pub const fn change_id(&self) -> ChangeId {
        self.change_id
    }

    #[must_use]
    pub const fn change_meta_id(&self) -> ObjectId {
        self.change_meta_id
    }

    #[must_use]
    pub const fn draft_ids(&self) -> &BTreeMap<AccountId, ObjectId> {
        &self.draft_ids
    }

    /// Whether the meta ref is live at the encoded id.
    ///
    /// # Errors
    ///
    /// Propagates ref lookup failures.
    pub fn is_change_meta_up_to_date(&self, refs: &mut dyn RefCache) -> Result<bool, RepoError> {
        Ok(refs.get(&change_meta_ref(self.change_id))? == Some(self.change_meta_id))
    }

    /// Whether the draft ref of `account` matches the encoded draft id; an
    /// account with no encoded id expects no ref.
    ///
    /// # Errors
    ///
    /// Propagates ref lookup failures.
    pub fn are_drafts_up_to_date(
        &self,
        draft_refs: &mut dyn RefCache,
        account: AccountId,
    ) -> Result<bool, RepoError> {
        let live = draft_refs.get(&draft_comments_ref(self.change_id, account))?;
        Ok(live == self.draft_ids.get(&account).copied())
    }

    /// Conjunction over every encoded (ref, id) pair.
    ///
    /// # Errors
    ///
    /// Propagates ref lookup failures.
    pub fn is_up_to_date(
        &self,
        change_refs: &mut dyn RefCache,
        draft_refs: &mut dyn RefCache,
    ) -> Result<bool, RepoError> {
        if !self.is_change_meta_up_to_date(change_refs)? {
            return Ok(false);
        }
        for account in self.draft_ids.keys() {
            if !self.are_drafts_up_to_date(draft_refs, *account)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl fmt::Display for ConsistencyPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.change_meta_id)?;
        for (account, id) in &self.draft_ids {
            write!(f, ",{account}={id}")?;
        }
        Ok(())
    }
}

impl PointerState {
    /// Staleness check used on the read path for the change meta ref.
    ///
    /// # Errors
    ///
    /// Propagates ref lookup failures.
    pub fn is_change_up_to_date(
        &self,
        refs: &mut dyn RefCache,
        change_id: ChangeId,
    ) -> Result<bool, RepoError> {
        match self {
            Self::Absent => Ok(refs.get(&change_meta_ref(change_id))?.is_some()),
            Self::Present(pointer) => pointer.is_change_meta_up_to_date(refs),
            Self::Malformed(_) => Ok(false),
        }
    }

    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProjectName;
    use crate::repo::{Commit, FixedRefCache};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn oid(seed: u8) -> ObjectId {
        Commit::new(None, "seed", vec![seed]).id
    }

    fn change_with_state(id: i32, state: Option<String>) -> Change {
        let mut change = Change::new(
            ChangeId::new(id),
            ProjectName::new("p"),
            AccountId::new(1),
            "s",
            Utc.timestamp_opt(0, 0).single().expect("ts"),
        );
        change.note_db_state = state;
        change
    }

    #[test]
    fn absent_and_blank_columns_parse_as_absent() {
        assert_eq!(
            ConsistencyPointer::parse(&change_with_state(1, None)),
            PointerState::Absent
        );
        assert_eq!(
            ConsistencyPointer::parse(&change_with_state(1, Some("  ".into()))),
            PointerState::Absent
        );
    }

    #[test]
    fn malformed_columns_are_reported() {
        let bad_account = format!("{},x={}", oid(1), oid(2));
        for raw in ["zz", "abc,1", bad_account.as_str()] {
            let state = ConsistencyPointer::parse(&change_with_state(1, Some(raw.to_string())));
            assert!(matches!(state, PointerState::Malformed(_)), "{raw}");
        }
    }

    #[test]
    fn encoding_sorts_drafts_by_account() {
        let pointer = ConsistencyPointer::new(
            ChangeId::new(3),
            oid(1),
            BTreeMap::from([(AccountId::new(20), oid(3)), (AccountId::new(10), oid(2))]),
        );
        let encoded = pointer.to_string();
        assert_eq!(encoded, format!("{},10={},20={}", oid(1), oid(2), oid(3)));
        assert_eq!(
            ConsistencyPointer::parse(&change_with_state(3, Some(encoded))),
            PointerState::Present(pointer)
        );
    }

    #[test]
    fn meta_staleness_is_exact_match() {
        let id = ChangeId::new(42);
        let pointer = ConsistencyPointer::new(id, oid(1), BTreeMap::new());

        let mut live = FixedRefCache::new([(change_meta_ref(id), oid(1))]);
        assert!(pointer.is_change_meta_up_to_date(&mut live).expect("check"));

        let mut moved = FixedRefCache::new([(change_meta_ref(id), oid(2))]);
        assert!(!pointer.is_change_meta_up_to_date(&mut moved).expect("check"));

        let mut missing = FixedRefCache::default();
        assert!(!pointer.is_change_meta_up_to_date(&mut missing).expect("check"));
    }

    #[test]
    fn absent_pointer_defers_to_existing_log() {
        let id = ChangeId::new(9);
        let mut with_ref = FixedRefCache::new([(change_meta_ref(id), oid(1))]);
        let mut without_ref = FixedRefCache::default();
        assert!(PointerState::Absent.is_change_up_to_date(&mut with_ref, id).expect("check"));
        assert!(!PointerState::Absent.is_change_up_to_date(&mut without_ref, id).expect("check"));
        assert!(!PointerState::Malformed("x".into())
            .is_change_up_to_date(&mut with_ref, id)
            .expect("check"));
    }

    #[test]
    fn full_check_is_a_conjunction_over_drafts() {
        let id = ChangeId::new(5);
        let alice = AccountId::new(1);
        let bob = AccountId::new(2);
        let pointer = ConsistencyPointer::new(
            id,
            oid(1),
            BTreeMap::from([(alice, oid(2)), (bob, oid(3))]),
        );
        let mut change_refs = FixedRefCache::new([(change_meta_ref(id), oid(1))]);

        let mut all_good = FixedRefCache::new([
            (draft_comments_ref(id, alice), oid(2)),
            (draft_comments_ref(id, bob), oid(3)),
        ]);
        assert!(pointer.is_up_to_date(&mut change_refs, &mut all_good).expect("check"));

        let mut bob_missing = FixedRefCache::new([(draft_comments_ref(id, alice), oid(2))]);
        assert!(!pointer.is_up_to_date(&mut change_refs, &mut bob_missing).expect("check"));

        let carol = AccountId::new(3);
        assert!(pointer.are_drafts_up_to_date(&mut bob_missing, carol).expect("check"));
    }

    proptest! {
        #[test]
        fn encode_then_parse_is_identity(
            meta in any::<u8>(),
            drafts in proptest::collection::btree_map(1i32..10_000, any::<u8>(), 0..6),
        ) {
            let draft_ids = drafts
                .into_iter()
                .map(|(account, seed)| (AccountId::new(account), oid(seed)))
                .collect();
            let pointer = ConsistencyPointer::new(ChangeId::new(77), oid(meta), draft_ids);
            let change = change_with_state(77, Some(pointer.to_string()));
            prop_assert_eq!(ConsistencyPointer::parse(&change), PointerState::Present(pointer));
        }
    }
}
