//! Stateless orderings for snapshot collections.
//!
//! All sorts are stable, so entries with equal keys keep their original
//! insertion order.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::model::{ChangeMessage, PatchSetApproval};

/// Comparator over the key produced by `key`.
pub fn compare_by<T, K: Ord>(key: impl Fn(&T) -> K) -> impl Fn(&T, &T) -> Ordering {
    move |a, b| key(a).cmp(&key(b))
}

#[must_use]
pub const fn approval_granted(a: &PatchSetApproval) -> DateTime<Utc> {
    a.granted
}

#[must_use]
pub const fn message_written_on(m: &ChangeMessage) -> DateTime<Utc> {
    m.written_on
}

/// Approvals oldest grant first; ties keep insertion order.
pub fn sort_approvals_by_time(approvals: &mut [PatchSetApproval]) {
    approvals.sort_by(compare_by(approval_granted));
}

/// Messages oldest first; ties keep insertion order.
pub fn sort_messages_by_time(messages: &mut [ChangeMessage]) {
    messages.sort_by(compare_by(message_written_on));
}
