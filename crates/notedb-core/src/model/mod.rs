//! Domain types shared by the legacy store, the notes log and snapshots.

pub mod change;
pub mod ids;
pub mod review;

pub use change::{Change, ChangeBundle, ChangeStatus};
pub use ids::{AccountId, ChangeId, PatchSetId, ProjectName, RevId};
pub use review::{
    ChangeMessage, Comment, CommentKey, PatchSet, PatchSetApproval, ReviewerEntry, ReviewerSet,
    ReviewerState, SubmitLabel, SubmitRecord, SubmitStatus,
};
