//! Access to the legacy relational store being migrated away from.
//!
//! The store is the system of record during migration. Each change row
//! carries an opaque consistency pointer (`note_db_state`) naming the notes
//! refs that reflect the row's latest write.

pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;

use crate::model::{Change, ChangeBundle, ChangeId};

pub use memory::InMemoryLegacyStore;
pub use sqlite::SqliteLegacyStore;

#[derive(Debug, thiserror::Error)]
pub enum LegacyError {
    #[error("legacy sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A row could not be decoded into the domain model.
    #[error("corrupt legacy row: {0}")]
    Corrupt(String),

    #[error("legacy store unavailable: {0}")]
    Unavailable(String),
}

/// Legacy store collaborator.
///
/// Bulk reads follow iterable-get semantics: ids with no row are omitted
/// rather than reported as errors.
#[async_trait]
pub trait LegacyStore: Send + Sync {
    fn get(&self, id: ChangeId) -> Result<Option<Change>, LegacyError>;

    /// Rows for `ids`, in the order given, skipping missing ids.
    fn get_many(&self, ids: &[ChangeId]) -> Result<Vec<Change>, LegacyError>;

    fn all(&self) -> Result<Vec<Change>, LegacyError>;

    async fn get_async(&self, id: ChangeId) -> Result<Option<Change>, LegacyError> {
        self.get(id)
    }

    /// Index-style lookup by legacy id. Unlike [`LegacyStore::get`] this may
    /// report several records when the index is inconsistent.
    fn query_by_id(&self, id: ChangeId) -> Result<Vec<Change>, LegacyError> {
        Ok(self.get(id)?.into_iter().collect())
    }

    /// The change and all of its child rows; the input to a rebuild.
    fn bundle(&self, id: ChangeId) -> Result<Option<ChangeBundle>, LegacyError>;

    /// Store a new consistency pointer on the change row.
    fn set_note_db_state(&self, id: ChangeId, state: Option<&str>) -> Result<(), LegacyError>;
}
