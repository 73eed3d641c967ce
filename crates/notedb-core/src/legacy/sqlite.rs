//! SQLite-backed legacy change store.
//!
//! Runtime defaults follow the projection database conventions:
//! - `journal_mode = WAL` so concurrent readers do not block the writer
//! - `busy_timeout = 5s` to ride out transient lock contention
//! - `foreign_keys = ON` so child rows disappear with their change

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::model::{
    AccountId, Change, ChangeBundle, ChangeId, ChangeMessage, ChangeStatus, Comment, CommentKey,
    PatchSet, PatchSetApproval, PatchSetId, ProjectName, RevId,
};

use super::schema;
use super::{LegacyError, LegacyStore};

/// Busy timeout used for legacy store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

const MIGRATIONS: &[(u32, &str)] = &[(1, schema::MIGRATION_V1_SQL), (2, schema::MIGRATION_V2_SQL)];

/// Upper bound on bound parameters per `IN (...)` query.
const MAX_IN_CLAUSE: usize = 500;

const CHANGE_COLUMNS: &str = "change_id, project, owner_id, status, subject, topic, \
     current_patch_set, created_on_us, last_updated_on_us, note_db_state";

// ---------------------------------------------------------------------------
// Schema management
// ---------------------------------------------------------------------------

/// Read `PRAGMA user_version` as a `u32`.
///
/// # Errors
///
/// Returns an error if the pragma query fails or the value is negative.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Apply all pending migrations in ascending order.
///
/// # Errors
///
/// Returns an error if any migration fails; earlier migrations stay applied.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.commit()?;
        current = *version;
    }

    Ok(current)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let us: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(us).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, us))
}

fn corrupt(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(LegacyError::Corrupt(msg)))
}

fn row_to_change(row: &Row<'_>) -> rusqlite::Result<Change> {
    let id = ChangeId::new(row.get(0)?);
    let status: String = row.get(3)?;
    let status = ChangeStatus::parse(&status)
        .ok_or_else(|| corrupt(3, format!("change {id}: unknown status {status}")))?;
    let current: Option<i32> = row.get(6)?;
    Ok(Change {
        id,
        project: ProjectName::new(row.get::<_, String>(1)?),
        owner: AccountId::new(row.get(2)?),
        status,
        subject: row.get(4)?,
        topic: row.get(5)?,
        current_patch_set: current.map(|num| PatchSetId::new(id, num)),
        created_on: ts_col(row, 7)?,
        last_updated_on: ts_col(row, 8)?,
        note_db_state: row.get(9)?,
    })
}

// ---------------------------------------------------------------------------
// SqliteLegacyStore
// ---------------------------------------------------------------------------

/// Legacy store over a single SQLite connection.
pub struct SqliteLegacyStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteLegacyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLegacyStore").finish_non_exhaustive()
    }
}

impl SqliteLegacyStore {
    /// Open (or create) the store at `path`, configure pragmas and migrate.
    ///
    /// # Errors
    ///
    /// Returns an error if opening, configuring or migrating fails.
    pub fn open(path: &Path) -> Result<Self, LegacyError> {
        let mut conn = Connection::open(path)?;
        configure_connection(&conn)?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory store, already migrated.
    ///
    /// # Errors
    ///
    /// Returns an error if migration fails.
    pub fn open_in_memory() -> Result<Self, LegacyError> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LegacyError> {
        self.conn
            .lock()
            .map_err(|_| LegacyError::Unavailable("legacy connection lock poisoned".into()))
    }

    /// Insert or replace a change together with all of its child rows.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; the write is atomic.
    pub fn insert_bundle(&self, bundle: &ChangeBundle) -> Result<(), LegacyError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let change = &bundle.change;
        let id = change.id.get();

        for table in [
            "patch_sets",
            "patch_set_approvals",
            "change_messages",
            "patch_comments",
            "change_hashtags",
        ] {
            tx.execute(&format!("DELETE FROM {table} WHERE change_id = ?1"), [id])?;
        }

        tx.execute(
            &format!("INSERT OR REPLACE INTO changes ({CHANGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                id,
                change.project.as_str(),
                change.owner.get(),
                change.status.as_str(),
                change.subject,
                change.topic,
                change.current_patch_set.map(|ps| ps.num),
                change.created_on.timestamp_micros(),
                change.last_updated_on.timestamp_micros(),
                change.note_db_state,
            ],
        )?;

        for ps in &bundle.patch_sets {
            tx.execute(
                "INSERT INTO patch_sets (change_id, patch_set_id, revision, uploader_id, created_on_us)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    ps.id.num,
                    ps.revision.as_str(),
                    ps.uploader.get(),
                    ps.created_on.timestamp_micros()
                ],
            )?;
        }

        for a in &bundle.approvals {
            tx.execute(
                "INSERT INTO patch_set_approvals (change_id, patch_set_id, account_id, label, value, granted_us)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    a.patch_set_id.num,
                    a.account_id.get(),
                    a.label,
                    a.value,
                    a.granted.timestamp_micros()
                ],
            )?;
        }

        for m in &bundle.messages {
            tx.execute(
                "INSERT INTO change_messages (change_id, uuid, author_id, written_on_us, message, patch_set_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    m.uuid,
                    m.author.map(AccountId::get),
                    m.written_on.timestamp_micros(),
                    m.message,
                    m.patch_set_id.map(|ps| ps.num)
                ],
            )?;
        }

        let published = bundle.comments.iter().map(|c| (c, "P"));
        let drafts = bundle.drafts.iter().map(|c| (c, "D"));
        for (c, status) in published.chain(drafts) {
            tx.execute(
                "INSERT INTO patch_comments (change_id, patch_set_id, file_name, uuid, line_nbr,
                     author_id, written_on_us, message, revision, parent_uuid, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id,
                    c.key.patch_set_id.num,
                    c.key.filename,
                    c.key.uuid,
                    c.line,
                    c.author.get(),
                    c.written_on.timestamp_micros(),
                    c.message,
                    c.revision.as_str(),
                    c.parent_uuid,
                    status
                ],
            )?;
        }

        for tag in &bundle.hashtags {
            tx.execute(
                "INSERT OR IGNORE INTO change_hashtags (change_id, hashtag) VALUES (?1, ?2)",
                params![id, tag],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn read_bundle(conn: &Connection, id: ChangeId) -> rusqlite::Result<Option<ChangeBundle>> {
        let change = conn
            .query_row(
                &format!("SELECT {CHANGE_COLUMNS} FROM changes WHERE change_id = ?1"),
                [id.get()],
                row_to_change,
            )
            .optional()?;
        let Some(change) = change else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT patch_set_id, revision, uploader_id, created_on_us
             FROM patch_sets WHERE change_id = ?1 ORDER BY rowid",
        )?;
        let patch_sets = stmt
            .query_map([id.get()], |row| {
                Ok(PatchSet {
                    id: PatchSetId::new(id, row.get(0)?),
                    revision: RevId::new(row.get::<_, String>(1)?),
                    uploader: AccountId::new(row.get(2)?),
                    created_on: ts_col(row, 3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT patch_set_id, account_id, label, value, granted_us
             FROM patch_set_approvals WHERE change_id = ?1 ORDER BY rowid",
        )?;
        let approvals = stmt
            .query_map([id.get()], |row| {
                Ok(PatchSetApproval {
                    patch_set_id: PatchSetId::new(id, row.get(0)?),
                    account_id: AccountId::new(row.get(1)?),
                    label: row.get(2)?,
                    value: row.get(3)?,
                    granted: ts_col(row, 4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT uuid, author_id, written_on_us, message, patch_set_id
             FROM change_messages WHERE change_id = ?1 ORDER BY rowid",
        )?;
        let messages = stmt
            .query_map([id.get()], |row| {
                let author: Option<i32> = row.get(1)?;
                let ps: Option<i32> = row.get(4)?;
                Ok(ChangeMessage {
                    uuid: row.get(0)?,
                    author: author.map(AccountId::new),
                    written_on: ts_col(row, 2)?,
                    message: row.get(3)?,
                    patch_set_id: ps.map(|num| PatchSetId::new(id, num)),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT patch_set_id, file_name, uuid, line_nbr, author_id, written_on_us,
                    message, revision, parent_uuid, status
             FROM patch_comments WHERE change_id = ?1 ORDER BY rowid",
        )?;
        let mut comments = Vec::new();
        let mut drafts = Vec::new();
        let rows = stmt.query_map([id.get()], |row| {
            let comment = Comment {
                key: CommentKey {
                    patch_set_id: PatchSetId::new(id, row.get(0)?),
                    filename: row.get(1)?,
                    uuid: row.get(2)?,
                },
                line: row.get(3)?,
                author: AccountId::new(row.get(4)?),
                written_on: ts_col(row, 5)?,
                message: row.get(6)?,
                revision: RevId::new(row.get::<_, String>(7)?),
                parent_uuid: row.get(8)?,
            };
            let status: String = row.get(9)?;
            Ok((comment, status))
        })?;
        for row in rows {
            let (comment, status) = row?;
            if status == "D" {
                drafts.push(comment);
            } else {
                comments.push(comment);
            }
        }

        let mut stmt = conn.prepare(
            "SELECT hashtag FROM change_hashtags WHERE change_id = ?1 ORDER BY rowid",
        )?;
        let hashtags = stmt
            .query_map([id.get()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(Some(ChangeBundle {
            change,
            patch_sets,
            approvals,
            messages,
            comments,
            drafts,
            hashtags,
        }))
    }
}

impl LegacyStore for SqliteLegacyStore {
    fn get(&self, id: ChangeId) -> Result<Option<Change>, LegacyError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                &format!("SELECT {CHANGE_COLUMNS} FROM changes WHERE change_id = ?1"),
                [id.get()],
                row_to_change,
            )
            .optional()?)
    }

    fn get_many(&self, ids: &[ChangeId]) -> Result<Vec<Change>, LegacyError> {
        let conn = self.lock()?;
        let mut found: HashMap<ChangeId, Change> = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IN_CLAUSE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHANGE_COLUMNS} FROM changes WHERE change_id IN ({placeholders})"
            ))?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(|id| id.get())), row_to_change)?;
            for row in rows {
                let change = row?;
                found.insert(change.id, change);
            }
        }
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    fn all(&self) -> Result<Vec<Change>, LegacyError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANGE_COLUMNS} FROM changes ORDER BY change_id"
        ))?;
        let rows = stmt
            .query_map([], row_to_change)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn bundle(&self, id: ChangeId) -> Result<Option<ChangeBundle>, LegacyError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let bundle = Self::read_bundle(&tx, id)?;
        tx.commit()?;
        Ok(bundle)
    }

    fn set_note_db_state(&self, id: ChangeId, state: Option<&str>) -> Result<(), LegacyError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE changes SET note_db_state = ?1 WHERE change_id = ?2",
            params![state, id.get()],
        )?;
        if updated == 0 {
            return Err(LegacyError::Corrupt(format!(
                "change {id} vanished during update"
            )));
        }
        Ok(())
    }
}
