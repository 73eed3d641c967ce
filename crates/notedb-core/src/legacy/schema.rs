//! SQLite schema of the legacy change store.
//!
//! - `changes` holds one row per change, including the consistency pointer
//!   added in v2
//! - child tables hold patch sets, votes, messages and inline comments;
//!   rowid order preserves original insertion order
//! - timestamps are microseconds since the Unix epoch

/// Migration v1: changes and their review rows.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS changes (
    change_id INTEGER PRIMARY KEY CHECK (change_id > 0),
    project TEXT NOT NULL CHECK (length(trim(project)) > 0),
    owner_id INTEGER NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('NEW', 'DRAFT', 'MERGED', 'ABANDONED')),
    subject TEXT NOT NULL,
    topic TEXT,
    current_patch_set INTEGER,
    created_on_us INTEGER NOT NULL,
    last_updated_on_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS patch_sets (
    change_id INTEGER NOT NULL REFERENCES changes(change_id) ON DELETE CASCADE,
    patch_set_id INTEGER NOT NULL CHECK (patch_set_id > 0),
    revision TEXT NOT NULL,
    uploader_id INTEGER NOT NULL,
    created_on_us INTEGER NOT NULL,
    PRIMARY KEY (change_id, patch_set_id)
);

CREATE TABLE IF NOT EXISTS patch_set_approvals (
    change_id INTEGER NOT NULL REFERENCES changes(change_id) ON DELETE CASCADE,
    patch_set_id INTEGER NOT NULL,
    account_id INTEGER NOT NULL,
    label TEXT NOT NULL,
    value INTEGER NOT NULL,
    granted_us INTEGER NOT NULL,
    PRIMARY KEY (change_id, patch_set_id, account_id, label)
);

CREATE TABLE IF NOT EXISTS change_messages (
    change_id INTEGER NOT NULL REFERENCES changes(change_id) ON DELETE CASCADE,
    uuid TEXT NOT NULL,
    author_id INTEGER,
    written_on_us INTEGER NOT NULL,
    message TEXT NOT NULL,
    patch_set_id INTEGER,
    PRIMARY KEY (change_id, uuid)
);

CREATE TABLE IF NOT EXISTS patch_comments (
    change_id INTEGER NOT NULL REFERENCES changes(change_id) ON DELETE CASCADE,
    patch_set_id INTEGER NOT NULL,
    file_name TEXT NOT NULL,
    uuid TEXT NOT NULL,
    line_nbr INTEGER NOT NULL,
    author_id INTEGER NOT NULL,
    written_on_us INTEGER NOT NULL,
    message TEXT NOT NULL,
    revision TEXT NOT NULL,
    parent_uuid TEXT,
    status TEXT NOT NULL CHECK (status IN ('P', 'D')),
    PRIMARY KEY (change_id, patch_set_id, file_name, uuid)
);

CREATE INDEX IF NOT EXISTS idx_changes_project ON changes(project);
";

/// Migration v2: consistency pointer column and hashtags.
pub const MIGRATION_V2_SQL: &str = r"
ALTER TABLE changes ADD COLUMN note_db_state TEXT;

CREATE TABLE IF NOT EXISTS change_hashtags (
    change_id INTEGER NOT NULL REFERENCES changes(change_id) ON DELETE CASCADE,
    hashtag TEXT NOT NULL CHECK (length(trim(hashtag)) > 0),
    PRIMARY KEY (change_id, hashtag)
);
";

/// Tables that must exist after all migrations.
pub const REQUIRED_TABLES: &[&str] = &[
    "changes",
    "patch_sets",
    "patch_set_approvals",
    "change_messages",
    "patch_comments",
    "change_hashtags",
];
