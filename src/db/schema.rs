// Database schema — table creation for the SQLite term store.
//
// A `schema_version` table tracks which schema revision has been applied so
// later revisions can be layered on without guessing.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Current schema revision written to `schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Create all tables if they don't exist yet.
///
/// This is idempotent — safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Tracks schema version for future migrations
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Moderation terms, content-addressed by fingerprint
        CREATE TABLE IF NOT EXISTS terms (
            id TEXT PRIMARY KEY,               -- uuid v4
            fingerprint TEXT NOT NULL UNIQUE,  -- md5(value), lowercase hex
            value TEXT NOT NULL,
            name TEXT,
            description TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            deleted_at TEXT                    -- soft-delete marker
        );

        CREATE INDEX IF NOT EXISTS idx_terms_name
            ON terms(name);

        -- Every live query filters on deleted_at IS NULL
        CREATE INDEX IF NOT EXISTS idx_terms_deleted
            ON terms(deleted_at);
        ",
    )
    .context("Failed to create database tables")?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
