// Term store — durable storage for moderation terms.
//
// SQLite (rusqlite, "bundled") is the default backend; the database file lives
// wherever MUZZLE_DB_PATH points (defaults to ./muzzle.db). PostgreSQL is
// available behind the `postgres` feature when DATABASE_URL is set.

pub mod models;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod queries;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use traits::TermStore;

#[cfg(feature = "sqlite")]
use anyhow::Context;
use anyhow::Result;
#[cfg(feature = "sqlite")]
use rusqlite::Connection;
#[cfg(feature = "sqlite")]
use std::path::Path;
use std::sync::Arc;

/// Open (or create) the SQLite database and create tables.
///
/// Called by `muzzle init`.
#[cfg(feature = "sqlite")]
pub fn initialize(db_path: &str) -> Result<Connection> {
    // Create parent directories if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {}", db_path))?;
        }
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;

    schema::create_tables(&conn)?;

    Ok(conn)
}

/// Open an existing SQLite database (fails if it doesn't exist yet).
#[cfg(feature = "sqlite")]
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        anyhow::bail!(
            "Database not found at {}. Run `muzzle init` first.",
            db_path
        );
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;

    Ok(conn)
}

/// Create the SQLite database if needed and wrap it as a term store.
#[cfg(feature = "sqlite")]
pub fn initialize_sqlite(db_path: &str) -> Result<Arc<dyn TermStore>> {
    let conn = initialize(db_path)?;
    Ok(Arc::new(sqlite::SqliteTermStore::new(conn)))
}

/// Open an existing SQLite database as a term store.
#[cfg(feature = "sqlite")]
pub fn open_sqlite(db_path: &str) -> Result<Arc<dyn TermStore>> {
    let conn = open(db_path)?;
    Ok(Arc::new(sqlite::SqliteTermStore::new(conn)))
}

/// Connect to PostgreSQL (running migrations) as a term store.
#[cfg(feature = "postgres")]
pub async fn connect_postgres(database_url: &str) -> Result<Arc<dyn TermStore>> {
    let store = postgres::PgTermStore::connect(database_url).await?;
    Ok(Arc::new(store))
}
