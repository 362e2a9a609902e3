// PgTermStore — PostgreSQL backend implementing the TermStore trait.
//
// Uses sqlx PgPool for native async queries. All queries use runtime
// parameter binding (not compile-time macros) to avoid requiring
// DATABASE_URL at compile time.
//
// Key differences from SQLite:
// - TIMESTAMPTZ instead of TEXT for timestamps (rendered back to text with to_char)
// - ILIKE for keyword search, matching SQLite's case-insensitive LIKE
// - $1/$2 parameter syntax (handled by sqlx)

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx_core::pool::Pool;
use sqlx_core::row::Row;
use sqlx_postgres::{PgRow, Postgres};
use uuid::Uuid;

use super::models::{normalize_value, NewTerm, Term, TermQuery, TermUpdate};
use super::traits::TermStore;

/// Type alias for the PostgreSQL connection pool.
pub type PgPool = Pool<Postgres>;

const TERM_COLUMNS: &str = "id, fingerprint, value, name, description,
    to_char(created_at, 'YYYY-MM-DD HH24:MI:SS') AS created_at,
    to_char(updated_at, 'YYYY-MM-DD HH24:MI:SS') AS updated_at,
    to_char(deleted_at, 'YYYY-MM-DD HH24:MI:SS') AS deleted_at";

pub struct PgTermStore {
    pool: PgPool,
}

impl PgTermStore {
    /// Connect to PostgreSQL and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to PostgreSQL at {database_url}"))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run all pending migrations.
    ///
    /// Holds a session-level advisory lock on a dedicated connection so two
    /// instances starting together don't race to apply the same migration.
    /// The unlock always runs, even if a migration fails.
    async fn run_migrations(&self) -> Result<()> {
        // ASCII "MUZZLE" as a big-endian integer.
        const MIGRATION_LOCK_KEY: i64 = 0x4D555A5A4C45;

        let mut lock_conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for migration advisory lock")?;

        sqlx_core::query::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to acquire migration advisory lock")?;

        let migration_result: Result<()> = async {
            sqlx_core::query::query(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .execute(&self.pool)
            .await?;

            let migrations = [(
                1,
                include_str!("../../migrations/postgres/0001_initial.sql"),
            )];

            for (version, sql) in migrations {
                let applied: bool = sqlx_core::query::query(
                    "SELECT COUNT(*) > 0 FROM schema_version WHERE version = $1",
                )
                .bind(version)
                .fetch_one(&self.pool)
                .await
                .map(|row| row.get::<bool, _>(0))
                .unwrap_or(false);

                if !applied {
                    let mut tx = self.pool.begin().await?;
                    sqlx_core::raw_sql::raw_sql(sql).execute(&mut *tx).await?;
                    tx.commit().await?;
                }
            }

            Ok(())
        }
        .await;

        let unlock_result = sqlx_core::query::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to release migration advisory lock");

        // Migration error takes priority over unlock error.
        migration_result?;
        unlock_result?;

        Ok(())
    }
}

fn term_from_row(row: &PgRow) -> Term {
    Term {
        id: row.get("id"),
        fingerprint: row.get("fingerprint"),
        value: row.get("value"),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    }
}

#[async_trait]
impl TermStore for PgTermStore {
    async fn table_count(&self) -> Result<i64> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*)::bigint FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn insert_term(&self, term: &NewTerm) -> Result<Term> {
        let (value, fingerprint) = term.normalized()?;
        let sql = format!(
            "INSERT INTO terms (id, fingerprint, value, name, description)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT(fingerprint) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, terms.name),
                description = COALESCE(EXCLUDED.description, terms.description),
                updated_at = NOW(),
                deleted_at = NULL
             RETURNING {TERM_COLUMNS}"
        );
        let row = sqlx_core::query::query(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(fingerprint)
            .bind(value)
            .bind(term.name.clone())
            .bind(term.description.clone())
            .fetch_one(&self.pool)
            .await?;
        Ok(term_from_row(&row))
    }

    async fn import_term(&self, term: &Term) -> Result<()> {
        sqlx_core::query::query(
            "INSERT INTO terms (id, fingerprint, value, name, description, created_at, updated_at, deleted_at)
             VALUES ($1, $2, $3, $4, $5, $6::timestamptz, $7::timestamptz, $8::timestamptz)
             ON CONFLICT(fingerprint) DO NOTHING",
        )
        .bind(&term.id)
        .bind(&term.fingerprint)
        .bind(&term.value)
        .bind(&term.name)
        .bind(&term.description)
        .bind(&term.created_at)
        .bind(&term.updated_at)
        .bind(&term.deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_terms(&self, query: &TermQuery) -> Result<(usize, Vec<Term>)> {
        let mut clauses = vec!["deleted_at IS NULL".to_string()];
        let mut args: Vec<String> = Vec::new();

        if !query.ids.is_empty() {
            clauses.push(format!("id IN ({})", placeholders(args.len(), query.ids.len())));
            args.extend(query.ids.iter().cloned());
        }

        if !query.fingerprints.is_empty() {
            clauses.push(format!(
                "fingerprint IN ({})",
                placeholders(args.len(), query.fingerprints.len())
            ));
            args.extend(query.fingerprints.iter().cloned());
        }

        if let Some(ref keyword) = query.keyword {
            let n = args.len() + 1;
            clauses.push(format!(
                "(name ILIKE ${n} OR description ILIKE ${n} OR value ILIKE ${n} OR fingerprint ILIKE ${n})"
            ));
            args.push(format!("%{keyword}%"));
        }

        let sql = format!(
            "SELECT {TERM_COLUMNS} FROM terms WHERE {} ORDER BY value",
            clauses.join(" AND ")
        );

        let mut q = sqlx_core::query::query::<Postgres>(&sql);
        for arg in args {
            q = q.bind(arg);
        }
        let rows = q.fetch_all(&self.pool).await?;
        let terms: Vec<Term> = rows.iter().map(term_from_row).collect();
        Ok((terms.len(), terms))
    }

    async fn get_term_by_id(&self, id: &str) -> Result<Option<Term>> {
        let sql = format!("SELECT {TERM_COLUMNS} FROM terms WHERE id = $1 AND deleted_at IS NULL");
        let row = sqlx_core::query::query(&sql)
            .bind(id.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(term_from_row))
    }

    async fn get_term_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Term>> {
        let sql = format!(
            "SELECT {TERM_COLUMNS} FROM terms WHERE fingerprint = $1 AND deleted_at IS NULL"
        );
        let row = sqlx_core::query::query(&sql)
            .bind(fingerprint.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(term_from_row))
    }

    async fn update_term(&self, id: &str, update: &TermUpdate) -> Result<Option<Term>> {
        let Some(existing) = self.get_term_by_id(id).await? else {
            return Ok(None);
        };

        let (value, fingerprint) = match update.value {
            Some(ref v) => normalize_value(v)?,
            None => (existing.value.clone(), existing.fingerprint.clone()),
        };

        if fingerprint != existing.fingerprint {
            let owner = sqlx_core::query::query(
                "SELECT id, deleted_at IS NOT NULL AS deleted FROM terms WHERE fingerprint = $1",
            )
            .bind(&fingerprint)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = owner {
                let other: String = row.get("id");
                if row.get::<bool, _>("deleted") {
                    anyhow::bail!(
                        "Term \"{value}\" belongs to deleted term {other}; add it again to restore it"
                    );
                }
                anyhow::bail!("Term \"{value}\" already exists (id {other})");
            }
        }

        let sql = format!(
            "UPDATE terms SET
                fingerprint = $2,
                value = $3,
                name = COALESCE($4, name),
                description = COALESCE($5, description),
                updated_at = NOW()
             WHERE id = $1
             RETURNING {TERM_COLUMNS}"
        );
        let row = sqlx_core::query::query(&sql)
            .bind(&existing.id)
            .bind(fingerprint)
            .bind(value)
            .bind(update.name.clone())
            .bind(update.description.clone())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(term_from_row))
    }

    async fn delete_term(&self, id: &str) -> Result<bool> {
        let result = sqlx_core::query::query(
            "UPDATE terms SET deleted_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.trim())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_terms(&self) -> Result<i64> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*)::bigint FROM terms WHERE deleted_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0))
    }
}

/// `$n, $n+1, ...` for `count` parameters following `offset` earlier ones.
fn placeholders(offset: usize, count: usize) -> String {
    (offset + 1..=offset + count)
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ")
}
