// Term store trait — backend-agnostic async interface for term persistence.
//
// Implementors: SqliteTermStore (wraps rusqlite), PgTermStore (wraps sqlx).
// All methods are async so both sync (rusqlite via Mutex) and native async
// (sqlx) backends fit behind a single interface.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{NewTerm, Term, TermQuery, TermUpdate};

#[async_trait]
pub trait TermStore: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Terms ---

    /// Insert a term (or restore/refresh the row with the same fingerprint).
    async fn insert_term(&self, term: &NewTerm) -> Result<Term>;

    /// Copy a term verbatim, keeping id and timestamps. Existing fingerprints are skipped.
    async fn import_term(&self, term: &Term) -> Result<()>;

    /// Query live terms. An empty query returns the full live set.
    async fn find_terms(&self, query: &TermQuery) -> Result<(usize, Vec<Term>)>;

    /// Look up a live term by id.
    async fn get_term_by_id(&self, id: &str) -> Result<Option<Term>>;

    /// Look up a live term by fingerprint.
    async fn get_term_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Term>>;

    /// Apply a partial update; `None` when no live term has this id.
    async fn update_term(&self, id: &str, update: &TermUpdate) -> Result<Option<Term>>;

    /// Soft-delete a term; `false` when no live term has this id.
    async fn delete_term(&self, id: &str) -> Result<bool>;

    /// Number of live terms.
    async fn count_terms(&self) -> Result<i64>;
}
