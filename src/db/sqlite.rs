// SqliteTermStore — rusqlite backend implementing the TermStore trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{NewTerm, Term, TermQuery, TermUpdate};
use super::traits::TermStore;

pub struct SqliteTermStore {
    conn: Mutex<Connection>,
}

impl SqliteTermStore {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// An in-memory store with the schema applied. Handy for tests and demos.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::create_tables(&conn)?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl TermStore for SqliteTermStore {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn insert_term(&self, term: &NewTerm) -> Result<Term> {
        let conn = self.conn.lock().await;
        super::queries::insert_term(&conn, term)
    }

    async fn import_term(&self, term: &Term) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::import_term(&conn, term)
    }

    async fn find_terms(&self, query: &TermQuery) -> Result<(usize, Vec<Term>)> {
        let conn = self.conn.lock().await;
        super::queries::find_terms(&conn, query)
    }

    async fn get_term_by_id(&self, id: &str) -> Result<Option<Term>> {
        let conn = self.conn.lock().await;
        super::queries::get_term_by_id(&conn, id)
    }

    async fn get_term_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Term>> {
        let conn = self.conn.lock().await;
        super::queries::get_term_by_fingerprint(&conn, fingerprint)
    }

    async fn update_term(&self, id: &str, update: &TermUpdate) -> Result<Option<Term>> {
        let conn = self.conn.lock().await;
        super::queries::update_term(&conn, id, update)
    }

    async fn delete_term(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        super::queries::delete_term(&conn, id)
    }

    async fn count_terms(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::queries::count_terms(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trait_insert_and_find() {
        let store = SqliteTermStore::in_memory().unwrap();
        store.insert_term(&NewTerm::new("spam")).await.unwrap();
        store.insert_term(&NewTerm::new("spam")).await.unwrap();
        store.insert_term(&NewTerm::new("scam")).await.unwrap();

        let (count, terms) = store.find_terms(&TermQuery::default()).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(terms.len(), 2);
        assert_eq!(store.count_terms().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_trait_update_and_delete() {
        let store = SqliteTermStore::in_memory().unwrap();
        let term = store.insert_term(&NewTerm::new("spam")).await.unwrap();

        let update = TermUpdate {
            description: Some("unsolicited".to_string()),
            ..Default::default()
        };
        let updated = store.update_term(&term.id, &update).await.unwrap().unwrap();
        assert_eq!(updated.description.as_deref(), Some("unsolicited"));
        assert_eq!(updated.fingerprint, term.fingerprint);

        assert!(store.delete_term(&term.id).await.unwrap());
        assert!(store
            .get_term_by_fingerprint(&term.fingerprint)
            .await
            .unwrap()
            .is_none());
        assert!(store.update_term(&term.id, &update).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trait_table_count() {
        let store = SqliteTermStore::in_memory().unwrap();
        assert_eq!(store.table_count().await.unwrap(), 2);
    }
}
