// Database queries — CRUD operations for the terms table.
//
// Every SQLite interaction goes through this module. This keeps SQL
// contained in one place and gives the rest of the app clean Rust interfaces.

use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::models::{normalize_value, NewTerm, Term, TermQuery, TermUpdate};

const TERM_COLUMNS: &str =
    "id, fingerprint, value, name, description, created_at, updated_at, deleted_at";

fn term_from_row(row: &Row<'_>) -> rusqlite::Result<Term> {
    Ok(Term {
        id: row.get(0)?,
        fingerprint: row.get(1)?,
        value: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        deleted_at: row.get(7)?,
    })
}

/// Insert a term, collapsing onto an existing row with the same fingerprint.
///
/// Re-inserting a value that was soft-deleted restores it. Name and
/// description are only overwritten when the new payload carries them.
pub fn insert_term(conn: &Connection, term: &NewTerm) -> Result<Term> {
    let (value, fingerprint) = term.normalized()?;
    conn.execute(
        "INSERT INTO terms (id, fingerprint, value, name, description)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(fingerprint) DO UPDATE SET
            name = COALESCE(excluded.name, terms.name),
            description = COALESCE(excluded.description, terms.description),
            updated_at = datetime('now'),
            deleted_at = NULL",
        params![
            Uuid::new_v4().to_string(),
            fingerprint,
            value,
            term.name,
            term.description,
        ],
    )?;

    get_term_by_fingerprint(conn, &fingerprint)?
        .with_context(|| format!("Term {fingerprint} vanished right after insert"))
}

/// Copy a term verbatim (id and timestamps included). Used by `migrate`.
pub fn import_term(conn: &Connection, term: &Term) -> Result<()> {
    conn.execute(
        "INSERT INTO terms (id, fingerprint, value, name, description, created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(fingerprint) DO NOTHING",
        params![
            term.id,
            term.fingerprint,
            term.value,
            term.name,
            term.description,
            term.created_at,
            term.updated_at,
            term.deleted_at,
        ],
    )?;
    Ok(())
}

/// Query live terms. Returns `(count, terms)`; an empty query returns the
/// full live set ordered by value.
pub fn find_terms(conn: &Connection, query: &TermQuery) -> Result<(usize, Vec<Term>)> {
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
            "(name LIKE ?{n} OR description LIKE ?{n} OR value LIKE ?{n} OR fingerprint LIKE ?{n})"
        ));
        args.push(format!("%{keyword}%"));
    }

    let sql = format!(
        "SELECT {TERM_COLUMNS} FROM terms WHERE {} ORDER BY value",
        clauses.join(" AND ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), term_from_row)?;

    let mut terms = Vec::new();
    for row in rows {
        terms.push(row?);
    }
    Ok((terms.len(), terms))
}

/// Look up a live term by id.
pub fn get_term_by_id(conn: &Connection, id: &str) -> Result<Option<Term>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TERM_COLUMNS} FROM terms WHERE id = ?1 AND deleted_at IS NULL"
    ))?;
    let result = stmt.query_row(params![id.trim()], term_from_row).optional()?;
    Ok(result)
}

/// Look up a live term by fingerprint.
pub fn get_term_by_fingerprint(conn: &Connection, fingerprint: &str) -> Result<Option<Term>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TERM_COLUMNS} FROM terms WHERE fingerprint = ?1 AND deleted_at IS NULL"
    ))?;
    let result = stmt
        .query_row(params![fingerprint.trim()], term_from_row)
        .optional()?;
    Ok(result)
}

/// Apply a partial update. Returns `None` when no live term has this id.
///
/// Changing the value moves the term to a new fingerprint; that fails if any
/// other row (live or soft-deleted) already owns the new fingerprint.
pub fn update_term(conn: &Connection, id: &str, update: &TermUpdate) -> Result<Option<Term>> {
    let Some(existing) = get_term_by_id(conn, id)? else {
        return Ok(None);
    };

    let (value, fingerprint) = match update.value {
        Some(ref v) => normalize_value(v)?,
        None => (existing.value.clone(), existing.fingerprint.clone()),
    };

    if fingerprint != existing.fingerprint {
        let owner: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT id, deleted_at FROM terms WHERE fingerprint = ?1",
                params![fingerprint],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match owner {
            Some((other, None)) => {
                anyhow::bail!("Term \"{value}\" already exists (id {other})")
            }
            Some((other, Some(_))) => anyhow::bail!(
                "Term \"{value}\" belongs to deleted term {other}; add it again to restore it"
            ),
            None => {}
        }
    }

    conn.execute(
        "UPDATE terms SET
            fingerprint = ?2,
            value = ?3,
            name = COALESCE(?4, name),
            description = COALESCE(?5, description),
            updated_at = datetime('now')
         WHERE id = ?1",
        params![
            existing.id,
            fingerprint,
            value,
            update.name,
            update.description,
        ],
    )?;

    get_term_by_id(conn, &existing.id)
}

/// Soft-delete a term. Returns whether a live term was deleted.
pub fn delete_term(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE terms SET deleted_at = datetime('now'), updated_at = datetime('now')
         WHERE id = ?1 AND deleted_at IS NULL",
        params![id.trim()],
    )?;
    Ok(changed > 0)
}

/// Number of live terms.
pub fn count_terms(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM terms WHERE deleted_at IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// `?n, ?n+1, ...` for `count` parameters following `offset` earlier ones.
fn placeholders(offset: usize, count: usize) -> String {
    (offset + 1..=offset + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_tables;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    fn named(value: &str, name: &str) -> NewTerm {
        NewTerm {
            value: value.to_string(),
            name: Some(name.to_string()),
            description: None,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let conn = test_conn();
        let term = insert_term(&conn, &named("spam", "junk")).unwrap();
        assert_eq!(term.value, "spam");
        assert_eq!(term.fingerprint, "e09f6a7593f8ae3994ea57e1117f67ec");
        assert_eq!(term.name.as_deref(), Some("junk"));
        assert!(term.deleted_at.is_none());

        let by_id = get_term_by_id(&conn, &term.id).unwrap().unwrap();
        assert_eq!(by_id, term);
        let by_fp = get_term_by_fingerprint(&conn, &term.fingerprint).unwrap().unwrap();
        assert_eq!(by_fp.id, term.id);
    }

    #[test]
    fn test_line_breaks_rejected_on_insert_and_update() {
        let conn = test_conn();
        assert!(insert_term(&conn, &NewTerm::new("bad\nword")).is_err());
        assert_eq!(count_terms(&conn).unwrap(), 0);

        let term = insert_term(&conn, &NewTerm::new("spam")).unwrap();
        let update = TermUpdate {
            value: Some("spam\rham".to_string()),
            ..Default::default()
        };
        let err = update_term(&conn, &term.id, &update).unwrap_err();
        assert!(err.to_string().contains("line breaks"));
        assert_eq!(get_term_by_id(&conn, &term.id).unwrap().unwrap().value, "spam");
    }

    #[test]
    fn test_duplicate_values_collapse() {
        let conn = test_conn();
        let first = insert_term(&conn, &named("spam", "first")).unwrap();
        let second = insert_term(&conn, &NewTerm::new(" spam ")).unwrap();
        assert_eq!(first.id, second.id);
        // A payload without a name keeps the existing one
        assert_eq!(second.name.as_deref(), Some("first"));
        assert_eq!(count_terms(&conn).unwrap(), 1);
    }

    #[test]
    fn test_reinsert_restores_soft_deleted() {
        let conn = test_conn();
        let term = insert_term(&conn, &NewTerm::new("spam")).unwrap();
        assert!(delete_term(&conn, &term.id).unwrap());
        assert!(get_term_by_id(&conn, &term.id).unwrap().is_none());

        let restored = insert_term(&conn, &NewTerm::new("spam")).unwrap();
        assert_eq!(restored.id, term.id);
        assert!(restored.deleted_at.is_none());
    }

    #[test]
    fn test_delete_is_soft_and_idempotent() {
        let conn = test_conn();
        let term = insert_term(&conn, &NewTerm::new("spam")).unwrap();
        assert!(delete_term(&conn, &term.id).unwrap());
        assert!(!delete_term(&conn, &term.id).unwrap());

        let (count, terms) = find_terms(&conn, &TermQuery::default()).unwrap();
        assert_eq!(count, 0);
        assert!(terms.is_empty());

        // The row itself is kept for history
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM terms", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_find_terms_filters() {
        let conn = test_conn();
        let spam = insert_term(&conn, &named("spam", "junk mail")).unwrap();
        let scam = insert_term(&conn, &named("scam", "fraud")).unwrap();
        let _eggs = insert_term(&conn, &NewTerm::new("eggs")).unwrap();

        let (count, all) = find_terms(&conn, &TermQuery::default()).unwrap();
        assert_eq!(count, 3);
        let values: Vec<&str> = all.iter().map(|t| t.value.as_str()).collect();
        assert_eq!(values, vec!["eggs", "scam", "spam"]);

        let by_ids = TermQuery {
            ids: vec![spam.id.clone(), scam.id.clone()],
            ..Default::default()
        };
        assert_eq!(find_terms(&conn, &by_ids).unwrap().0, 2);

        let by_ids_and_fp = TermQuery {
            ids: vec![spam.id.clone(), scam.id.clone()],
            fingerprints: vec![scam.fingerprint.clone()],
            keyword: None,
        };
        let (count, terms) = find_terms(&conn, &by_ids_and_fp).unwrap();
        assert_eq!(count, 1);
        assert_eq!(terms[0].value, "scam");

        let by_keyword = TermQuery::from_lists(None, None, Some("fraud"));
        let (_, terms) = find_terms(&conn, &by_keyword).unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].id, scam.id);

        let by_value_keyword = TermQuery::from_lists(None, None, Some("am"));
        assert_eq!(find_terms(&conn, &by_value_keyword).unwrap().0, 2);
    }

    #[test]
    fn test_update_value_moves_fingerprint() {
        let conn = test_conn();
        let term = insert_term(&conn, &named("spam", "junk")).unwrap();
        let update = TermUpdate {
            value: Some("spams".to_string()),
            ..Default::default()
        };
        let updated = update_term(&conn, &term.id, &update).unwrap().unwrap();
        assert_eq!(updated.id, term.id);
        assert_eq!(updated.value, "spams");
        assert_ne!(updated.fingerprint, term.fingerprint);
        assert_eq!(updated.name.as_deref(), Some("junk"));
    }

    #[test]
    fn test_update_rejects_fingerprint_collision() {
        let conn = test_conn();
        let spam = insert_term(&conn, &NewTerm::new("spam")).unwrap();
        insert_term(&conn, &NewTerm::new("scam")).unwrap();
        let update = TermUpdate {
            value: Some("scam".to_string()),
            ..Default::default()
        };
        let err = update_term(&conn, &spam.id, &update).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_update_missing_returns_none() {
        let conn = test_conn();
        let result = update_term(&conn, "nope", &TermUpdate::default()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_import_term_preserves_id() {
        let conn = test_conn();
        let term = Term {
            id: "fixed-id".to_string(),
            fingerprint: crate::dictionary::fingerprint::fingerprint("spam"),
            value: "spam".to_string(),
            name: None,
            description: Some("imported".to_string()),
            created_at: "2024-01-01 00:00:00".to_string(),
            updated_at: "2024-01-02 00:00:00".to_string(),
            deleted_at: None,
        };
        import_term(&conn, &term).unwrap();
        import_term(&conn, &term).unwrap();
        let loaded = get_term_by_id(&conn, "fixed-id").unwrap().unwrap();
        assert_eq!(loaded, term);
    }
}
