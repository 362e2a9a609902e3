// Data models — Rust structs that map to term store rows.
//
// These are the types that flow through the application. They're separate
// from the database queries so other modules can use them without depending
// on rusqlite or sqlx directly.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::dictionary::fingerprint::fingerprint;

/// A moderation term as stored in the term store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub id: String,
    /// Content address: MD5 of `value`, lowercase hex.
    pub fingerprint: String,
    pub value: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Soft-delete marker. Deleted terms never come back from queries.
    pub deleted_at: Option<String>,
}

/// Payload for inserting a term.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTerm {
    pub value: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewTerm {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// Trim the value and compute its fingerprint.
    ///
    /// Returns `(value, fingerprint)`. Empty values are rejected — they could
    /// never match a token and would only pollute the dictionary file.
    pub fn normalized(&self) -> Result<(String, String)> {
        normalize_value(&self.value)
    }
}

/// Partial update for an existing term. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TermUpdate {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Filters for `find_terms`. All-empty means the full live set.
///
/// `ids` and `fingerprints` are AND-ed together; `keyword` is a substring
/// match over name, description, value and fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermQuery {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub fingerprints: Vec<String>,
    #[serde(default)]
    pub keyword: Option<String>,
}

impl TermQuery {
    /// Build a query from the comma-separated forms used by the CLI and
    /// HTTP query strings (`ids=a,b&fingerprints=c`).
    pub fn from_lists(ids: Option<&str>, fingerprints: Option<&str>, keyword: Option<&str>) -> Self {
        Self {
            ids: split_list(ids),
            fingerprints: split_list(fingerprints),
            keyword: keyword
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.fingerprints.is_empty() && self.keyword.is_none()
    }
}

/// Trim a term value and fingerprint it, rejecting empty values and values
/// that span more than one line of the dictionary file.
pub fn normalize_value(value: &str) -> Result<(String, String)> {
    let value = value.trim();
    if value.is_empty() {
        anyhow::bail!("Term value must not be empty");
    }
    if value.contains(['\n', '\r']) {
        anyhow::bail!("Term value must not contain line breaks");
    }
    Ok((value.to_string(), fingerprint(value)))
}

fn split_list(list: Option<&str>) -> Vec<String> {
    list.map(|l| {
        l.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lists_splits_and_trims() {
        let q = TermQuery::from_lists(Some(" a, b ,,c"), None, Some("  "));
        assert_eq!(q.ids, vec!["a", "b", "c"]);
        assert!(q.fingerprints.is_empty());
        assert!(q.keyword.is_none());
        assert!(!q.is_empty());
    }

    #[test]
    fn test_default_query_is_empty() {
        assert!(TermQuery::default().is_empty());
        assert!(TermQuery::from_lists(None, Some(""), None).is_empty());
    }

    #[test]
    fn test_normalize_value_trims_and_fingerprints() {
        let (value, fp) = NewTerm::new("  spam \n").normalized().unwrap();
        assert_eq!(value, "spam");
        assert_eq!(fp, "e09f6a7593f8ae3994ea57e1117f67ec");
    }

    #[test]
    fn test_normalize_value_rejects_blank() {
        assert!(normalize_value("   ").is_err());
    }

    #[test]
    fn test_normalize_value_rejects_line_breaks() {
        for value in ["bad\nword", "bad\r\nword", "bad\rword"] {
            let err = normalize_value(value).unwrap_err();
            assert!(err.to_string().contains("line breaks"), "{value:?}");
        }
        // Surrounding newlines are trimmed, not rejected
        assert_eq!(normalize_value("\nspam\n").unwrap().0, "spam");
    }
}
