// Term CRUD handlers.
//
// GET    /api/terms        — list live terms, optional ?ids=, ?fingerprints=, ?q=
// POST   /api/terms        — add a term (re-adding a deleted value restores it)
// GET    /api/terms/{id}   — single term
// PUT    /api/terms/{id}   — partial update
// DELETE /api/terms/{id}   — soft delete
//
// Edits only touch the store. Filtering picks them up after POST /api/reload.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::db::models::{normalize_value, NewTerm, TermQuery, TermUpdate};
use crate::web::{api_error, AppState};

#[derive(Deserialize, Default)]
pub struct TermsQuery {
    /// Comma-separated term ids
    pub ids: Option<String>,
    /// Comma-separated fingerprints
    pub fingerprints: Option<String>,
    /// Substring search over value, name, description and fingerprint
    pub q: Option<String>,
}

pub async fn list_terms(
    State(state): State<AppState>,
    Query(params): Query<TermsQuery>,
) -> Response {
    let query = TermQuery::from_lists(
        params.ids.as_deref(),
        params.fingerprints.as_deref(),
        params.q.as_deref(),
    );
    match state.store.find_terms(&query).await {
        Ok((total, terms)) => Json(serde_json::json!({
            "terms": terms,
            "total": total,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "DB error listing terms");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list terms")
        }
    }
}

pub async fn create_term(
    State(state): State<AppState>,
    Json(body): Json<NewTerm>,
) -> Response {
    if let Err(e) = normalize_value(&body.value) {
        return api_error(StatusCode::BAD_REQUEST, &e.to_string());
    }
    match state.store.insert_term(&body).await {
        Ok(term) => (StatusCode::CREATED, Json(term)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "DB error inserting term");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to add term")
        }
    }
}

pub async fn get_term(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_term_by_id(&id).await {
        Ok(Some(term)) => Json(term).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "Term not found"),
        Err(e) => {
            tracing::error!(error = %e, id = %id, "DB error fetching term");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch term")
        }
    }
}

pub async fn update_term(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TermUpdate>,
) -> Response {
    if let Some(Err(e)) = body.value.as_deref().map(normalize_value) {
        return api_error(StatusCode::BAD_REQUEST, &e.to_string());
    }
    match state.store.update_term(&id, &body).await {
        Ok(Some(term)) => Json(term).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "Term not found"),
        Err(e) => {
            let message = e.to_string();
            // New value collides with another term's fingerprint
            if message.contains("already exists") || message.contains("deleted term") {
                return api_error(StatusCode::CONFLICT, &message);
            }
            tracing::error!(error = %e, id = %id, "DB error updating term");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update term")
        }
    }
}

pub async fn delete_term(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.delete_term(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "Term not found"),
        Err(e) => {
            tracing::error!(error = %e, id = %id, "DB error deleting term");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete term")
        }
    }
}
