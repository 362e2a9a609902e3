// POST /api/filter — mask dictionary terms in submitted text.
//
// Accepts either a single `text` or a batch of `texts`; the response mirrors
// whichever was sent. Runs entirely against the in-memory snapshot.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::web::{api_error, AppState};

#[derive(Deserialize)]
pub struct FilterRequest {
    pub text: Option<String>,
    pub texts: Option<Vec<String>>,
}

pub async fn filter_text(
    State(state): State<AppState>,
    Json(body): Json<FilterRequest>,
) -> Response {
    match (body.text, body.texts) {
        (Some(text), None) => {
            let filtered = state.filterer.filter(&text);
            Json(serde_json::json!({
                "text": filtered,
                "masked": filtered != text,
            }))
            .into_response()
        }
        (None, Some(texts)) => {
            let filtered: Vec<String> = texts.iter().map(|t| state.filterer.filter(t)).collect();
            Json(serde_json::json!({ "texts": filtered })).into_response()
        }
        _ => api_error(
            StatusCode::BAD_REQUEST,
            "Send exactly one of \"text\" or \"texts\"",
        ),
    }
}
