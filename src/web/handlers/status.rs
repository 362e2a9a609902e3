// GET /api/status — returns reload status and live term count.
//
// Combines the coordinator's ReloadStatus (subscribed, reload count, last
// error) with the store's live term count so operators can tell whether the
// in-memory dictionary has caught up with recent edits.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::web::AppState;

pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let reload = state.reload_status.read().await.clone();

    let store_terms = match state.store.count_terms().await {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::error!(error = %e, "DB error counting terms");
            None
        }
    };

    Json(serde_json::json!({
        "subscribed": reload.subscribed,
        "reload_count": reload.reload_count,
        "dictionary_terms": reload.term_count,
        "store_terms": store_terms,
        "last_reload_at": reload.last_reload_at,
        "last_error": reload.last_error,
        "reload_channel": state.config.reload.channel,
        "reload_policy": state.config.reload.policy,
    }))
}

#[cfg(test)]
mod tests {
    use crate::web::test_support::{send, test_app};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_status_reports_counts() {
        let app = test_app(&["spam", "scam"]).await;
        {
            let mut status = app.state.reload_status.write().await;
            status.subscribed = true;
            status.term_count = 2;
        }
        let (status, body) = send(&app, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscribed"], true);
        assert_eq!(body["dictionary_terms"], 2);
        assert_eq!(body["store_terms"], 2);
        assert_eq!(body["reload_policy"], "persistent");
        assert!(body["last_error"].is_null());
    }
}
