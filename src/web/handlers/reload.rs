// POST /api/reload — publish the reload command on the configured channel.
//
// Every coordinator subscribed to the channel (this process, and with the
// redis broker every other process) rebuilds its dictionary from the store.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::reload::publish_reload;
use crate::web::{api_error, AppState};

pub async fn trigger_reload(State(state): State<AppState>) -> Response {
    let settings = &state.config.reload;
    match publish_reload(state.broker.as_ref(), &settings.channel, &settings.command).await {
        Ok(receivers) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "channel": settings.channel,
                "receivers": receivers,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to publish reload command");
            api_error(StatusCode::BAD_GATEWAY, "Failed to publish reload command")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::pubsub::{Reply, Subscriber};
    use crate::web::test_support::{send, test_app};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_reload_publishes_command() {
        let app = test_app(&[]).await;
        let Subscriber { mut sink, mut stream } =
            crate::pubsub::Broker::subscriber(&app.broker).await.unwrap();
        sink.subscribe(&["dictionary_up".to_string()]).await.unwrap();
        stream.next_reply().await.unwrap();

        let (status, body) = send(&app, "POST", "/api/reload", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["receivers"], 1);
        assert_eq!(
            stream.next_reply().await.unwrap(),
            Some(Reply::Message {
                channel: "dictionary_up".into(),
                payload: "up".into()
            })
        );
    }
}
