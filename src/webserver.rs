use crate::webhooks::dispatch::WebhookDispatcher;
use crate::webhooks::events::ActionPayload;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<WebhookDispatcher>,
}

pub fn router(dispatcher: Arc<WebhookDispatcher>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/{member_id}", post(handle_event).head(verify_callback))
        .with_state(AppState { dispatcher })
}

/// Listens for Trello callbacks on `port` until the process exits.
pub async fn serve(port: u16, dispatcher: Arc<WebhookDispatcher>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Trello webhook server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(dispatcher)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// Trello checks the callback with HEAD before accepting a new webhook.
async fn verify_callback(Path(member_id): Path<String>) -> StatusCode {
    debug!("Callback verification for member {}", member_id);
    StatusCode::OK
}

async fn handle_event(
    State(state): State<AppState>,
    Path(member_id): Path<String>,
    body: Bytes,
) -> StatusCode {
    let payload: ActionPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Rejected malformed callback for member {}: {}", member_id, e);
            return StatusCode::BAD_REQUEST;
        }
    };

    match state.dispatcher.handle(&member_id, &payload).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            error!("Failed to dispatch callback for member {}: {}", member_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{in_memory, sample_webhook};
    use crate::locale::Locales;
    use crate::webhooks::dispatch::testing::RecordingSink;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<RecordingSink>) {
        let db = in_memory();
        db.insert_webhook(&sample_webhook("g1", "b1", "tw1")).unwrap();
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = WebhookDispatcher::new(
            db,
            Arc::new(Locales::embedded().unwrap()),
            sink.clone(),
        );
        (router(Arc::new(dispatcher)), sink)
    }

    fn request(method: Method, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri("/m1")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_head_verifies_callback() {
        let (app, _) = app();
        let response = app.oneshot(request(Method::HEAD, "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_dispatches_event() {
        let (app, sink) = app();
        let body = r#"{
            "model": { "id": "b1" },
            "action": {
                "type": "createList",
                "data": { "board": { "id": "b1" }, "list": { "id": "l1", "name": "Todo" } }
            }
        }"#;
        let response = app.oneshot(request(Method::POST, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let (app, sink) = app();
        let response = app
            .oneshot(request(Method::POST, "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(sink.delivered.lock().unwrap().is_empty());
    }
}
