//! HTTP router for the mqstack server

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use mqstack_sqs::SqsState;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Create the main application router
pub fn create_router(state: Arc<SqsState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/", post(mqstack_sqs::handle_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<SqsState>>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "running",
        "queues": state.list_queues(None).len(),
    });
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::HashMap;
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let state = Arc::new(SqsState::new());
        state.create_queue("one", &HashMap::new()).unwrap();
        let app = create_router(state);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "running");
        assert_eq!(json["queues"], 1);
    }

    #[tokio::test]
    async fn test_queue_operations_routed() {
        let state = Arc::new(SqsState::new());
        let app = create_router(Arc::clone(&state));

        let request = Request::post("/")
            .header("x-mqstack-target", "CreateQueue")
            .body(Body::from(r#"{"queue_name":"routed"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.list_queues(None), vec!["routed"]);
    }

    #[tokio::test]
    async fn test_get_root_not_allowed() {
        let app = create_router(Arc::new(SqsState::new()));
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
