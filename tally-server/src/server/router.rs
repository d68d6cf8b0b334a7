use super::handlers::{self, AppState};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Usage statistics
        .route("/v0/usage", get(handlers::usage_snapshot))
        .route("/v0/usage/records", post(handlers::record_usage))
        // Local management
        .route("/keep-alive", get(handlers::keep_alive))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::keepalive::KeepAlive;
    use crate::usage::RequestStatistics;
    use std::sync::Arc;
    use std::time::Duration;

    async fn spawn_app(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_health_check() {
        let base = spawn_app(AppState::new(Arc::new(RequestStatistics::new()))).await;

        let body: serde_json::Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "tally");
    }

    #[tokio::test]
    async fn test_record_then_snapshot() {
        let stats = Arc::new(RequestStatistics::new());
        let base = spawn_app(AppState::new(stats.clone())).await;
        let client = reqwest::Client::new();

        let res = client
            .post(format!("{}/v0/usage/records", base))
            .json(&serde_json::json!({
                "api": "key-a",
                "model": "gpt-x",
                "tokens": { "input_tokens": 12, "output_tokens": 8 }
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::ACCEPTED);

        let body: serde_json::Value = client
            .get(format!("{}/v0/usage", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["total_requests"], 1);
        assert_eq!(body["total_tokens"], 20);
        assert_eq!(stats.snapshot().apis["key-a"].total_requests, 1);
    }

    #[tokio::test]
    async fn test_keep_alive_disabled_is_not_found() {
        let base = spawn_app(AppState::new(Arc::new(RequestStatistics::new()))).await;

        let res = reqwest::get(format!("{}/keep-alive", base)).await.unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_keep_alive_requires_password() {
        let mut state = AppState::new(Arc::new(RequestStatistics::new()));
        state.keep_alive = Some(Arc::new(KeepAlive::new(Duration::from_secs(10), "pw")));
        let base = spawn_app(state).await;
        let client = reqwest::Client::new();

        let res = client
            .get(format!("{}/keep-alive", base))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::UNAUTHORIZED);

        let res = client
            .get(format!("{}/keep-alive", base))
            .bearer_auth("pw")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::OK);
    }
}
