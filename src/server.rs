//! HTTP endpoints: webhook intake, health, and stats.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Duration, Utc};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::pipeline::processor::WebhookProcessor;
use crate::store::Database;

/// Name reported by `/health`.
pub const SERVICE_NAME: &str = "enhanced-webhook-integration";

/// Window covered by `/stats`.
const STATS_WINDOW_HOURS: i64 = 24;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<WebhookProcessor>,
    pub store: Arc<dyn Database>,
}

/// Build the Axum router with the webhook, health, and stats routes.
pub fn webhook_routes(processor: Arc<WebhookProcessor>, store: Arc<dyn Database>) -> Router {
    let state = AppState { processor, store };

    Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

// ── Webhook ─────────────────────────────────────────────────────────────

async fn receive_webhook(State(state): State<AppState>, body: Bytes) -> Response {
    if body.iter().all(u8::is_ascii_whitespace) {
        return bad_request("No JSON data provided");
    }

    let raw: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Rejected webhook with invalid JSON");
            return bad_request(format!("Invalid JSON: {e}"));
        }
    };

    match raw.as_object() {
        Some(obj) if !obj.is_empty() => {}
        _ => return bad_request("No JSON data provided"),
    }

    info!(
        message_id = raw.get("message_id").and_then(|v| v.as_str()).unwrap_or(""),
        "Received webhook"
    );

    let result = state.processor.process_webhook(raw).await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(result)).into_response()
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// ── Stats ───────────────────────────────────────────────────────────────

async fn stats(State(state): State<AppState>) -> Response {
    let since = Utc::now() - Duration::hours(STATS_WINDOW_HOURS);
    match state.store.message_stats(since).await {
        Ok(stats) => Json(serde_json::json!({
            "success": true,
            "stats": stats,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "Error getting stats");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::DateTime;
    use tower::ServiceExt;

    use super::*;
    use crate::error::{DatabaseError, LlmError};
    use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider};
    use crate::pipeline::analysis::AnalysisEngine;
    use crate::pipeline::dispatcher::RoutingDispatcher;
    use crate::pipeline::ids::ClockCounterIds;
    use crate::pipeline::rules::{AgentRegistry, EscalationRules};
    use crate::pipeline::types::{AnalysisResult, HistoryEntry, InboundMessage, MessageStats};
    use crate::store::LibSqlBackend;
    use crate::store::traits::StoredAnalysis;

    struct DownLlm;

    #[async_trait]
    impl LlmProvider for DownLlm {
        fn model_name(&self) -> &str {
            "down"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::RequestFailed {
                provider: "down".into(),
                reason: "offline".into(),
            })
        }
    }

    /// Store whose every call fails.
    struct BrokenStore;

    fn broken() -> DatabaseError {
        DatabaseError::Connection("database unreachable".into())
    }

    #[async_trait]
    impl Database for BrokenStore {
        async fn run_migrations(&self) -> Result<(), DatabaseError> {
            Err(broken())
        }

        async fn insert_message(&self, _message: &InboundMessage) -> Result<i64, DatabaseError> {
            Err(broken())
        }

        async fn get_message(
            &self,
            _message_id: &str,
        ) -> Result<Option<InboundMessage>, DatabaseError> {
            Err(broken())
        }

        async fn message_stats(&self, _since: DateTime<Utc>) -> Result<MessageStats, DatabaseError> {
            Err(broken())
        }

        async fn insert_history(
            &self,
            _message_id: &str,
            _entries: &[HistoryEntry],
        ) -> Result<usize, DatabaseError> {
            Err(broken())
        }

        async fn recent_history(
            &self,
            _phone_number: &str,
            _chat_name: &str,
            _limit: usize,
        ) -> Result<Vec<HistoryEntry>, DatabaseError> {
            Err(broken())
        }

        async fn insert_analysis(
            &self,
            _message_id: &str,
            _analysis: &AnalysisResult,
            _degraded: bool,
        ) -> Result<(), DatabaseError> {
            Err(broken())
        }

        async fn get_analysis(
            &self,
            _message_id: &str,
        ) -> Result<Option<StoredAnalysis>, DatabaseError> {
            Err(broken())
        }
    }

    fn router_with(store: Arc<dyn Database>) -> Router {
        let analyzer = AnalysisEngine::new(
            Arc::new(DownLlm),
            Arc::clone(&store),
            EscalationRules::default_rules(),
        );
        let processor = WebhookProcessor::new(
            Arc::clone(&store),
            analyzer,
            RoutingDispatcher::new(AgentRegistry::empty()),
            Arc::new(ClockCounterIds::new()),
        );
        webhook_routes(Arc::new(processor), store)
    }

    async fn memory_router() -> (Router, Arc<dyn Database>) {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        (router_with(Arc::clone(&store)), store)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_webhook(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_service() {
        let (router, _) = memory_router().await;
        let (status, body) = send(router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], SERVICE_NAME);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn rejects_missing_or_invalid_bodies() {
        for raw in ["", "   ", "not json", "null", "{}", "[1,2]", "\"text\""] {
            let (router, store) = memory_router().await;
            let (status, body) = send(router, post_webhook(raw)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {raw:?}");
            assert!(body["error"].is_string());
            let stats = store.message_stats(Utc::now() - Duration::hours(1)).await.unwrap();
            assert_eq!(stats.total_messages, 0);
        }
    }

    #[tokio::test]
    async fn accepted_webhook_returns_pipeline_result() {
        let (router, store) = memory_router().await;
        let (status, body) = send(
            router,
            post_webhook(r#"{"message_id":"wa-9","current_message":"merhaba"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message_id"], "wa-9");
        assert!(body["database_id"].is_i64());
        assert_eq!(body["analysis"]["category"], "general");
        assert!(body["analysis_degraded"].is_string());
        // No agents registered, so routing fails without failing the run.
        assert_eq!(body["routing"]["success"], false);
        assert!(body["processed_at"].is_string());
        assert!(store.get_message("wa-9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn pipeline_failure_is_500() {
        let router = router_with(Arc::new(BrokenStore));
        let (status, body) = send(router, post_webhook(r#"{"message_id":"m1"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .starts_with("Database save failed")
        );
    }

    #[tokio::test]
    async fn stats_counts_recent_messages() {
        let (router, _) = memory_router().await;
        send(router.clone(), post_webhook(r#"{"message_id":"a"}"#)).await;
        send(router.clone(), post_webhook(r#"{"message_id":"b"}"#)).await;

        let (status, body) = send(router, get("/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["stats"]["total_messages"], 2);
        assert_eq!(body["stats"]["processed_messages"], 0);
        assert_eq!(body["stats"]["pending_messages"], 2);
    }

    #[tokio::test]
    async fn empty_store_reports_zeroed_stats() {
        let (router, _) = memory_router().await;
        let (status, body) = send(router, get("/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["total_messages"], 0);
    }

    #[tokio::test]
    async fn stats_failure_is_500() {
        let router = router_with(Arc::new(BrokenStore));
        let (status, body) = send(router, get("/stats")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }
}
