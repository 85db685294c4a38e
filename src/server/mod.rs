//! HTTP 服务：无状态生成 + 有状态 Agent 端点
//!
//! 存储不可用时以降级模式运行：/、/health、/generate-content 照常，其余端点返回 503。

pub mod error;
pub mod handlers;
pub mod models;

use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::{AgentClient, AgentRuntime, TaskRunner};
use crate::config::AppConfig;
use crate::memory::AgentMemory;
use crate::store::Store;

pub use error::ApiError;

/// 路由共享状态
pub struct AppState {
    pub config: AppConfig,
    pub client: AgentClient,
    pub memory: Option<AgentMemory>,
    pub tasks: Option<TaskRunner>,
}

impl AppState {
    /// store 为 None 时进入降级模式
    pub fn new(config: AppConfig, runtime: Arc<dyn AgentRuntime>, store: Option<Arc<dyn Store>>) -> Self {
        let memory = store.map(AgentMemory::new);
        let client = AgentClient::new(runtime, memory.clone(), config.agent.clone());
        let tasks = memory
            .as_ref()
            .map(|m| TaskRunner::new(client.clone(), m.clone()));
        Self {
            config,
            client,
            memory,
            tasks,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.memory.is_none()
    }
}

/// 构建全部路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/generate-content", post(handlers::generate_content))
        .route("/agent/chat", post(handlers::agent_chat))
        .route("/agent/chat/stream", post(handlers::agent_chat_stream))
        .route("/agent/task", post(handlers::agent_task))
        .route("/agent/status/:task_id", get(handlers::agent_status))
        .route("/agent/tasks", get(handlers::list_tasks))
        .route("/agent/history", get(handlers::agent_history))
        .route("/agent/sessions/:session_id/messages", get(handlers::session_messages))
        .route("/agent/content", get(handlers::list_content))
        .route("/agent/content/:id/performance", patch(handlers::update_performance))
        .route("/agent/preferences", get(handlers::list_preferences))
        .route(
            "/agent/preferences/:key",
            get(handlers::get_preference).put(handlers::put_preference),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::agent::ScriptedRuntime;
    use crate::store::SqliteStore;

    async fn app(runtime: ScriptedRuntime, with_store: bool) -> Router {
        let store: Option<Arc<dyn Store>> = if with_store {
            Some(Arc::new(SqliteStore::in_memory().await.unwrap()))
        } else {
            None
        };
        let mut config = AppConfig::default();
        config.agent.skills_dir = std::env::temp_dir().join("quill-no-skills");
        router(Arc::new(AppState::new(config, Arc::new(runtime), store)))
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_degraded_mode_keeps_stateless_endpoints() {
        let app = app(ScriptedRuntime::reply("Draft", 0.01), false).await;

        let (status, body) = call(app.clone(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database_connected"], json!(false));
        assert_eq!(body["agent_ready"], json!(false));
        assert_eq!(body["skills_loaded"], json!([]));

        let (status, body) = call(
            app.clone(),
            "POST",
            "/generate-content",
            Some(json!({"prompt": "Write a post"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"], json!("Draft"));
        assert_eq!(body["metadata"]["content_type"], json!("general"));

        let (status, body) = call(app, "POST", "/agent/chat", Some(json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["detail"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_validation_happens_before_side_effects() {
        let runtime = ScriptedRuntime::reply("x", 0.0);
        let app = app(runtime, true).await;
        let (status, body) = call(app.clone(), "POST", "/agent/chat", Some(json!({"message": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], json!("message is required"));

        let (status, _) = call(
            app.clone(),
            "POST",
            "/agent/task",
            Some(json!({"goal": "g", "webhook_url": "not a url"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = call(app, "GET", "/agent/history", None).await;
        assert_eq!(body["stats"]["total_sessions"], json!(0));
        assert_eq!(body["stats"]["total_tasks"], json!(0));
    }

    #[tokio::test]
    async fn test_malformed_body_is_400_with_detail() {
        let app = app(ScriptedRuntime::reply("x", 0.0), true).await;
        let (status, body) = call(app.clone(), "POST", "/agent/chat", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("missing field `message`"));

        let (status, body) = call(
            app.clone(),
            "POST",
            "/agent/task",
            Some(json!({"goal": "g", "max_turns": "many"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());

        let req = Request::builder()
            .method("POST")
            .uri("/generate-content")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["detail"].is_string());

        let (_, body) = call(app, "GET", "/agent/history", None).await;
        assert_eq!(body["stats"]["total_sessions"], json!(0));
    }

    #[tokio::test]
    async fn test_unknown_task_is_404() {
        let app = app(ScriptedRuntime::reply("x", 0.0), true).await;
        let (status, body) = call(app, "GET", "/agent/status/task-000000000000", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], json!("Task task-000000000000 not found"));
    }

    #[tokio::test]
    async fn test_generate_without_text_is_500() {
        let runtime = ScriptedRuntime::new(vec![Ok(crate::agent::AgentEvent::Result(
            Default::default(),
        ))]);
        let app = app(runtime, false).await;
        let (status, body) = call(app, "POST", "/generate-content", Some(json!({"prompt": "p"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["detail"],
            json!("No content generated. Check that skills are properly loaded.")
        );
    }

    #[tokio::test]
    async fn test_preferences_roundtrip() {
        let app = app(ScriptedRuntime::reply("x", 0.0), true).await;
        let (status, _) = call(
            app.clone(),
            "PUT",
            "/agent/preferences/tone",
            Some(json!({"value": {"style": "bold"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(app.clone(), "GET", "/agent/preferences/tone", None).await;
        assert_eq!(body, json!({"key": "tone", "value": {"style": "bold"}}));

        let (status, _) = call(app.clone(), "GET", "/agent/preferences/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(app, "GET", "/agent/preferences", None).await;
        assert_eq!(body, json!({"tone": {"style": "bold"}}));
    }
}
