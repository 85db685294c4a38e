//! 路由处理函数：只做校验与转发

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::{stream, Stream};
use serde_json::{json, Map, Value};

use super::error::{ApiError, ApiJson};
use super::models::*;
use super::AppState;
use crate::agent::prompts::list_skills;
use crate::agent::{ChatEvent, ContentRequest, TaskRunner, TaskSpec};
use crate::memory::AgentMemory;
use crate::store::{ContentFilter, Message, TaskStatus};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 500;
/// /agent/history 中内容的时间窗口
const HISTORY_DAYS: i64 = 90;

fn limit_or(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}

fn require_text(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", field)));
    }
    Ok(())
}

fn memory(state: &AppState) -> Result<&AgentMemory, ApiError> {
    state
        .memory
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Memory not initialized".into()))
}

fn task_runner(state: &AppState) -> Result<&TaskRunner, ApiError> {
    state
        .tasks
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Agent not initialized. Check database connection.".into()))
}

/// GET /：服务信息
pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "Quill Marketing Agent",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "stateless": {
                "health": "GET /health",
                "generate": "POST /generate-content"
            },
            "stateful": {
                "chat": "POST /agent/chat",
                "chat_stream": "POST /agent/chat/stream",
                "task": "POST /agent/task",
                "status": "GET /agent/status/{task_id}",
                "tasks": "GET /agent/tasks",
                "history": "GET /agent/history",
                "messages": "GET /agent/sessions/{session_id}/messages",
                "content": "GET /agent/content",
                "performance": "PATCH /agent/content/{id}/performance",
                "preferences": "GET /agent/preferences, GET|PUT /agent/preferences/{key}"
            }
        }
    }))
}

/// GET /health：技能目录与存储连通性
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let skills_path = state.config.agent.skills_path();
    let skills_loaded = list_skills(&skills_path);
    let database_connected = match &state.memory {
        Some(memory) => memory.get_stats().await.is_ok(),
        None => false,
    };
    Json(HealthResponse {
        status: "ok".into(),
        skills_loaded,
        skills_directory: skills_path.display().to_string(),
        database_connected,
        agent_ready: state.memory.is_some(),
    })
}

/// POST /generate-content：无状态生成
pub async fn generate_content(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    require_text(&req.prompt, "prompt")?;
    let generated = state
        .client
        .generate_content(&ContentRequest {
            prompt: req.prompt,
            content_type: req.content_type,
            additional_context: req.additional_context,
        })
        .await?;
    Ok(Json(GenerateResponse {
        content: generated.content,
        metadata: generated.metadata,
    }))
}

/// POST /agent/chat
pub async fn agent_chat(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    require_text(&req.message, "message")?;
    memory(&state)?;
    let reply = state
        .client
        .chat_sync(&req.message, req.session_id.as_deref())
        .await?;
    if let Some(error) = reply.error {
        return Err(ApiError::Internal(error));
    }
    Ok(Json(ChatResponse {
        content: reply.content,
        session_id: reply.session_id,
        metadata: reply.metadata,
    }))
}

/// POST /agent/chat/stream：SSE，事件名为 text / result / error
pub async fn agent_chat_stream(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    require_text(&req.message, "message")?;
    memory(&state)?;
    let (_session_id, rx) = state
        .client
        .chat_stream(&req.message, req.session_id.as_deref())
        .await?;

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let name = match &event {
            ChatEvent::Text { .. } => "text",
            ChatEvent::Result { .. } => "result",
            ChatEvent::Error { .. } => "error",
        };
        let sse = Event::default()
            .event(name)
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().event(name));
        Some((Ok(sse), rx))
    });
    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// POST /agent/task：同步跑完一轮
pub async fn agent_task(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<TaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    require_text(&req.goal, "goal")?;
    if let Some(hook) = req.webhook_url.as_deref() {
        let parsed = url::Url::parse(hook)
            .map_err(|e| ApiError::BadRequest(format!("webhook_url is not a valid URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::BadRequest("webhook_url must be http or https".into()));
        }
    }
    let runner = task_runner(&state)?;
    let outcome = runner
        .run(
            &TaskSpec {
                goal: req.goal,
                webhook_url: req.webhook_url,
                max_turns: req.max_turns,
                max_budget_usd: req.max_budget_usd,
            },
            None,
        )
        .await
        .map_err(|e| ApiError::Internal(format!("Task creation failed: {}", e)))?;
    Ok(Json(TaskResponse {
        message: format!("Task {}", outcome.status),
        task_id: outcome.task_id,
        session_id: outcome.session_id,
        status: outcome.status,
    }))
}

/// GET /agent/status/:task_id
pub async fn agent_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let task = memory(&state)?
        .get_task(&task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", task_id)))?;
    Ok(Json(task.into()))
}

/// GET /agent/tasks?status=&limit=
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TasksQuery>,
) -> Result<Json<Vec<TaskStatusResponse>>, ApiError> {
    let status = match q.status.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => Some(
            TaskStatus::parse(s).ok_or_else(|| ApiError::BadRequest(format!("unknown status {}", s)))?,
        ),
        None => None,
    };
    let tasks = memory(&state)?
        .list_tasks(status, limit_or(q.limit, DEFAULT_LIMIT))
        .await?;
    Ok(Json(tasks.into_iter().map(Into::into).collect()))
}

/// GET /agent/history?limit=
pub async fn agent_history(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let memory = memory(&state)?;
    let limit = limit_or(q.limit, DEFAULT_LIMIT);
    let sessions = memory.list_sessions(limit).await?;
    let content = memory.get_recent_content(HISTORY_DAYS, limit).await?;
    let stats = memory.get_stats().await?;
    Ok(Json(HistoryResponse {
        sessions: sessions.into_iter().map(Into::into).collect(),
        content: content.into_iter().map(Into::into).collect(),
        stats,
    }))
}

/// GET /agent/sessions/:id/messages?limit=
pub async fn session_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let memory = memory(&state)?;
    if memory.get_session(&session_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Session {} not found", session_id)));
    }
    let messages = memory
        .get_messages(&session_id, limit_or(q.limit, 50))
        .await?;
    Ok(Json(messages))
}

/// GET /agent/content?type=&q=&days=&limit=
pub async fn list_content(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ContentQuery>,
) -> Result<Json<Vec<crate::store::ContentLogEntry>>, ApiError> {
    let filter = ContentFilter {
        since: q.days.map(|d| chrono::Utc::now() - chrono::Duration::days(d)),
        content_type: q.content_type.filter(|s| !s.is_empty()),
        text: q.q.filter(|s| !s.is_empty()),
    };
    let entries = memory(&state)?
        .query_content(&filter, limit_or(q.limit, DEFAULT_LIMIT))
        .await?;
    Ok(Json(entries))
}

/// PATCH /agent/content/:id/performance，请求体为任意 JSON 对象
pub async fn update_performance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(performance): ApiJson<Value>,
) -> Result<StatusCode, ApiError> {
    if !performance.is_object() {
        return Err(ApiError::BadRequest("performance must be a JSON object".into()));
    }
    memory(&state)?
        .update_content_performance(&id, &performance)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /agent/preferences
pub async fn list_preferences(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Map<String, Value>>, ApiError> {
    Ok(Json(memory(&state)?.get_all_preferences().await?))
}

/// GET /agent/preferences/:key
pub async fn get_preference(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<PreferenceResponse>, ApiError> {
    let value = memory(&state)?
        .get_preference(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Preference {} not found", key)))?;
    Ok(Json(PreferenceResponse { key, value }))
}

/// PUT /agent/preferences/:key
pub async fn put_preference(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    ApiJson(body): ApiJson<PreferenceBody>,
) -> Result<Json<PreferenceResponse>, ApiError> {
    memory(&state)?.set_preference(&key, &body.value).await?;
    Ok(Json(PreferenceResponse {
        key,
        value: body.value,
    }))
}
