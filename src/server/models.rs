//! 请求 / 响应结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{ContentMetadata, TurnMetadata};
use crate::core::preview;
use crate::store::{ContentLogEntry, Session, Stats, Task, TaskStatus};

fn default_content_type() -> String {
    "general".to_string()
}

// ---------- 请求 ----------

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    pub goal: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub additional_context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PreferenceBody {
    pub value: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TasksQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContentQuery {
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    pub q: Option<String>,
    pub days: Option<i64>,
    pub limit: Option<usize>,
}

// ---------- 响应 ----------

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub session_id: String,
    pub metadata: TurnMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub session_id: String,
    pub status: TaskStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cost_usd: Option<f64>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

impl From<Task> for TaskStatusResponse {
    fn from(t: Task) -> Self {
        Self {
            task_id: t.task_id,
            status: t.status,
            progress: t.progress,
            started_at: t.started_at,
            completed_at: t.completed_at,
            cost_usd: t.cost_usd,
            error: t.error,
            result: t.result,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
}

impl From<Session> for SessionSummary {
    fn from(s: Session) -> Self {
        Self {
            session_id: s.session_id,
            created_at: s.created_at,
            summary: s.summary,
            tags: s.tags,
        }
    }
}

/// 内容摘要，正文只保留前 100 字符
#[derive(Debug, Serialize, Deserialize)]
pub struct ContentSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub content_type: String,
    pub platform: Option<String>,
    pub title: Option<String>,
    pub preview: String,
}

impl From<ContentLogEntry> for ContentSummary {
    fn from(c: ContentLogEntry) -> Self {
        Self {
            preview: preview(&c.content, 100),
            id: c.id,
            created_at: c.created_at,
            content_type: c.content_type,
            platform: c.platform,
            title: c.title,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub sessions: Vec<SessionSummary>,
    pub content: Vec<ContentSummary>,
    pub stats: Stats,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub content: String,
    pub metadata: ContentMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub skills_loaded: Vec<String>,
    pub skills_directory: String,
    pub database_connected: bool,
    pub agent_ready: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreferenceResponse {
    pub key: String,
    pub value: Value,
}
