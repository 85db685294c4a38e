//! 存储记录：每种实体一个强类型结构，外加部分更新用的 Patch

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Supabase 对空数组/空对象列可能返回 null，统一当作默认值
fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// 会话元数据中保存外部 Agent 会话令牌的键
pub const AGENT_SESSION_KEY: &str = "agent_session_id";

/// 会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    /// 最近一次回复的预览（约 200 字符）
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,
}

impl Session {
    pub fn new(session_id: String, metadata: Map<String, Value>) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            summary: None,
            tags: Vec::new(),
            metadata,
        }
    }

    /// 外部 Agent 返回的可恢复会话令牌
    pub fn agent_session_id(&self) -> Option<&str> {
        self.metadata.get(AGENT_SESSION_KEY).and_then(Value::as_str)
    }
}

/// 会话部分更新：只写入 Some 字段
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.tags.is_none() && self.metadata.is_none()
    }
}

/// 消息角色。除 user / assistant 外的取值原样保存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Other(s) => s,
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::Other(s),
        }
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Role::from(s.to_string())
    }
}

impl From<Role> for String {
    fn from(r: Role) -> Self {
        r.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 对话消息，写入后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// 任务状态：pending → in_progress → {completed, failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Completed | TaskStatus::Failed => 2,
        }
    }

    /// 终态之后不再变化；非终态只能向前（或保持不变）
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 自主任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub goal: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// 仅保存，完成时不会回调
    #[serde(default)]
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 任务部分更新
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.progress.is_none()
            && self.result.is_none()
            && self.error.is_none()
            && self.cost_usd.is_none()
            && self.started_at.is_none()
            && self.completed_at.is_none()
    }
}

/// 内容台账条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentLogEntry {
    pub id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub content_type: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,
    /// 发布后回填的表现数据
    #[serde(default)]
    pub performance: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// 内容查询条件，字段之间为 AND
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    pub since: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    /// 子串匹配（不区分大小写）
    pub text: Option<String>,
}

/// 偏好设置（键唯一）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub key: String,
    pub value: Value,
}

/// 聊天平台用户 → 会话映射
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformUser {
    pub platform: String,
    pub platform_user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// 计数用的表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Sessions,
    ContentLog,
    Tasks,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Sessions => "sessions",
            Table::ContentLog => "content_log",
            Table::Tasks => "tasks",
        }
    }
}

/// 行数统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_sessions: u64,
    pub total_content: u64,
    pub total_tasks: u64,
}
