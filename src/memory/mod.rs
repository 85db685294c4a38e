//! 记忆网关：会话、消息、任务、内容台账、偏好设置的统一读写入口
//!
//! 不缓存任何状态，每个操作都直接访问存储；可在并发请求之间安全共享。
//! 存储失败统一记录 error 日志后原样返回 `StoreError`，不重试。

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::{preview, StoreError};
use crate::store::{
    ContentFilter, ContentLogEntry, Message, PlatformUser, Role, Session, SessionPatch, Stats,
    Store, Table, Task, TaskPatch, TaskStatus,
};

fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &hex[..12])
}

/// 记录失败的操作名后返回原错误
fn logged<T>(op: &str, result: Result<T, StoreError>) -> Result<T, StoreError> {
    if let Err(e) = &result {
        tracing::error!("Failed to {}: {}", op, e);
    }
    result
}

/// 待写入的内容条目
#[derive(Debug, Clone, Default)]
pub struct NewContent {
    pub content: String,
    pub content_type: String,
    pub session_id: Option<String>,
    pub platform: Option<String>,
    pub title: Option<String>,
    pub metadata: Map<String, Value>,
}

/// 记忆网关
#[derive(Clone)]
pub struct AgentMemory {
    store: Arc<dyn Store>,
}

impl AgentMemory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // ---------- 会话 ----------

    /// 创建会话，返回 `session-xxxxxxxxxxxx`
    pub async fn create_session(&self, metadata: Map<String, Value>) -> Result<String, StoreError> {
        let session = Session::new(short_id("session"), metadata);
        logged("create session", self.store.insert_session(&session).await)?;
        tracing::debug!(session_id = %session.session_id, "session created");
        Ok(session.session_id)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        logged(
            &format!("get session {}", session_id),
            self.store.get_session(session_id).await,
        )
    }

    /// 只写入 patch 中的字段；空 patch 不访问存储
    pub async fn update_session(&self, session_id: &str, patch: SessionPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        logged(
            &format!("update session {}", session_id),
            self.store.update_session(session_id, &patch).await,
        )
    }

    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>, StoreError> {
        logged("list sessions", self.store.list_sessions(limit).await)
    }

    // ---------- 消息 ----------

    /// 追加消息，role 不做校验，原样保存
    pub async fn add_message(
        &self,
        session_id: &str,
        role: impl Into<Role>,
        content: &str,
        metadata: Map<String, Value>,
    ) -> Result<String, StoreError> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role: role.into(),
            content: content.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        logged("add message", self.store.insert_message(&message).await)?;
        Ok(message.id)
    }

    pub async fn get_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        logged(
            &format!("get messages for {}", session_id),
            self.store.list_messages(session_id, limit).await,
        )
    }

    /// 对话记录的文本形式（每条最多 500 字符），仅用于展示
    pub async fn get_conversation_context(&self, session_id: &str, limit: usize) -> Result<String, StoreError> {
        let messages = self.get_messages(session_id, limit).await?;
        if messages.is_empty() {
            return Ok(String::new());
        }
        let mut parts = vec!["Previous conversation:".to_string()];
        for msg in &messages {
            let who = if msg.role == Role::User { "User" } else { "Assistant" };
            parts.push(format!("{}: {}", who, preview(&msg.content, 500)));
        }
        Ok(parts.join("\n\n"))
    }

    // ---------- 内容台账 ----------

    pub async fn log_content(&self, new: NewContent) -> Result<String, StoreError> {
        let entry = ContentLogEntry {
            id: Uuid::new_v4().to_string(),
            session_id: new.session_id,
            content_type: new.content_type,
            platform: new.platform,
            title: new.title,
            content: new.content,
            metadata: new.metadata,
            performance: None,
            created_at: Utc::now(),
        };
        logged("log content", self.store.insert_content(&entry).await)?;
        Ok(entry.id)
    }

    /// 最近 days 天内的内容，新的在前
    pub async fn get_recent_content(&self, days: i64, limit: usize) -> Result<Vec<ContentLogEntry>, StoreError> {
        let filter = ContentFilter {
            since: Some(Utc::now() - Duration::days(days)),
            ..Default::default()
        };
        logged("get recent content", self.store.query_content(&filter, limit).await)
    }

    pub async fn get_content_by_type(&self, content_type: &str, limit: usize) -> Result<Vec<ContentLogEntry>, StoreError> {
        let filter = ContentFilter {
            content_type: Some(content_type.to_string()),
            ..Default::default()
        };
        logged(
            &format!("get content by type {}", content_type),
            self.store.query_content(&filter, limit).await,
        )
    }

    /// 内容子串搜索（不区分大小写）
    pub async fn search_content(&self, query: &str, limit: usize) -> Result<Vec<ContentLogEntry>, StoreError> {
        let filter = ContentFilter {
            text: Some(query.to_string()),
            ..Default::default()
        };
        logged("search content", self.store.query_content(&filter, limit).await)
    }

    /// 任意组合的内容查询
    pub async fn query_content(&self, filter: &ContentFilter, limit: usize) -> Result<Vec<ContentLogEntry>, StoreError> {
        logged("query content", self.store.query_content(filter, limit).await)
    }

    pub async fn update_content_performance(&self, content_id: &str, performance: &Value) -> Result<(), StoreError> {
        logged(
            "update content performance",
            self.store
                .update_content_performance(content_id, performance)
                .await,
        )
    }

    // ---------- 偏好 ----------

    pub async fn get_preference(&self, key: &str) -> Result<Option<Value>, StoreError> {
        logged(
            &format!("get preference {}", key),
            self.store.get_preference(key).await,
        )
    }

    pub async fn set_preference(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        logged(
            &format!("set preference {}", key),
            self.store.upsert_preference(key, value).await,
        )
    }

    /// 全部偏好，key → value
    pub async fn get_all_preferences(&self) -> Result<Map<String, Value>, StoreError> {
        let prefs = logged("get all preferences", self.store.list_preferences().await)?;
        Ok(prefs.into_iter().map(|p| (p.key, p.value)).collect())
    }

    // ---------- 任务 ----------

    /// 创建 pending 任务，返回 `task-xxxxxxxxxxxx`
    pub async fn create_task(
        &self,
        goal: &str,
        session_id: Option<&str>,
        webhook_url: Option<&str>,
    ) -> Result<String, StoreError> {
        let task = Task {
            task_id: short_id("task"),
            session_id: session_id.map(String::from),
            goal: goal.to_string(),
            status: TaskStatus::Pending,
            progress: None,
            result: None,
            error: None,
            cost_usd: None,
            started_at: None,
            completed_at: None,
            webhook_url: webhook_url.map(String::from),
            created_at: Utc::now(),
        };
        logged("create task", self.store.insert_task(&task).await)?;
        Ok(task.task_id)
    }

    /// 部分更新任务
    ///
    /// 时间戳由这里维护：首次进入 in_progress 记录 started_at，进入终态记录 completed_at。
    /// 倒退或离开终态的状态变更被丢弃（其余字段照常写入）。
    pub async fn update_task(&self, task_id: &str, mut patch: TaskPatch) -> Result<(), StoreError> {
        patch.started_at = None;
        patch.completed_at = None;

        if let Some(next) = patch.status {
            let Some(current) = self.get_task(task_id).await? else {
                tracing::warn!(task_id, "update for unknown task ignored");
                return Ok(());
            };
            if !current.status.can_transition_to(next) {
                tracing::warn!(
                    task_id,
                    from = %current.status,
                    to = %next,
                    "task status change rejected"
                );
                patch.status = None;
            } else if current.status != next {
                let now = Utc::now();
                if next == TaskStatus::InProgress && current.started_at.is_none() {
                    patch.started_at = Some(now);
                }
                if next.is_terminal() {
                    patch.completed_at = Some(now);
                }
            }
        }

        if patch.is_empty() {
            return Ok(());
        }
        logged(
            &format!("update task {}", task_id),
            self.store.update_task(task_id, &patch).await,
        )
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        logged(
            &format!("get task {}", task_id),
            self.store.get_task(task_id).await,
        )
    }

    pub async fn list_tasks(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>, StoreError> {
        logged("list tasks", self.store.list_tasks(status, limit).await)
    }

    // ---------- 聊天平台用户 ----------

    pub async fn get_platform_session(&self, platform: &str, user_id: &str) -> Result<Option<String>, StoreError> {
        let user = logged(
            "get platform user",
            self.store.get_platform_user(platform, user_id).await,
        )?;
        Ok(user.and_then(|u| u.session_id))
    }

    pub async fn set_platform_session(
        &self,
        platform: &str,
        user_id: &str,
        session_id: &str,
        username: Option<&str>,
    ) -> Result<(), StoreError> {
        let user = PlatformUser {
            platform: platform.to_string(),
            platform_user_id: user_id.to_string(),
            session_id: Some(session_id.to_string()),
            username: username.map(String::from),
            updated_at: Utc::now(),
        };
        logged(
            "save platform user",
            self.store.upsert_platform_user(&user).await,
        )
    }

    pub async fn clear_platform_session(&self, platform: &str, user_id: &str) -> Result<(), StoreError> {
        logged(
            "clear platform session",
            self.store.clear_platform_session(platform, user_id).await,
        )
    }

    // ---------- 统计 ----------

    pub async fn get_stats(&self) -> Result<Stats, StoreError> {
        let result = async {
            Ok::<_, StoreError>(Stats {
                total_sessions: self.store.count(Table::Sessions).await?,
                total_content: self.store.count(Table::ContentLog).await?,
                total_tasks: self.store.count(Table::Tasks).await?,
            })
        }
        .await;
        logged("get stats", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    async fn memory() -> AgentMemory {
        AgentMemory::new(Arc::new(SqliteStore::in_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn test_create_then_get_session() {
        let mem = memory().await;
        let id = mem.create_session(Map::new()).await.unwrap();
        assert!(id.starts_with("session-"));
        assert_eq!(id.len(), "session-".len() + 12);
        assert!(id["session-".len()..].chars().all(|c| c.is_ascii_hexdigit()));

        let session = mem.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.session_id, id);
        assert!(session.summary.is_none());
        assert!(session.tags.is_empty());
    }

    #[tokio::test]
    async fn test_empty_session_update_is_noop() {
        let mem = memory().await;
        // 会话不存在也不报错
        mem.update_session("session-missing", SessionPatch::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_messages_keep_order_and_limit() {
        let mem = memory().await;
        let sid = mem.create_session(Map::new()).await.unwrap();
        for i in 0..5 {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            mem.add_message(&sid, role, &format!("m{}", i), Map::new())
                .await
                .unwrap();
        }
        mem.add_message(&sid, "system", "note", Map::new()).await.unwrap();

        let msgs = mem.get_messages(&sid, 50).await.unwrap();
        assert_eq!(msgs.len(), 6);
        assert!(msgs.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert_eq!(msgs[5].role, Role::Other("system".into()));

        assert_eq!(mem.get_messages(&sid, 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_conversation_context_format() {
        let mem = memory().await;
        let sid = mem.create_session(Map::new()).await.unwrap();
        assert_eq!(mem.get_conversation_context(&sid, 20).await.unwrap(), "");

        mem.add_message(&sid, Role::User, "hi", Map::new()).await.unwrap();
        mem.add_message(&sid, Role::Assistant, &"x".repeat(600), Map::new())
            .await
            .unwrap();
        let ctx = mem.get_conversation_context(&sid, 20).await.unwrap();
        assert!(ctx.starts_with("Previous conversation:\n\nUser: hi\n\nAssistant: "));
        assert!(ctx.ends_with("..."));
    }

    #[tokio::test]
    async fn test_task_lifecycle_stamps_and_is_monotonic() {
        let mem = memory().await;
        let tid = mem.create_task("grow followers", None, Some("https://hook")).await.unwrap();
        assert!(tid.starts_with("task-"));

        mem.update_task(
            &tid,
            TaskPatch {
                status: Some(TaskStatus::InProgress),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let started = mem.get_task(&tid).await.unwrap().unwrap();
        assert_eq!(started.status, TaskStatus::InProgress);
        assert!(started.started_at.is_some());
        assert!(started.completed_at.is_none());

        mem.update_task(
            &tid,
            TaskPatch {
                status: Some(TaskStatus::Completed),
                cost_usd: Some(0.01),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // 终态之后的状态变更被丢弃，其余字段照常写入
        mem.update_task(
            &tid,
            TaskPatch {
                status: Some(TaskStatus::Failed),
                progress: Some("late note".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let done = mem.get_task(&tid).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress.as_deref(), Some("late note"));
        assert_eq!(done.cost_usd, Some(0.01));
        assert_eq!(done.started_at, started.started_at);
        assert!(done.completed_at.is_some());
        assert_eq!(done.webhook_url.as_deref(), Some("https://hook"));
    }

    #[tokio::test]
    async fn test_content_ledger_and_stats() {
        let mem = memory().await;
        let id = mem
            .log_content(NewContent {
                content: "Five ways to use AI".into(),
                content_type: "linkedin".into(),
                platform: Some("linkedin".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        mem.log_content(NewContent {
            content: "Subject: hello".into(),
            content_type: "email".into(),
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(mem.get_recent_content(30, 50).await.unwrap().len(), 2);
        assert_eq!(mem.get_content_by_type("email", 20).await.unwrap().len(), 1);
        let hits = mem.search_content("ways", 20).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);

        mem.update_content_performance(&id, &serde_json::json!({"impressions": 1200}))
            .await
            .unwrap();

        mem.create_session(Map::new()).await.unwrap();
        let stats = mem.get_stats().await.unwrap();
        assert_eq!(
            stats,
            Stats {
                total_sessions: 1,
                total_content: 2,
                total_tasks: 0
            }
        );
    }

    #[tokio::test]
    async fn test_preferences_map() {
        let mem = memory().await;
        mem.set_preference("brand", &serde_json::json!({"name": "Acme"})).await.unwrap();
        mem.set_preference("tone", &serde_json::json!("direct")).await.unwrap();
        let all = mem.get_all_preferences().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["tone"], serde_json::json!("direct"));
    }
}
