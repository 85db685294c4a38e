//! 持久化存储抽象层
//!
//! 定义统一的存储接口（sessions / messages / tasks / content_log / preferences / platform_users），
//! 支持 Supabase（PostgREST）与本地 SQLite 两种实现。每个操作都是一次往返，不跨表事务。

pub mod records;
pub mod sqlite;
pub mod supabase;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::StoreSection;
use crate::core::StoreError;

pub use records::{
    ContentFilter, ContentLogEntry, Message, PlatformUser, Preference, Role, Session,
    SessionPatch, Stats, Table, Task, TaskPatch, TaskStatus, AGENT_SESSION_KEY,
};
pub use sqlite::SqliteStore;
pub use supabase::SupabaseStore;

/// 存储接口
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    async fn update_session(&self, session_id: &str, patch: &SessionPatch) -> Result<(), StoreError>;

    /// 最近创建的会话在前
    async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>, StoreError>;

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError>;

    /// 按创建时间升序，最多 limit 条
    async fn list_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError>;

    async fn insert_task(&self, task: &Task) -> Result<(), StoreError>;

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError>;

    async fn update_task(&self, task_id: &str, patch: &TaskPatch) -> Result<(), StoreError>;

    /// 按 started_at 降序
    async fn list_tasks(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>, StoreError>;

    async fn insert_content(&self, entry: &ContentLogEntry) -> Result<(), StoreError>;

    /// 按创建时间降序
    async fn query_content(&self, filter: &ContentFilter, limit: usize) -> Result<Vec<ContentLogEntry>, StoreError>;

    async fn update_content_performance(&self, id: &str, performance: &Value) -> Result<(), StoreError>;

    async fn get_preference(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// 按 key 插入或覆盖
    async fn upsert_preference(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    async fn list_preferences(&self) -> Result<Vec<Preference>, StoreError>;

    async fn get_platform_user(&self, platform: &str, user_id: &str) -> Result<Option<PlatformUser>, StoreError>;

    /// 按 (platform, platform_user_id) 插入或覆盖
    async fn upsert_platform_user(&self, user: &PlatformUser) -> Result<(), StoreError>;

    /// 置空映射中的 session_id（保留用户行）
    async fn clear_platform_session(&self, platform: &str, user_id: &str) -> Result<(), StoreError>;

    async fn count(&self, table: Table) -> Result<u64, StoreError>;

    /// 关闭连接（进程退出前调用）
    async fn close(&self) {}
}

/// 根据配置打开存储
///
/// 配置了 supabase_url 时使用 Supabase（缺少 key 视为配置错误）；否则配置了 sqlite_path 时使用 SQLite；
/// 都没有时返回 NotConfigured，调用方降级为只提供无状态端点
pub async fn open_store(cfg: &StoreSection) -> Result<Arc<dyn Store>, StoreError> {
    if let Some(url) = cfg.supabase_url.as_deref().filter(|s| !s.is_empty()) {
        let key = cfg
            .supabase_key
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                StoreError::NotConfigured("SUPABASE_URL and SUPABASE_KEY must be set".to_string())
            })?;
        let store = SupabaseStore::new(url, key, Duration::from_secs(cfg.request_timeout_secs))?;
        tracing::info!("Using Supabase store at {}", url);
        return Ok(Arc::new(store));
    }

    if let Some(path) = cfg.sqlite_path.as_ref() {
        let store = SqliteStore::open(path).await?;
        tracing::info!("Using SQLite store at {:?}", path);
        return Ok(Arc::new(store));
    }

    Err(StoreError::NotConfigured(
        "set SUPABASE_URL/SUPABASE_KEY or DATABASE_PATH".to_string(),
    ))
}
