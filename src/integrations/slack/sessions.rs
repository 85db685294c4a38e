//! Slack 用户 → Agent 会话 的两级目录
//!
//! 进程内 map 总是可用；配置了存储时同时写入 platform_users 表。
//! 持久层的回答（包括未命中）为准，只有读失败时才退回进程内 map。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::memory::AgentMemory;

/// platform_users 表中的平台名
pub const PLATFORM: &str = "slack";

#[derive(Clone, Default)]
pub struct SessionDirectory {
    volatile: Arc<RwLock<HashMap<String, String>>>,
    durable: Option<AgentMemory>,
}

impl SessionDirectory {
    pub fn new(durable: Option<AgentMemory>) -> Self {
        Self {
            volatile: Arc::default(),
            durable,
        }
    }

    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }

    pub async fn get(&self, user_id: &str) -> Option<String> {
        if let Some(memory) = &self.durable {
            match memory.get_platform_session(PLATFORM, user_id).await {
                Ok(found) => return found,
                Err(e) => tracing::warn!(user_id, "durable session lookup failed: {}", e),
            }
        }
        self.volatile.read().await.get(user_id).cloned()
    }

    /// 两级都写；持久层失败只记日志
    pub async fn set(&self, user_id: &str, session_id: &str, username: Option<&str>) {
        self.volatile
            .write()
            .await
            .insert(user_id.to_string(), session_id.to_string());
        if let Some(memory) = &self.durable {
            if let Err(e) = memory
                .set_platform_session(PLATFORM, user_id, session_id, username)
                .await
            {
                tracing::warn!(user_id, "failed to persist session mapping: {}", e);
            }
        }
    }

    /// 清除两级映射，返回清除前是否存在会话
    pub async fn clear(&self, user_id: &str) -> bool {
        let existed = self.get(user_id).await.is_some();
        self.volatile.write().await.remove(user_id);
        if let Some(memory) = &self.durable {
            if let Err(e) = memory.clear_platform_session(PLATFORM, user_id).await {
                tracing::warn!(user_id, "failed to clear persisted session: {}", e);
            }
        }
        existed
    }
}
