//! SQLite 存储（sqlx 异步连接池）
//!
//! 表结构与 Supabase 保持一致；JSON 列以 TEXT 保存，时间戳为 RFC3339（微秒、UTC），可直接按字符串排序。

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::records::*;
use super::Store;
use crate::core::StoreError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sessions (
        session_id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        summary TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        metadata TEXT NOT NULL DEFAULT '{}'
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        session_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, created_at)",
    "CREATE TABLE IF NOT EXISTS tasks (
        task_id TEXT PRIMARY KEY,
        session_id TEXT,
        goal TEXT NOT NULL,
        status TEXT NOT NULL,
        progress TEXT,
        result TEXT,
        error TEXT,
        cost_usd REAL,
        started_at TEXT,
        completed_at TEXT,
        webhook_url TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS content_log (
        id TEXT PRIMARY KEY,
        session_id TEXT,
        content_type TEXT NOT NULL,
        platform TEXT,
        title TEXT,
        content TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        performance TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_content_created ON content_log(created_at)",
    "CREATE TABLE IF NOT EXISTS preferences (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS platform_users (
        platform TEXT NOT NULL,
        platform_user_id TEXT NOT NULL,
        session_id TEXT,
        username TEXT,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (platform, platform_user_id)
    )",
];

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("bad timestamp {:?}: {}", s, e)))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_object(s: &str) -> Result<Map<String, Value>, StoreError> {
    Ok(serde_json::from_str(s)?)
}

fn parse_opt_json(s: Option<String>) -> Result<Option<Value>, StoreError> {
    Ok(s.as_deref().map(serde_json::from_str).transpose()?)
}

fn session_from_row(row: &SqliteRow) -> Result<Session, StoreError> {
    let tags: String = row.try_get("tags")?;
    let metadata: String = row.try_get("metadata")?;
    Ok(Session {
        session_id: row.try_get("session_id")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        summary: row.try_get("summary")?,
        tags: serde_json::from_str(&tags)?,
        metadata: parse_object(&metadata)?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, StoreError> {
    let metadata: String = row.try_get("metadata")?;
    Ok(Message {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: Role::from(row.try_get::<String, _>("role")?),
        content: row.try_get("content")?,
        metadata: parse_object(&metadata)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn task_from_row(row: &SqliteRow) -> Result<Task, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Task {
        task_id: row.try_get("task_id")?,
        session_id: row.try_get("session_id")?,
        goal: row.try_get("goal")?,
        status: TaskStatus::parse(&status)
            .ok_or_else(|| StoreError::Database(format!("unknown task status {:?}", status)))?,
        progress: row.try_get("progress")?,
        result: parse_opt_json(row.try_get("result")?)?,
        error: row.try_get("error")?,
        cost_usd: row.try_get("cost_usd")?,
        started_at: parse_opt_ts(row.try_get("started_at")?)?,
        completed_at: parse_opt_ts(row.try_get("completed_at")?)?,
        webhook_url: row.try_get("webhook_url")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn content_from_row(row: &SqliteRow) -> Result<ContentLogEntry, StoreError> {
    let metadata: String = row.try_get("metadata")?;
    Ok(ContentLogEntry {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        content_type: row.try_get("content_type")?,
        platform: row.try_get("platform")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        metadata: parse_object(&metadata)?,
        performance: parse_opt_json(row.try_get("performance")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn platform_user_from_row(row: &SqliteRow) -> Result<PlatformUser, StoreError> {
    Ok(PlatformUser {
        platform: row.try_get("platform")?,
        platform_user_id: row.try_get("platform_user_id")?,
        session_id: row.try_get("session_id")?,
        username: row.try_get("username")?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
    })
}

/// SQLite 存储
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 打开（不存在则创建）数据库文件并建表
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Database(format!("create {:?}: {}", parent, e)))?;
        }
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;
        Self::from_pool(pool).await
    }

    /// 内存数据库（单连接，连接不回收）
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (session_id, created_at, summary, tags, metadata) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.session_id)
        .bind(ts(&session.created_at))
        .bind(&session.summary)
        .bind(serde_json::to_string(&session.tags)?)
        .bind(serde_json::to_string(&session.metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn update_session(&self, session_id: &str, patch: &SessionPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE sessions SET ");
        {
            let mut sep = qb.separated(", ");
            if let Some(summary) = &patch.summary {
                sep.push("summary = ").push_bind_unseparated(summary.clone());
            }
            if let Some(tags) = &patch.tags {
                sep.push("tags = ").push_bind_unseparated(serde_json::to_string(tags)?);
            }
            if let Some(metadata) = &patch.metadata {
                sep.push("metadata = ")
                    .push_bind_unseparated(serde_json::to_string(metadata)?);
            }
        }
        qb.push(" WHERE session_id = ").push_bind(session_id.to_string());
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query("SELECT * FROM sessions ORDER BY created_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (id, session_id, role, content, metadata, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(serde_json::to_string(&message.metadata)?)
        .bind(ts(&message.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE session_id = ? ORDER BY created_at ASC, seq ASC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tasks (task_id, session_id, goal, status, progress, result, error, cost_usd,
                started_at, completed_at, webhook_url, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.task_id)
        .bind(&task.session_id)
        .bind(&task.goal)
        .bind(task.status.as_str())
        .bind(&task.progress)
        .bind(task.result.as_ref().map(Value::to_string))
        .bind(&task.error)
        .bind(task.cost_usd)
        .bind(task.started_at.as_ref().map(ts))
        .bind(task.completed_at.as_ref().map(ts))
        .bind(&task.webhook_url)
        .bind(ts(&task.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn update_task(&self, task_id: &str, patch: &TaskPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE tasks SET ");
        {
            let mut sep = qb.separated(", ");
            if let Some(status) = patch.status {
                sep.push("status = ").push_bind_unseparated(status.as_str());
            }
            if let Some(progress) = &patch.progress {
                sep.push("progress = ").push_bind_unseparated(progress.clone());
            }
            if let Some(result) = &patch.result {
                sep.push("result = ").push_bind_unseparated(result.to_string());
            }
            if let Some(error) = &patch.error {
                sep.push("error = ").push_bind_unseparated(error.clone());
            }
            if let Some(cost) = patch.cost_usd {
                sep.push("cost_usd = ").push_bind_unseparated(cost);
            }
            if let Some(started_at) = &patch.started_at {
                sep.push("started_at = ").push_bind_unseparated(ts(started_at));
            }
            if let Some(completed_at) = &patch.completed_at {
                sep.push("completed_at = ").push_bind_unseparated(ts(completed_at));
            }
        }
        qb.push(" WHERE task_id = ").push_bind(task_id.to_string());
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM tasks");
        if let Some(status) = status {
            qb.push(" WHERE status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY started_at DESC, created_at DESC LIMIT ")
            .push_bind(limit as i64);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn insert_content(&self, entry: &ContentLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO content_log (id, session_id, content_type, platform, title, content, metadata,
                performance, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.session_id)
        .bind(&entry.content_type)
        .bind(&entry.platform)
        .bind(&entry.title)
        .bind(&entry.content)
        .bind(serde_json::to_string(&entry.metadata)?)
        .bind(entry.performance.as_ref().map(Value::to_string))
        .bind(ts(&entry.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_content(&self, filter: &ContentFilter, limit: usize) -> Result<Vec<ContentLogEntry>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM content_log WHERE 1 = 1");
        if let Some(since) = &filter.since {
            qb.push(" AND created_at >= ").push_bind(ts(since));
        }
        if let Some(content_type) = &filter.content_type {
            qb.push(" AND content_type = ").push_bind(content_type.clone());
        }
        if let Some(text) = &filter.text {
            qb.push(" AND instr(lower(content), lower(")
                .push_bind(text.clone())
                .push(")) > 0");
        }
        qb.push(" ORDER BY created_at DESC LIMIT ").push_bind(limit as i64);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(content_from_row).collect()
    }

    async fn update_content_performance(&self, id: &str, performance: &Value) -> Result<(), StoreError> {
        sqlx::query("UPDATE content_log SET performance = ? WHERE id = ?")
            .bind(performance.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_preference(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM preferences WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        parse_opt_json(value)
    }

    async fn upsert_preference(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO preferences (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value.to_string())
        .bind(ts(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_preferences(&self) -> Result<Vec<Preference>, StoreError> {
        let rows = sqlx::query("SELECT key, value FROM preferences ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let value: String = row.try_get("value")?;
                Ok(Preference {
                    key: row.try_get("key")?,
                    value: serde_json::from_str(&value)?,
                })
            })
            .collect()
    }

    async fn get_platform_user(&self, platform: &str, user_id: &str) -> Result<Option<PlatformUser>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM platform_users WHERE platform = ? AND platform_user_id = ?",
        )
        .bind(platform)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(platform_user_from_row).transpose()
    }

    async fn upsert_platform_user(&self, user: &PlatformUser) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO platform_users (platform, platform_user_id, session_id, username, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(platform, platform_user_id) DO UPDATE SET
                session_id = excluded.session_id,
                username = COALESCE(excluded.username, platform_users.username),
                updated_at = excluded.updated_at",
        )
        .bind(&user.platform)
        .bind(&user.platform_user_id)
        .bind(&user.session_id)
        .bind(&user.username)
        .bind(ts(&user.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_platform_session(&self, platform: &str, user_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE platform_users SET session_id = NULL, updated_at = ? WHERE platform = ? AND platform_user_id = ?",
        )
        .bind(ts(&Utc::now()))
        .bind(platform)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count(&self, table: Table) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let n: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(n as u64)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
