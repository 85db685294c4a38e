//! Supabase 存储：通过 PostgREST (`/rest/v1/<table>`) 读写
//!
//! 过滤使用 PostgREST 语法（`eq.` / `gte.` / `ilike.`），写入默认 `Prefer: return=minimal`。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::records::*;
use super::Store;
use crate::core::StoreError;

const RETURN_MINIMAL: &str = "return=minimal";
const MERGE_DUPLICATES: &str = "resolution=merge-duplicates,return=minimal";

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn eq(v: &str) -> String {
    format!("eq.{}", v)
}

/// 子串匹配的 ilike 模式：`%` `_` `\` 按字面匹配，`*` 会被 PostgREST 当作 `%`，退化为单字符 `_`
fn ilike_contains(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 8);
    pattern.push_str("ilike.*");
    for c in text.chars() {
        match c {
            '\\' | '%' | '_' => {
                pattern.push('\\');
                pattern.push(c);
            }
            '*' => pattern.push('_'),
            _ => pattern.push(c),
        }
    }
    pattern.push('*');
    pattern
}

/// Supabase PostgREST 存储
pub struct SupabaseStore {
    client: Client,
    rest_url: String,
}

impl SupabaseStore {
    /// url 为项目地址（如 `https://xyz.supabase.co`），key 同时作为 apikey 与 Bearer 令牌
    pub fn new(url: &str, key: &str, timeout: Duration) -> Result<Self, StoreError> {
        let invalid_key = || StoreError::NotConfigured("SUPABASE_KEY is not a valid header value".into());
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(key).map_err(|_| invalid_key())?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|_| invalid_key())?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", url.trim_end_matches('/')),
        })
    }

    fn url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, table)
    }

    async fn send(&self, table: &str, req: RequestBuilder) -> Result<Response, StoreError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Database(format!("{} {}: {}", table, status, body)));
        }
        Ok(resp)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let req = self.client.get(self.url(table)).query(query);
        let resp = self.send(table, req).await?;
        let rows: Vec<Value> = resp.json().await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(StoreError::from))
            .collect()
    }

    async fn insert<B: Serialize + ?Sized>(&self, table: &str, body: &B) -> Result<(), StoreError> {
        let req = self
            .client
            .post(self.url(table))
            .header("Prefer", RETURN_MINIMAL)
            .json(body);
        self.send(table, req).await?;
        Ok(())
    }

    async fn patch<B: Serialize + ?Sized>(
        &self,
        table: &str,
        filters: &[(&str, String)],
        body: &B,
    ) -> Result<(), StoreError> {
        let req = self
            .client
            .patch(self.url(table))
            .query(filters)
            .header("Prefer", RETURN_MINIMAL)
            .json(body);
        self.send(table, req).await?;
        Ok(())
    }

    async fn upsert<B: Serialize + ?Sized>(
        &self,
        table: &str,
        on_conflict: &str,
        body: &B,
    ) -> Result<(), StoreError> {
        let req = self
            .client
            .post(self.url(table))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", MERGE_DUPLICATES)
            .json(body);
        self.send(table, req).await?;
        Ok(())
    }
}

/// `Content-Range: 0-24/3573` 或 `*/0` 中的总数
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

#[derive(Deserialize)]
struct ValueRow {
    value: Value,
}

#[async_trait]
impl Store for SupabaseStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        self.insert("sessions", session).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let rows: Vec<Session> = self
            .select(
                "sessions",
                &[("select", "*".into()), ("session_id", eq(session_id))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn update_session(&self, session_id: &str, patch: &SessionPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        self.patch("sessions", &[("session_id", eq(session_id))], patch)
            .await
    }

    async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>, StoreError> {
        self.select(
            "sessions",
            &[
                ("select", "*".into()),
                ("order", "created_at.desc".into()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        self.insert("messages", message).await
    }

    async fn list_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        self.select(
            "messages",
            &[
                ("select", "*".into()),
                ("session_id", eq(session_id)),
                ("order", "created_at.asc".into()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        self.insert("tasks", task).await
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let rows: Vec<Task> = self
            .select("tasks", &[("select", "*".into()), ("task_id", eq(task_id))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn update_task(&self, task_id: &str, patch: &TaskPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        self.patch("tasks", &[("task_id", eq(task_id))], patch).await
    }

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>, StoreError> {
        let mut query = vec![("select", "*".to_string())];
        if let Some(status) = status {
            query.push(("status", eq(status.as_str())));
        }
        query.push(("order", "started_at.desc.nullslast,created_at.desc".into()));
        query.push(("limit", limit.to_string()));
        self.select("tasks", &query).await
    }

    async fn insert_content(&self, entry: &ContentLogEntry) -> Result<(), StoreError> {
        self.insert("content_log", entry).await
    }

    async fn query_content(&self, filter: &ContentFilter, limit: usize) -> Result<Vec<ContentLogEntry>, StoreError> {
        let mut query = vec![("select", "*".to_string())];
        if let Some(since) = &filter.since {
            query.push(("created_at", format!("gte.{}", ts(since))));
        }
        if let Some(content_type) = &filter.content_type {
            query.push(("content_type", eq(content_type)));
        }
        if let Some(text) = &filter.text {
            query.push(("content", ilike_contains(text)));
        }
        query.push(("order", "created_at.desc".into()));
        query.push(("limit", limit.to_string()));
        self.select("content_log", &query).await
    }

    async fn update_content_performance(&self, id: &str, performance: &Value) -> Result<(), StoreError> {
        self.patch(
            "content_log",
            &[("id", eq(id))],
            &json!({ "performance": performance }),
        )
        .await
    }

    async fn get_preference(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let rows: Vec<ValueRow> = self
            .select("preferences", &[("select", "value".into()), ("key", eq(key))])
            .await?;
        Ok(rows.into_iter().next().map(|r| r.value))
    }

    async fn upsert_preference(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.upsert(
            "preferences",
            "key",
            &json!({ "key": key, "value": value, "updated_at": ts(&Utc::now()) }),
        )
        .await
    }

    async fn list_preferences(&self) -> Result<Vec<Preference>, StoreError> {
        self.select(
            "preferences",
            &[("select", "key,value".into()), ("order", "key.asc".into())],
        )
        .await
    }

    async fn get_platform_user(&self, platform: &str, user_id: &str) -> Result<Option<PlatformUser>, StoreError> {
        let rows: Vec<PlatformUser> = self
            .select(
                "platform_users",
                &[
                    ("select", "*".into()),
                    ("platform", eq(platform)),
                    ("platform_user_id", eq(user_id)),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_platform_user(&self, user: &PlatformUser) -> Result<(), StoreError> {
        // 缺省的 username 不写入，冲突时保留旧值
        let mut body = Map::new();
        body.insert("platform".into(), json!(user.platform));
        body.insert("platform_user_id".into(), json!(user.platform_user_id));
        body.insert("session_id".into(), json!(user.session_id));
        if let Some(username) = &user.username {
            body.insert("username".into(), json!(username));
        }
        body.insert("updated_at".into(), json!(ts(&user.updated_at)));
        self.upsert("platform_users", "platform,platform_user_id", &body)
            .await
    }

    async fn clear_platform_session(&self, platform: &str, user_id: &str) -> Result<(), StoreError> {
        self.patch(
            "platform_users",
            &[("platform", eq(platform)), ("platform_user_id", eq(user_id))],
            &json!({ "session_id": null, "updated_at": ts(&Utc::now()) }),
        )
        .await
    }

    async fn count(&self, table: Table) -> Result<u64, StoreError> {
        let req = self
            .client
            .head(self.url(table.name()))
            .query(&[("select", "*")])
            .header("Prefer", "count=exact");
        let resp = self.send(table.name(), req).await?;
        resp.headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| StoreError::Database(format!("{}: missing row count", table.name())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> SupabaseStore {
        SupabaseStore::new(&server.uri(), "service-key", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-24/*"), None);
    }

    #[tokio::test]
    async fn test_get_session_sends_auth_and_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/sessions"))
            .and(query_param("session_id", "eq.session-abc"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": 1,
                "session_id": "session-abc",
                "created_at": "2025-01-02T03:04:05.123456+00:00",
                "summary": "Hello",
                "tags": null,
                "metadata": {"type": "chat"}
            }])))
            .mount(&server)
            .await;

        let session = store(&server).get_session("session-abc").await.unwrap().unwrap();
        assert_eq!(session.summary.as_deref(), Some("Hello"));
        assert!(session.tags.is_empty());
    }

    #[tokio::test]
    async fn test_missing_row_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        assert!(store(&server).get_task("task-nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_task_patch_sends_only_set_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/tasks"))
            .and(query_param("task_id", "eq.task-1"))
            .and(header("prefer", "return=minimal"))
            .and(body_json(json!({"status": "failed", "error": "boom"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .update_task(
                "task-1",
                &TaskPatch {
                    status: Some(TaskStatus::Failed),
                    error: Some("boom".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_preference_upsert_merges_on_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/preferences"))
            .and(query_param("on_conflict", "key"))
            .and(header("prefer", MERGE_DUPLICATES))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .upsert_preference("tone", &json!({"style": "bold"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_search_uses_ilike() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/content_log"))
            .and(query_param("content", "ilike.*roi*"))
            .and(query_param("order", "created_at.desc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "c-1",
                "session_id": null,
                "content_type": "linkedin",
                "platform": "linkedin",
                "title": null,
                "content": "AI ROI",
                "metadata": {},
                "performance": null,
                "created_at": "2025-01-02T03:04:05Z"
            }])))
            .mount(&server)
            .await;

        let rows = store(&server)
            .query_content(
                &ContentFilter {
                    text: Some("roi".into()),
                    ..Default::default()
                },
                20,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content_type, "linkedin");
    }

    #[test]
    fn test_ilike_pattern_escapes_wildcards() {
        assert_eq!(ilike_contains("roi"), "ilike.*roi*");
        assert_eq!(ilike_contains("50% off_now"), r"ilike.*50\% off\_now*");
        assert_eq!(ilike_contains(r"a\b"), r"ilike.*a\\b*");
        assert_eq!(ilike_contains("5*"), "ilike.*5_*");
        assert_eq!(ilike_contains("(a,b)"), "ilike.*(a,b)*");
    }

    #[tokio::test]
    async fn test_search_text_is_sent_escaped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/content_log"))
            .and(query_param("content", r"ilike.*100\%*"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let rows = store(&server)
            .query_content(
                &ContentFilter {
                    text: Some("100%".into()),
                    ..Default::default()
                },
                20,
            )
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_count_reads_content_range() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/rest/v1/sessions"))
            .and(header("prefer", "count=exact"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-range", "0-0/7"))
            .mount(&server)
            .await;

        assert_eq!(store(&server).count(Table::Sessions).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_http_error_becomes_database_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("relation does not exist"))
            .mount(&server)
            .await;

        let msg = Message {
            id: "m-1".into(),
            session_id: "s".into(),
            role: Role::User,
            content: "hi".into(),
            metadata: Map::new(),
            created_at: Utc::now(),
        };
        match store(&server).insert_message(&msg).await {
            Err(StoreError::Database(cause)) => assert!(cause.contains("relation does not exist")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
