//! Slack Web API：发消息、回复斜杠命令、查用户名、上传文件

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::BotError;

pub const SLACK_API_BASE: &str = "https://slack.com/api";

/// 回复目的地
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    /// 频道中的 @ 提及，回复到线程
    Thread { channel: String, thread_ts: String },
    /// 私信
    Direct { channel: String },
    /// 斜杠命令：文本走 response_url，文件发到命令所在频道
    Command { response_url: String, channel: String },
}

impl ReplyTarget {
    pub fn channel(&self) -> &str {
        match self {
            ReplyTarget::Thread { channel, .. }
            | ReplyTarget::Direct { channel }
            | ReplyTarget::Command { channel, .. } => channel,
        }
    }

    pub fn thread_ts(&self) -> Option<&str> {
        match self {
            ReplyTarget::Thread { thread_ts, .. } => Some(thread_ts),
            _ => None,
        }
    }
}

/// 待上传的文件
#[derive(Debug, Clone)]
pub struct Upload<'a> {
    pub path: &'a Path,
    pub title: &'a str,
    pub comment: &'a str,
}

/// 聊天平台出站接口
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn post_message(&self, channel: &str, thread_ts: Option<&str>, text: &str) -> Result<(), BotError>;

    async fn respond(&self, response_url: &str, text: &str) -> Result<(), BotError>;

    async fn upload_file(&self, channel: &str, thread_ts: Option<&str>, upload: Upload<'_>) -> Result<(), BotError>;

    /// 查询显示名，失败返回 None
    async fn user_name(&self, user_id: &str) -> Option<String>;

    /// 按目的地发送文本
    async fn reply(&self, target: &ReplyTarget, text: &str) -> Result<(), BotError> {
        match target {
            ReplyTarget::Command { response_url, .. } => self.respond(response_url, text).await,
            other => self.post_message(other.channel(), other.thread_ts(), text).await,
        }
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    rest: Value,
}

/// Slack Web API 客户端（Bot Token 鉴权）
pub struct SlackWebClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

fn platform_err(e: impl std::fmt::Display) -> BotError {
    BotError::Platform(e.to_string())
}

fn upload_err(e: impl std::fmt::Display) -> BotError {
    BotError::Upload(e.to_string())
}

impl SlackWebClient {
    pub fn new(token: &str, timeout: Duration) -> Result<Self, BotError> {
        Self::with_base_url(token, SLACK_API_BASE, timeout)
    }

    pub fn with_base_url(token: &str, base_url: &str, timeout: Duration) -> Result<Self, BotError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(platform_err)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// 检查 Slack 的 `ok` 字段，返回其余字段
    async fn check(method: &str, resp: reqwest::Response) -> Result<Value, BotError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(BotError::Platform(format!("{} returned HTTP {}", method, status.as_u16())));
        }
        let body: ApiResponse = resp.json().await.map_err(platform_err)?;
        if !body.ok {
            return Err(BotError::Platform(format!(
                "{}: {}",
                method,
                body.error.unwrap_or_else(|| "unknown_error".into())
            )));
        }
        Ok(body.rest)
    }

    async fn call_json(&self, method: &str, payload: &Value) -> Result<Value, BotError> {
        let resp = self
            .client
            .post(self.url(method))
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await
            .map_err(platform_err)?;
        Self::check(method, resp).await
    }
}

#[async_trait]
impl ChatPlatform for SlackWebClient {
    async fn post_message(&self, channel: &str, thread_ts: Option<&str>, text: &str) -> Result<(), BotError> {
        let mut payload = json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            payload["thread_ts"] = json!(ts);
        }
        self.call_json("chat.postMessage", &payload).await?;
        Ok(())
    }

    async fn respond(&self, response_url: &str, text: &str) -> Result<(), BotError> {
        let resp = self
            .client
            .post(response_url)
            .json(&json!({ "response_type": "in_channel", "text": text }))
            .send()
            .await
            .map_err(platform_err)?;
        if !resp.status().is_success() {
            return Err(BotError::Platform(format!(
                "response_url returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        Ok(())
    }

    /// 三步上传：申请上传地址 → 推送文件字节 → 完成并分享到频道
    async fn upload_file(&self, channel: &str, thread_ts: Option<&str>, upload: Upload<'_>) -> Result<(), BotError> {
        let bytes = tokio::fs::read(upload.path)
            .await
            .map_err(|e| upload_err(format!("{}: {}", upload.path.display(), e)))?;
        let filename = upload
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video.mp4")
            .to_string();

        let resp = self
            .client
            .post(self.url("files.getUploadURLExternal"))
            .bearer_auth(&self.token)
            .form(&[("filename", filename.clone()), ("length", bytes.len().to_string())])
            .send()
            .await
            .map_err(upload_err)?;
        let ticket = Self::check("files.getUploadURLExternal", resp)
            .await
            .map_err(upload_err)?;
        let (Some(upload_url), Some(file_id)) = (
            ticket["upload_url"].as_str(),
            ticket["file_id"].as_str(),
        ) else {
            return Err(BotError::Upload("missing upload_url or file_id".into()));
        };

        let resp = self
            .client
            .post(upload_url)
            .body(bytes)
            .send()
            .await
            .map_err(upload_err)?;
        if !resp.status().is_success() {
            return Err(BotError::Upload(format!(
                "upload returned HTTP {}",
                resp.status().as_u16()
            )));
        }

        let mut complete = json!({
            "files": [{ "id": file_id, "title": upload.title }],
            "channel_id": channel,
            "initial_comment": upload.comment,
        });
        if let Some(ts) = thread_ts {
            complete["thread_ts"] = json!(ts);
        }
        self.call_json("files.completeUploadExternal", &complete)
            .await
            .map_err(upload_err)?;
        tracing::info!(channel, file = %filename, "file uploaded to Slack");
        Ok(())
    }

    async fn user_name(&self, user_id: &str) -> Option<String> {
        let resp = self
            .client
            .get(self.url("users.info"))
            .bearer_auth(&self.token)
            .query(&[("user", user_id)])
            .send()
            .await
            .ok()?;
        let body = Self::check("users.info", resp).await.ok()?;
        let user = &body["user"];
        user["real_name"]
            .as_str()
            .filter(|s| !s.is_empty())
            .or_else(|| user["name"].as_str())
            .map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> SlackWebClient {
        SlackWebClient::with_base_url("xoxb-test", &server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_post_message_in_thread() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(header("authorization", "Bearer xoxb-test"))
            .and(body_json(json!({"channel": "C1", "text": "hi", "thread_ts": "1.2"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let target = ReplyTarget::Thread {
            channel: "C1".into(),
            thread_ts: "1.2".into(),
        };
        client(&server).reply(&target, "hi").await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_field_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "channel_not_found"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).post_message("C9", None, "x").await.unwrap_err();
        assert_eq!(err.to_string(), "Slack API error: chat.postMessage: channel_not_found");
    }

    #[tokio::test]
    async fn test_command_reply_goes_to_response_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/cmd"))
            .and(body_json(json!({"response_type": "in_channel", "text": "done"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let target = ReplyTarget::Command {
            response_url: format!("{}/hooks/cmd", server.uri()),
            channel: "C1".into(),
        };
        client(&server).reply(&target, "done").await.unwrap();
    }

    #[tokio::test]
    async fn test_user_name_prefers_real_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.info"))
            .and(query_param("user", "U1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "user": {"name": "dana", "real_name": "Dana Lee"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users.info"))
            .and(query_param("user", "U2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "user_not_found"})))
            .mount(&server)
            .await;

        let c = client(&server);
        assert_eq!(c.user_name("U1").await.as_deref(), Some("Dana Lee"));
        assert_eq!(c.user_name("U2").await, None);
    }

    #[tokio::test]
    async fn test_upload_runs_three_steps() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("generated.mp4");
        std::fs::write(&file, b"fake-mp4").unwrap();

        Mock::given(method("POST"))
            .and(path("/files.getUploadURLExternal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "upload_url": format!("{}/upload/abc", server.uri()),
                "file_id": "F123"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/abc"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files.completeUploadExternal"))
            .and(body_json(json!({
                "files": [{"id": "F123", "title": "Your video"}],
                "channel_id": "C1",
                "initial_comment": "Here it is",
                "thread_ts": "9.9"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .upload_file(
                "C1",
                Some("9.9"),
                Upload {
                    path: &file,
                    title: "Your video",
                    comment: "Here it is",
                },
            )
            .await
            .unwrap();
    }
}
