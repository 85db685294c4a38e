//! 调用 Agent HTTP API（/agent/chat 与 /generate-content）的客户端

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::error::BotError;
use crate::config::SlackSection;

/// 响应中没有 content 字段时的回复
pub const EMPTY_REPLY: &str = "Sorry, I couldn't generate a response.";

/// /agent/chat 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ChatAnswer {
    pub content: String,
    pub session_id: Option<String>,
}

/// 机器人与 Agent 服务之间的接口
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// 有状态对话，session_id 为 None 时由服务端新建会话
    async fn chat(&self, message: &str, session_id: Option<&str>) -> Result<ChatAnswer, BotError>;

    /// 无状态生成，用于耗时较长的内容类型
    async fn generate(&self, prompt: &str, content_type: &str) -> Result<String, BotError>;
}

#[derive(Deserialize)]
struct ChatBody {
    content: Option<String>,
    session_id: Option<String>,
}

#[derive(Deserialize)]
struct GenerateBody {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

/// 基于 reqwest 的实现；普通请求与慢内容请求使用不同超时
pub struct HttpAgentApi {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    slow_timeout: Duration,
}

impl HttpAgentApi {
    pub fn new(base_url: &str, timeout: Duration, slow_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            slow_timeout,
        }
    }

    pub fn from_config(cfg: &SlackSection) -> Self {
        Self::new(
            &cfg.agent_api_url,
            Duration::from_secs(cfg.request_timeout_secs),
            Duration::from_secs(cfg.slow_request_timeout_secs),
        )
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, BotError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|b| b.detail)
                .unwrap_or(text);
            return Err(BotError::AgentApi(format!("{} returned {}: {}", path, status.as_u16(), detail)));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl AgentApi for HttpAgentApi {
    async fn chat(&self, message: &str, session_id: Option<&str>) -> Result<ChatAnswer, BotError> {
        let mut body = json!({ "message": message });
        if let Some(id) = session_id {
            body["session_id"] = json!(id);
        }
        let resp: ChatBody = self.post("/agent/chat", body, self.timeout).await?;
        Ok(ChatAnswer {
            content: resp.content.unwrap_or_else(|| EMPTY_REPLY.to_string()),
            session_id: resp.session_id,
        })
    }

    async fn generate(&self, prompt: &str, content_type: &str) -> Result<String, BotError> {
        let body = json!({ "prompt": prompt, "content_type": content_type });
        let resp: GenerateBody = self
            .post("/generate-content", body, self.slow_timeout)
            .await?;
        Ok(resp.content.unwrap_or_else(|| EMPTY_REPLY.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> HttpAgentApi {
        HttpAgentApi::new(&server.uri(), Duration::from_secs(5), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_chat_sends_session_and_reads_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/chat"))
            .and(body_json(json!({"message": "hi", "session_id": "session-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": "Hello!",
                "session_id": "session-1",
                "metadata": {"is_error": false, "cost_usd": 0.01, "duration_ms": 12}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let answer = api(&server).chat("hi", Some("session-1")).await.unwrap();
        assert_eq!(answer.content, "Hello!");
        assert_eq!(answer.session_id.as_deref(), Some("session-1"));
    }

    #[tokio::test]
    async fn test_chat_without_session_omits_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/chat"))
            .and(body_json(json!({"message": "hi"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": "session-2"})))
            .mount(&server)
            .await;

        let answer = api(&server).chat("hi", None).await.unwrap();
        assert_eq!(answer.content, EMPTY_REPLY);
    }

    #[tokio::test]
    async fn test_error_detail_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-content"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"detail": "No content generated."})),
            )
            .mount(&server)
            .await;

        let err = api(&server).generate("p", "carousel").await.unwrap_err();
        match err {
            BotError::AgentApi(msg) => {
                assert!(msg.contains("500"));
                assert!(msg.contains("No content generated."));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(json!({"content": "late"})),
            )
            .mount(&server)
            .await;

        let api = HttpAgentApi::new(&server.uri(), Duration::from_millis(50), Duration::from_secs(5));
        assert!(matches!(api.chat("hi", None).await, Err(BotError::AgentApi(_))));
    }
}
