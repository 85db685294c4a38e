//! 有状态 Agent 客户端：单轮对话的编排
//!
//! 一轮的写入顺序固定：解析会话 → 记录用户消息 → 调用运行时 → 记录助手消息 → 更新会话摘要与恢复令牌。
//! 同一会话上的并发请求不加锁，摘要以最后写入者为准。

use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use super::prompts::{build_prompt, CHAT_SYSTEM_PROMPT};
use super::runtime::{AgentEvent, AgentOptions, AgentRequest, AgentRuntime, RunResult};
use crate::config::AgentSection;
use crate::core::{preview, AgentError, StoreError};
use crate::memory::{AgentMemory, NewContent};
use crate::store::{Role, SessionPatch, AGENT_SESSION_KEY};

/// 整轮没有任何文本片段（例如只调用了工具）时的回复
pub const NO_TEXT_FALLBACK: &str =
    "I finished working on that but have no text reply to show. Ask me to summarize what I did.";

/// 流式对话事件（SSE 输出同样的结构）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Text {
        content: String,
        session_id: String,
    },
    Result {
        session_id: String,
        is_error: bool,
        cost_usd: f64,
        duration_ms: u64,
    },
    Error {
        session_id: String,
        error: String,
    },
}

/// 一轮调用的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    pub is_error: bool,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
}

impl From<&RunResult> for TurnMetadata {
    fn from(r: &RunResult) -> Self {
        Self {
            is_error: r.is_error,
            cost_usd: Some(r.cost_usd),
            duration_ms: Some(r.duration_ms),
        }
    }
}

/// 非流式对话的结果；error 为 Some 时 content 为空
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub content: String,
    pub session_id: String,
    pub metadata: TurnMetadata,
    pub error: Option<String>,
}

/// 单次调用覆盖配置中的轮数与预算
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnOverrides {
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
}

/// 无状态内容生成请求
#[derive(Debug, Clone)]
pub struct ContentRequest {
    pub prompt: String,
    pub content_type: String,
    pub additional_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentMetadata {
    pub is_error: bool,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedContent {
    pub content: String,
    pub metadata: ContentMetadata,
}

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("No content generated. Check that skills are properly loaded.")]
    Empty,
}

/// Agent 客户端（可廉价克隆，供流式任务在后台持有）
#[derive(Clone)]
pub struct AgentClient {
    runtime: Arc<dyn AgentRuntime>,
    memory: Option<AgentMemory>,
    config: Arc<AgentSection>,
}

impl AgentClient {
    pub fn new(runtime: Arc<dyn AgentRuntime>, memory: Option<AgentMemory>, config: AgentSection) -> Self {
        Self {
            runtime,
            memory,
            config: Arc::new(config),
        }
    }

    pub fn memory(&self) -> Option<&AgentMemory> {
        self.memory.as_ref()
    }

    pub fn config(&self) -> &AgentSection {
        &self.config
    }

    fn require_memory(&self) -> Result<&AgentMemory, StoreError> {
        self.memory.as_ref().ok_or_else(|| {
            StoreError::NotConfigured("Agent not initialized. Check database connection.".into())
        })
    }

    /// 非流式对话：缓冲全部片段后返回
    pub async fn chat_sync(&self, message: &str, session_id: Option<&str>) -> Result<ChatReply, StoreError> {
        self.run_turn(message, session_id, None, TurnOverrides::default(), None)
            .await
    }

    /// 流式对话：会话解析和用户消息写入完成后立即返回事件接收端，其余在后台完成
    ///
    /// 接收端被提前丢弃时本轮仍会跑完并写入存储。
    pub async fn chat_stream(
        &self,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<(String, mpsc::Receiver<ChatEvent>), StoreError> {
        let memory = self.require_memory()?;
        let (sid, metadata) = self.resolve_session(memory, session_id).await?;
        memory
            .add_message(&sid, Role::User, message, Map::new())
            .await?;

        let (tx, rx) = mpsc::channel(64);
        let client = self.clone();
        let message = message.to_string();
        let sid_for_task = sid.clone();
        tokio::spawn(async move {
            let events = tx.clone();
            if let Err(e) = client
                .drive_turn(&sid_for_task, metadata, &message, None, TurnOverrides::default(), Some(events))
                .await
            {
                tracing::error!(session_id = %sid_for_task, "streamed turn failed: {}", e);
                // 存储失败也要以 error 事件收尾
                let _ = tx
                    .send(ChatEvent::Error {
                        session_id: sid_for_task.clone(),
                        error: e.to_string(),
                    })
                    .await;
            }
        });
        Ok((sid, rx))
    }

    /// 在指定（或新建）会话上跑一轮
    ///
    /// system_prompt 为 None 时使用固定的对话前言。
    pub async fn run_turn(
        &self,
        message: &str,
        session_id: Option<&str>,
        system_prompt: Option<&str>,
        overrides: TurnOverrides,
        events: Option<mpsc::Sender<ChatEvent>>,
    ) -> Result<ChatReply, StoreError> {
        let memory = self.require_memory()?;
        let (sid, metadata) = self.resolve_session(memory, session_id).await?;
        memory
            .add_message(&sid, Role::User, message, Map::new())
            .await?;
        self.drive_turn(&sid, metadata, message, system_prompt, overrides, events)
            .await
    }

    /// 不存在或未提供的会话一律新建（type = chat）
    async fn resolve_session(
        &self,
        memory: &AgentMemory,
        session_id: Option<&str>,
    ) -> Result<(String, Map<String, Value>), StoreError> {
        if let Some(id) = session_id.filter(|s| !s.is_empty()) {
            if let Some(existing) = memory.get_session(id).await? {
                return Ok((existing.session_id, existing.metadata));
            }
            tracing::info!(session_id = id, "unknown session, starting fresh");
        }
        let mut metadata = Map::new();
        metadata.insert("type".into(), json!("chat"));
        let sid = memory.create_session(metadata.clone()).await?;
        Ok((sid, metadata))
    }

    async fn drive_turn(
        &self,
        session_id: &str,
        session_metadata: Map<String, Value>,
        message: &str,
        system_prompt: Option<&str>,
        overrides: TurnOverrides,
        events: Option<mpsc::Sender<ChatEvent>>,
    ) -> Result<ChatReply, StoreError> {
        let memory = self.require_memory()?;
        let emit = |event: ChatEvent| {
            let events = events.clone();
            async move {
                if let Some(tx) = events {
                    // 接收端已关闭时忽略，本轮照常完成
                    let _ = tx.send(event).await;
                }
            }
        };
        let fail = |error: AgentError| {
            tracing::warn!(session_id, "agent turn failed: {}", error);
            ChatReply {
                content: String::new(),
                session_id: session_id.to_string(),
                metadata: TurnMetadata {
                    is_error: true,
                    ..Default::default()
                },
                error: Some(error.to_string()),
            }
        };

        let mut options = AgentOptions::from_config(&self.config, &self.config.chat_tools);
        options.system_prompt = Some(system_prompt.unwrap_or(CHAT_SYSTEM_PROMPT).to_string());
        if let Some(turns) = overrides.max_turns {
            options.max_turns = turns;
        }
        if let Some(budget) = overrides.max_budget_usd {
            options.max_budget_usd = budget;
        }
        if self.config.resume_sessions {
            options.resume = session_metadata
                .get(AGENT_SESSION_KEY)
                .and_then(Value::as_str)
                .map(String::from);
        }

        let request = AgentRequest {
            prompt: message.to_string(),
            options,
        };
        let mut stream = match self.runtime.run(request).await {
            Ok(stream) => stream,
            Err(e) => {
                let reply = fail(e);
                emit(error_event(session_id, &reply)).await;
                return Ok(reply);
            }
        };

        let mut parts: Vec<String> = Vec::new();
        let mut result: Option<RunResult> = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(AgentEvent::Text(text)) => {
                    emit(ChatEvent::Text {
                        content: text.clone(),
                        session_id: session_id.to_string(),
                    })
                    .await;
                    parts.push(text);
                }
                Ok(AgentEvent::ToolUse { name }) => {
                    tracing::debug!(session_id, tool = %name, "agent tool use");
                }
                Ok(AgentEvent::Result(r)) => {
                    result = Some(r);
                    break;
                }
                Err(e) => {
                    let reply = fail(e);
                    emit(error_event(session_id, &reply)).await;
                    return Ok(reply);
                }
            }
        }
        drop(stream);

        let full = parts.concat();
        if full.is_empty() {
            emit(ChatEvent::Text {
                content: NO_TEXT_FALLBACK.to_string(),
                session_id: session_id.to_string(),
            })
            .await;
        } else {
            memory
                .add_message(session_id, Role::Assistant, &full, Map::new())
                .await?;
        }

        let mut patch = SessionPatch::default();
        if !full.is_empty() {
            patch.summary = Some(preview(&full, 200));
        }
        if let Some(token) = result.as_ref().and_then(|r| r.session_id.as_deref()) {
            if session_metadata.get(AGENT_SESSION_KEY).and_then(Value::as_str) != Some(token) {
                let mut metadata = session_metadata;
                metadata.insert(AGENT_SESSION_KEY.into(), json!(token));
                patch.metadata = Some(metadata);
            }
        }
        memory.update_session(session_id, patch).await?;

        let metadata = result.as_ref().map(TurnMetadata::from).unwrap_or_default();
        emit(ChatEvent::Result {
            session_id: session_id.to_string(),
            is_error: metadata.is_error,
            cost_usd: metadata.cost_usd.unwrap_or(0.0),
            duration_ms: metadata.duration_ms.unwrap_or(0),
        })
        .await;

        Ok(ChatReply {
            content: if full.is_empty() {
                NO_TEXT_FALLBACK.to_string()
            } else {
                full
            },
            session_id: session_id.to_string(),
            metadata,
            error: None,
        })
    }

    /// 无状态内容生成：只读工具，不建会话；成功后尽力写入内容台账
    pub async fn generate_content(&self, request: &ContentRequest) -> Result<GeneratedContent, GenerateError> {
        let prompt = build_prompt(
            &request.prompt,
            &request.content_type,
            request.additional_context.as_deref(),
        );
        let options = AgentOptions::from_config(&self.config, &self.config.content_tools);
        let mut stream = self.runtime.run(AgentRequest { prompt, options }).await?;

        let mut content = String::new();
        let mut metadata = ContentMetadata {
            is_error: false,
            cost_usd: None,
            duration_ms: None,
            content_type: request.content_type.clone(),
        };
        while let Some(item) = stream.next().await {
            match item? {
                AgentEvent::Text(text) => content.push_str(&text),
                AgentEvent::ToolUse { name } => tracing::debug!(tool = %name, "content tool use"),
                AgentEvent::Result(r) => {
                    metadata.is_error = r.is_error;
                    metadata.cost_usd = Some(r.cost_usd);
                    metadata.duration_ms = Some(r.duration_ms);
                }
            }
        }
        if content.is_empty() {
            return Err(GenerateError::Empty);
        }

        if let Some(memory) = &self.memory {
            let mut meta = Map::new();
            meta.insert("prompt".into(), json!(preview(&request.prompt, 200)));
            if let Some(cost) = metadata.cost_usd {
                meta.insert("cost_usd".into(), json!(cost));
            }
            let logged = memory
                .log_content(NewContent {
                    content: content.clone(),
                    content_type: request.content_type.clone(),
                    platform: platform_for(&request.content_type).map(String::from),
                    metadata: meta,
                    ..Default::default()
                })
                .await;
            if let Err(e) = logged {
                tracing::warn!("content generated but not logged: {}", e);
            }
        }

        Ok(GeneratedContent { content, metadata })
    }
}

fn error_event(session_id: &str, reply: &ChatReply) -> ChatEvent {
    ChatEvent::Error {
        session_id: session_id.to_string(),
        error: reply.error.clone().unwrap_or_default(),
    }
}

/// 内容类型对应的发布平台
fn platform_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "linkedin" | "linkedin-post" | "carousel" => Some("linkedin"),
        "email" => Some("email"),
        "seo" | "geo" | "landing-page" => Some("web"),
        _ => None,
    }
}
