//! Slack 集成：Events API 与斜杠命令
//!
//! 先应答 Slack（3 秒内），再在后台任务里调用 Agent API 并回复。
//! 配置了签名密钥时校验每个请求的 `X-Slack-Signature`。

pub mod api;
pub mod bot;
pub mod classifier;
pub mod error;
pub mod events;
pub mod platform;
pub mod sessions;
pub mod signature;
pub mod video;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

pub use api::{AgentApi, HttpAgentApi};
pub use bot::SlackBot;
pub use error::BotError;
pub use platform::{ChatPlatform, ReplyTarget, SlackWebClient};
pub use sessions::SessionDirectory;
pub use video::{RemotionRenderer, Renderer, VideoPipeline};

use crate::config::AppConfig;
use crate::memory::AgentMemory;
use events::{Envelope, SlashCommand};

/// 去重集合超过此大小后清空
const MAX_TRACKED_EVENTS: usize = 10_000;

/// Slack 服务状态
pub struct SlackState {
    pub bot: Arc<SlackBot>,
    pub signing_secret: Option<String>,
    pub processed_events: Arc<RwLock<HashSet<String>>>,
}

impl SlackState {
    pub fn new(bot: SlackBot, signing_secret: Option<String>) -> Self {
        Self {
            bot: Arc::new(bot),
            signing_secret,
            processed_events: Arc::default(),
        }
    }

    /// 按配置装配；memory 为 Some 时会话映射持久化到 platform_users
    pub fn from_config(cfg: &AppConfig, memory: Option<AgentMemory>) -> Result<Self, BotError> {
        let token = cfg
            .slack
            .bot_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BotError::NotConfigured("SLACK_BOT_TOKEN must be set".into()))?;
        let platform = SlackWebClient::new(token, Duration::from_secs(cfg.slack.request_timeout_secs))?;
        let video = VideoPipeline::from_config(&cfg.video);
        if video.is_none() {
            tracing::info!("VIDEO_PROJECT_PATH not set, video requests will be declined");
        }
        let bot = SlackBot::new(
            Arc::new(HttpAgentApi::from_config(&cfg.slack)),
            Arc::new(platform),
            SessionDirectory::new(memory),
            video,
            cfg.slack.reply_limit,
        );
        let secret = cfg.slack.signing_secret.clone().filter(|s| !s.is_empty());
        if secret.is_none() {
            tracing::warn!("SLACK_SIGNING_SECRET not set, request signatures are not verified");
        }
        Ok(Self::new(bot, secret))
    }

    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> bool {
        let Some(secret) = self.signing_secret.as_deref() else {
            return true;
        };
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("");
        signature::verify(
            secret,
            header("x-slack-request-timestamp"),
            body,
            header("x-slack-signature"),
            chrono::Utc::now().timestamp(),
        )
    }

    /// 首次见到返回 true
    async fn mark_processed(&self, event_id: &str) -> bool {
        if event_id.is_empty() {
            return true;
        }
        let mut seen = self.processed_events.write().await;
        if seen.contains(event_id) {
            return false;
        }
        if seen.len() >= MAX_TRACKED_EVENTS {
            seen.clear();
        }
        seen.insert(event_id.to_string());
        true
    }
}

/// 创建 Slack 路由
pub fn create_router(state: Arc<SlackState>) -> Router {
    Router::new()
        .route("/slack/events", post(handle_events))
        .route("/slack/commands", post(handle_commands))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn unauthorized() -> Response {
    tracing::warn!("rejected Slack request with invalid signature");
    (StatusCode::UNAUTHORIZED, "invalid signature").into_response()
}

async fn handle_events(State(state): State<Arc<SlackState>>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.verify(&headers, &body) {
        return unauthorized();
    }
    let envelope: Envelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("invalid Slack event payload: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match envelope {
        Envelope::UrlVerification { challenge } => Json(json!({ "challenge": challenge })).into_response(),
        Envelope::EventCallback { event_id, event } => {
            // Slack 重试会带相同 event_id
            if !state.mark_processed(&event_id).await {
                tracing::debug!(event_id, "duplicate Slack event ignored");
                return StatusCode::OK.into_response();
            }
            if let Some(inbound) = event.into_inbound() {
                tracing::info!(
                    event_id,
                    user_id = %inbound.user_id,
                    mention = inbound.mention,
                    "Slack event accepted, spawning handler"
                );
                let handler = Arc::clone(&state.bot);
                tokio::spawn(async move {
                    handler.handle_request(&inbound.target, &inbound.user_id, &inbound.text)
                        .await;
                });
            }
            StatusCode::OK.into_response()
        }
        Envelope::Other => StatusCode::OK.into_response(),
    }
}

async fn handle_commands(State(state): State<Arc<SlackState>>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.verify(&headers, &body) {
        return unauthorized();
    }
    let Some(cmd) = SlashCommand::parse(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    tracing::info!(command = %cmd.command, user_id = %cmd.user_id, "Slack command received");

    let handler = Arc::clone(&state.bot);
    let target = cmd.target();
    let SlashCommand {
        command,
        text,
        user_id,
        ..
    } = cmd;
    match command.as_str() {
        "/clear" => {
            tokio::spawn(async move { handler.clear(&target, &user_id).await });
        }
        _ if text.is_empty() => {
            return Json(json!({ "response_type": "ephemeral", "text": bot::USAGE })).into_response();
        }
        _ => {
            tokio::spawn(async move {
                handler.handle_request(&target, &user_id, &text).await;
            });
        }
    }
    StatusCode::OK.into_response()
}
