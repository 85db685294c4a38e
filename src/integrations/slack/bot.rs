//! 机器人主逻辑：分类 → 确认 → 调用 Agent API → 回复
//!
//! 每条消息在自己的任务里顺序等待所有出站调用，不排队、不事后通知。

use std::sync::Arc;

use super::api::AgentApi;
use super::classifier::{classify, Classification};
use super::error::BotError;
use super::platform::{ChatPlatform, ReplyTarget, Upload};
use super::sessions::SessionDirectory;
use super::video::VideoPipeline;
use crate::core::truncate_chars;

pub const GREETING: &str = "Hi! How can I help with your marketing today?";
pub const THINKING: &str = "Thinking...";
pub const USAGE: &str = "Usage: `/marketing <your request>`\n\nExample: `/marketing Write a LinkedIn post about AI consulting`";
pub const CLEARED: &str = "Conversation cleared! I've forgotten our previous chat.";
pub const NOTHING_TO_CLEAR: &str = "No conversation to clear.";
pub const VIDEO_DISABLED: &str = "Video generation is not configured on this bot.";
const TRUNCATION_NOTE: &str = "\n\n_(Response truncated due to length)_";

/// 超出上限时截断并附上提示
pub fn truncate_for_slack(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    format!("{}{}", truncate_chars(text, limit), TRUNCATION_NOTE)
}

pub struct SlackBot {
    api: Arc<dyn AgentApi>,
    platform: Arc<dyn ChatPlatform>,
    sessions: SessionDirectory,
    video: Option<VideoPipeline>,
    reply_limit: usize,
}

impl SlackBot {
    pub fn new(
        api: Arc<dyn AgentApi>,
        platform: Arc<dyn ChatPlatform>,
        sessions: SessionDirectory,
        video: Option<VideoPipeline>,
        reply_limit: usize,
    ) -> Self {
        Self {
            api,
            platform,
            sessions,
            video,
            reply_limit,
        }
    }

    pub fn sessions(&self) -> &SessionDirectory {
        &self.sessions
    }

    /// 发送失败只记日志：没有别的渠道能告诉用户
    async fn say(&self, target: &ReplyTarget, text: &str) {
        if let Err(e) = self.platform.reply(target, text).await {
            tracing::error!(channel = target.channel(), "failed to send Slack reply: {}", e);
        }
    }

    /// 处理一条请求（@提及、私信或 /marketing）
    pub async fn handle_request(&self, target: &ReplyTarget, user_id: &str, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            self.say(target, GREETING).await;
            return;
        }

        let class = classify(text);
        tracing::info!(user_id, content_type = class.content_type, "Slack request classified");

        let result = self.dispatch(target, user_id, text, class).await;
        match result {
            Ok(Some(reply)) => {
                self.say(target, &truncate_for_slack(&reply, self.reply_limit))
                    .await
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(user_id, content_type = class.content_type, "Slack request failed: {}", e);
                self.say(target, &e.user_message()).await;
            }
        }
    }

    /// 返回需要回给用户的文本；视频路径直接上传文件，返回 None
    async fn dispatch(
        &self,
        target: &ReplyTarget,
        user_id: &str,
        text: &str,
        class: Classification,
    ) -> Result<Option<String>, BotError> {
        if class.is_video() {
            let Some(video) = &self.video else {
                return Ok(Some(VIDEO_DISABLED.to_string()));
            };
            if let Some(ack) = class.slow_ack {
                self.say(target, ack).await;
            }
            let path = video.produce(self.api.as_ref(), text).await?;
            self.platform
                .upload_file(
                    target.channel(),
                    target.thread_ts(),
                    Upload {
                        path: &path,
                        title: "Generated video",
                        comment: "Here's your video!",
                    },
                )
                .await?;
            return Ok(None);
        }

        if let Some(ack) = class.slow_ack {
            self.say(target, ack).await;
            let content = self.api.generate(text, class.content_type).await?;
            return Ok(Some(content));
        }

        self.say(target, THINKING).await;
        let session_id = self.sessions.get(user_id).await;
        let answer = self.api.chat(text, session_id.as_deref()).await?;
        if let Some(new_id) = answer.session_id.as_deref() {
            if session_id.as_deref() != Some(new_id) {
                let username = self.platform.user_name(user_id).await;
                self.sessions.set(user_id, new_id, username.as_deref()).await;
            }
        }
        Ok(Some(answer.content))
    }

    /// /clear
    pub async fn clear(&self, target: &ReplyTarget, user_id: &str) {
        let message = if self.sessions.clear(user_id).await {
            CLEARED
        } else {
            NOTHING_TO_CLEAR
        };
        self.say(target, message).await;
    }
}
