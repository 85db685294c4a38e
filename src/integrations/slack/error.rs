//! Slack 机器人错误：视频流水线各阶段各有一条面向用户的消息

use thiserror::Error;

use crate::core::truncate_chars;

/// 通用失败提示
pub const FAILURE_MESSAGE: &str = "Sorry, something went wrong. Please try again.";
/// 附在通用失败提示后的错误详情上限
const DETAIL_CHARS: usize = 200;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// 调用 Agent API 失败（网络、超时或非 2xx）
    #[error("Agent API error: {0}")]
    AgentApi(String),

    #[error("Slack API error: {0}")]
    Platform(String),

    #[error("I couldn't find video code in the response. Here's what I got:\n\n{reply_preview}")]
    NoCodeBlock { reply_preview: String },

    #[error("Failed to write the video source: {0}")]
    Write(String),

    #[error("Video rendering failed: {0}")]
    Render(String),

    #[error("The video rendered but the upload failed: {0}")]
    Upload(String),
}

impl BotError {
    /// 回给 Slack 用户的文本
    pub fn user_message(&self) -> String {
        match self {
            BotError::NoCodeBlock { .. }
            | BotError::Write(_)
            | BotError::Render(_)
            | BotError::Upload(_) => self.to_string(),
            other => {
                let detail = other.to_string();
                format!("{}\n`{}`", FAILURE_MESSAGE, truncate_chars(&detail, DETAIL_CHARS))
            }
        }
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        BotError::AgentApi(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_errors_are_wrapped_and_capped() {
        let msg = BotError::AgentApi("x".repeat(500)).user_message();
        assert!(msg.starts_with(FAILURE_MESSAGE));
        let detail = msg.lines().last().unwrap().trim_matches('`');
        assert_eq!(detail.chars().count(), DETAIL_CHARS);
    }

    #[test]
    fn test_stage_errors_are_shown_verbatim() {
        let msg = BotError::Render("timed out after 300s".into()).user_message();
        assert_eq!(msg, "Video rendering failed: timed out after 300s");
    }
}
