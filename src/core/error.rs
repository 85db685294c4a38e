//! 错误类型
//!
//! - `StoreError`：存储层唯一的失败信号，携带底层原因；不重试、不部分应用
//! - `AgentError`：外部 Agent 运行时的封闭错误集合（未安装 / 连接 / 进程 / 解析 / 通用）

use thiserror::Error;

/// 存储失败
#[derive(Error, Debug)]
pub enum StoreError {
    /// 缺少存储端点或凭据：仅影响有状态端点，服务仍可启动
    #[error("Store not configured: {0}")]
    NotConfigured(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Database(format!("malformed row: {}", e))
    }
}

/// Agent 运行时失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Claude Code CLI not installed")]
    CliNotFound(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Process failed: {}", .stderr.as_deref().filter(|s| !s.is_empty()).unwrap_or("(no stderr)"))]
    Process {
        exit_code: Option<i32>,
        stderr: Option<String>,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("SDK error: {0}")]
    Sdk(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_messages() {
        assert_eq!(
            AgentError::CliNotFound("claude".into()).to_string(),
            "Claude Code CLI not installed"
        );
        assert_eq!(
            AgentError::Process {
                exit_code: Some(1),
                stderr: Some("boom".into())
            }
            .to_string(),
            "Process failed: boom"
        );
        assert_eq!(
            AgentError::Process {
                exit_code: Some(1),
                stderr: None
            }
            .to_string(),
            "Process failed: (no stderr)"
        );
        assert_eq!(AgentError::Parse("bad".into()).to_string(), "Parse error: bad");
    }

    #[test]
    fn test_store_error_wraps_cause() {
        let e = StoreError::Database("connection refused".into());
        assert_eq!(e.to_string(), "Database error: connection refused");
    }
}
