//! Agent 运行时抽象
//!
//! 一次调用 = 一个逻辑请求：返回事件流，零或多个文本片段之后跟恰好一个 Result（费用、耗时、错误标记）。

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;

use crate::config::AgentSection;
use crate::core::AgentError;

/// 运行时产生的事件流
pub type AgentStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, AgentError>> + Send>>;

/// 终止事件携带的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunResult {
    pub is_error: bool,
    pub cost_usd: f64,
    pub duration_ms: u64,
    /// 可用于 --resume 的会话令牌
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// 助手文本片段
    Text(String),
    /// 工具调用（只记录名称）
    ToolUse { name: String },
    /// 终止事件
    Result(RunResult),
}

/// 单次调用的参数
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOptions {
    pub cwd: PathBuf,
    pub permission_mode: String,
    pub max_turns: u32,
    pub max_budget_usd: f64,
    pub allowed_tools: Vec<String>,
    pub resume: Option<String>,
    pub system_prompt: Option<String>,
}

impl AgentOptions {
    /// 按配置构建，tools 为本次允许的工具列表
    pub fn from_config(cfg: &AgentSection, tools: &[String]) -> Self {
        Self {
            cwd: cfg.skills_dir.clone(),
            permission_mode: cfg.permission_mode.clone(),
            max_turns: cfg.max_turns,
            max_budget_usd: cfg.max_budget_usd,
            allowed_tools: tools.to_vec(),
            resume: None,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    pub prompt: String,
    pub options: AgentOptions,
}

/// 外部 Agent 运行时
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// 发起一次调用；启动失败直接返回错误，运行中的失败以流中的 Err 返回
    async fn run(&self, request: AgentRequest) -> Result<AgentStream, AgentError>;

    fn name(&self) -> &str;
}
