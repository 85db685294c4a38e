//! 脚本化运行时（测试与 --dry-run 用，无需 CLI）
//!
//! 每次调用按顺序回放同一组事件；echo 模式回显提示词末行。所有请求都会被记录，便于断言。

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use super::runtime::{AgentEvent, AgentRequest, AgentRuntime, AgentStream, RunResult};
use crate::core::{truncate_chars, AgentError};

enum Script {
    Events(Vec<Result<AgentEvent, AgentError>>),
    StartError(AgentError),
    Echo,
}

/// 脚本化 Agent 运行时
pub struct ScriptedRuntime {
    script: Script,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedRuntime {
    /// 每次调用都回放 events
    pub fn new(events: Vec<Result<AgentEvent, AgentError>>) -> Self {
        Self::with_script(Script::Events(events))
    }

    /// 单段文本 + 终止事件
    pub fn reply(text: &str, cost_usd: f64) -> Self {
        Self::new(vec![
            Ok(AgentEvent::Text(text.to_string())),
            Ok(AgentEvent::Result(RunResult {
                is_error: false,
                cost_usd,
                duration_ms: 10,
                session_id: None,
            })),
        ])
    }

    /// 启动即失败
    pub fn failing(error: AgentError) -> Self {
        Self::with_script(Script::StartError(error))
    }

    /// 回显提示词最后一行
    pub fn echo() -> Self {
        Self::with_script(Script::Echo)
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的请求（按顺序）
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn run(&self, request: AgentRequest) -> Result<AgentStream, AgentError> {
        let events = match &self.script {
            Script::Events(events) => events.clone(),
            Script::StartError(e) => return Err(e.clone()),
            Script::Echo => {
                let last = request.prompt.lines().last().unwrap_or("(no input)");
                vec![
                    Ok(AgentEvent::Text(format!(
                        "Echo from dry run: {}",
                        truncate_chars(last, 200)
                    ))),
                    Ok(AgentEvent::Result(RunResult::default())),
                ]
            }
        };
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        Ok(Box::pin(stream::iter(events)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
