//! Claude Code CLI 运行时：`claude -p --output-format stream-json`
//!
//! 在技能目录下启动 CLI 子进程，逐行解析 stdout 的 JSON 消息：
//! `assistant` → 文本 / 工具调用，`result` → 终止事件。子进程随流一起释放（kill_on_drop）。

use std::process::Stdio;

use async_trait::async_trait;
use futures_util::stream;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::runtime::{AgentEvent, AgentRequest, AgentRuntime, AgentStream, RunResult};
use crate::core::{truncate_chars, AgentError};

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CliLine {
    Assistant {
        message: CliMessage,
    },
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        session_id: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct CliMessage {
    #[serde(default)]
    content: Vec<CliBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CliBlock {
    Text { text: String },
    ToolUse { name: String },
    #[serde(other)]
    Other,
}

/// 解析一行 stream-json；超出预算的结果标记为错误
fn parse_line(line: &str, max_budget_usd: f64) -> Result<Vec<AgentEvent>, AgentError> {
    let parsed: CliLine = serde_json::from_str(line)
        .map_err(|e| AgentError::Parse(format!("{} in {:?}", e, truncate_chars(line, 200))))?;
    Ok(match parsed {
        CliLine::Assistant { message } => message
            .content
            .into_iter()
            .filter_map(|block| match block {
                CliBlock::Text { text } => Some(AgentEvent::Text(text)),
                CliBlock::ToolUse { name } => Some(AgentEvent::ToolUse { name }),
                CliBlock::Other => None,
            })
            .collect(),
        CliLine::Result {
            is_error,
            total_cost_usd,
            duration_ms,
            session_id,
        } => {
            let cost_usd = total_cost_usd.unwrap_or(0.0);
            let over_budget = cost_usd > max_budget_usd;
            if over_budget {
                tracing::warn!(cost_usd, max_budget_usd, "agent run exceeded budget");
            }
            vec![AgentEvent::Result(RunResult {
                is_error: is_error || over_budget,
                cost_usd,
                duration_ms: duration_ms.unwrap_or(0),
                session_id,
            })]
        }
        CliLine::Other => Vec::new(),
    })
}

/// 通过本地 CLI 调用 Agent
pub struct ClaudeCliRuntime {
    cli_path: String,
}

impl ClaudeCliRuntime {
    pub fn new(cli_path: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
        }
    }

    fn command(&self, request: &AgentRequest) -> Command {
        let opts = &request.options;
        let mut cmd = Command::new(&self.cli_path);
        cmd.arg("-p")
            .arg(&request.prompt)
            .args(["--output-format", "stream-json", "--verbose"])
            .arg("--max-turns")
            .arg(opts.max_turns.to_string())
            .arg("--permission-mode")
            .arg(&opts.permission_mode);
        if !opts.allowed_tools.is_empty() {
            cmd.arg("--allowedTools").arg(opts.allowed_tools.join(","));
        }
        if let Some(resume) = &opts.resume {
            cmd.arg("--resume").arg(resume);
        }
        if let Some(system_prompt) = &opts.system_prompt {
            cmd.arg("--append-system-prompt").arg(system_prompt);
        }
        cmd.current_dir(&opts.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AgentRuntime for ClaudeCliRuntime {
    async fn run(&self, request: AgentRequest) -> Result<AgentStream, AgentError> {
        let max_budget_usd = request.options.max_budget_usd;
        tracing::info!(
            cwd = %request.options.cwd.display(),
            max_turns = request.options.max_turns,
            resume = request.options.resume.is_some(),
            "starting agent cli"
        );

        let mut child = self.command(&request).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AgentError::CliNotFound(self.cli_path.clone())
            } else {
                AgentError::Connection(e.to_string())
            }
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Connection("stdout not captured".into()))?;
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel::<Result<AgentEvent, AgentError>>(64);
        tokio::spawn(async move {
            let stderr_task = stderr.map(|mut err| {
                tokio::spawn(async move {
                    let mut buf = String::new();
                    let _ = err.read_to_string(&mut buf).await;
                    buf
                })
            });

            let mut lines = BufReader::new(stdout).lines();
            let mut saw_result = false;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match parse_line(&line, max_budget_usd) {
                            Ok(events) => {
                                for event in events {
                                    saw_result |= matches!(event, AgentEvent::Result(_));
                                    if tx.send(Ok(event)).await.is_err() {
                                        // 调用方已放弃，子进程随 child 一起被杀掉
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(AgentError::Connection(e.to_string()))).await;
                        return;
                    }
                }
            }

            let status = child.wait().await;
            let stderr = match stderr_task {
                Some(handle) => handle.await.ok(),
                None => None,
            };
            match status {
                Ok(status) if !status.success() && !saw_result => {
                    tracing::warn!(code = ?status.code(), "agent cli exited without result");
                    let _ = tx
                        .send(Err(AgentError::Process {
                            exit_code: status.code(),
                            stderr: stderr.map(|s| s.trim().to_string()),
                        }))
                        .await;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = tx.send(Err(AgentError::Connection(e.to_string()))).await;
                }
            }
        });

        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    fn name(&self) -> &str {
        "claude-cli"
    }
}
