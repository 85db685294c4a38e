//! 任务执行器：把单轮对话包装成有状态的目标跟踪
//!
//! 建 task 会话 → 建任务（或接管已有任务）→ in_progress → 跑一轮 → completed / failed。
//! webhook_url 只保存，不回调。

use serde_json::{json, Map};

use super::client::{AgentClient, TurnMetadata, TurnOverrides};
use super::prompts::task_prompt;
use crate::core::{truncate_chars, StoreError};
use crate::memory::AgentMemory;
use crate::store::{TaskPatch, TaskStatus};

/// 任务结果中保留的最大字符数
const RESULT_SNIPPET_CHARS: usize = 1000;

/// 任务请求
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub goal: String,
    pub webhook_url: Option<String>,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task_id: String,
    pub session_id: String,
    pub status: TaskStatus,
    pub content: String,
    pub error: Option<String>,
    pub metadata: TurnMetadata,
}

/// 任务执行器
#[derive(Clone)]
pub struct TaskRunner {
    client: AgentClient,
    memory: AgentMemory,
}

impl TaskRunner {
    pub fn new(client: AgentClient, memory: AgentMemory) -> Self {
        Self { client, memory }
    }

    /// 运行任务直到本轮结束；existing_task_id 为 Some 时沿用已有任务记录
    pub async fn run(&self, spec: &TaskSpec, existing_task_id: Option<&str>) -> Result<TaskOutcome, StoreError> {
        let mut metadata = Map::new();
        metadata.insert("type".into(), json!("task"));
        metadata.insert("goal".into(), json!(spec.goal));
        let session_id = self.memory.create_session(metadata).await?;

        let task_id = match existing_task_id {
            Some(id) => id.to_string(),
            None => {
                self.memory
                    .create_task(&spec.goal, Some(&session_id), spec.webhook_url.as_deref())
                    .await?
            }
        };
        self.memory
            .update_task(
                &task_id,
                TaskPatch {
                    status: Some(TaskStatus::InProgress),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(task_id = %task_id, session_id = %session_id, "task started");
        if spec.webhook_url.is_some() {
            tracing::debug!(task_id = %task_id, "webhook stored, completion callback not sent");
        }

        let overrides = TurnOverrides {
            max_turns: spec.max_turns,
            max_budget_usd: spec.max_budget_usd,
        };
        let turn = self
            .client
            .run_turn(&task_prompt(&spec.goal), Some(&session_id), None, overrides, None)
            .await;
        let reply = match turn {
            Ok(reply) => reply,
            Err(e) => {
                // 存储失败时尽力标记任务失败，再把原错误交给调用方
                let marked = self
                    .memory
                    .update_task(
                        &task_id,
                        TaskPatch {
                            status: Some(TaskStatus::Failed),
                            error: Some(e.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                if let Err(mark_err) = marked {
                    tracing::warn!(task_id = %task_id, "could not mark task failed: {}", mark_err);
                }
                return Err(e);
            }
        };

        let cost = reply.metadata.cost_usd.unwrap_or(0.0);
        let (status, patch) = match &reply.error {
            Some(error) => (
                TaskStatus::Failed,
                TaskPatch {
                    status: Some(TaskStatus::Failed),
                    error: Some(error.clone()),
                    cost_usd: Some(cost),
                    ..Default::default()
                },
            ),
            None => (
                TaskStatus::Completed,
                TaskPatch {
                    status: Some(TaskStatus::Completed),
                    progress: Some("Goal completed".into()),
                    result: Some(json!({
                        "content": truncate_chars(&reply.content, RESULT_SNIPPET_CHARS)
                    })),
                    cost_usd: Some(cost),
                    ..Default::default()
                },
            ),
        };
        self.memory.update_task(&task_id, patch).await?;
        tracing::info!(task_id = %task_id, status = %status, cost_usd = cost, "task finished");

        Ok(TaskOutcome {
            task_id,
            session_id,
            status,
            content: reply.content,
            error: reply.error,
            metadata: reply.metadata,
        })
    }
}
