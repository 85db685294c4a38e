//! Agent：运行时抽象、CLI 实现、提示词、单轮编排与任务执行

pub mod claude_cli;
pub mod client;
pub mod mock;
pub mod prompts;
pub mod runtime;
pub mod task;

pub use claude_cli::ClaudeCliRuntime;
pub use client::{
    AgentClient, ChatEvent, ChatReply, ContentMetadata, ContentRequest, GenerateError,
    GeneratedContent, TurnMetadata, TurnOverrides, NO_TEXT_FALLBACK,
};
pub use mock::ScriptedRuntime;
pub use runtime::{AgentEvent, AgentOptions, AgentRequest, AgentRuntime, AgentStream, RunResult};
pub use task::{TaskOutcome, TaskRunner, TaskSpec};
