//! Quill - 营销内容智能体服务
//!
//! 模块划分：
//! - **agent**: Agent 运行时抽象（CLI 子进程 / 脚本化）、提示词、单轮编排、任务执行
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、优雅关闭、文本工具
//! - **integrations**: Slack 机器人（需 slack feature）
//! - **memory**: 记忆网关：会话、消息、任务、内容日志、偏好、平台用户
//! - **observability**: 日志初始化
//! - **server**: HTTP 接口（axum）
//! - **store**: 持久化后端（SQLite / Supabase）

pub mod agent;
pub mod config;
pub mod core;
pub mod integrations;
pub mod memory;
pub mod observability;
pub mod server;
pub mod store;
