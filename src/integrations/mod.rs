//! 外部集成：Slack 机器人（需 slack feature 与公网可达的回调地址）

#[cfg(feature = "slack")]
pub mod slack;
