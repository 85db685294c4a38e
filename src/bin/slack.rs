//! Quill Slack 机器人
//!
//! 通过 Slack Events API 与斜杠命令转发到 Quill HTTP 服务。
//!
//! 环境变量:
//! - SLACK_BOT_TOKEN: Bot Token（xoxb-...）
//! - SLACK_SIGNING_SECRET: 请求签名密钥（未设置时不校验）
//! - AGENT_API_URL: Quill HTTP 服务地址（默认 http://127.0.0.1:8000）
//! - SUPABASE_URL / SUPABASE_KEY 或 DATABASE_PATH: 配置后用户会话映射跨重启保留
//! - VIDEO_PROJECT_PATH: Remotion 工程目录（未设置时不处理视频请求）
//!
//! 启动: cargo run --bin quill-slack -- [--config <path>]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use quill::config::load_config;
use quill::core::ShutdownManager;
use quill::integrations::slack::{create_router, SlackState};
use quill::memory::AgentMemory;
use quill::store::open_store;

/// Quill Slack 机器人
#[derive(Parser, Debug)]
#[command(name = "quill-slack", version, about, long_about = None)]
struct Args {
    /// 额外的 TOML 配置文件
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    quill::observability::init();

    let args = Args::parse();
    let cfg = load_config(args.config).context("Failed to load configuration")?;

    let store = match open_store(&cfg.store).await {
        Ok(store) => {
            tracing::info!("Slack sessions persisted in platform_users");
            Some(store)
        }
        Err(e) => {
            tracing::warn!("Store not available, sessions won't persist across restarts: {}", e);
            None
        }
    };
    let memory = store.clone().map(AgentMemory::new);

    let state = Arc::new(SlackState::from_config(&cfg, memory).context("Failed to configure Slack bot")?);
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", cfg.slack.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Quill Slack bot listening on http://{}", addr);
    tracing::info!("Events URL: http://YOUR_HOST:{}/slack/events", cfg.slack.port);
    tracing::info!("Commands URL: http://YOUR_HOST:{}/slack/commands", cfg.slack.port);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let waiter = Arc::clone(&shutdown);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { waiter.wait_for_shutdown().await })
        .await
        .context("Server error")?;

    if let Some(store) = store {
        store.close().await;
    }
    Ok(())
}
