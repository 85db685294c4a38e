//! Quill HTTP 服务
//!
//! 用法：`quill-server [--config <path>] [--dry-run]`
//!
//! - `--config`: 额外的 TOML 配置文件，覆盖 config/default.toml
//! - `--dry-run`: 用回显运行时代替 Agent CLI，便于联调
//!
//! 存储打不开时不退出，降级为只提供 /、/health、/generate-content。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use quill::agent::{AgentRuntime, ClaudeCliRuntime, ScriptedRuntime};
use quill::config::load_config;
use quill::core::ShutdownManager;
use quill::server::{router, AppState};
use quill::store::open_store;

/// Quill 营销内容智能体 HTTP 服务
#[derive(Parser, Debug)]
#[command(name = "quill-server", version, about, long_about = None)]
struct Args {
    /// 额外的 TOML 配置文件
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// 用回显运行时代替 Agent CLI
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    quill::observability::init();

    let args = Args::parse();
    let cfg = load_config(args.config).context("Failed to load configuration")?;

    let store = match open_store(&cfg.store).await {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!("Store unavailable, running in degraded mode: {}", e);
            None
        }
    };

    let runtime: Arc<dyn AgentRuntime> = if args.dry_run {
        tracing::info!("Dry run: agent replies are echoed");
        Arc::new(ScriptedRuntime::echo())
    } else {
        Arc::new(ClaudeCliRuntime::new(&cfg.agent.cli_path))
    };
    tracing::info!(
        runtime = runtime.name(),
        skills = %cfg.agent.skills_path().display(),
        "Agent runtime ready"
    );

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let state = Arc::new(AppState::new(cfg, runtime, store.clone()));
    let app = router(state);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Quill server listening on http://{}", addr);

    let waiter = Arc::clone(&shutdown);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { waiter.wait_for_shutdown().await })
        .await
        .context("Server error")?;

    if let Some(store) = store {
        store.close().await;
    }
    tracing::info!("Quill server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from(["quill-server", "--config", "local.toml", "--dry-run"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("local.toml")));
        assert!(args.dry_run);

        let args = Args::try_parse_from(["quill-server"]).unwrap();
        assert!(args.config.is_none());
        assert!(!args.dry_run);
    }

    #[test]
    fn test_config_requires_value() {
        assert!(Args::try_parse_from(["quill-server", "--config"]).is_err());
        assert!(Args::try_parse_from(["quill-server", "--verbose"]).is_err());
    }
}
