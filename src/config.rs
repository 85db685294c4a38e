//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `QUILL__*` 覆盖（双下划线表示嵌套，如 `QUILL__AGENT__MAX_TURNS=10`），
//! 最后叠加部署环境沿用的扁平变量名（`SKILLS_DIR`、`MAX_TURNS`、`SUPABASE_URL` 等）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub server: ServerSection,
    pub store: StoreSection,
    pub slack: SlackSection,
    pub video: VideoSection,
}

/// [agent] 段：技能目录、单次调用的轮数与预算上限、CLI 路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Agent 工作目录，技能位于 `<skills_dir>/.claude/skills`
    pub skills_dir: PathBuf,
    pub max_turns: u32,
    pub max_budget_usd: f64,
    /// Agent CLI 可执行文件
    pub cli_path: String,
    pub permission_mode: String,
    /// 有状态对话可用的工具
    pub chat_tools: Vec<String>,
    /// 无状态内容生成可用的工具（只读）
    pub content_tools: Vec<String>,
    /// 是否把上一轮的 Agent 会话令牌带回（--resume）
    pub resume_sessions: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            skills_dir: PathBuf::from("/app"),
            max_turns: 20,
            max_budget_usd: 5.0,
            cli_path: "claude".to_string(),
            permission_mode: "bypassPermissions".to_string(),
            chat_tools: ["Read", "Glob", "Grep", "Write", "Edit", "WebFetch"]
                .into_iter()
                .map(String::from)
                .collect(),
            content_tools: ["Read", "Glob", "Grep"].into_iter().map(String::from).collect(),
            resume_sessions: false,
        }
    }
}

impl AgentSection {
    pub fn skills_path(&self) -> PathBuf {
        self.skills_dir.join(".claude").join("skills")
    }
}

/// [server] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// [store] 段：配置了 supabase_url 时使用 Supabase，否则使用本地 SQLite
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub sqlite_path: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_key: None,
            sqlite_path: None,
            request_timeout_secs: 30,
        }
    }
}

/// [slack] 段：机器人令牌、签名密钥、Agent API 地址与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlackSection {
    pub bot_token: Option<String>,
    pub app_token: Option<String>,
    /// 未配置时不校验请求签名（仅用于本地调试）
    pub signing_secret: Option<String>,
    pub agent_api_url: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    /// 慢内容（视频、轮播图等）的请求超时
    pub slow_request_timeout_secs: u64,
    /// Slack 单条消息上限 4000，留出截断提示的余量
    pub reply_limit: usize,
}

impl Default for SlackSection {
    fn default() -> Self {
        Self {
            bot_token: None,
            app_token: None,
            signing_secret: None,
            agent_api_url: "http://127.0.0.1:8000".to_string(),
            port: 3001,
            request_timeout_secs: 120,
            slow_request_timeout_secs: 600,
            reply_limit: 3900,
        }
    }
}

/// [video] 段：Remotion 工程与渲染参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoSection {
    pub project_path: Option<PathBuf>,
    pub composition: String,
    pub entry: String,
    pub output: String,
    pub render_timeout_secs: u64,
    /// 容器内运行时渲染需要软件 GL 与单并发
    pub containerized: bool,
}

impl Default for VideoSection {
    fn default() -> Self {
        Self {
            project_path: None,
            composition: "GeneratedVideo".to_string(),
            entry: "src/index.ts".to_string(),
            output: "out/generated.mp4".to_string(),
            render_timeout_secs: 300,
            containerized: false,
        }
    }
}

/// 扁平环境变量 → 嵌套配置键
const LEGACY_ENV: &[(&str, &str)] = &[
    ("SKILLS_DIR", "agent.skills_dir"),
    ("MAX_TURNS", "agent.max_turns"),
    ("MAX_BUDGET_USD", "agent.max_budget_usd"),
    ("CLAUDE_CLI_PATH", "agent.cli_path"),
    ("PORT", "server.port"),
    ("SUPABASE_URL", "store.supabase_url"),
    ("SUPABASE_KEY", "store.supabase_key"),
    ("DATABASE_PATH", "store.sqlite_path"),
    ("SLACK_BOT_TOKEN", "slack.bot_token"),
    ("SLACK_APP_TOKEN", "slack.app_token"),
    ("SLACK_SIGNING_SECRET", "slack.signing_secret"),
    ("AGENT_API_URL", "slack.agent_api_url"),
    ("VIDEO_PROJECT_PATH", "video.project_path"),
    ("RUNNING_IN_DOCKER", "video.containerized"),
];

/// 从 config 目录加载配置，环境变量 QUILL__* 与扁平变量可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 QUILL__*（双下划线表示嵌套键）
/// 4. 最后叠加 LEGACY_ENV 中的扁平变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("QUILL")
            .separator("__")
            .try_parsing(true),
    );

    for (var, key) in LEGACY_ENV {
        let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
        builder = builder.set_override_option(*key, value)?;
    }

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_turns, 20);
        assert_eq!(cfg.agent.max_budget_usd, 5.0);
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.video.render_timeout_secs, 300);
        assert_eq!(cfg.slack.reply_limit, 3900);
        assert_eq!(cfg.agent.content_tools, vec!["Read", "Glob", "Grep"]);
        assert!(!cfg.agent.resume_sessions);
    }

    #[test]
    fn test_skills_path() {
        let mut agent = AgentSection::default();
        agent.skills_dir = PathBuf::from("/srv/app");
        assert_eq!(agent.skills_path(), PathBuf::from("/srv/app/.claude/skills"));
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quill.toml");
        std::fs::write(
            &path,
            "[agent]\nmax_turns = 7\n\n[store]\nsqlite_path = \"data/test.db\"\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_turns, 7);
        assert_eq!(cfg.store.sqlite_path, Some(PathBuf::from("data/test.db")));
        // 未写的段落保持默认
        assert_eq!(cfg.video.composition, "GeneratedVideo");
    }
}
