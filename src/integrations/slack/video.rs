//! 视频流水线：Agent 补全模板 → 取最大的 TSX 代码块 → 写入 Remotion 工程 → 渲染
//!
//! 每一步失败都直接结束并给用户对应的提示，不重试。上传由调用方完成。

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use super::api::AgentApi;
use super::error::BotError;
use crate::agent::prompts::video_prompt;
use crate::config::VideoSection;
use crate::core::truncate_chars;

/// 生成的组件在工程中的位置
pub const GENERATED_SOURCE: &str = "src/GeneratedVideo.tsx";
/// 找不到代码块时展示的原始回复长度
const REPLY_PREVIEW_CHARS: usize = 1000;
/// 渲染失败时保留的 stderr 长度
const STDERR_CHARS: usize = 500;

static CODE_BLOCK_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 提取回复中最大的 ```tsx / ```typescript / ```ts 代码块
pub fn extract_largest_code_block(reply: &str) -> Option<String> {
    let re = CODE_BLOCK_RE
        .get_or_init(|| Regex::new(r"```(?:tsx|typescript|ts)[ \t]*\r?\n([\s\S]*?)```").ok())
        .as_ref()?;
    re.captures_iter(reply)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|code| !code.is_empty())
        .max_by_key(|code| code.len())
        .map(String::from)
}

/// 外部渲染工具
#[async_trait]
pub trait Renderer: Send + Sync {
    /// 在工程目录中渲染，返回产物路径
    async fn render(&self, project: &Path) -> Result<PathBuf, BotError>;
}

/// `npx remotion render <entry> <composition> <output>`
pub struct RemotionRenderer {
    program: String,
    entry: String,
    composition: String,
    output: String,
    timeout: Duration,
    containerized: bool,
}

impl RemotionRenderer {
    pub fn from_config(cfg: &VideoSection) -> Self {
        Self {
            program: "npx".to_string(),
            entry: cfg.entry.clone(),
            composition: cfg.composition.clone(),
            output: cfg.output.clone(),
            timeout: Duration::from_secs(cfg.render_timeout_secs),
            containerized: cfg.containerized,
        }
    }

    /// 替换可执行文件（本地调试或测试用）
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "remotion".to_string(),
            "render".to_string(),
            self.entry.clone(),
            self.composition.clone(),
            self.output.clone(),
        ];
        if self.containerized {
            // 容器内没有 GPU
            args.push("--gl=swangle".to_string());
            args.push("--concurrency=1".to_string());
        }
        args
    }
}

#[async_trait]
impl Renderer for RemotionRenderer {
    async fn render(&self, project: &Path) -> Result<PathBuf, BotError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args()).current_dir(project).kill_on_drop(true);
        tracing::info!(project = %project.display(), composition = %self.composition, "rendering video");

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| BotError::Render(format!("timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| BotError::Render(format!("failed to start {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BotError::Render(format!(
                "exit {:?}: {}",
                output.status.code(),
                truncate_chars(stderr.trim(), STDERR_CHARS)
            )));
        }
        let rendered = project.join(&self.output);
        if !rendered.exists() {
            return Err(BotError::Render(format!(
                "no output file at {}",
                rendered.display()
            )));
        }
        Ok(rendered)
    }
}

/// 视频流水线
pub struct VideoPipeline {
    project_path: PathBuf,
    composition: String,
    renderer: Arc<dyn Renderer>,
}

impl VideoPipeline {
    pub fn new(project_path: PathBuf, composition: &str, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            project_path,
            composition: composition.to_string(),
            renderer,
        }
    }

    /// 未配置工程目录时返回 None
    pub fn from_config(cfg: &VideoSection) -> Option<Self> {
        let project = cfg.project_path.clone()?;
        Some(Self::new(
            project,
            &cfg.composition,
            Arc::new(RemotionRenderer::from_config(cfg)),
        ))
    }

    /// 生成并渲染，返回视频文件路径
    pub async fn produce(&self, api: &dyn AgentApi, request: &str) -> Result<PathBuf, BotError> {
        let reply = api
            .generate(&video_prompt(request, &self.composition), "video")
            .await?;

        let code = extract_largest_code_block(&reply).ok_or_else(|| BotError::NoCodeBlock {
            reply_preview: truncate_chars(&reply, REPLY_PREVIEW_CHARS).to_string(),
        })?;

        let source = self.project_path.join(GENERATED_SOURCE);
        if let Some(parent) = source.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BotError::Write(e.to_string()))?;
        }
        tokio::fs::write(&source, code)
            .await
            .map_err(|e| BotError::Write(format!("{}: {}", source.display(), e)))?;
        tracing::info!(source = %source.display(), "video source written");

        self.renderer.render(&self.project_path).await
    }
}
