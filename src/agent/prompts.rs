//! 提示词：内容类型 → 技能提示的静态表，以及对话 / 任务 / 视频的固定模板

use std::path::Path;

/// 内容类型 → 技能提示；未知类型回退到 general
const SKILL_HINTS: &[(&str, &str)] = &[
    (
        "linkedin",
        "Use the linkedin-viral skill to format this content for LinkedIn with hooks and engagement patterns.",
    ),
    (
        "email",
        "Use the direct-response-copy skill with THE SLIDE framework for this email content.",
    ),
    (
        "seo",
        "Use the seo-content skill to optimize this content for search engines.",
    ),
    (
        "geo",
        "Use the geo-content skill to optimize this content for AI citation and LLM discovery.",
    ),
    (
        "direct-response",
        "Use the direct-response-copy skill with THE SLIDE framework.",
    ),
    (
        "landing-page",
        "Use the landing-page-architecture skill with the 8-Section Framework: HERO, SUCCESS, PROBLEM-AGITATE, VALUE STACK, SOCIAL PROOF, TRANSFORMATION, SECONDARY CTA, FOOTER. Each section has ONE job.",
    ),
    (
        "carousel",
        "Use the pptx-generator skill with the carousel cookbook layouts (hook, numbered point, quote, CTA) and report the output file path.",
    ),
    (
        "listicle",
        "Use the pptx-generator skill to lay out each list item as its own numbered slide and report the output file path.",
    ),
    (
        "image",
        "Use the pptx-generator skill to produce a single branded slide suitable for export as an image and report the output file path.",
    ),
    (
        "general",
        "Apply the brand-voice skill to ensure consistent tone and messaging.",
    ),
];

/// 对话的固定系统前言
pub const CHAT_SYSTEM_PROMPT: &str = "You are a marketing content agent. Use the skills available in .claude/skills \
(brand-voice, linkedin-viral, direct-response-copy, seo-content, geo-content) whenever they apply, \
and answer with ready-to-publish copy unless the user asks for something else.";

/// 查找技能提示
pub fn skill_hint(content_type: &str) -> &'static str {
    SKILL_HINTS
        .iter()
        .find(|(ty, _)| *ty == content_type)
        .or_else(|| SKILL_HINTS.iter().find(|(ty, _)| *ty == "general"))
        .map(|(_, hint)| *hint)
        .unwrap_or_default()
}

/// 无状态内容生成的提示词
pub fn build_prompt(prompt: &str, content_type: &str, additional_context: Option<&str>) -> String {
    let mut parts = vec![
        format!("Content Type: {}", content_type),
        format!("Skill Hint: {}", skill_hint(content_type)),
        String::new(),
    ];
    if let Some(ctx) = additional_context.filter(|c| !c.is_empty()) {
        parts.push(format!("Additional Context: {}", ctx));
    }
    parts.push(format!("Request: {}", prompt));
    parts.join("\n")
}

/// 自主任务的目标展开提示词
pub fn task_prompt(goal: &str) -> String {
    format!(
        "You are an autonomous marketing agent. Your goal is:\n\n{}\n\n\
Work toward this goal step by step. Use the available skills (brand-voice, linkedin-viral, direct-response-copy, seo-content, geo-content) as appropriate.\n\n\
When you have completed the goal or made significant progress, summarize what you accomplished.",
        goal
    )
}

/// 视频生成：要求 Agent 补全 Remotion 组件
pub fn video_prompt(request: &str, composition: &str) -> String {
    format!(
        "Create a short marketing video as a single Remotion component.\n\n\
Request: {request}\n\n\
Requirements:\n\
- Export a React component named `{composition}` from one TSX file.\n\
- Import only from \"remotion\" and \"@remotion/google-fonts\".\n\
- Use Sequence blocks for scenes, spring/interpolate for motion, 30 fps, about 15 seconds.\n\
- Return the complete file in one ```tsx fenced code block.",
    )
}

/// 技能目录下的子目录名（排序后）；目录不存在时为空
pub fn list_skills(skills_path: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(skills_path) else {
        return Vec::new();
    };
    let mut skills: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    skills.sort();
    skills
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_falls_back_to_general() {
        assert_eq!(skill_hint("podcast"), skill_hint("general"));
        assert!(skill_hint("linkedin").contains("linkedin-viral"));
    }

    #[test]
    fn test_build_prompt_layout() {
        let p = build_prompt("Write about AI", "seo", Some("B2B audience"));
        let lines: Vec<&str> = p.lines().collect();
        assert_eq!(lines[0], "Content Type: seo");
        assert!(lines[1].starts_with("Skill Hint: Use the seo-content"));
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "Additional Context: B2B audience");
        assert_eq!(lines[4], "Request: Write about AI");

        let plain = build_prompt("Hi", "general", None);
        assert!(plain.ends_with("\n\nRequest: Hi"));
    }

    #[test]
    fn test_task_prompt_restates_goal() {
        let p = task_prompt("Create 5 LinkedIn posts about AI ROI");
        assert!(p.contains("Your goal is:\n\nCreate 5 LinkedIn posts about AI ROI\n\n"));
    }

    #[test]
    fn test_list_skills_only_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("seo-content")).unwrap();
        std::fs::create_dir(dir.path().join("brand-voice")).unwrap();
        std::fs::write(dir.path().join("README.md"), "x").unwrap();
        assert_eq!(list_skills(dir.path()), vec!["brand-voice", "seo-content"]);
        assert!(list_skills(&dir.path().join("missing")).is_empty());
    }
}
