//! 关键词分类：按有序规则表给请求打内容类型标签，第一条命中即返回
//!
//! 标签只用来挑选下游路径（慢内容走 /generate-content，其余走 /agent/chat）以及发送哪条确认语。

use std::sync::OnceLock;

use regex::Regex;

/// 未命中任何规则时的标签
pub const CHAT: &str = "chat";

struct Rule {
    content_type: &'static str,
    patterns: &'static [&'static str],
    /// 慢内容的确认语；None 表示普通对话路径
    slow_ack: Option<&'static str>,
}

const RULES: &[Rule] = &[
    Rule {
        content_type: "video",
        patterns: &[r"\bvideos?\b", r"\banimat(e|ed|ion)\b", r"\bremotion\b"],
        slow_ack: Some("Generating your video... this may take 3-5 minutes."),
    },
    Rule {
        content_type: "carousel",
        patterns: &[r"\bcarousels?\b", r"\bslides?\b", r"\bslide ?deck\b", r"\bpresentation\b"],
        slow_ack: Some("Creating your carousel slides... this may take 1-2 minutes."),
    },
    Rule {
        content_type: "listicle",
        patterns: &[
            r"\blisticles?\b",
            r"\btop \d+\b",
            r"\b\d+ (ways|tips|reasons|mistakes|things)\b",
        ],
        slow_ack: Some("Writing your listicle... this may take a minute."),
    },
    Rule {
        content_type: "image",
        patterns: &[r"\bimages?\b", r"\bgraphics?\b", r"\bbanners?\b", r"\billustrations?\b"],
        slow_ack: Some("Creating your image... this may take 1-2 minutes."),
    },
    Rule {
        content_type: "linkedin-post",
        patterns: &[r"\blinked ?in\b"],
        slow_ack: None,
    },
    Rule {
        content_type: "email",
        patterns: &[r"\be-?mails?\b", r"\bnewsletters?\b", r"\bcold outreach\b"],
        slow_ack: None,
    },
    Rule {
        content_type: "seo",
        patterns: &[r"\bseo\b", r"\bblog (post|article)s?\b", r"\bkeywords?\b"],
        slow_ack: None,
    },
    Rule {
        content_type: "landing-page",
        patterns: &[r"\blanding ?pages?\b", r"\bsales pages?\b"],
        slow_ack: None,
    },
];

/// 分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub content_type: &'static str,
    pub slow_ack: Option<&'static str>,
}

impl Classification {
    pub fn is_slow(&self) -> bool {
        self.slow_ack.is_some()
    }

    pub fn is_video(&self) -> bool {
        self.content_type == "video"
    }
}

struct CompiledRule {
    rule: &'static Rule,
    patterns: Vec<Regex>,
}

static COMPILED: OnceLock<Vec<CompiledRule>> = OnceLock::new();

fn compiled() -> &'static [CompiledRule] {
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|rule| CompiledRule {
                rule,
                patterns: rule
                    .patterns
                    .iter()
                    .filter_map(|p| Regex::new(&format!("(?i){}", p)).ok())
                    .collect(),
            })
            .collect()
    })
}

/// 对请求文本分类
pub fn classify(text: &str) -> Classification {
    compiled()
        .iter()
        .find(|c| c.patterns.iter().any(|re| re.is_match(text)))
        .map(|c| Classification {
            content_type: c.rule.content_type,
            slow_ack: c.rule.slow_ack,
        })
        .unwrap_or(Classification {
            content_type: CHAT,
            slow_ack: None,
        })
}
