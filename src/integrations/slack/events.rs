//! Slack Events API 与斜杠命令的入站结构

use std::collections::HashMap;

use serde::Deserialize;

use super::platform::ReplyTarget;

/// Events API 外层
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        #[serde(default)]
        event_id: String,
        event: SlackEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub user: Option<String>,
    pub text: Option<String>,
    pub channel: Option<String>,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub channel_type: Option<String>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
}

/// 需要机器人处理的一条入站消息
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub user_id: String,
    pub text: String,
    pub target: ReplyTarget,
    pub mention: bool,
}

impl SlackEvent {
    /// 转换为待处理消息；机器人消息、频道普通消息、编辑/删除等子类型返回 None
    pub fn into_inbound(self) -> Option<Inbound> {
        if self.bot_id.is_some() || self.subtype.is_some() {
            return None;
        }
        let user_id = self.user?;
        let channel = self.channel?;
        let text = self.text.unwrap_or_default();
        match self.kind.as_str() {
            "app_mention" => {
                let thread_ts = self.thread_ts.or(self.ts)?;
                Some(Inbound {
                    user_id,
                    text: strip_mentions(&text),
                    target: ReplyTarget::Thread { channel, thread_ts },
                    mention: true,
                })
            }
            "message" if self.channel_type.as_deref() == Some("im") => Some(Inbound {
                user_id,
                text: text.trim().to_string(),
                target: ReplyTarget::Direct { channel },
                mention: false,
            }),
            _ => None,
        }
    }
}

/// 去掉开头的 `<@U123>` 提及
pub fn strip_mentions(text: &str) -> String {
    let mut rest = text.trim_start();
    while let Some(after) = rest.strip_prefix("<@") {
        match after.find('>') {
            Some(end) => rest = after[end + 1..].trim_start(),
            None => break,
        }
    }
    rest.trim().to_string()
}

/// 斜杠命令（application/x-www-form-urlencoded）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlashCommand {
    pub command: String,
    pub text: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub channel_id: String,
    pub response_url: String,
}

impl SlashCommand {
    /// 缺少 command / user_id / response_url 时返回 None
    pub fn parse(body: &[u8]) -> Option<Self> {
        let mut fields: HashMap<String, String> = url::form_urlencoded::parse(body)
            .into_owned()
            .collect();
        let mut take = |key: &str| fields.remove(key).filter(|v| !v.is_empty());
        Some(Self {
            command: take("command")?,
            user_id: take("user_id")?,
            response_url: take("response_url")?,
            text: take("text").unwrap_or_default().trim().to_string(),
            user_name: take("user_name"),
            channel_id: take("channel_id").unwrap_or_default(),
        })
    }

    pub fn target(&self) -> ReplyTarget {
        ReplyTarget::Command {
            response_url: self.response_url.clone(),
            channel: self.channel_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> SlackEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_envelope_kinds() {
        let v: Envelope = serde_json::from_value(json!({"type": "url_verification", "challenge": "abc", "token": "t"})).unwrap();
        assert!(matches!(v, Envelope::UrlVerification { challenge } if challenge == "abc"));

        let v: Envelope = serde_json::from_value(json!({"type": "app_rate_limited", "minute_rate_limited": 1})).unwrap();
        assert!(matches!(v, Envelope::Other));
    }

    #[test]
    fn test_mention_replies_in_thread() {
        let inbound = event(json!({
            "type": "app_mention",
            "user": "U1",
            "text": "<@UBOT> write a linkedin post",
            "channel": "C1",
            "ts": "100.1"
        }))
        .into_inbound()
        .unwrap();
        assert_eq!(inbound.text, "write a linkedin post");
        assert!(inbound.mention);
        assert_eq!(
            inbound.target,
            ReplyTarget::Thread {
                channel: "C1".into(),
                thread_ts: "100.1".into()
            }
        );

        let nested = event(json!({
            "type": "app_mention", "user": "U1", "text": "<@UBOT>", "channel": "C1",
            "ts": "100.9", "thread_ts": "100.1"
        }))
        .into_inbound()
        .unwrap();
        assert_eq!(nested.text, "");
        assert_eq!(nested.target.thread_ts(), Some("100.1"));
    }

    #[test]
    fn test_only_human_direct_messages() {
        let dm = json!({"type": "message", "user": "U1", "text": " hi ", "channel": "D1", "channel_type": "im"});
        assert_eq!(event(dm.clone()).into_inbound().unwrap().text, "hi");

        let mut from_bot = dm.clone();
        from_bot["bot_id"] = json!("B1");
        assert_eq!(event(from_bot).into_inbound(), None);

        let mut channel = dm.clone();
        channel["channel_type"] = json!("channel");
        assert_eq!(event(channel).into_inbound(), None);

        let mut edited = dm;
        edited["subtype"] = json!("message_changed");
        assert_eq!(event(edited).into_inbound(), None);
    }

    #[test]
    fn test_strip_mentions() {
        assert_eq!(strip_mentions("<@U1> <@U2|bot>  hello <@U3>"), "hello <@U3>");
        assert_eq!(strip_mentions("no mention"), "no mention");
        assert_eq!(strip_mentions("<@broken"), "<@broken");
    }

    #[test]
    fn test_parse_slash_command() {
        let body = b"command=%2Fmarketing&text=Write+a+LinkedIn+post&user_id=U1&user_name=dana&channel_id=C1&response_url=https%3A%2F%2Fhooks.slack.com%2Fcommands%2F1";
        let cmd = SlashCommand::parse(body).unwrap();
        assert_eq!(cmd.command, "/marketing");
        assert_eq!(cmd.text, "Write a LinkedIn post");
        assert_eq!(cmd.response_url, "https://hooks.slack.com/commands/1");
        assert_eq!(cmd.user_name.as_deref(), Some("dana"));

        assert_eq!(SlashCommand::parse(b"command=%2Fclear&user_id=U1"), None);
    }
}
