//! 消息归一化管线
//!
//! 把 AddMsgList 中的原始条目转换为 [`InboundMessage`]，并解析发送者、群名

use crate::im::contact::classify::is_group_id;
use crate::im::message::types::{
    Disposition, InboundMessage, MessageKind, MessageMeta, RawMsgEntry, UNKNOWN_MARKER,
};
use crate::im::session::{SessionContext, UserSnapshot};
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// 一批条目的处理结果
#[derive(Debug, Default)]
pub struct PipelineOutput {
    /// 按服务器下发顺序排列
    pub messages: Vec<InboundMessage>,
    /// 成员表缺失、需要批量补全的群 id（去重）
    pub unresolved_groups: Vec<String>,
}

/// 单条处理结果
#[derive(Debug, PartialEq)]
pub enum Normalized {
    Message {
        message: InboundMessage,
        unresolved_group: Option<String>,
    },
    Suppressed,
}

fn group_prefix() -> Option<&'static Regex> {
    static GROUP_PREFIX: OnceLock<Option<Regex>> = OnceLock::new();
    GROUP_PREFIX
        .get_or_init(|| Regex::new(r"^(@[^:\s]+):<br/>").ok())
        .as_ref()
}

/// 还原用于展示的 HTML 实体
pub fn unescape(content: &str) -> String {
    content.replace("&lt;", "<").replace("&gt;", ">")
}

fn str_field(entry: &serde_json::Value, key: &str) -> String {
    match entry.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// 无法识别的条目：保留原始 JSON 供排查
fn unknown_event(entry: &serde_json::Value, code: i64) -> InboundMessage {
    let raw = entry.to_string();
    let from_id = str_field(entry, "FromUserName");
    InboundMessage {
        id: str_field(entry, "MsgId"),
        sender_id: from_id.clone(),
        from_id,
        to_id: str_field(entry, "ToUserName"),
        kind: MessageKind::Unknown(code),
        display_content: format!("{} type={} {}", UNKNOWN_MARKER, code, raw),
        raw_content: raw,
        resolved_sender_name: String::new(),
        resolved_recipient_name: String::new(),
        resolved_group_name: String::new(),
        created_at: entry.get("CreateTime").and_then(|v| v.as_i64()).unwrap_or_default(),
        meta: MessageMeta::Raw(entry.clone()),
    }
}

fn name_of(snapshot: &UserSnapshot, id: &str) -> String {
    if !id.is_empty() && id == snapshot.self_contact.id {
        return snapshot.self_contact.name().to_string();
    }
    snapshot
        .contact(id)
        .map(|c| c.name().to_string())
        .unwrap_or_default()
}

fn meta_for(kind: MessageKind, raw: &RawMsgEntry) -> MessageMeta {
    match kind {
        MessageKind::Image | MessageKind::Emoticon => MessageMeta::Image {
            width: raw.img_width,
            height: raw.img_height,
        },
        MessageKind::Voice => MessageMeta::Voice {
            length_ms: raw.voice_length,
        },
        MessageKind::Video => MessageMeta::Video {
            play_length: raw.play_length,
        },
        MessageKind::Location => MessageMeta::Location {
            url: raw.url.clone(),
        },
        MessageKind::FriendRequest => MessageMeta::FriendRequest {
            recommend: raw.recommend_info.clone().unwrap_or_default(),
        },
        MessageKind::Text | MessageKind::Unknown(_) => MessageMeta::None,
    }
}

/// 归一化单条原始消息；不修改快照
pub fn normalize_entry(entry: &serde_json::Value, snapshot: &UserSnapshot) -> Normalized {
    let code = entry.get("MsgType").and_then(|v| v.as_i64()).unwrap_or(-1);
    let raw = match RawMsgEntry::deserialize(entry) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("[Msg] 消息条目解码失败: {}", e);
            return Normalized::Message {
                message: unknown_event(entry, code),
                unresolved_group: None,
            };
        }
    };

    let kind = match MessageKind::dispose(raw.msg_type) {
        Disposition::Suppress => {
            debug!("[Msg] 忽略消息类型 {}", raw.msg_type);
            return Normalized::Suppressed;
        }
        Disposition::Emit(MessageKind::Unknown(code)) => {
            return Normalized::Message {
                message: unknown_event(entry, code),
                unresolved_group: None,
            };
        }
        Disposition::Emit(kind) => kind,
    };

    let content = match (&kind, &raw.content) {
        (MessageKind::Text, None) => {
            warn!("[Msg] 文本消息缺少 Content 字段");
            return Normalized::Message {
                message: unknown_event(entry, raw.msg_type),
                unresolved_group: None,
            };
        }
        (_, content) => content.clone().unwrap_or_default(),
    };

    let mut display = unescape(&content);
    let mut message = InboundMessage {
        id: raw.msg_id.clone(),
        from_id: raw.from_user_name.clone(),
        to_id: raw.to_user_name.clone(),
        sender_id: raw.from_user_name.clone(),
        kind,
        raw_content: content,
        display_content: String::new(),
        resolved_sender_name: name_of(snapshot, &raw.from_user_name),
        resolved_recipient_name: name_of(snapshot, &raw.to_user_name),
        resolved_group_name: String::new(),
        created_at: raw.create_time,
        meta: meta_for(kind, &raw),
    };

    if raw.to_user_name == "filehelper" {
        message.resolved_sender_name = snapshot.self_contact.name().to_string();
    }

    let mut unresolved_group = None;
    if is_group_id(&raw.from_user_name) {
        let group_id = raw.from_user_name.as_str();
        match snapshot.contact(group_id) {
            Some(group) => message.resolved_group_name = group.label().to_string(),
            None => unresolved_group = Some(group_id.to_string()),
        }

        let prefix = group_prefix()
            .and_then(|re| re.captures(&display))
            .and_then(|caps| Some((caps.get(0)?.end(), caps.get(1)?.as_str().to_string())));
        if let Some((end, member_id)) = prefix {
            display = display[end..].to_string();
            message.resolved_sender_name = match snapshot.search_member(&member_id, Some(group_id)) {
                Some(member) => member.name().to_string(),
                None => {
                    unresolved_group = Some(group_id.to_string());
                    name_of(snapshot, &member_id)
                }
            };
            message.sender_id = member_id;
        }
    }

    message.display_content = match kind.placeholder() {
        Some(placeholder) => placeholder.to_string(),
        None => display,
    };

    Normalized::Message {
        message,
        unresolved_group,
    }
}

/// 归一化一批条目
pub fn normalize_batch(entries: &[serde_json::Value], snapshot: &UserSnapshot) -> PipelineOutput {
    let mut output = PipelineOutput::default();
    for entry in entries {
        if let Normalized::Message {
            message,
            unresolved_group,
        } = normalize_entry(entry, snapshot)
        {
            if let Some(group) = unresolved_group {
                if !output.unresolved_groups.contains(&group) {
                    output.unresolved_groups.push(group);
                }
            }
            output.messages.push(message);
        }
    }
    output
}

/// 基于共享快照的消息管线
pub struct MessagePipeline {
    ctx: Arc<SessionContext>,
}

impl MessagePipeline {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    pub fn process(&self, entries: &[serde_json::Value]) -> PipelineOutput {
        if entries.is_empty() {
            return PipelineOutput::default();
        }
        let output = self
            .ctx
            .read_snapshot(|snapshot| normalize_batch(entries, snapshot));
        debug!(
            "[Msg] 处理消息 {} 条，产出 {} 条",
            entries.len(),
            output.messages.len()
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::contact::models::{Contact, ContactKind};
    use crate::im::message::types::{IMAGE_PLACEHOLDER, VOICE_PLACEHOLDER};
    use serde_json::json;

    fn snapshot() -> UserSnapshot {
        let mut snapshot = UserSnapshot {
            self_contact: Contact {
                id: "@self".into(),
                nick_name: "Me".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut team = Contact {
            id: "@@G1".into(),
            display_name: "Team".into(),
            nick_name: "team-nick".into(),
            kind: ContactKind::Group,
            ..Default::default()
        };
        team.group_members = Some(
            [(
                "@U1".to_string(),
                Contact {
                    id: "@U1".into(),
                    nick_name: "Alice".into(),
                    ..Default::default()
                },
            )]
            .into(),
        );
        snapshot.upsert_contact(team);
        snapshot.upsert_contact(Contact {
            id: "@bob".into(),
            nick_name: "Bob".into(),
            kind: ContactKind::Member,
            ..Default::default()
        });
        snapshot
    }

    fn entry(from: &str, to: &str, msg_type: i64, content: &str) -> serde_json::Value {
        json!({
            "MsgId": "100",
            "FromUserName": from,
            "ToUserName": to,
            "MsgType": msg_type,
            "Content": content,
            "CreateTime": 1700000000
        })
    }

    fn message(normalized: Normalized) -> InboundMessage {
        match normalized {
            Normalized::Message { message, .. } => message,
            Normalized::Suppressed => panic!("unexpectedly suppressed"),
        }
    }

    #[test]
    fn group_text_resolves_member_and_group() {
        let snapshot = snapshot();
        let out = normalize_entry(&entry("@@G1", "@self", 1, "@U1:<br/>hello"), &snapshot);
        let Normalized::Message {
            message,
            unresolved_group,
        } = out
        else {
            panic!("suppressed");
        };
        assert_eq!(message.display_content, "hello");
        assert_eq!(message.resolved_sender_name, "Alice");
        assert_eq!(message.resolved_group_name, "Team");
        assert_eq!(message.sender_id, "@U1");
        assert_eq!(message.raw_content, "@U1:<br/>hello");
        assert_eq!(message.resolved_recipient_name, "Me");
        assert!(unresolved_group.is_none());
    }

    #[test]
    fn group_sender_prefers_nickname_over_card_name() {
        let mut snapshot = snapshot();
        let alice = snapshot
            .contact_index
            .get_mut("@@G1")
            .and_then(|team| team.group_members.as_mut())
            .and_then(|members| members.get_mut("@U1"))
            .expect("seeded member");
        alice.display_name = "Ali-card".into();
        let message = message_of(&entry("@@G1", "@self", 1, "@U1:<br/>hello"), &snapshot);
        assert_eq!(message.resolved_sender_name, "Alice");
        assert_eq!(message.resolved_group_name, "Team");
    }

    #[test]
    fn unknown_member_requests_enrichment() {
        let snapshot = snapshot();
        let out = normalize_entry(&entry("@@G1", "@self", 1, "@U9:<br/>who am i"), &snapshot);
        let Normalized::Message {
            message,
            unresolved_group,
        } = out
        else {
            panic!("suppressed");
        };
        assert_eq!(message.display_content, "who am i");
        assert_eq!(message.resolved_sender_name, "");
        assert_eq!(unresolved_group.as_deref(), Some("@@G1"));
    }

    #[test]
    fn unknown_type_is_emitted_once_with_raw_entry() {
        let snapshot = snapshot();
        let raw = entry("@bob", "@self", 9001, "???");
        let output = normalize_batch(std::slice::from_ref(&raw), &snapshot);
        assert_eq!(output.messages.len(), 1);
        let message = &output.messages[0];
        assert_eq!(message.kind, MessageKind::Unknown(9001));
        assert!(message.display_content.contains(UNKNOWN_MARKER));
        assert!(message.display_content.contains(&raw.to_string()));
        assert_eq!(message.meta, MessageMeta::Raw(raw));
    }

    #[test]
    fn malformed_entry_fails_closed() {
        let snapshot = snapshot();
        let raw = json!({"MsgId": "1", "MsgType": 1, "Content": "no sender"});
        let message = message(normalize_entry(&raw, &snapshot));
        assert_eq!(message.kind, MessageKind::Unknown(1));
        assert!(message.display_content.starts_with(UNKNOWN_MARKER));

        let no_content = json!({"MsgId": "2", "FromUserName": "@bob", "ToUserName": "@self", "MsgType": 1});
        let message = message_of(&no_content, &snapshot);
        assert_eq!(message.kind, MessageKind::Unknown(1));
    }

    fn message_of(raw: &serde_json::Value, snapshot: &UserSnapshot) -> InboundMessage {
        message(normalize_entry(raw, snapshot))
    }

    #[test]
    fn same_entry_twice_yields_equal_messages() {
        let snapshot = snapshot();
        for raw in [
            entry("@@G1", "@self", 1, "@U1:<br/>hi"),
            entry("@bob", "@self", 3, "<img/>"),
            entry("@bob", "@self", 9001, "x"),
        ] {
            assert_eq!(message_of(&raw, &snapshot), message_of(&raw, &snapshot));
        }
    }

    #[test]
    fn placeholders_and_suppression() {
        let snapshot = snapshot();
        let image = message_of(&entry("@bob", "@self", 3, "&lt;msg&gt;"), &snapshot);
        assert_eq!(image.display_content, IMAGE_PLACEHOLDER);
        assert_eq!(image.raw_content, "&lt;msg&gt;");
        assert_eq!(image.resolved_sender_name, "Bob");

        let voice = message_of(&entry("@bob", "@self", 34, ""), &snapshot);
        assert_eq!(voice.display_content, VOICE_PLACEHOLDER);

        for code in [42, 49, 51, 10000, 10002] {
            assert_eq!(
                normalize_entry(&entry("@bob", "@self", code, ""), &snapshot),
                Normalized::Suppressed
            );
        }
    }

    #[test]
    fn text_is_unescaped_and_order_preserved() {
        let snapshot = snapshot();
        let entries = vec![
            entry("@bob", "@self", 1, "a &lt;b&gt; c"),
            entry("@bob", "@self", 51, ""),
            entry("@bob", "@self", 1, "second"),
        ];
        let output = normalize_batch(&entries, &snapshot);
        let contents: Vec<_> = output
            .messages
            .iter()
            .map(|m| m.display_content.as_str())
            .collect();
        assert_eq!(contents, vec!["a <b> c", "second"]);
    }

    #[test]
    fn messages_to_filehelper_are_attributed_to_self() {
        let snapshot = snapshot();
        let message = message_of(&entry("@self", "filehelper", 1, "note"), &snapshot);
        assert_eq!(message.resolved_sender_name, "Me");
    }

    #[test]
    fn pipeline_reads_shared_snapshot() {
        let ctx = Arc::new(SessionContext::new(crate::im::config::ClientConfig::new()));
        ctx.set_snapshot(snapshot());
        let pipeline = MessagePipeline::new(ctx);
        let output = pipeline.process(&[
            entry("@@G2", "@self", 1, "@U1:<br/>x"),
            entry("@@G2", "@self", 1, "@U2:<br/>y"),
        ]);
        assert_eq!(output.messages.len(), 2);
        assert_eq!(output.unresolved_groups, vec!["@@G2".to_string()]);
    }
}
