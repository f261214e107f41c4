//! 消息类型定义
//!
//! 服务器原始条目先解码为 [`RawMsgEntry`]，再按类型码归类为 [`MessageKind`]

use crate::im::serialization::{deserialize_string_or_number, generate_client_msg_id};
use crate::im::types::{msg_type, BaseResponse};
use serde::{Deserialize, Serialize};

/// 未知类型消息的诊断前缀
pub const UNKNOWN_MARKER: &str = "[未知消息]";

pub const IMAGE_PLACEHOLDER: &str = "[收到图片表情,请在手机上查看]";
pub const VOICE_PLACEHOLDER: &str = "[收到语音消息,请在手机上查看]";
pub const FRIEND_REQUEST_PLACEHOLDER: &str = "[收到好友请求,请在手机上查看]";
pub const VIDEO_PLACEHOLDER: &str = "[收到视频消息,请在手机上查看]";
pub const LOCATION_PLACEHOLDER: &str = "[收到定位消息,请在手机上查看]";

/// AddMsgList 中的一条原始消息
///
/// 身份字段必填，缺失即解码失败；其余按类型可选
#[derive(Debug, Clone, Deserialize)]
pub struct RawMsgEntry {
    #[serde(rename = "MsgId", deserialize_with = "deserialize_string_or_number")]
    pub msg_id: String,
    #[serde(rename = "FromUserName")]
    pub from_user_name: String,
    #[serde(rename = "ToUserName")]
    pub to_user_name: String,
    #[serde(rename = "MsgType")]
    pub msg_type: i64,
    #[serde(rename = "Content")]
    pub content: Option<String>,
    #[serde(rename = "CreateTime", default)]
    pub create_time: i64,
    #[serde(rename = "ImgWidth", default)]
    pub img_width: i64,
    #[serde(rename = "ImgHeight", default)]
    pub img_height: i64,
    #[serde(rename = "VoiceLength", default)]
    pub voice_length: i64,
    #[serde(rename = "PlayLength", default)]
    pub play_length: i64,
    #[serde(rename = "Url", default)]
    pub url: String,
    #[serde(rename = "RecommendInfo", default)]
    pub recommend_info: Option<serde_json::Value>,
}

/// 消息分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Text,
    Image,
    Emoticon,
    Voice,
    FriendRequest,
    Video,
    Location,
    /// 未列入处理表的类型码
    Unknown(i64),
}

/// 类型码的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Emit(MessageKind),
    /// 系统通知、卡片等，不产生事件
    Suppress,
}

impl MessageKind {
    pub fn dispose(code: i64) -> Disposition {
        use msg_type::*;
        let kind = match code {
            TEXT => MessageKind::Text,
            IMAGE => MessageKind::Image,
            EMOTICON => MessageKind::Emoticon,
            VOICE => MessageKind::Voice,
            VERIFY => MessageKind::FriendRequest,
            VIDEO => MessageKind::Video,
            LOCATION => MessageKind::Location,
            SHARE_CARD | APP | VOIP_MSG | STATUS_NOTIFY | VOIP_NOTIFY | VOIP_INVITE
            | MICRO_VIDEO | SYS_NOTICE | SYS | RECALLED => return Disposition::Suppress,
            other => MessageKind::Unknown(other),
        };
        Disposition::Emit(kind)
    }

    /// 固定占位文本；文本和未知类型返回 None
    pub fn placeholder(&self) -> Option<&'static str> {
        match self {
            MessageKind::Image | MessageKind::Emoticon => Some(IMAGE_PLACEHOLDER),
            MessageKind::Voice => Some(VOICE_PLACEHOLDER),
            MessageKind::FriendRequest => Some(FRIEND_REQUEST_PLACEHOLDER),
            MessageKind::Video => Some(VIDEO_PLACEHOLDER),
            MessageKind::Location => Some(LOCATION_PLACEHOLDER),
            MessageKind::Text | MessageKind::Unknown(_) => None,
        }
    }
}

/// 按类型附带的元数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MessageMeta {
    None,
    Image { width: i64, height: i64 },
    Voice { length_ms: i64 },
    Video { play_length: i64 },
    Location { url: String },
    FriendRequest { recommend: serde_json::Value },
    /// 无法识别的原始条目
    Raw(serde_json::Value),
}

/// 归一化后的入站消息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    /// 群消息中实际发言的成员 id，其余情况同 from_id
    pub sender_id: String,
    pub kind: MessageKind,
    pub raw_content: String,
    pub display_content: String,
    pub resolved_sender_name: String,
    pub resolved_recipient_name: String,
    pub resolved_group_name: String,
    pub created_at: i64,
    pub meta: MessageMeta,
}

impl InboundMessage {
    pub fn is_group(&self) -> bool {
        !self.resolved_group_name.is_empty() || self.from_id.starts_with("@@")
    }
}

/// 待发送的文本消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to_id: String,
    pub content: String,
    /// 用于和 SendResult 关联
    pub local_id: String,
}

impl OutboundMessage {
    /// 创建文本消息，local_id 自动生成
    pub fn text(to_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            to_id: to_id.into(),
            content: content.into(),
            local_id: generate_client_msg_id(),
        }
    }
}

/// 发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub server_msg_id: String,
    pub local_id: String,
    pub base_response: BaseResponse,
    /// 传输或解析失败时的描述
    pub failure: Option<String>,
}

impl SendResult {
    pub fn failed(local_id: String, reason: String) -> Self {
        Self {
            server_msg_id: String::new(),
            local_id,
            base_response: BaseResponse {
                ret: -1,
                err_msg: reason.clone(),
            },
            failure: Some(reason),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failure.is_none() && self.base_response.is_ok()
    }
}
