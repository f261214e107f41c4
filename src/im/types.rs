//! webwx 接口的请求/响应结构

use crate::im::serialization::{deserialize_string_or_number, deserialize_vec_or_null};
use crate::im::sync::SyncCursor;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// 消息类型码
pub mod msg_type {
    pub const TEXT: i64 = 1;
    pub const IMAGE: i64 = 3;
    pub const VOICE: i64 = 34;
    pub const VERIFY: i64 = 37;
    pub const SHARE_CARD: i64 = 42;
    pub const VIDEO: i64 = 43;
    pub const EMOTICON: i64 = 47;
    pub const LOCATION: i64 = 48;
    pub const APP: i64 = 49;
    pub const VOIP_MSG: i64 = 50;
    pub const STATUS_NOTIFY: i64 = 51;
    pub const VOIP_NOTIFY: i64 = 52;
    pub const VOIP_INVITE: i64 = 53;
    pub const MICRO_VIDEO: i64 = 62;
    pub const SYS_NOTICE: i64 = 9999;
    pub const SYS: i64 = 10000;
    pub const RECALLED: i64 = 10002;
}

/// 每个鉴权接口都要携带的公共参数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRequest {
    #[serde(rename = "Uin")]
    pub uin: i64,
    #[serde(rename = "Sid")]
    pub sid: String,
    #[serde(rename = "Skey")]
    pub skey: String,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
}

/// 接口返回的公共状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BaseResponse {
    pub ret: i64,
    pub err_msg: String,
}

impl BaseResponse {
    pub fn is_ok(&self) -> bool {
        self.ret == 0
    }
}

/// 带 BaseResponse 的响应
pub trait WxResponse {
    fn base_response(&self) -> &BaseResponse;
}

macro_rules! impl_wx_response {
    ($($ty:ty),* $(,)?) => {
        $(impl WxResponse for $ty {
            fn base_response(&self) -> &BaseResponse {
                &self.base_response
            }
        })*
    };
}

/// 服务器返回的联系人结构（User / Member 共用）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WireContact {
    pub uin: i64,
    pub user_name: String,
    pub nick_name: String,
    pub display_name: String,
    pub remark_name: String,
    pub head_img_url: String,
    pub sex: i64,
    pub signature: String,
    pub verify_flag: i64,
    pub contact_flag: i64,
    pub province: String,
    pub city: String,
    pub member_count: i64,
    #[serde(deserialize_with = "deserialize_vec_or_null")]
    pub member_list: Vec<WireContact>,
}

/// 订阅号文章
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MpArticle {
    pub title: String,
    pub digest: String,
    pub cover: String,
    pub url: String,
}

/// 订阅号推送
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpSubscription {
    #[serde(rename = "UserName")]
    pub user_name: String,
    #[serde(rename = "NickName")]
    pub nick_name: String,
    #[serde(rename = "Time")]
    pub time: i64,
    #[serde(rename = "MPArticleCount")]
    pub article_count: i64,
    #[serde(rename = "MPArticleList", deserialize_with = "deserialize_vec_or_null")]
    pub articles: Vec<MpArticle>,
}

/// webwxinit 响应
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InitResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    #[serde(rename = "User")]
    pub user: WireContact,
    #[serde(rename = "ContactList", deserialize_with = "deserialize_vec_or_null")]
    pub contact_list: Vec<WireContact>,
    #[serde(rename = "SyncKey")]
    pub sync_key: SyncCursor,
    /// 逗号分隔的会话 id
    #[serde(rename = "ChatSet")]
    pub chat_set: String,
    #[serde(rename = "SKey")]
    pub skey: String,
    #[serde(rename = "MPSubscribeMsgList", deserialize_with = "deserialize_vec_or_null")]
    pub mp_subscribe_msg_list: Vec<MpSubscription>,
}

/// webwxstatusnotify 响应
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusNotifyResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    #[serde(rename = "MsgID", deserialize_with = "deserialize_string_or_number")]
    pub msg_id: String,
}

/// webwxgetcontact 响应
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContactListResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    #[serde(rename = "MemberCount")]
    pub member_count: i64,
    #[serde(rename = "MemberList", deserialize_with = "deserialize_vec_or_null")]
    pub member_list: Vec<WireContact>,
    /// 非 0 表示还有下一页
    #[serde(rename = "Seq")]
    pub seq: i64,
}

/// webwxbatchgetcontact 响应
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchContactResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    #[serde(rename = "Count")]
    pub count: i64,
    #[serde(rename = "ContactList", deserialize_with = "deserialize_vec_or_null")]
    pub contact_list: Vec<WireContact>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DelContact {
    #[serde(rename = "UserName")]
    pub user_name: String,
}

/// webwxsync 响应
///
/// BaseResponse 必须出现；缺失时整个响应按解析失败处理
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    /// 原始消息条目，交给消息管线逐条解码
    #[serde(rename = "AddMsgList", default, deserialize_with = "deserialize_vec_or_null")]
    pub add_msg_list: Vec<serde_json::Value>,
    #[serde(rename = "ModContactList", default, deserialize_with = "deserialize_vec_or_null")]
    pub mod_contact_list: Vec<WireContact>,
    #[serde(rename = "DelContactList", default, deserialize_with = "deserialize_vec_or_null")]
    pub del_contact_list: Vec<DelContact>,
    #[serde(rename = "ContinueFlag", default)]
    pub continue_flag: i64,
    #[serde(rename = "SyncKey", default)]
    pub sync_key: SyncCursor,
    #[serde(rename = "SyncCheckKey", default)]
    pub sync_check_key: Option<SyncCursor>,
}

/// webwxsendmsg 响应
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SendMsgResponse {
    #[serde(rename = "BaseResponse")]
    pub base_response: BaseResponse,
    #[serde(rename = "MsgID", deserialize_with = "deserialize_string_or_number")]
    pub msg_id: String,
    #[serde(rename = "LocalID", deserialize_with = "deserialize_string_or_number")]
    pub local_id: String,
}

impl_wx_response!(
    InitResponse,
    StatusNotifyResponse,
    ContactListResponse,
    BatchContactResponse,
    SyncResponse,
    SendMsgResponse,
);

/// 只携带 BaseRequest 的请求体
#[derive(Debug, Serialize)]
pub struct BaseRequestBody<'a> {
    #[serde(rename = "BaseRequest")]
    pub base_request: &'a BaseRequest,
}

#[derive(Debug, Serialize)]
pub struct StatusNotifyRequest<'a> {
    #[serde(rename = "BaseRequest")]
    pub base_request: &'a BaseRequest,
    #[serde(rename = "Code")]
    pub code: i64,
    #[serde(rename = "FromUserName")]
    pub from_user_name: &'a str,
    #[serde(rename = "ToUserName")]
    pub to_user_name: &'a str,
    #[serde(rename = "ClientMsgId")]
    pub client_msg_id: i64,
}

#[derive(Debug, Serialize)]
pub struct BatchContactItem<'a> {
    #[serde(rename = "UserName")]
    pub user_name: &'a str,
    #[serde(rename = "EncryChatRoomId")]
    pub encry_chat_room_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct BatchContactRequest<'a> {
    #[serde(rename = "BaseRequest")]
    pub base_request: &'a BaseRequest,
    #[serde(rename = "Count")]
    pub count: usize,
    #[serde(rename = "List")]
    pub list: Vec<BatchContactItem<'a>>,
}

#[derive(Debug, Serialize)]
pub struct SyncRequest<'a> {
    #[serde(rename = "BaseRequest")]
    pub base_request: &'a BaseRequest,
    #[serde(rename = "SyncKey")]
    pub sync_key: &'a SyncCursor,
    pub rr: i64,
}

#[derive(Debug, Serialize)]
pub struct SendMsgBody<'a> {
    #[serde(rename = "Type")]
    pub msg_type: i64,
    #[serde(rename = "Content")]
    pub content: &'a str,
    #[serde(rename = "FromUserName")]
    pub from_user_name: &'a str,
    #[serde(rename = "ToUserName")]
    pub to_user_name: &'a str,
    #[serde(rename = "LocalID")]
    pub local_id: &'a str,
    #[serde(rename = "ClientMsgId")]
    pub client_msg_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SendMsgRequest<'a> {
    #[serde(rename = "BaseRequest")]
    pub base_request: &'a BaseRequest,
    #[serde(rename = "Msg")]
    pub msg: SendMsgBody<'a>,
    #[serde(rename = "Scene")]
    pub scene: i64,
}

/// 反序列化 webwx JSON 响应，失败时返回带原始 body 的描述
pub fn decode_response<T: serde::de::DeserializeOwned>(tag: &str, bytes: &[u8]) -> Result<T, String> {
    serde_json::from_slice::<T>(bytes).map_err(|e| {
        let body = String::from_utf8_lossy(bytes);
        error!("[{}] 反序列化失败: {:?}\n原始响应: {}", tag, e, body);
        format!("解析返回数据失败[err:{}]", e)
    })
}

/// 解码并检查 BaseResponse.Ret
pub fn decode_checked<T>(tag: &str, bytes: &[u8]) -> Result<T, (i64, String)>
where
    T: serde::de::DeserializeOwned + WxResponse,
{
    let resp: T = decode_response(tag, bytes).map_err(|e| (-1, e))?;
    let base = resp.base_response();
    if !base.is_ok() {
        error!(
            "[{}] 接口请求失败[code:{},err:{}]",
            tag, base.ret, base.err_msg
        );
        return Err((base.ret, base.err_msg.clone()));
    }
    debug!("[{}] 接口请求成功", tag);
    Ok(resp)
}
