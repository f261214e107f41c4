//! 会话与用户快照
//!
//! `SessionContext` 是同步循环、发送循环与初始化流程共享的唯一状态。
//! 锁只在同步代码块内持有，不跨 `.await`。

use crate::im::config::{ClientConfig, WxHosts};
use crate::im::contact::models::{Contact, ContactBuckets};
use crate::im::request::WxCookie;
use crate::im::sync::cursor::SyncState;
use crate::im::types::{BaseRequest, MpSubscription};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// 登录凭证（跳转页返回的公参 + 本地生成的设备 ID）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Credentials {
    pub ret: i64,
    pub message: String,
    pub skey: String,
    pub wxsid: String,
    pub wxuin: i64,
    pub pass_ticket: String,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
}

struct LoginPagePatterns {
    ret: Regex,
    message: Regex,
    skey: Regex,
    wxsid: Regex,
    wxuin: Regex,
    pass_ticket: Regex,
}

fn login_page_patterns() -> Result<&'static LoginPagePatterns, String> {
    static PATTERNS: OnceLock<Option<LoginPagePatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(LoginPagePatterns {
                ret: Regex::new(r"<ret>\s*(-?\d+)\s*</ret>").ok()?,
                message: Regex::new(r"(?s)<message>(.*?)</message>").ok()?,
                skey: Regex::new(r"(?s)<skey>(.*?)</skey>").ok()?,
                wxsid: Regex::new(r"(?s)<wxsid>(.*?)</wxsid>").ok()?,
                wxuin: Regex::new(r"(?s)<wxuin>(.*?)</wxuin>").ok()?,
                pass_ticket: Regex::new(r"(?s)<pass_ticket>(.*?)</pass_ticket>").ok()?,
            })
        })
        .as_ref()
        .ok_or_else(|| "正则表达式初始化失败".to_string())
}

fn capture<'a>(re: &Regex, body: &'a str) -> Option<&'a str> {
    re.captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

fn cdata_stripped(value: &str) -> &str {
    static CDATA: OnceLock<Option<Regex>> = OnceLock::new();
    let re = CDATA.get_or_init(|| Regex::new(r"^<!\[CDATA\[(.*)\]\]>$").ok());
    re.as_ref()
        .and_then(|re| re.captures(value))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(value)
}

impl Credentials {
    /// 解析登录跳转页返回的 XML：
    /// `<error><ret>0</ret><message/><skey/><wxsid/><wxuin/><pass_ticket/></error>`
    pub fn parse_login_page(body: &str, device_id: String) -> Result<Self, String> {
        let patterns = login_page_patterns()?;
        let field = |re: &Regex| capture(re, body).map(cdata_stripped).unwrap_or("");

        let ret_raw = capture(&patterns.ret, body)
            .ok_or_else(|| format!("缺少 ret 字段[resp:{}]", body))?;
        let ret: i64 = ret_raw
            .parse()
            .map_err(|_| format!("ret 字段格式错误[ret:{}]", ret_raw))?;
        let wxuin = match field(&patterns.wxuin) {
            "" => 0,
            raw => raw
                .parse()
                .map_err(|_| format!("wxuin 字段格式错误[wxuin:{}]", raw))?,
        };

        Ok(Self {
            ret,
            message: field(&patterns.message).to_string(),
            skey: field(&patterns.skey).to_string(),
            wxsid: field(&patterns.wxsid).to_string(),
            wxuin,
            pass_ticket: field(&patterns.pass_ticket).to_string(),
            device_id,
        })
    }

    pub fn base_request(&self) -> BaseRequest {
        BaseRequest {
            uin: self.wxuin,
            sid: self.wxsid.clone(),
            skey: self.skey.clone(),
            device_id: self.device_id.clone(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.skey.is_empty() && !self.wxsid.is_empty() && self.wxuin != 0
    }
}

/// 一次扫码登录产生的会话
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "LoginRedirectUrl")]
    pub login_redirect_url: String,
    #[serde(rename = "BaseRequest")]
    pub credentials: Credentials,
    #[serde(rename = "Cookie")]
    pub cookies: Vec<WxCookie>,
}

impl Session {
    pub fn new(uuid: String, login_redirect_url: String) -> Self {
        Self {
            uuid,
            login_redirect_url,
            ..Default::default()
        }
    }
}

/// 登录用户的联系人与会话快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSnapshot {
    #[serde(rename = "UserInfo")]
    pub self_contact: Contact,
    /// 全局联系人索引
    #[serde(rename = "GlobalMemberMap")]
    pub contact_index: HashMap<String, Contact>,
    /// 当前会话列表（有序、去重）
    #[serde(rename = "ChatList")]
    pub chat_list: Vec<Contact>,
    #[serde(rename = "MPSubscribeMsgList")]
    pub subscriptions: Vec<MpSubscription>,
    #[serde(flatten)]
    pub sync: SyncState,
}

impl UserSnapshot {
    pub fn contact(&self, id: &str) -> Option<&Contact> {
        self.contact_index.get(id)
    }

    /// 查找联系人；给出 `group_id` 时在该群的成员表中查找
    pub fn search_member(&self, user_id: &str, group_id: Option<&str>) -> Option<Contact> {
        match group_id {
            Some(group_id) if !group_id.is_empty() => self
                .contact_index
                .get(group_id)?
                .member(user_id)
                .cloned(),
            _ => self.contact_index.get(user_id).cloned(),
        }
    }

    /// 按类型分组，组内按 id 排序
    pub fn buckets(&self) -> ContactBuckets {
        let mut contacts: Vec<&Contact> = self.contact_index.values().collect();
        contacts.sort_by(|a, b| a.id.cmp(&b.id));
        ContactBuckets::partition(contacts)
    }

    pub fn upsert_contact(&mut self, contact: Contact) {
        if let Some(slot) = self.chat_list.iter_mut().find(|c| c.id == contact.id) {
            *slot = contact.clone();
        }
        self.contact_index.insert(contact.id.clone(), contact);
    }

    pub fn remove_contact(&mut self, id: &str) -> Option<Contact> {
        self.chat_list.retain(|c| c.id != id);
        self.contact_index.remove(id)
    }

    /// 先按 seed 顺序、再按 chat_set 顺序重建会话列表；索引中不存在的 id 被丢弃
    pub fn reconcile_chat_list(&mut self, seed: &[String], chat_set: &[String]) {
        let mut seen = HashSet::new();
        let mut chat_list = Vec::new();
        for id in seed.iter().chain(chat_set) {
            if !seen.insert(id.as_str()) {
                continue;
            }
            if let Some(contact) = self.contact_index.get(id) {
                chat_list.push(contact.clone());
            }
        }
        self.chat_list = chat_list;
    }
}

/// 会话共享上下文
pub struct SessionContext {
    config: ClientConfig,
    hosts: RwLock<WxHosts>,
    session: RwLock<Session>,
    snapshot: RwLock<UserSnapshot>,
}

impl SessionContext {
    pub fn new(config: ClientConfig) -> Self {
        let hosts = config.hosts.clone();
        Self {
            config,
            hosts: RwLock::new(hosts),
            session: RwLock::new(Session::default()),
            snapshot: RwLock::new(UserSnapshot::default()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn hosts(&self) -> WxHosts {
        self.hosts.read().clone()
    }

    /// 根据登录跳转地址切换 API 域名
    pub fn adopt_redirect_hosts(&self, redirect_url: &str) {
        if let Some(hosts) = self.config.hosts.for_redirect(redirect_url) {
            *self.hosts.write() = hosts;
        }
    }

    pub fn session(&self) -> Session {
        self.session.read().clone()
    }

    pub fn set_session(&self, session: Session) {
        *self.session.write() = session;
    }

    pub fn update_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.session.write())
    }

    pub fn credentials(&self) -> Credentials {
        self.session.read().credentials.clone()
    }

    pub fn snapshot(&self) -> UserSnapshot {
        self.snapshot.read().clone()
    }

    pub fn set_snapshot(&self, snapshot: UserSnapshot) {
        *self.snapshot.write() = snapshot;
    }

    pub fn read_snapshot<R>(&self, f: impl FnOnce(&UserSnapshot) -> R) -> R {
        f(&self.snapshot.read())
    }

    pub fn write_snapshot<R>(&self, f: impl FnOnce(&mut UserSnapshot) -> R) -> R {
        f(&mut self.snapshot.write())
    }

    /// 整体替换两个游标
    pub fn swap_sync_state(&self, state: SyncState) {
        self.snapshot.write().sync = state;
    }

    pub fn sync_state(&self) -> SyncState {
        self.snapshot.read().sync.clone()
    }
}
