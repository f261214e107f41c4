//! 联系人数据模型

use crate::im::contact::classify::classify;
use crate::im::types::WireContact;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 联系人类型，入库时推导一次
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactKind {
    #[default]
    Unknown,
    /// 通过群聊批量查询得到的非好友
    Temporary,
    Member,
    Group,
    Public,
    Special,
}

/// 联系人（好友、群、公众号、系统账号）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    #[serde(rename = "UserName")]
    pub id: String,
    #[serde(rename = "DisplayName")]
    pub display_name: String,
    #[serde(rename = "NickName")]
    pub nick_name: String,
    #[serde(rename = "RemarkName")]
    pub remark_name: String,
    #[serde(rename = "HeadImgUrl")]
    pub avatar_url: String,
    #[serde(rename = "Sex")]
    pub sex: i64,
    #[serde(rename = "Signature")]
    pub signature: String,
    #[serde(rename = "VerifyFlag")]
    pub verify_flag: i64,
    #[serde(rename = "Province")]
    pub province: String,
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "MemberCount")]
    pub member_count: i64,
    #[serde(rename = "Type")]
    pub kind: ContactKind,
    /// 仅群组有：成员 id -> 成员
    #[serde(rename = "GroupMemberMap")]
    pub group_members: Option<BTreeMap<String, Contact>>,
}

impl Contact {
    /// 从服务器结构构造并分类
    pub fn from_wire(wire: &WireContact) -> Self {
        let kind = classify(&wire.user_name, wire.verify_flag);
        Self::with_kind(wire, kind)
    }

    pub fn with_kind(wire: &WireContact, kind: ContactKind) -> Self {
        let group_members = if wire.member_list.is_empty() {
            None
        } else {
            Some(
                wire.member_list
                    .iter()
                    .map(|m| (m.user_name.clone(), Contact::from_wire(m)))
                    .collect(),
            )
        };
        Self {
            id: wire.user_name.clone(),
            display_name: wire.display_name.clone(),
            nick_name: wire.nick_name.clone(),
            remark_name: wire.remark_name.clone(),
            avatar_url: wire.head_img_url.clone(),
            sex: wire.sex,
            signature: wire.signature.clone(),
            verify_flag: wire.verify_flag,
            province: wire.province.clone(),
            city: wire.city.clone(),
            member_count: wire.member_count,
            kind,
            group_members,
        }
    }

    /// 以 id 命名的系统账号
    pub fn special(id: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: id.to_string(),
            nick_name: id.to_string(),
            kind: ContactKind::Special,
            ..Default::default()
        }
    }

    /// 昵称，缺失时退回显示名
    pub fn name(&self) -> &str {
        if self.nick_name.is_empty() {
            &self.display_name
        } else {
            &self.nick_name
        }
    }

    /// 显示名，缺失时退回昵称
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.nick_name
        } else {
            &self.display_name
        }
    }

    pub fn member(&self, id: &str) -> Option<&Contact> {
        self.group_members.as_ref()?.get(id)
    }
}

/// 按类型分组的联系人
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContactBuckets {
    pub member_list: Vec<Contact>,
    pub group: Vec<Contact>,
    pub public_user: Vec<Contact>,
    pub special: Vec<Contact>,
    pub temporary: Vec<Contact>,
    pub unknown: Vec<Contact>,
}

impl ContactBuckets {
    pub fn partition<'a>(contacts: impl IntoIterator<Item = &'a Contact>) -> Self {
        let mut buckets = Self::default();
        for contact in contacts {
            let bucket = match contact.kind {
                ContactKind::Member => &mut buckets.member_list,
                ContactKind::Group => &mut buckets.group,
                ContactKind::Public => &mut buckets.public_user,
                ContactKind::Special => &mut buckets.special,
                ContactKind::Temporary => &mut buckets.temporary,
                ContactKind::Unknown => &mut buckets.unknown,
            };
            bucket.push(contact.clone());
        }
        buckets
    }

    pub fn len(&self) -> usize {
        self.member_list.len()
            + self.group.len()
            + self.public_user.len()
            + self.special.len()
            + self.temporary.len()
            + self.unknown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
