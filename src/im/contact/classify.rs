//! 联系人分类规则
//!
//! 规则按固定顺序匹配：特殊账号 → `@@` 群组 → 公众号标记位 → `@` 好友 → 未知

use crate::im::contact::models::ContactKind;

/// 官方/系统账号
pub const SPECIAL_USERS: &[&str] = &[
    "newsapp",
    "fmessage",
    "filehelper",
    "weibo",
    "qqmail",
    "tmessage",
    "qmessage",
    "qqsync",
    "floatbottle",
    "lbsapp",
    "shakeapp",
    "medianote",
    "qqfriend",
    "readerapp",
    "blogapp",
    "facebookapp",
    "masssendapp",
    "meishiapp",
    "feedsapp",
    "voip",
    "blogappweixin",
    "weixin",
    "brandsessionholder",
    "weixinreminder",
    "wxid_novlwrv3lqwv11",
    "gh_22b87fa7cb3c",
    "officialaccounts",
    "notification_messages",
    "wxitil",
    "userexperience_alarm",
];

/// VerifyFlag 中表示公众号/服务号的位
pub const VERIFY_FLAG_PUBLIC: i64 = 8;

pub fn is_special(id: &str) -> bool {
    SPECIAL_USERS.contains(&id)
}

pub fn is_group_id(id: &str) -> bool {
    id.starts_with("@@")
}

/// 根据 id 和 VerifyFlag 推导联系人类型
pub fn classify(id: &str, verify_flag: i64) -> ContactKind {
    if is_special(id) {
        ContactKind::Special
    } else if is_group_id(id) {
        ContactKind::Group
    } else if verify_flag & VERIFY_FLAG_PUBLIC != 0 {
        ContactKind::Public
    } else if id.starts_with('@') {
        ContactKind::Member
    } else {
        ContactKind::Unknown
    }
}
