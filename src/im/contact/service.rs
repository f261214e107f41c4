//! 登录初始化与联系人同步服务层

use crate::im::contact::api::{ContactApi, BATCH_CONTACT_LIMIT};
use crate::im::contact::classify::{classify, SPECIAL_USERS};
use crate::im::contact::models::{Contact, ContactKind};
use crate::im::error::WxError;
use crate::im::request::Requester;
use crate::im::session::{SessionContext, UserSnapshot};
use crate::im::sync::cursor::SyncState;
use crate::im::types::WireContact;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 分页拉取联系人的最大页数
const MAX_CONTACT_PAGES: usize = 100;

/// 会话初始化器：用登录跳转地址换取凭证并建立联系人快照
pub struct SessionInitializer {
    api: ContactApi,
    ctx: Arc<SessionContext>,
}

impl SessionInitializer {
    pub fn new(requester: Arc<dyn Requester>, ctx: Arc<SessionContext>) -> Self {
        Self {
            api: ContactApi::new(requester, ctx.clone()),
            ctx,
        }
    }

    /// 依次执行：登录公参 → 初始化 → 状态通知 → 联系人 → 会话列表
    ///
    /// 任一步失败立即返回该步骤的错误；成功时快照写入共享上下文
    pub async fn initialize(&self) -> Result<UserSnapshot, WxError> {
        let session = self.ctx.session();
        info!("[Init] 🔄 开始初始化登录数据, uuid={}", session.uuid);

        self.ctx.adopt_redirect_hosts(&session.login_redirect_url);
        let creds = self.api.fetch_credentials(&session.login_redirect_url).await?;
        let cookies = self.api.requester().cookies(&self.ctx.hosts().wx_root());
        self.ctx.update_session(|s| {
            s.credentials = creds.clone();
            s.cookies = cookies;
        });

        let init = self.api.init(&creds).await?;
        let self_contact = Contact::from_wire(&init.user);

        self.api.status_notify(&creds, &self_contact.id).await?;

        let contacts = self.fetch_all_contacts().await?;

        let mut snapshot = UserSnapshot {
            self_contact,
            subscriptions: init.mp_subscribe_msg_list.clone(),
            sync: SyncState::seeded(init.sync_key.clone()),
            ..Default::default()
        };
        for id in SPECIAL_USERS {
            snapshot.upsert_contact(Contact::special(id));
        }
        let seed: Vec<String> = init
            .contact_list
            .iter()
            .map(|c| c.user_name.clone())
            .collect();
        for wire in &init.contact_list {
            snapshot.upsert_contact(Contact::from_wire(wire));
        }
        for wire in &contacts {
            snapshot.upsert_contact(Contact::from_wire(wire));
        }

        let chat_set = parse_chat_set(&init.chat_set);
        snapshot.reconcile_chat_list(&seed, &chat_set);

        let buckets = snapshot.buckets();
        info!(
            "[Init] ✅ 初始化完成: 好友={}, 群组={}, 公众号={}, 特殊={}, 未知={}, 会话={}",
            buckets.member_list.len(),
            buckets.group.len(),
            buckets.public_user.len(),
            buckets.special.len(),
            buckets.unknown.len(),
            snapshot.chat_list.len()
        );

        self.ctx.set_snapshot(snapshot.clone());
        Ok(snapshot)
    }

    /// 按 Seq 分页拉取完整联系人列表
    async fn fetch_all_contacts(&self) -> Result<Vec<WireContact>, WxError> {
        let creds = self.ctx.credentials();
        let mut contacts = Vec::new();
        let mut seq = 0;
        for page in 0..MAX_CONTACT_PAGES {
            let resp = self.api.get_contact(&creds, seq).await?;
            debug!(
                "[Init] 联系人第 {} 页: {} 个, seq={}",
                page + 1,
                resp.member_list.len(),
                resp.seq
            );
            contacts.extend(resp.member_list);
            if resp.seq == 0 {
                break;
            }
            seq = resp.seq;
        }
        Ok(contacts)
    }

    /// 通讯录变更后重新拉取并全量重新分类
    ///
    /// 不在全量列表里的联系人（特殊账号、批量查询得到的临时会话）保留不删
    pub async fn resync_contacts(&self) -> Result<usize, WxError> {
        info!("[Init] 🔄 通讯录发生变更，重新同步联系人");
        let contacts = self.fetch_all_contacts().await?;
        let count = contacts.len();
        self.ctx.write_snapshot(|snapshot| {
            for wire in &contacts {
                upsert_keeping_members(snapshot, wire);
            }
        });
        info!("[Init] ✅ 联系人同步完成: {} 个", count);
        Ok(count)
    }

    /// 应用 webwxsync 返回的联系人变更
    pub fn apply_contact_changes(&self, modified: &[WireContact], deleted: &[String]) {
        if modified.is_empty() && deleted.is_empty() {
            return;
        }
        self.ctx.write_snapshot(|snapshot| {
            for wire in modified {
                upsert_keeping_members(snapshot, wire);
            }
            for id in deleted {
                snapshot.remove_contact(id);
            }
        });
        debug!(
            "[Init] 联系人变更: 修改={}, 删除={}",
            modified.len(),
            deleted.len()
        );
    }

    /// 查找联系人；给定群 id 时只在该群成员中查找
    pub fn search_member(&self, user_id: &str, group_id: Option<&str>) -> Option<Contact> {
        self.ctx
            .read_snapshot(|snapshot| snapshot.search_member(user_id, group_id))
    }

    /// 批量查询联系人详情并合并到索引
    ///
    /// 空列表或超过 50 个 id 时不发请求直接返回
    pub async fn batch_get_contact(&self, ids: &[String]) -> Result<usize, WxError> {
        if ids.is_empty() || ids.len() > BATCH_CONTACT_LIMIT {
            debug!("[Init] 批量查询联系人跳过: {} 个 id", ids.len());
            return Ok(0);
        }
        let creds = self.ctx.credentials();
        let resp = self.api.batch_get_contact(&creds, ids).await?;
        let merged = resp.contact_list.len();
        self.ctx.write_snapshot(|snapshot| {
            for wire in &resp.contact_list {
                let fresh = match snapshot.contact(&wire.user_name) {
                    Some(existing) => merge_contact(existing, wire),
                    None => {
                        let kind = match classify(&wire.user_name, wire.verify_flag) {
                            ContactKind::Member => ContactKind::Temporary,
                            other => other,
                        };
                        Contact::with_kind(wire, kind)
                    }
                };
                snapshot.upsert_contact(fresh);
            }
        });
        debug!("[Init] 批量查询联系人完成: {} 个", merged);
        Ok(merged)
    }

    /// 分批查询，每批不超过上限
    pub async fn enrich(&self, ids: &[String]) {
        for chunk in ids.chunks(BATCH_CONTACT_LIMIT) {
            if let Err(e) = self.batch_get_contact(chunk).await {
                warn!("[Init] 补全联系人失败: {}", e);
            }
        }
    }
}

/// 合并批量查询结果：保留原有类型，刷新名称与群成员
fn merge_contact(existing: &Contact, wire: &WireContact) -> Contact {
    let mut merged = Contact::with_kind(wire, existing.kind);
    if merged.group_members.is_none() {
        merged.group_members = existing.group_members.clone();
    }
    if merged.nick_name.is_empty() {
        merged.nick_name = existing.nick_name.clone();
    }
    if merged.display_name.is_empty() {
        merged.display_name = existing.display_name.clone();
    }
    merged
}

/// 按新数据重新分类写入索引；没带成员表的群沿用已知成员
fn upsert_keeping_members(snapshot: &mut UserSnapshot, wire: &WireContact) {
    let mut contact = Contact::from_wire(wire);
    if contact.group_members.is_none() {
        if let Some(existing) = snapshot.contact(&contact.id) {
            contact.group_members = existing.group_members.clone();
        }
    }
    snapshot.upsert_contact(contact);
}

/// 解析逗号分隔的 ChatSet
pub fn parse_chat_set(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
