//! 登录数据持久化（热加载）
//!
//! 单个 JSON 文件 `<root>/auth.record`：`{ LoginData: Session, UserData: UserSnapshot }`

use crate::im::config::AUTH_RECORD_FILE;
use crate::im::session::{Session, UserSnapshot};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct AuthRecordRef<'a> {
    #[serde(rename = "LoginData")]
    login_data: &'a Session,
    #[serde(rename = "UserData")]
    user_data: &'a UserSnapshot,
}

#[derive(Deserialize)]
struct AuthRecord {
    #[serde(rename = "LoginData")]
    login_data: Session,
    #[serde(rename = "UserData")]
    user_data: UserSnapshot,
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            path: root_dir.as_ref().join(AUTH_RECORD_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 保存登录数据；失败只记录日志
    pub async fn save(&self, session: &Session, snapshot: &UserSnapshot) -> bool {
        let record = AuthRecordRef {
            login_data: session,
            user_data: snapshot,
        };
        let data = match serde_json::to_vec(&record) {
            Ok(data) => data,
            Err(e) => {
                warn!("[Store] 序列化登录数据失败: {}", e);
                return false;
            }
        };
        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!("[Store] 创建目录失败[path:{}]: {}", parent.display(), e);
                return false;
            }
        }
        // 先写临时文件再改名，中途崩溃不会损坏已有记录
        let tmp = self.tmp_path();
        if let Err(e) = tokio::fs::write(&tmp, data).await {
            warn!("[Store] 保存登录数据失败[path:{}]: {}", tmp.display(), e);
            return false;
        }
        match tokio::fs::rename(&tmp, &self.path).await {
            Ok(()) => {
                info!("[Store] 💾 登录数据已保存: {}", self.path.display());
                true
            }
            Err(e) => {
                warn!("[Store] 替换登录数据失败[path:{}]: {}", self.path.display(), e);
                if let Err(e) = tokio::fs::remove_file(&tmp).await {
                    debug!("[Store] 删除临时文件失败: {}", e);
                }
                false
            }
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// 读取登录数据；文件不存在或内容损坏时返回 None
    pub async fn restore(&self) -> Option<(Session, UserSnapshot)> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) => {
                debug!("[Store] 读取登录数据失败[path:{}]: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice::<AuthRecord>(&data) {
            Ok(record) => {
                info!("[Store] 已读取登录数据, uuid={}", record.login_data.uuid);
                Some((record.login_data, record.user_data))
            }
            Err(e) => {
                warn!("[Store] 登录数据解析失败: {}", e);
                None
            }
        }
    }

    /// 删除登录数据
    pub async fn clear(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            debug!("[Store] 删除登录数据失败: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::contact::models::{Contact, ContactKind};
    use crate::im::request::WxCookie;
    use crate::im::session::Credentials;
    use crate::im::sync::cursor::{SyncCursor, SyncState};

    fn sample() -> (Session, UserSnapshot) {
        let mut session = Session::new("uuid-9".into(), "https://wx.qq.com/cgi-bin/x".into());
        session.credentials = Credentials {
            ret: 0,
            skey: "@crypt_1".into(),
            wxsid: "sid".into(),
            wxuin: 42,
            pass_ticket: "pt".into(),
            device_id: "e123456789012345".into(),
            ..Default::default()
        };
        session.cookies = vec![WxCookie {
            name: "wxuin".into(),
            value: "42".into(),
            domain: "qq.com".into(),
        }];

        let mut snapshot = UserSnapshot {
            self_contact: Contact {
                id: "@self".into(),
                nick_name: "Me".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        snapshot.upsert_contact(Contact {
            id: "@@g".into(),
            display_name: "Team".into(),
            kind: ContactKind::Group,
            group_members: Some(
                [(
                    "@m".to_string(),
                    Contact {
                        id: "@m".into(),
                        nick_name: "Mia".into(),
                        ..Default::default()
                    },
                )]
                .into(),
            ),
            ..Default::default()
        });
        snapshot.reconcile_chat_list(&["@@g".to_string()], &[]);
        snapshot.sync = SyncState::from_response(
            SyncCursor::from_pairs(&[(1, 5), (2, 6)]),
            Some(SyncCursor::from_pairs(&[(1, 7)])),
        );
        (session, snapshot)
    }

    #[tokio::test]
    async fn save_then_restore_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let (session, snapshot) = sample();

        assert!(store.save(&session, &snapshot).await);
        let (restored_session, restored) = store.restore().await.unwrap();

        assert_eq!(restored_session, session);
        assert_eq!(restored.contact_index, snapshot.contact_index);
        assert_eq!(restored.sync, snapshot.sync);
        assert_eq!(restored, snapshot);
    }

    #[tokio::test]
    async fn blob_uses_wire_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let (session, snapshot) = sample();
        store.save(&session, &snapshot).await;

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("auth.record")).unwrap()).unwrap();
        assert_eq!(raw["LoginData"]["UUID"], "uuid-9");
        assert_eq!(raw["LoginData"]["BaseRequest"]["Wxuin"], 42);
        assert_eq!(raw["LoginData"]["BaseRequest"]["DeviceID"], "e123456789012345");
        assert_eq!(raw["LoginData"]["Cookie"][0]["Name"], "wxuin");
        assert_eq!(raw["UserData"]["UserInfo"]["UserName"], "@self");
        assert!(raw["UserData"]["GlobalMemberMap"]["@@g"].is_object());
        assert_eq!(raw["UserData"]["SyncKey"]["Count"], 2);
    }

    #[tokio::test]
    async fn missing_or_corrupt_blob_restores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.restore().await.is_none());

        std::fs::write(store.path(), b"{not json").unwrap();
        assert!(store.restore().await.is_none());

        store.clear().await;
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn save_replaces_previous_record_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        std::fs::write(store.path(), b"{not json").unwrap();
        // 上次中途退出留下的临时文件
        std::fs::write(dir.path().join("auth.record.tmp"), b"partial").unwrap();
        let (session, snapshot) = sample();

        assert!(store.save(&session, &snapshot).await);

        assert!(!dir.path().join("auth.record.tmp").exists());
        let (restored_session, _) = store.restore().await.unwrap();
        assert_eq!(restored_session.uuid, "uuid-9");
    }

    #[tokio::test]
    async fn unwritable_root_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let store = SessionStore::new(blocker.join("nested"));
        let (session, snapshot) = sample();
        assert!(!store.save(&session, &snapshot).await);
    }
}
