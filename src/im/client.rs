//! webwx 客户端
//!
//! 负责整个生命周期：扫码登录或热加载 → 初始化 → 启动同步循环与发送循环 → 停止时保存登录数据。
//! 宿主程序通过四个队列与客户端交互：入站消息、出站消息、发送结果与终止通知。

use crate::im::config::ClientConfig;
use crate::im::contact::models::{Contact, ContactBuckets};
use crate::im::contact::service::SessionInitializer;
use crate::im::error::{Result, WxError};
use crate::im::logging::{set_log, LogSink};
use crate::im::login::api::LoginApi;
use crate::im::login::listener::{EmptyLoginListener, LoginListener};
use crate::im::login::service::LoginFlow;
use crate::im::message::send::SendCoordinator;
use crate::im::message::types::{InboundMessage, OutboundMessage, SendResult};
use crate::im::request::{HttpRequester, Requester};
use crate::im::session::{Session, SessionContext, UserSnapshot};
use crate::im::shutdown::ShutdownHandle;
use crate::im::store::SessionStore;
use crate::im::sync::service::{CloseReason, SyncEngine};
use crate::im::types::MpSubscription;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// start 的结果
#[derive(Debug)]
pub enum StartOutcome {
    /// 扫码登录并完成初始化
    FreshLogin,
    /// 从 auth.record 恢复；追赶拉取失败时携带错误，但会话继续使用
    Restored { catch_up: Option<WxError> },
}

struct Queues {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Option<mpsc::Receiver<OutboundMessage>>,
    result_tx: mpsc::Sender<SendResult>,
    result_rx: Option<mpsc::Receiver<SendResult>>,
    closed_tx: mpsc::Sender<CloseReason>,
    closed_rx: Option<mpsc::Receiver<CloseReason>>,
}

impl Queues {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (result_tx, result_rx) = mpsc::channel(capacity);
        let (closed_tx, closed_rx) = mpsc::channel(1);
        Self {
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            result_tx,
            result_rx: Some(result_rx),
            closed_tx,
            closed_rx: Some(closed_rx),
        }
    }
}

/// webwx 客户端
pub struct WxClient {
    config: ClientConfig,
    requester: Arc<dyn Requester>,
    ctx: Arc<SessionContext>,
    login_listener: Arc<dyn LoginListener>,
    shutdown: ShutdownHandle,
    queues: Queues,
    tasks: Vec<JoinHandle<()>>,
}

impl WxClient {
    /// 使用默认的 reqwest 请求器创建客户端
    pub fn new(config: ClientConfig) -> Result<Self> {
        let requester = Arc::new(HttpRequester::new(&config)?);
        Ok(Self::with_requester(config, requester))
    }

    /// 使用自定义请求器创建客户端
    pub fn with_requester(config: ClientConfig, requester: Arc<dyn Requester>) -> Self {
        let queues = Queues::new(config.queue_capacity);
        Self {
            ctx: Arc::new(SessionContext::new(config.clone())),
            config,
            requester,
            login_listener: Arc::new(EmptyLoginListener),
            shutdown: ShutdownHandle::new(),
            queues,
            tasks: Vec::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn is_started(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// 配置变更只在启动前生效
    fn reconfigure(&mut self, f: impl FnOnce(&mut ClientConfig)) {
        if self.is_started() {
            warn!("[Client] 客户端已启动，忽略配置变更");
            return;
        }
        f(&mut self.config);
        self.ctx = Arc::new(SessionContext::new(self.config.clone()));
    }

    pub fn set_hot_reload(&mut self, enabled: bool) {
        self.reconfigure(|config| config.hot_reload = enabled);
    }

    pub fn set_root_path(&mut self, root: impl Into<PathBuf>) {
        let root = root.into();
        self.reconfigure(|config| config.root_dir = root);
    }

    /// 安装全局日志；已安装时返回 `Ok(false)`
    pub fn set_log(&mut self, level: &str, sink: LogSink) -> io::Result<bool> {
        let installed = set_log(level, &sink)?;
        self.config.log_level = level.to_string();
        self.config.log_sink = sink;
        Ok(installed)
    }

    /// 注册登录监听器（二维码展示）
    pub fn set_login_listener(&mut self, listener: Arc<dyn LoginListener>) {
        self.login_listener = listener;
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// 入站消息队列，只能取走一次
    ///
    /// 热加载时 start 会先投递离线期间的消息，应在 start 之前取走并开始消费
    pub fn take_inbound(&mut self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.queues.inbound_rx.take()
    }

    pub fn outbound_sender(&self) -> mpsc::Sender<OutboundMessage> {
        self.queues.outbound_tx.clone()
    }

    pub fn take_results(&mut self) -> Option<mpsc::Receiver<SendResult>> {
        self.queues.result_rx.take()
    }

    /// 终止通知，同步循环结束时最多发出一次
    pub fn take_termination(&mut self) -> Option<mpsc::Receiver<CloseReason>> {
        self.queues.closed_rx.take()
    }

    fn initializer(&self) -> Arc<SessionInitializer> {
        Arc::new(SessionInitializer::new(self.requester.clone(), self.ctx.clone()))
    }

    fn store(&self) -> SessionStore {
        SessionStore::new(&self.config.root_dir)
    }

    /// 登录并启动同步循环与发送循环
    pub async fn start(&mut self) -> Result<StartOutcome> {
        let Some(outbound_rx) = self.queues.outbound_rx.take() else {
            return Err(WxError::AlreadyStarted);
        };
        info!("[Client] 🚀 启动客户端, root={}", self.config.root_dir.display());

        let contacts = self.initializer();
        let engine = SyncEngine::new(
            self.requester.clone(),
            self.ctx.clone(),
            contacts.clone(),
            self.queues.inbound_tx.clone(),
            self.queues.closed_tx.clone(),
            self.shutdown.subscribe(),
        );

        let restored = if self.config.hot_reload {
            self.warm_start(&engine).await
        } else {
            None
        };
        let outcome = match restored {
            Some(outcome) => outcome,
            None => match self.fresh_login(&contacts).await {
                Ok(()) => StartOutcome::FreshLogin,
                Err(e) => {
                    self.queues.outbound_rx = Some(outbound_rx);
                    return Err(e);
                }
            },
        };

        let sender = SendCoordinator::new(
            self.requester.clone(),
            self.ctx.clone(),
            outbound_rx,
            self.queues.result_tx.clone(),
            self.shutdown.subscribe(),
        );
        self.tasks.push(tokio::spawn(engine.run()));
        self.tasks.push(tokio::spawn(sender.run()));

        let me = self.get_self();
        info!("[Client] ✅ 客户端已启动: {}({})", me.label(), me.id);
        Ok(outcome)
    }

    async fn fresh_login(&self, contacts: &SessionInitializer) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        let mut flow = LoginFlow::with_listener(
            self.requester.clone(),
            &self.config,
            self.login_listener.clone(),
        );
        let session = flow.run(&mut shutdown).await?;
        self.ctx.set_session(session);
        contacts.initialize().await?;
        Ok(())
    }

    /// 恢复登录数据并追赶离线消息；返回 None 时改为扫码登录
    async fn warm_start(&self, engine: &SyncEngine) -> Option<StartOutcome> {
        let store = self.store();
        let (session, snapshot) = store.restore().await?;
        if !session.credentials.is_authenticated() {
            warn!("[Client] 登录数据不完整，重新扫码登录");
            return None;
        }

        self.ctx.adopt_redirect_hosts(&session.login_redirect_url);
        self.requester
            .restore_cookies(&self.ctx.hosts().wx_root(), &session.cookies);
        info!(
            "[Client] 🔄 热加载登录数据, uuid={}, 联系人={}",
            session.uuid,
            snapshot.contact_index.len()
        );
        self.ctx.set_session(session);
        self.ctx.set_snapshot(snapshot);

        match engine.catch_up().await {
            Ok(count) => {
                info!("[Client] ✅ 热加载完成，补收 {} 条消息", count);
                Some(StartOutcome::Restored { catch_up: None })
            }
            Err(e) if e.invalidates_session() => {
                warn!("[Client] 登录数据已失效，重新扫码登录: {}", e);
                self.ctx.set_session(Session::default());
                self.ctx.set_snapshot(UserSnapshot::default());
                store.clear().await;
                None
            }
            Err(e) => {
                warn!("[Client] 热加载补收消息失败: {}", e);
                Some(StartOutcome::Restored {
                    catch_up: Some(WxError::HotReload(e.to_string())),
                })
            }
        }
    }

    /// 发出停止信号；启用热加载时保存登录数据
    ///
    /// 不等待进行中的请求结束
    pub async fn stop(&mut self) {
        info!("[Client] 停止客户端");
        self.shutdown.trigger();
        if self.config.hot_reload && self.ctx.credentials().is_authenticated() {
            let cookies = self.requester.cookies(&self.ctx.hosts().wx_root());
            if !cookies.is_empty() {
                self.ctx.update_session(|s| s.cookies = cookies);
            }
            self.store()
                .save(&self.ctx.session(), &self.ctx.snapshot())
                .await;
        }
        self.tasks.clear();
    }

    /// 退出登录并删除本地登录数据
    pub async fn logout(&self) -> Result<()> {
        let creds = self.ctx.credentials();
        LoginApi::new(self.requester.clone(), &self.config)
            .logout(&self.ctx.hosts(), &creds.skey)
            .await?;
        self.store().clear().await;
        info!("[Client] 已退出登录");
        Ok(())
    }

    pub fn get_self(&self) -> Contact {
        self.ctx.read_snapshot(|s| s.self_contact.clone())
    }

    /// 按类型分组的联系人
    pub fn get_contacts(&self) -> ContactBuckets {
        self.ctx.read_snapshot(|s| s.buckets())
    }

    pub fn get_chat_list(&self) -> Vec<Contact> {
        self.ctx.read_snapshot(|s| s.chat_list.clone())
    }

    pub fn get_subscriptions(&self) -> Vec<MpSubscription> {
        self.ctx.read_snapshot(|s| s.subscriptions.clone())
    }

    pub fn get_contact_index(&self) -> HashMap<String, Contact> {
        self.ctx.read_snapshot(|s| s.contact_index.clone())
    }

    pub fn search_member(&self, user_id: &str, group_id: Option<&str>) -> Option<Contact> {
        self.ctx
            .read_snapshot(|s| s.search_member(user_id, group_id))
    }

    /// 批量查询联系人（最多 50 个）
    pub async fn batch_get_contact(&self, ids: &[String]) -> Result<usize> {
        self.initializer().batch_get_contact(ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::contact::models::ContactKind;
    use crate::im::error::SyncCheckError;
    use crate::im::logging::init_test_logger;
    use crate::im::request::mock::{MockReply, MockRequester};
    use crate::im::request::WxCookie;
    use crate::im::session::Credentials;
    use crate::im::sync::cursor::{SyncCursor, SyncState};
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    fn config(root: &Path, hot_reload: bool) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.root_dir = root.to_path_buf();
        config.hot_reload = hot_reload;
        config.scan_retry_delay = Duration::ZERO;
        config
    }

    async fn seed_record(root: &Path) {
        let mut session = Session::new(
            "uuid-old".into(),
            "https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=T".into(),
        );
        session.credentials = Credentials {
            skey: "@crypt_s".into(),
            wxsid: "sid".into(),
            wxuin: 7,
            pass_ticket: "pt".into(),
            device_id: "e000000000000001".into(),
            ..Default::default()
        };
        session.cookies = vec![WxCookie {
            name: "wxsid".into(),
            value: "sid".into(),
            domain: "qq.com".into(),
        }];
        let mut snapshot = UserSnapshot {
            self_contact: Contact {
                id: "@self".into(),
                nick_name: "Me".into(),
                ..Default::default()
            },
            sync: SyncState::seeded(SyncCursor::from_pairs(&[(1, 100)])),
            ..Default::default()
        };
        snapshot.upsert_contact(Contact {
            id: "@bob".into(),
            nick_name: "Bob".into(),
            kind: ContactKind::Member,
            ..Default::default()
        });
        SessionStore::new(root).save(&session, &snapshot).await;
    }

    fn sync_ok(messages: serde_json::Value) -> MockReply {
        MockReply::json(json!({
            "BaseResponse": {"Ret": 0, "ErrMsg": ""},
            "AddMsgList": messages,
            "SyncKey": {"Count": 1, "List": [{"Key": 1, "Val": 101}]}
        }))
    }

    fn fatal_probe() -> MockReply {
        MockReply::text(r#"window.synccheck={retcode:"1101",selector:"0"}"#)
    }

    fn idle_check() -> MockReply {
        MockReply::text(r#"window.synccheck={retcode:"0",selector:"0"}"#)
    }

    #[tokio::test]
    async fn warm_restart_catches_up_before_looping() {
        init_test_logger();
        let dir = tempfile::tempdir().unwrap();
        seed_record(dir.path()).await;
        let mock = Arc::new(
            MockRequester::new()
                .route(
                    "webwxsync",
                    vec![sync_ok(json!([{"MsgId": "9", "FromUserName": "@bob",
                        "ToUserName": "@self", "MsgType": 1, "Content": "missed you"}]))],
                )
                .route("synccheck", vec![idle_check(), fatal_probe()]),
        );
        let mut client = WxClient::with_requester(config(dir.path(), true), mock.clone());
        let mut inbound = client.take_inbound().unwrap();
        let mut closed = client.take_termination().unwrap();

        let outcome = client.start().await.unwrap();

        assert!(matches!(outcome, StartOutcome::Restored { catch_up: None }));
        let message = inbound.recv().await.unwrap();
        assert_eq!(message.display_content, "missed you");
        assert_eq!(message.resolved_sender_name, "Bob");
        assert_eq!(
            closed.recv().await,
            Some(CloseReason::Probe(SyncCheckError::LoggedInElsewhere))
        );

        assert!(mock.calls_to("jslogin").is_empty());
        assert_eq!(mock.cookies("https://wx.qq.com/").len(), 1);
        assert!(mock.calls()[0].url.starts_with("https://webpush.wx.qq.com/"));
        assert!(mock.calls()[1].url.starts_with("https://wx.qq.com/"));
        assert_eq!(client.get_self().id, "@self");
        assert!(client.get_contact_index().contains_key("@bob"));
    }

    #[tokio::test]
    async fn catch_up_failure_is_reported_but_session_kept() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(dir.path()).await;
        let mock = Arc::new(
            MockRequester::new()
                .route("webwxsync", vec![MockReply::Status(502)])
                .route("synccheck", vec![idle_check(), fatal_probe()]),
        );
        let mut client = WxClient::with_requester(config(dir.path(), true), mock.clone());

        let outcome = client.start().await.unwrap();

        assert!(matches!(
            outcome,
            StartOutcome::Restored {
                catch_up: Some(WxError::HotReload(_))
            }
        ));
        assert_eq!(client.ctx.credentials().skey, "@crypt_s");
        assert!(mock.calls_to("jslogin").is_empty());
    }

    fn fresh_login_routes(mock: MockRequester) -> MockRequester {
        mock.route(
            "jslogin",
            vec![MockReply::text(
                r#"window.QRLogin.code = 200; window.QRLogin.uuid = "newUUID==";"#,
            )],
        )
        .route("qrcode/", vec![MockReply::Body(vec![0xff, 0xd8])])
        .route(
            "mmwebwx-bin/login",
            vec![MockReply::text(
                "window.code=200;\nwindow.redirect_uri=\"https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=N\";",
            )],
        )
        .route(
            "webwxnewloginpage",
            vec![MockReply::text(
                "<error><ret>0</ret><message></message><skey>@crypt_new</skey>\
                 <wxsid>sid2</wxsid><wxuin>8</wxuin><pass_ticket>pt2</pass_ticket></error>",
            )],
        )
        .route(
            "webwxinit",
            vec![MockReply::json(json!({
                "BaseResponse": {"Ret": 0, "ErrMsg": ""},
                "User": {"UserName": "@me2", "NickName": "Me Again"},
                "ContactList": [],
                "SyncKey": {"Count": 1, "List": [{"Key": 1, "Val": 1}]},
                "ChatSet": ""
            }))],
        )
        .route(
            "webwxstatusnotify",
            vec![MockReply::json(json!({"BaseResponse": {"Ret": 0, "ErrMsg": ""}}))],
        )
        .route(
            "webwxgetcontact",
            vec![MockReply::json(json!({
                "BaseResponse": {"Ret": 0, "ErrMsg": ""},
                "Seq": 0,
                "MemberList": [{"UserName": "@carol", "NickName": "Carol"}]
            }))],
        )
        .route("synccheck", vec![fatal_probe()])
    }

    #[tokio::test]
    async fn expired_record_falls_back_to_fresh_login() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(dir.path()).await;
        let mock = Arc::new(fresh_login_routes(
            MockRequester::new()
                .route("synccheck", vec![idle_check(), fatal_probe()])
                .route(
                    "webwxsync",
                    vec![MockReply::json(
                        json!({"BaseResponse": {"Ret": 1101, "ErrMsg": ""}}),
                    )],
                ),
        ));
        let mut client = WxClient::with_requester(config(dir.path(), true), mock.clone());

        let outcome = client.start().await.unwrap();

        assert!(matches!(outcome, StartOutcome::FreshLogin));
        assert_eq!(mock.calls_to("jslogin").len(), 1);
        assert_eq!(client.get_self().id, "@me2");
        assert!(!client.get_contact_index().contains_key("@bob"));
        assert_eq!(
            client.get_contacts().member_list.first().map(|c| c.id.clone()),
            Some("@carol".to_string())
        );
        assert!(!dir.path().join("qrcode.jpg").exists());
    }

    #[tokio::test]
    async fn logged_out_record_is_cleared_before_fresh_login() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(dir.path()).await;
        assert!(dir.path().join("auth.record").exists());
        let mock = Arc::new(fresh_login_routes(MockRequester::new()));
        let mut client = WxClient::with_requester(config(dir.path(), true), mock.clone());

        let outcome = client.start().await.unwrap();

        assert!(matches!(outcome, StartOutcome::FreshLogin));
        assert!(mock.calls_to("webwxsync").is_empty());
        assert_eq!(mock.calls_to("jslogin").len(), 1);
        assert!(!dir.path().join("auth.record").exists());
        assert_eq!(client.ctx.credentials().skey, "@crypt_new");
    }

    #[tokio::test]
    async fn stop_saves_record_when_hot_reload_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(fresh_login_routes(MockRequester::new()));
        let mut client = WxClient::with_requester(config(dir.path(), false), mock);
        client.set_hot_reload(true);

        client.start().await.unwrap();
        client.stop().await;

        let (session, snapshot) = SessionStore::new(dir.path()).restore().await.unwrap();
        assert_eq!(session.uuid, "newUUID==");
        assert_eq!(session.credentials.skey, "@crypt_new");
        assert_eq!(snapshot.self_contact.id, "@me2");
        assert!(client.shutdown_handle().is_triggered());
    }

    #[tokio::test]
    async fn stop_without_hot_reload_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(fresh_login_routes(MockRequester::new()));
        let mut client = WxClient::with_requester(config(dir.path(), false), mock);

        client.start().await.unwrap();
        client.stop().await;

        assert!(!dir.path().join("auth.record").exists());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(fresh_login_routes(MockRequester::new()));
        let mut client = WxClient::with_requester(config(dir.path(), false), mock);

        client.start().await.unwrap();
        assert!(matches!(client.start().await, Err(WxError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn failed_login_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockRequester::new().route(
            "jslogin",
            vec![MockReply::text(r#"window.QRLogin.code = 400; window.QRLogin.uuid = "";"#)],
        ));
        let mut client = WxClient::with_requester(config(dir.path(), false), mock);

        assert!(matches!(client.start().await, Err(WxError::Login(_))));
        assert!(matches!(client.start().await, Err(WxError::Login(_))));
    }

    #[tokio::test]
    async fn sends_flow_through_the_outbound_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(fresh_login_routes(MockRequester::new()).route(
            "webwxsendmsg",
            vec![MockReply::json(
                json!({"BaseResponse": {"Ret": 0, "ErrMsg": ""}, "MsgID": "srv1", "LocalID": "L"}),
            )],
        ));
        let mut client = WxClient::with_requester(config(dir.path(), false), mock.clone());
        let mut results = client.take_results().unwrap();
        client.start().await.unwrap();

        let message = OutboundMessage::text("@carol", "hi");
        client.outbound_sender().send(message.clone()).await.unwrap();
        let result = results.recv().await.unwrap();

        assert_eq!(result.local_id, message.local_id);
        assert_eq!(result.server_msg_id, "srv1");
        let body = MockRequester::json_body(&mock.calls_to("webwxsendmsg")[0]);
        assert_eq!(body["Msg"]["FromUserName"], "@me2");
    }

    #[tokio::test]
    async fn setters_apply_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut client =
            WxClient::with_requester(ClientConfig::new(), Arc::new(MockRequester::new()));
        client.set_root_path(dir.path());
        client.set_hot_reload(true);
        assert_eq!(client.config().root_dir, dir.path());
        assert!(client.config().hot_reload);
        assert_eq!(client.ctx.config().root_dir, dir.path());

        let ids: Vec<String> = (0..51).map(|i| format!("@u{}", i)).collect();
        assert_eq!(client.batch_get_contact(&ids).await.unwrap(), 0);
        assert!(client.take_inbound().is_some());
        assert!(client.take_inbound().is_none());
    }
}
