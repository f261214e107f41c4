//! 扫码登录状态机

use crate::im::config::ClientConfig;
use crate::im::error::LoginError;
use crate::im::login::api::{qrcode_link, LoginApi, ScanStatus};
use crate::im::login::listener::{EmptyLoginListener, LoginListener};
use crate::im::request::Requester;
use crate::im::session::Session;
use crate::im::shutdown::wait_for_shutdown;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 登录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    RequestingUuid,
    QrIssued,
    Polling,
    Confirmed,
    Expired,
    TimedOut,
    Failed,
}

/// 二维码文件，离开作用域时删除
struct QrCodeFile {
    path: PathBuf,
}

impl QrCodeFile {
    async fn create(path: PathBuf, image: &[u8]) -> Result<Self, LoginError> {
        tokio::fs::write(&path, image)
            .await
            .map_err(|e| LoginError::QrCode(format!("创建二维码文件失败[path:{}]: {}", path.display(), e)))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for QrCodeFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("[Login] 删除二维码文件失败: {}", e);
        }
    }
}

/// 扫码登录流程
pub struct LoginFlow {
    api: LoginApi,
    listener: Arc<dyn LoginListener>,
    qrcode_path: PathBuf,
    retry_budget: u32,
    retry_delay: Duration,
    state: LoginState,
    polls: u32,
}

impl LoginFlow {
    /// 创建登录流程（使用默认空监听器）
    pub fn new(requester: Arc<dyn Requester>, config: &ClientConfig) -> Self {
        Self::with_listener(requester, config, Arc::new(EmptyLoginListener))
    }

    pub fn with_listener(
        requester: Arc<dyn Requester>,
        config: &ClientConfig,
        listener: Arc<dyn LoginListener>,
    ) -> Self {
        Self {
            api: LoginApi::new(requester, config),
            listener,
            qrcode_path: config.qrcode_path(),
            retry_budget: config.scan_retry_times,
            retry_delay: config.scan_retry_delay,
            state: LoginState::RequestingUuid,
            polls: 0,
        }
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    /// 已发出的轮询请求数
    pub fn polls(&self) -> u32 {
        self.polls
    }

    async fn enter(&mut self, state: LoginState) {
        self.state = state;
        self.listener.on_state_changed(state).await;
    }

    async fn fail(&mut self, state: LoginState, err: LoginError) -> Result<Session, LoginError> {
        warn!("[Login] ❌ 扫码登录失败: {}", err);
        self.enter(state).await;
        Err(err)
    }

    /// 执行完整登录，成功时返回带跳转地址的会话
    ///
    /// 等待扫码期间收到停止信号会返回 [`LoginError::Cancelled`]
    pub async fn run(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<Session, LoginError> {
        self.enter(LoginState::RequestingUuid).await;
        let uuid = match self.api.get_uuid().await {
            Ok(uuid) => uuid,
            Err(e) => return self.fail(LoginState::Failed, e).await,
        };

        let image = match self.api.get_qrcode(&uuid).await {
            Ok(image) => image,
            Err(e) => return self.fail(LoginState::Failed, e).await,
        };
        let qrcode = match QrCodeFile::create(self.qrcode_path.clone(), &image).await {
            Ok(file) => file,
            Err(e) => return self.fail(LoginState::Failed, e).await,
        };
        self.enter(LoginState::QrIssued).await;
        info!("[Login] 📷 请使用手机扫描二维码: {} ({})", qrcode.path().display(), qrcode_link(&uuid));
        self.listener.on_qr_code(&uuid, qrcode.path()).await;

        self.poll(uuid, shutdown).await
    }

    async fn poll(
        &mut self,
        uuid: String,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Session, LoginError> {
        let mut tip = "1";
        let mut retries_used = 0u32;
        self.enter(LoginState::Polling).await;

        loop {
            self.polls += 1;
            let status = tokio::select! {
                status = self.api.check_login(&uuid, tip) => status,
                _ = wait_for_shutdown(shutdown) => {
                    return self.fail(LoginState::Failed, LoginError::Cancelled).await;
                }
            };

            match status {
                Ok(ScanStatus::Confirmed { redirect_url }) => {
                    info!("[Login] ✅ 扫码登录成功");
                    debug!("[Login] 登录重定向地址: {}", redirect_url);
                    self.enter(LoginState::Confirmed).await;
                    return Ok(Session::new(uuid, redirect_url));
                }
                Ok(ScanStatus::Scanned) => {
                    debug!("[Login] 已扫码，等待手机确认");
                    tip = "0";
                }
                Ok(ScanStatus::Waiting) => {
                    debug!("[Login] 等待扫码");
                    tip = "1";
                }
                Ok(ScanStatus::Expired) => {
                    return self.fail(LoginState::Expired, LoginError::Expired).await;
                }
                Ok(ScanStatus::TimedOut) => {
                    return self.fail(LoginState::TimedOut, LoginError::TimedOut).await;
                }
                Ok(ScanStatus::Unknown(code)) => {
                    return self.fail(LoginState::Failed, LoginError::Unknown(code)).await;
                }
                Err(e) => return self.fail(LoginState::Failed, e).await,
            }

            if retries_used >= self.retry_budget {
                return self.fail(LoginState::Failed, LoginError::RetryExhausted).await;
            }
            retries_used += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = wait_for_shutdown(shutdown) => {
                    return self.fail(LoginState::Failed, LoginError::Cancelled).await;
                }
            }
        }
    }
}
