//! 错误类型
//!
//! 按阶段划分：登录、初始化、传输、消息、热加载

use std::fmt;
use thiserror::Error;

/// SDK 顶层错误
#[derive(Error, Debug)]
pub enum WxError {
    #[error("登录失败: {0}")]
    Login(#[from] LoginError),

    #[error("初始化失败[{step}]: {reason}")]
    InitLogin { step: InitStep, reason: String },

    #[error("请求失败: {0}")]
    Request(#[from] RequestError),

    #[error("消息处理失败: {0}")]
    Msg(#[from] MsgError),

    #[error("热加载失败: {0}")]
    HotReload(String),

    #[error("客户端已启动")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, WxError>;

impl WxError {
    pub fn init(step: InitStep, reason: impl Into<String>) -> Self {
        WxError::InitLogin {
            step,
            reason: reason.into(),
        }
    }
}

/// 传输层错误（Requester 返回）
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("传输错误: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP 状态异常: {0}")]
    Status(u16),

    #[error("无效的 URL: {0}")]
    InvalidUrl(String),
}

/// 扫码登录流程错误
#[derive(Error, Debug)]
pub enum LoginError {
    #[error("获取UUID失败，状态码: {0}")]
    UuidRejected(i64),

    #[error("解析响应失败: {0}")]
    Parse(String),

    #[error("二维码处理失败: {0}")]
    QrCode(String),

    #[error("二维码已失效，请重新登录")]
    Expired,

    #[error("扫码超时")]
    TimedOut,

    #[error("未知登录状态码: {0}")]
    Unknown(i64),

    #[error("重试次数已达上限")]
    RetryExhausted,

    #[error("登录已取消")]
    Cancelled,

    #[error(transparent)]
    Request(#[from] RequestError),
}

/// 初始化阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    Credentials,
    Init,
    StatusNotify,
    Contacts,
    BatchContact,
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitStep::Credentials => "获取登录公参",
            InitStep::Init => "登录初始化",
            InitStep::StatusNotify => "开启状态通知",
            InitStep::Contacts => "获取联系人",
            InitStep::BatchContact => "批量获取联系人",
        };
        f.write_str(name)
    }
}

/// 消息检查（synccheck）返回的致命状态
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCheckError {
    #[error("ticket错误")]
    TicketInvalid,
    #[error("传入参数错误")]
    BadParams,
    #[error("已退出登录")]
    LoggedOut,
    #[error("在其他设备上登录")]
    LoggedInElsewhere,
    #[error("cookie值无效")]
    InvalidCookie,
    #[error("不安全的登录环境")]
    UnsafeEnvironment,
    #[error("操作频繁，请稍后再试")]
    RateLimited,
    #[error("其他错误: {0}")]
    Other(i64),
}

impl SyncCheckError {
    /// 将非零 retcode 映射为错误；0 返回 None
    pub fn from_retcode(retcode: i64) -> Option<Self> {
        let err = match retcode {
            0 => return None,
            -14 => SyncCheckError::TicketInvalid,
            1 => SyncCheckError::BadParams,
            1100 => SyncCheckError::LoggedOut,
            1101 => SyncCheckError::LoggedInElsewhere,
            1102 => SyncCheckError::InvalidCookie,
            1203 => SyncCheckError::UnsafeEnvironment,
            1205 => SyncCheckError::RateLimited,
            other => SyncCheckError::Other(other),
        };
        Some(err)
    }

    /// 会话本身已失效（需要重新扫码）
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            SyncCheckError::LoggedOut
                | SyncCheckError::LoggedInElsewhere
                | SyncCheckError::InvalidCookie
                | SyncCheckError::TicketInvalid
        )
    }
}

/// 同步、解析、发送阶段的错误
#[derive(Error, Debug)]
pub enum MsgError {
    #[error("消息检查失败: {0}")]
    Probe(SyncCheckError),

    #[error("消息解析失败: {0}")]
    Parse(String),

    #[error("接口请求失败[code:{ret},err:{msg}]")]
    Server { ret: i64, msg: String },

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("消息发送失败: {0}")]
    Send(String),
}

impl MsgError {
    /// 服务器认为登录态已失效
    pub fn invalidates_session(&self) -> bool {
        match self {
            MsgError::Probe(err) => err.invalidates_session(),
            MsgError::Server { ret, .. } => matches!(ret, 1100..=1102),
            _ => false,
        }
    }
}
