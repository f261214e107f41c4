//! 客户端配置

use crate::im::logging::LogSink;
use std::path::PathBuf;
use std::time::Duration;

/// 桌面浏览器 UA，webwx 会根据 UA 判断登录环境
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_11_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/54.0.2840.71 Safari/537.36";

/// 会话持久化文件名
pub const AUTH_RECORD_FILE: &str = "auth.record";
/// 登录二维码文件名
pub const QRCODE_FILE: &str = "qrcode.jpg";

/// webwx 各业务域名
///
/// 服务器按账号分配 wx / wx2 等不同域名，登录确认后需要根据重定向地址重新推导
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WxHosts {
    pub login: String,
    pub wx: String,
    pub push: String,
    pub file: String,
}

impl Default for WxHosts {
    fn default() -> Self {
        Self {
            login: "login.weixin.qq.com".to_string(),
            wx: "wx2.qq.com".to_string(),
            push: "webpush.wx2.qq.com".to_string(),
            file: "file.wx2.qq.com".to_string(),
        }
    }
}

impl WxHosts {
    /// 从登录重定向地址推导 API 域名，解析失败返回 None
    pub fn for_redirect(&self, redirect_url: &str) -> Option<Self> {
        let parsed = url::Url::parse(redirect_url).ok()?;
        let host = parsed.host_str()?.to_string();
        Some(Self {
            login: self.login.clone(),
            push: format!("webpush.{}", host),
            file: format!("file.{}", host),
            wx: host,
        })
    }

    pub fn login_url(&self, path: &str) -> String {
        format!("https://{}/{}", self.login, path.trim_start_matches('/'))
    }

    /// `https://<wx>/cgi-bin/mmwebwx-bin/<cgi>`
    pub fn wx_cgi(&self, cgi: &str) -> String {
        format!("https://{}/cgi-bin/mmwebwx-bin/{}", self.wx, cgi)
    }

    pub fn push_cgi(&self, cgi: &str) -> String {
        format!("https://{}/cgi-bin/mmwebwx-bin/{}", self.push, cgi)
    }

    /// cookie 作用域根地址
    pub fn wx_root(&self) -> String {
        format!("https://{}/", self.wx)
    }
}

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub hosts: WxHosts,
    /// webwx 固定 appid
    pub app_id: String,
    pub lang: String,
    pub user_agent: String,
    /// 单次请求超时（含等待响应头）
    pub request_timeout: Duration,
    /// 是否跳过证书校验
    pub accept_invalid_certs: bool,
    /// 扫码轮询允许的重试次数
    pub scan_retry_times: u32,
    /// 两次扫码轮询之间的间隔
    pub scan_retry_delay: Duration,
    /// 单轮同步耗时不超过该值时，按耗时等长休眠
    pub tick_pacing_ceiling: Duration,
    /// 收发队列容量
    pub queue_capacity: usize,
    /// 工作目录（存放 auth.record 与二维码）
    pub root_dir: PathBuf,
    /// 是否启用热加载
    pub hot_reload: bool,
    /// 日志级别，例如 "info,webwx_sdk_core_rust=debug"
    pub log_level: String,
    pub log_sink: LogSink,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self {
            hosts: WxHosts::default(),
            app_id: "wx782c26e4c19acffb".to_string(),
            lang: "zh_CN".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(60),
            accept_invalid_certs: true,
            scan_retry_times: 3,
            scan_retry_delay: Duration::from_secs(2),
            tick_pacing_ceiling: Duration::from_secs(20),
            queue_capacity: 10,
            root_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            hot_reload: false,
            log_level: "info".to_string(),
            log_sink: LogSink::Stdout,
        }
    }

    pub fn auth_record_path(&self) -> PathBuf {
        self.root_dir.join(AUTH_RECORD_FILE)
    }

    pub fn qrcode_path(&self) -> PathBuf {
        self.root_dir.join(QRCODE_FILE)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_follow_redirect_domain() {
        let hosts = WxHosts::default();
        let derived = hosts
            .for_redirect("https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxnewloginpage?ticket=x")
            .unwrap();
        assert_eq!(derived.wx, "wx.qq.com");
        assert_eq!(derived.push, "webpush.wx.qq.com");
        assert_eq!(derived.file, "file.wx.qq.com");
        assert_eq!(derived.login, hosts.login);
        assert_eq!(
            derived.wx_cgi("webwxinit"),
            "https://wx.qq.com/cgi-bin/mmwebwx-bin/webwxinit"
        );
    }

    #[test]
    fn malformed_redirect_yields_none() {
        assert!(WxHosts::default().for_redirect("not a url").is_none());
    }

    #[test]
    fn paths_live_under_root() {
        let mut config = ClientConfig::new();
        config.root_dir = PathBuf::from("/tmp/webwx");
        assert_eq!(config.auth_record_path(), PathBuf::from("/tmp/webwx/auth.record"));
        assert_eq!(config.qrcode_path(), PathBuf::from("/tmp/webwx/qrcode.jpg"));
    }
}
