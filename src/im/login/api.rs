//! 扫码登录相关 HTTP 请求

use crate::im::config::{ClientConfig, WxHosts};
use crate::im::error::{LoginError, RequestError};
use crate::im::request::{HttpMethod, RequestBody, Requester, FORM_HEADER};
use crate::im::serialization::unix_millis;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// 登录确认后追加到跳转地址的固定参数
pub const REDIRECT_SUFFIX: &str = "&fun=new&version=v2";

/// 轮询登录状态的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// 408：尚未扫码
    Waiting,
    /// 201：已扫码未确认
    Scanned,
    /// 200：确认登录
    Confirmed { redirect_url: String },
    /// 400：二维码失效
    Expired,
    /// 0：扫码超时
    TimedOut,
    Unknown(i64),
}

struct Patterns {
    uuid: Regex,
    code: Regex,
    redirect: Regex,
}

fn patterns() -> Result<&'static Patterns, LoginError> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                uuid: Regex::new(r#"window\.QRLogin\.code = (\d+); window\.QRLogin\.uuid = "(\S+?)";"#).ok()?,
                code: Regex::new(r"window\.code=(\d+);").ok()?,
                redirect: Regex::new(r#"window\.redirect_uri="(\S+?)""#).ok()?,
            })
        })
        .as_ref()
        .ok_or_else(|| LoginError::Parse("正则表达式初始化失败".to_string()))
}

fn parse_code(raw: &str, body: &str) -> Result<i64, LoginError> {
    raw.parse()
        .map_err(|_| LoginError::Parse(format!("获取到错误的code数据[resp:{}]", body)))
}

/// 解析 jslogin 响应，返回 (code, uuid)
pub fn parse_uuid_response(body: &str) -> Result<(i64, String), LoginError> {
    let caps = patterns()?
        .uuid
        .captures(body)
        .ok_or_else(|| LoginError::Parse(format!("返回数据格式错误[resp:{}]", body)))?;
    let code = parse_code(&caps[1], body)?;
    Ok((code, caps[2].to_string()))
}

/// 解析轮询登录响应
pub fn parse_scan_response(body: &str) -> Result<ScanStatus, LoginError> {
    let p = patterns()?;
    let caps = p
        .code
        .captures(body)
        .ok_or_else(|| LoginError::Parse(format!("解析登录信息code失败[resp:{}]", body)))?;
    let status = match parse_code(&caps[1], body)? {
        200 => {
            let redirect = p.redirect.captures(body).ok_or_else(|| {
                LoginError::Parse(format!("解析登录重定向地址失败[resp:{}]", body))
            })?;
            ScanStatus::Confirmed {
                redirect_url: format!("{}{}", &redirect[1], REDIRECT_SUFFIX),
            }
        }
        201 => ScanStatus::Scanned,
        400 => ScanStatus::Expired,
        408 => ScanStatus::Waiting,
        0 => ScanStatus::TimedOut,
        other => ScanStatus::Unknown(other),
    };
    Ok(status)
}

/// 登录相关的 HTTP API 客户端
pub struct LoginApi {
    requester: Arc<dyn Requester>,
    hosts: WxHosts,
    app_id: String,
    lang: String,
}

impl LoginApi {
    /// 创建新的登录 API 客户端
    pub fn new(requester: Arc<dyn Requester>, config: &ClientConfig) -> Self {
        Self {
            requester,
            hosts: config.hosts.clone(),
            app_id: config.app_id.clone(),
            lang: config.lang.clone(),
        }
    }

    /// 获取登录 uuid
    pub async fn get_uuid(&self) -> Result<String, LoginError> {
        let url = self.hosts.login_url("jslogin");
        let body = RequestBody::form([
            ("appid", self.app_id.clone()),
            ("fun", "new".to_string()),
            ("lang", self.lang.clone()),
            ("_", unix_millis().to_string()),
        ]);
        let resp = self
            .requester
            .request(HttpMethod::Get, &url, body, FORM_HEADER)
            .await?;
        let text = String::from_utf8_lossy(&resp);
        let (code, uuid) = parse_uuid_response(&text)?;
        if code != 200 {
            warn!("[Login] 获取UUID失败，API返回错误的状态[code:{}]", code);
            return Err(LoginError::UuidRejected(code));
        }
        debug!("[Login] 获取UUID成功: {}", uuid);
        Ok(uuid)
    }

    /// 下载二维码图片
    pub async fn get_qrcode(&self, uuid: &str) -> Result<Vec<u8>, LoginError> {
        let url = self.hosts.login_url(&format!("qrcode/{}", uuid));
        let body = RequestBody::form([("t", "webwx".to_string()), ("_", unix_millis().to_string())]);
        self.requester
            .request(HttpMethod::Get, &url, body, FORM_HEADER)
            .await
            .map_err(|e| LoginError::QrCode(format!("获取登录二维码失败: {}", e)))
    }

    /// 轮询一次扫码状态
    pub async fn check_login(&self, uuid: &str, tip: &str) -> Result<ScanStatus, LoginError> {
        let url = self.hosts.login_url("cgi-bin/mmwebwx-bin/login");
        let now = unix_millis();
        let body = RequestBody::form([
            ("loginicon", "true".to_string()),
            ("uuid", uuid.to_string()),
            ("tip", tip.to_string()),
            ("r", (!now).to_string()),
            ("_", now.to_string()),
        ]);
        let resp = self
            .requester
            .request(HttpMethod::Get, &url, body, FORM_HEADER)
            .await?;
        parse_scan_response(&String::from_utf8_lossy(&resp))
    }

    /// 退出登录
    pub async fn logout(&self, hosts: &WxHosts, skey: &str) -> Result<(), RequestError> {
        let url = hosts.wx_cgi("webwxlogout");
        let body = RequestBody::form([
            ("redirect", "1".to_string()),
            ("type", "0".to_string()),
            ("skey", skey.to_string()),
        ]);
        self.requester
            .request(HttpMethod::Get, &url, body, FORM_HEADER)
            .await?;
        Ok(())
    }
}

/// 手机扫码后可在浏览器打开的二维码链接
pub fn qrcode_link(uuid: &str) -> String {
    format!("https://login.weixin.qq.com/l/{}", uuid)
}
