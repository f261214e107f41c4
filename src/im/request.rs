//! HTTP 请求能力
//!
//! 上层只依赖 [`Requester`]，默认实现 [`HttpRequester`] 基于 reqwest 并共享 cookie Jar

use crate::im::config::ClientConfig;
use crate::im::error::RequestError;
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

pub const FORM_HEADER: &str = "application/x-www-form-urlencoded";
pub const JSON_HEADER: &str = "application/json; charset=UTF-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// 请求体
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    /// 表单参数；GET 时拼接到 URL 查询串
    Form(Vec<(String, String)>),
    Bytes(Vec<u8>),
    Text(String),
}

impl RequestBody {
    pub fn form<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        RequestBody::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(RequestBody::Bytes(serde_json::to_vec(value)?))
    }

    /// 编码后的字节（表单按 urlencoded 编码）
    pub fn encode(&self) -> Vec<u8> {
        match self {
            RequestBody::Empty => Vec::new(),
            RequestBody::Form(pairs) => url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish()
                .into_bytes(),
            RequestBody::Bytes(bytes) => bytes.clone(),
            RequestBody::Text(text) => text.clone().into_bytes(),
        }
    }
}

/// 可持久化的 cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WxCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
}

/// HTTP 请求能力
#[async_trait]
pub trait Requester: Send + Sync {
    /// 发起请求并返回响应 body；非 2xx 视为错误
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        body: RequestBody,
        content_type: &str,
    ) -> Result<Vec<u8>, RequestError>;

    /// 读取发往 `url` 时会携带的 cookie
    fn cookies(&self, url: &str) -> Vec<WxCookie>;

    /// 恢复之前保存的 cookie
    fn restore_cookies(&self, url: &str, cookies: &[WxCookie]);
}

/// 取主机名最后两段作为 cookie 作用域，例如 `wx2.qq.com` -> `qq.com`
pub fn cookie_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host.to_string();
    }
    labels[labels.len() - 2..].join(".")
}

/// 基于 reqwest 的默认实现
pub struct HttpRequester {
    client: reqwest::Client,
    jar: Arc<Jar>,
}

impl HttpRequester {
    /// 创建新的 HTTP 请求器
    pub fn new(config: &ClientConfig) -> Result<Self, RequestError> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self { client, jar })
    }

    fn parse_url(url: &str) -> Result<url::Url, RequestError> {
        url::Url::parse(url).map_err(|e| RequestError::InvalidUrl(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl Requester for HttpRequester {
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        body: RequestBody,
        content_type: &str,
    ) -> Result<Vec<u8>, RequestError> {
        let mut target = Self::parse_url(url)?;
        debug!(
            "[Request] 向微信API发起请求: method={:?}, url={}, params_len={}",
            method,
            url,
            body.encode().len()
        );

        let builder = match method {
            HttpMethod::Get => {
                match &body {
                    RequestBody::Form(pairs) => {
                        target.query_pairs_mut().extend_pairs(pairs);
                    }
                    RequestBody::Empty => {}
                    other => {
                        let raw = String::from_utf8_lossy(&other.encode()).into_owned();
                        let query = match target.query() {
                            Some(q) if !q.is_empty() => format!("{}&{}", q, raw),
                            _ => raw,
                        };
                        target.set_query(Some(&query));
                    }
                }
                self.client.get(target)
            }
            HttpMethod::Post => self.client.post(target).body(body.encode()),
        };

        let response = builder
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .send()
            .await
            .map_err(|e| {
                error!("[Request] 请求微信服务器失败: {}", e);
                RequestError::Transport(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("[Request] HTTP 状态异常: {}, url={}", status, url);
            return Err(RequestError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        debug!("[Request] 微信API返回成功，数据长度: {}", bytes.len());
        Ok(bytes.to_vec())
    }

    fn cookies(&self, url: &str) -> Vec<WxCookie> {
        let Ok(target) = Self::parse_url(url) else {
            return Vec::new();
        };
        let domain = target.host_str().map(cookie_domain).unwrap_or_default();
        let Some(header) = self.jar.cookies(&target) else {
            return Vec::new();
        };
        let Ok(raw) = header.to_str() else {
            return Vec::new();
        };
        raw.split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                Some(WxCookie {
                    name: name.to_string(),
                    value: value.to_string(),
                    domain: domain.clone(),
                })
            })
            .collect()
    }

    fn restore_cookies(&self, url: &str, cookies: &[WxCookie]) {
        let Ok(target) = Self::parse_url(url) else {
            return;
        };
        let fallback = target.host_str().map(cookie_domain).unwrap_or_default();
        for cookie in cookies {
            let domain = if cookie.domain.is_empty() {
                fallback.as_str()
            } else {
                cookie.domain.as_str()
            };
            let raw = format!(
                "{}={}; Domain={}; Path=/",
                cookie.name, cookie.value, domain
            );
            self.jar.add_cookie_str(&raw, &target);
        }
        debug!("[Request] 已恢复 {} 个 cookie", cookies.len());
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_body_is_urlencoded() {
        let body = RequestBody::form([("tip", "1"), ("uuid", "a b")]);
        assert_eq!(body.encode(), b"tip=1&uuid=a+b".to_vec());
    }

    #[test]
    fn cookie_domain_keeps_last_two_labels() {
        assert_eq!(cookie_domain("webpush.wx2.qq.com"), "qq.com");
        assert_eq!(cookie_domain("qq.com"), "qq.com");
    }

    #[test]
    fn restored_cookies_are_sent_to_sibling_hosts() {
        let requester = HttpRequester::new(&ClientConfig::new()).unwrap();
        let saved = vec![WxCookie {
            name: "wxsid".to_string(),
            value: "abc".to_string(),
            domain: String::new(),
        }];
        requester.restore_cookies("https://wx2.qq.com/", &saved);

        let cookies = requester.cookies("https://webpush.wx2.qq.com/cgi-bin/mmwebwx-bin/synccheck");
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "wxsid");
        assert_eq!(cookies[0].value, "abc");
        assert_eq!(cookies[0].domain, "qq.com");
    }
}
