//! 长轮询相关 HTTP 请求

use crate::im::contact::api::url_with_query;
use crate::im::error::MsgError;
use crate::im::request::{HttpMethod, RequestBody, Requester, JSON_HEADER};
use crate::im::serialization::{unix_millis, unix_secs};
use crate::im::session::SessionContext;
use crate::im::types::{decode_response, SyncRequest, SyncResponse};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// synccheck 返回的两个字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeStatus {
    pub retcode: i64,
    pub selector: i64,
}

/// 解析 `window.synccheck={retcode:"0",selector:"2"}`
pub fn parse_sync_check(body: &str) -> Result<ProbeStatus, MsgError> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let re = PATTERN
        .get_or_init(|| Regex::new(r#"window\.synccheck=\{retcode:"(-?\d+)",selector:"(\d+)"\}"#).ok())
        .as_ref()
        .ok_or_else(|| MsgError::Parse("正则表达式初始化失败".to_string()))?;
    let caps = re
        .captures(body)
        .ok_or_else(|| MsgError::Parse(format!("消息检查返回数据解析失败[resp:{}]", body)))?;
    let field = |i: usize| -> Result<i64, MsgError> {
        caps[i]
            .parse()
            .map_err(|_| MsgError::Parse(format!("消息检查返回数据解析失败[resp:{}]", body)))
    };
    Ok(ProbeStatus {
        retcode: field(1)?,
        selector: field(2)?,
    })
}

pub struct SyncApi {
    requester: Arc<dyn Requester>,
    ctx: Arc<SessionContext>,
}

impl SyncApi {
    pub fn new(requester: Arc<dyn Requester>, ctx: Arc<SessionContext>) -> Self {
        Self { requester, ctx }
    }

    /// 消息检查（长轮询），携带 check 游标
    pub async fn sync_check(&self) -> Result<ProbeStatus, MsgError> {
        let creds = self.ctx.credentials();
        let check_key = self.ctx.read_snapshot(|s| s.sync.check.encode());
        let now = unix_millis();
        let body = RequestBody::form([
            ("r", now.to_string()),
            ("skey", creds.skey.clone()),
            ("sid", creds.wxsid.clone()),
            ("uin", creds.wxuin.to_string()),
            ("deviceid", creds.device_id.clone()),
            ("synckey", check_key),
            ("_", now.to_string()),
        ]);
        let url = self.ctx.hosts().push_cgi("synccheck");
        let resp = self
            .requester
            .request(HttpMethod::Get, &url, body, JSON_HEADER)
            .await
            .map_err(|e| {
                warn!("[Sync] 消息检查失败: {}", e);
                MsgError::Request(e)
            })?;
        let text = String::from_utf8_lossy(&resp);
        debug!("[Sync] 消息检查返回数据: {}", text);
        parse_sync_check(&text)
    }

    /// 拉取消息增量，携带 data 游标
    pub async fn webwx_sync(&self) -> Result<SyncResponse, MsgError> {
        let creds = self.ctx.credentials();
        let data_key = self.ctx.read_snapshot(|s| s.sync.data.clone());
        let url = url_with_query(
            &self.ctx.hosts().wx_cgi("webwxsync"),
            &[
                ("sid", creds.wxsid.clone()),
                ("skey", creds.skey.clone()),
                ("lang", self.ctx.config().lang.clone()),
                ("pass_ticket", creds.pass_ticket.clone()),
            ],
        );
        let base_request = creds.base_request();
        let body = RequestBody::json(&SyncRequest {
            base_request: &base_request,
            sync_key: &data_key,
            rr: !unix_secs(),
        })
        .map_err(|e| MsgError::Parse(format!("格式化请求参数失败[err:{}]", e)))?;

        let resp = self
            .requester
            .request(HttpMethod::Post, &url, body, JSON_HEADER)
            .await?;
        let data: SyncResponse = decode_response("Sync", &resp).map_err(MsgError::Parse)?;
        if !data.base_response.is_ok() {
            return Err(MsgError::Server {
                ret: data.base_response.ret,
                msg: data.base_response.err_msg,
            });
        }
        if data.sync_key.is_empty() {
            return Err(MsgError::Parse("同步响应缺少 SyncKey".to_string()));
        }
        Ok(data)
    }
}
