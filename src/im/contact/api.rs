//! 初始化与联系人 HTTP API 客户端

use crate::im::error::{InitStep, WxError};
use crate::im::request::{HttpMethod, RequestBody, Requester, JSON_HEADER};
use crate::im::serialization::{generate_device_id, unix_secs};
use crate::im::session::{Credentials, SessionContext};
use crate::im::types::{
    decode_checked, BaseRequestBody, BatchContactItem, BatchContactRequest, BatchContactResponse,
    ContactListResponse, InitResponse, StatusNotifyRequest, StatusNotifyResponse,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 单次批量查询的上限
pub const BATCH_CONTACT_LIMIT: usize = 50;

/// `base?k=v&k=v`
pub fn url_with_query(base: &str, pairs: &[(&str, String)]) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())))
        .finish();
    format!("{}?{}", base, query)
}

/// 初始化与联系人相关的 HTTP API 客户端
pub struct ContactApi {
    requester: Arc<dyn Requester>,
    ctx: Arc<SessionContext>,
}

impl ContactApi {
    /// 创建新的联系人 API 客户端
    pub fn new(requester: Arc<dyn Requester>, ctx: Arc<SessionContext>) -> Self {
        Self { requester, ctx }
    }

    pub fn requester(&self) -> &Arc<dyn Requester> {
        &self.requester
    }

    async fn post_json(
        &self,
        step: InitStep,
        url: &str,
        body: RequestBody,
    ) -> Result<Vec<u8>, WxError> {
        self.requester
            .request(HttpMethod::Post, url, body, JSON_HEADER)
            .await
            .map_err(|e| {
                warn!("[Init] {}失败: {}", step, e);
                WxError::init(step, e.to_string())
            })
    }

    fn encode<T: serde::Serialize>(step: InitStep, value: &T) -> Result<RequestBody, WxError> {
        RequestBody::json(value)
            .map_err(|e| WxError::init(step, format!("格式化请求参数失败[err:{}]", e)))
    }

    fn checked<T>(step: InitStep, bytes: &[u8]) -> Result<T, WxError>
    where
        T: serde::de::DeserializeOwned + crate::im::types::WxResponse,
    {
        decode_checked::<T>("Init", bytes).map_err(|(ret, msg)| {
            WxError::init(step, format!("接口请求失败[code:{},err:{}]", ret, msg))
        })
    }

    /// 访问登录跳转地址，解析登录公参并生成设备 ID
    pub async fn fetch_credentials(&self, redirect_url: &str) -> Result<Credentials, WxError> {
        let step = InitStep::Credentials;
        if redirect_url.is_empty() {
            return Err(WxError::init(step, "没有获取到正确的登录跳转地址"));
        }
        let resp = self
            .requester
            .request(HttpMethod::Get, redirect_url, RequestBody::Empty, JSON_HEADER)
            .await
            .map_err(|e| WxError::init(step, format!("[url:{},err:{}]", redirect_url, e)))?;
        let body = String::from_utf8_lossy(&resp);
        let creds = Credentials::parse_login_page(&body, generate_device_id())
            .map_err(|e| WxError::init(step, format!("解析登录公参失败: {}", e)))?;
        if creds.ret != 0 {
            return Err(WxError::init(
                step,
                format!("接口请求失败[code:{},err:{}]", creds.ret, creds.message),
            ));
        }
        debug!("[Init] 获取登录公参成功, uin={}", creds.wxuin);
        Ok(creds)
    }

    /// webwxinit：获取自身信息、初始会话与起始游标
    pub async fn init(&self, creds: &Credentials) -> Result<InitResponse, WxError> {
        let step = InitStep::Init;
        let hosts = self.ctx.hosts();
        let url = url_with_query(
            &hosts.wx_cgi("webwxinit"),
            &[
                ("r", (!unix_secs()).to_string()),
                ("lang", self.ctx.config().lang.clone()),
                ("pass_ticket", creds.pass_ticket.clone()),
            ],
        );
        let base_request = creds.base_request();
        let body = Self::encode(step, &BaseRequestBody { base_request: &base_request })?;
        let resp = self.post_json(step, &url, body).await?;
        let init: InitResponse = Self::checked(step, &resp)?;
        info!(
            "[Init] 登录初始化成功: user={}, 初始会话数={}",
            init.user.user_name,
            init.contact_list.len()
        );
        Ok(init)
    }

    /// 开启状态通知
    pub async fn status_notify(&self, creds: &Credentials, self_id: &str) -> Result<(), WxError> {
        let step = InitStep::StatusNotify;
        let hosts = self.ctx.hosts();
        let url = url_with_query(
            &hosts.wx_cgi("webwxstatusnotify"),
            &[
                ("lang", self.ctx.config().lang.clone()),
                ("pass_ticket", creds.pass_ticket.clone()),
            ],
        );
        let base_request = creds.base_request();
        let body = Self::encode(
            step,
            &StatusNotifyRequest {
                base_request: &base_request,
                code: 3,
                from_user_name: self_id,
                to_user_name: self_id,
                client_msg_id: unix_secs(),
            },
        )?;
        let resp = self.post_json(step, &url, body).await?;
        let _: StatusNotifyResponse = Self::checked(step, &resp)?;
        Ok(())
    }

    /// 拉取一页联系人，`seq` 为上一页返回的 Seq
    pub async fn get_contact(
        &self,
        creds: &Credentials,
        seq: i64,
    ) -> Result<ContactListResponse, WxError> {
        let step = InitStep::Contacts;
        let hosts = self.ctx.hosts();
        let url = url_with_query(
            &hosts.wx_cgi("webwxgetcontact"),
            &[
                ("lang", self.ctx.config().lang.clone()),
                ("pass_ticket", creds.pass_ticket.clone()),
                ("r", unix_secs().to_string()),
                ("seq", seq.to_string()),
                ("skey", creds.skey.clone()),
            ],
        );
        let base_request = creds.base_request();
        let body = Self::encode(step, &BaseRequestBody { base_request: &base_request })?;
        let resp = self.post_json(step, &url, body).await?;
        Self::checked(step, &resp)
    }

    /// 批量查询联系人详情（调用方保证 ids 不超过上限）
    pub async fn batch_get_contact(
        &self,
        creds: &Credentials,
        ids: &[String],
    ) -> Result<BatchContactResponse, WxError> {
        let step = InitStep::BatchContact;
        let hosts = self.ctx.hosts();
        let url = url_with_query(
            &hosts.wx_cgi("webwxbatchgetcontact"),
            &[
                ("type", "ex".to_string()),
                ("r", unix_secs().to_string()),
                ("lang", self.ctx.config().lang.clone()),
                ("pass_ticket", creds.pass_ticket.clone()),
            ],
        );
        let base_request = creds.base_request();
        let body = Self::encode(
            step,
            &BatchContactRequest {
                base_request: &base_request,
                count: ids.len(),
                list: ids
                    .iter()
                    .map(|id| BatchContactItem {
                        user_name: id,
                        encry_chat_room_id: "",
                    })
                    .collect(),
            },
        )?;
        let resp = self.post_json(step, &url, body).await?;
        Self::checked(step, &resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_is_encoded() {
        let url = url_with_query("https://wx.qq.com/x", &[("pass_ticket", "a+b/c".to_string())]);
        assert_eq!(url, "https://wx.qq.com/x?pass_ticket=a%2Bb%2Fc");
    }
}
