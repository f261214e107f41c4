//! 消息发送 HTTP API 客户端

use crate::im::contact::api::url_with_query;
use crate::im::error::MsgError;
use crate::im::message::types::OutboundMessage;
use crate::im::request::{HttpMethod, RequestBody, Requester, JSON_HEADER};
use crate::im::serialization::generate_client_msg_id;
use crate::im::session::SessionContext;
use crate::im::types::{decode_response, msg_type, SendMsgBody, SendMsgRequest, SendMsgResponse};
use std::sync::Arc;
use tracing::debug;

pub struct MessageApi {
    requester: Arc<dyn Requester>,
    ctx: Arc<SessionContext>,
}

impl MessageApi {
    pub fn new(requester: Arc<dyn Requester>, ctx: Arc<SessionContext>) -> Self {
        Self { requester, ctx }
    }

    /// 发送文本消息，返回服务器响应（BaseResponse 可能非 0）
    pub async fn send_text(&self, message: &OutboundMessage) -> Result<SendMsgResponse, MsgError> {
        let creds = self.ctx.credentials();
        let from = self.ctx.read_snapshot(|s| s.self_contact.id.clone());
        let client_msg_id = generate_client_msg_id();
        let local_id = if message.local_id.is_empty() {
            client_msg_id.as_str()
        } else {
            message.local_id.as_str()
        };

        let url = url_with_query(
            &self.ctx.hosts().wx_cgi("webwxsendmsg"),
            &[
                ("lang", self.ctx.config().lang.clone()),
                ("pass_ticket", creds.pass_ticket.clone()),
            ],
        );
        let base_request = creds.base_request();
        let body = RequestBody::json(&SendMsgRequest {
            base_request: &base_request,
            msg: SendMsgBody {
                msg_type: msg_type::TEXT,
                content: &message.content,
                from_user_name: &from,
                to_user_name: &message.to_id,
                local_id,
                client_msg_id: &client_msg_id,
            },
            scene: 0,
        })
        .map_err(|e| MsgError::Send(format!("格式化请求参数失败[err:{}]", e)))?;

        debug!("[Send] 发送消息: to={}, local_id={}", message.to_id, local_id);
        let resp = self
            .requester
            .request(HttpMethod::Post, &url, body, JSON_HEADER)
            .await?;
        decode_response::<SendMsgResponse>("Send", &resp).map_err(MsgError::Parse)
    }
}
