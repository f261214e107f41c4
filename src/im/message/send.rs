//! 发送协调器：按提交顺序逐条发送

use crate::im::message::api::MessageApi;
use crate::im::message::types::{OutboundMessage, SendResult};
use crate::im::request::Requester;
use crate::im::session::SessionContext;
use crate::im::shutdown::wait_for_shutdown;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

pub struct SendCoordinator {
    api: MessageApi,
    outbound_rx: mpsc::Receiver<OutboundMessage>,
    result_tx: mpsc::Sender<SendResult>,
    shutdown: watch::Receiver<bool>,
}

impl SendCoordinator {
    pub fn new(
        requester: Arc<dyn Requester>,
        ctx: Arc<SessionContext>,
        outbound_rx: mpsc::Receiver<OutboundMessage>,
        result_tx: mpsc::Sender<SendResult>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            api: MessageApi::new(requester, ctx),
            outbound_rx,
            result_tx,
            shutdown,
        }
    }

    /// 发送一条消息并生成结果；失败不重试
    pub async fn send_one(&self, message: OutboundMessage) -> SendResult {
        match self.api.send_text(&message).await {
            Ok(resp) => {
                if !resp.base_response.is_ok() {
                    warn!(
                        "[Send] 消息发送失败[local_id:{}, code:{}, err:{}]",
                        message.local_id, resp.base_response.ret, resp.base_response.err_msg
                    );
                }
                SendResult {
                    server_msg_id: resp.msg_id,
                    local_id: message.local_id,
                    base_response: resp.base_response,
                    failure: None,
                }
            }
            Err(e) => {
                warn!("[Send] 消息发送失败[local_id:{}, err:{}]", message.local_id, e);
                SendResult::failed(message.local_id, e.to_string())
            }
        }
    }

    /// 消费发送队列直到队列关闭或收到停止信号
    pub async fn run(mut self) {
        info!("[Send] 🚀 发送循环启动");
        loop {
            let next = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                next = self.outbound_rx.recv() => next,
            };
            let Some(message) = next else {
                break;
            };
            let result = self.send_one(message).await;
            if self.result_tx.send(result).await.is_err() {
                warn!("[Send] 结果队列已关闭，丢弃发送结果");
            }
        }
        info!("[Send] 发送循环退出");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::config::ClientConfig;
    use crate::im::request::mock::{MockReply, MockRequester};
    use crate::im::request::RequestBody;
    use crate::im::shutdown::ShutdownHandle;
    use serde_json::json;

    fn ok_reply(msg_id: &str) -> MockReply {
        MockReply::json(json!({"BaseResponse": {"Ret": 0, "ErrMsg": ""}, "MsgID": msg_id, "LocalID": "x"}))
    }

    fn setup(
        mock: Arc<MockRequester>,
    ) -> (
        SendCoordinator,
        mpsc::Sender<OutboundMessage>,
        mpsc::Receiver<SendResult>,
        ShutdownHandle,
    ) {
        let ctx = Arc::new(SessionContext::new(ClientConfig::new()));
        let (out_tx, out_rx) = mpsc::channel(10);
        let (res_tx, res_rx) = mpsc::channel(10);
        let shutdown = ShutdownHandle::new();
        let coordinator = SendCoordinator::new(mock, ctx, out_rx, res_tx, shutdown.subscribe());
        (coordinator, out_tx, res_rx, shutdown)
    }

    #[tokio::test]
    async fn sends_in_submission_order_and_survives_failures() {
        let mock = Arc::new(MockRequester::new().route(
            "webwxsendmsg",
            vec![
                ok_reply("s1"),
                MockReply::Status(502),
                MockReply::json(json!({"BaseResponse": {"Ret": 1205, "ErrMsg": "freq"}})),
                ok_reply("s4"),
            ],
        ));
        let (coordinator, out_tx, mut res_rx, _shutdown) = setup(mock.clone());
        let handle = tokio::spawn(coordinator.run());

        let messages: Vec<_> = (1..=4)
            .map(|i| OutboundMessage {
                to_id: "@bob".into(),
                content: format!("m{}", i),
                local_id: format!("L{}", i),
            })
            .collect();
        for m in &messages {
            out_tx.send(m.clone()).await.unwrap();
        }

        let mut results = Vec::new();
        for _ in 0..4 {
            results.push(res_rx.recv().await.unwrap());
        }
        drop(out_tx);
        handle.await.unwrap();

        let local_ids: Vec<_> = results.iter().map(|r| r.local_id.as_str()).collect();
        assert_eq!(local_ids, vec!["L1", "L2", "L3", "L4"]);
        assert!(results[0].is_ok());
        assert_eq!(results[0].server_msg_id, "s1");
        assert!(results[1].failure.is_some());
        assert_eq!(results[2].base_response.ret, 1205);
        assert!(results[2].failure.is_none());
        assert!(results[3].is_ok());

        let sent: Vec<_> = mock
            .calls_to("webwxsendmsg")
            .iter()
            .map(|c| MockRequester::json_body(c)["Msg"]["Content"].clone())
            .collect();
        assert_eq!(sent, vec![json!("m1"), json!("m2"), json!("m3"), json!("m4")]);
        assert!(matches!(mock.calls()[0].body, RequestBody::Bytes(_)));
    }

    #[tokio::test]
    async fn request_body_carries_correlation_ids() {
        let mock = Arc::new(MockRequester::new().route("webwxsendmsg", vec![ok_reply("s")]));
        let (coordinator, _out_tx, _res_rx, _shutdown) = setup(mock.clone());
        let message = OutboundMessage::text("@bob", "hello");
        let result = coordinator.send_one(message.clone()).await;

        assert_eq!(result.local_id, message.local_id);
        let body = MockRequester::json_body(&mock.calls()[0]);
        assert_eq!(body["Msg"]["Type"], 1);
        assert_eq!(body["Msg"]["ToUserName"], "@bob");
        assert_eq!(body["Msg"]["LocalID"], message.local_id.as_str());
        assert!(body["Msg"]["ClientMsgId"].as_str().is_some());
        assert!(body["BaseRequest"].is_object());
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let (coordinator, _out_tx, _res_rx, shutdown) = setup(Arc::new(MockRequester::new()));
        let handle = tokio::spawn(coordinator.run());
        shutdown.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
