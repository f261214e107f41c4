//! 长轮询同步循环
//!
//! 每一轮：synccheck 探测 → 按 selector 分发 → 拉取增量并整体替换游标 → 按耗时休眠

use crate::im::contact::service::SessionInitializer;
use crate::im::error::{MsgError, SyncCheckError};
use crate::im::message::pipeline::MessagePipeline;
use crate::im::message::types::InboundMessage;
use crate::im::request::Requester;
use crate::im::session::SessionContext;
use crate::im::shutdown::wait_for_shutdown;
use crate::im::sync::api::SyncApi;
use crate::im::sync::cursor::SyncState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// ContinueFlag 非 0 时同一轮内最多追加拉取的次数
const MAX_CONTINUE_ROUNDS: usize = 5;

/// 同步循环结束的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// synccheck 返回非 0 retcode
    Probe(SyncCheckError),
    /// synccheck 请求或解析失败
    ProbeFailed(String),
    /// 宿主调用了 stop
    Stopped,
}

/// 单轮结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    /// 拉取成功，附带投递的消息数
    Fetched(usize),
    /// 拉取失败，下一轮继续
    FetchFailed,
    ContactsResynced,
}

pub struct SyncEngine {
    api: SyncApi,
    ctx: Arc<SessionContext>,
    pipeline: MessagePipeline,
    contacts: Arc<SessionInitializer>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    closed_tx: mpsc::Sender<CloseReason>,
    shutdown: watch::Receiver<bool>,
    pacing_ceiling: Duration,
}

impl SyncEngine {
    pub fn new(
        requester: Arc<dyn Requester>,
        ctx: Arc<SessionContext>,
        contacts: Arc<SessionInitializer>,
        inbound_tx: mpsc::Sender<InboundMessage>,
        closed_tx: mpsc::Sender<CloseReason>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let pacing_ceiling = ctx.config().tick_pacing_ceiling;
        Self {
            api: SyncApi::new(requester, ctx.clone()),
            pipeline: MessagePipeline::new(ctx.clone()),
            ctx,
            contacts,
            inbound_tx,
            closed_tx,
            shutdown,
            pacing_ceiling,
        }
    }

    /// 执行一轮；返回 Err 表示循环必须终止
    pub async fn tick(&self) -> Result<TickOutcome, CloseReason> {
        let status = self.api.sync_check().await.map_err(|e| {
            warn!("[Sync] 检查消息发生错误: {}", e);
            CloseReason::ProbeFailed(e.to_string())
        })?;

        if let Some(err) = SyncCheckError::from_retcode(status.retcode) {
            warn!("[Sync] ❌ 消息检查返回错误[retcode:{}]: {}", status.retcode, err);
            return Err(CloseReason::Probe(err));
        }

        let outcome = match status.selector {
            2 | 3 => match self.fetch_delta().await {
                Ok(count) => TickOutcome::Fetched(count),
                Err(e) => {
                    warn!("[Sync] 拉取消息发生错误: {}", e);
                    TickOutcome::FetchFailed
                }
            },
            4 => {
                if let Err(e) = self.contacts.resync_contacts().await {
                    warn!("[Sync] 同步通讯录失败: {}", e);
                }
                TickOutcome::ContactsResynced
            }
            0 | 6 | 7 => TickOutcome::Idle,
            other => {
                debug!("[Sync] 未识别的 selector: {}", other);
                TickOutcome::Idle
            }
        };
        Ok(outcome)
    }

    /// 热加载后的追赶：先探测登录态，再无条件拉取一次增量
    ///
    /// 探测返回失效 retcode 时以 `MsgError::Probe` 返回，由调用方决定是否重新扫码
    pub async fn catch_up(&self) -> Result<usize, MsgError> {
        let status = self.api.sync_check().await?;
        if let Some(err) = SyncCheckError::from_retcode(status.retcode) {
            warn!("[Sync] 追赶前探测失败[retcode:{}]: {}", status.retcode, err);
            return Err(MsgError::Probe(err));
        }
        self.fetch_delta().await
    }

    /// 拉取增量、替换游标并把消息投递到入站队列
    ///
    /// 响应缺少 BaseResponse 或 SyncKey 时游标保持不变
    pub async fn fetch_delta(&self) -> Result<usize, MsgError> {
        let mut delivered = 0;
        for round in 0..MAX_CONTINUE_ROUNDS {
            let resp = self.api.webwx_sync().await?;
            self.ctx.swap_sync_state(SyncState::from_response(
                resp.sync_key.clone(),
                resp.sync_check_key.clone(),
            ));

            let deleted: Vec<String> = resp
                .del_contact_list
                .iter()
                .map(|d| d.user_name.clone())
                .collect();
            self.contacts
                .apply_contact_changes(&resp.mod_contact_list, &deleted);

            let output = self.pipeline.process(&resp.add_msg_list);
            delivered += self.deliver(output.messages).await;

            if !output.unresolved_groups.is_empty() {
                self.contacts.enrich(&output.unresolved_groups).await;
            }

            if resp.continue_flag == 0 {
                break;
            }
            debug!("[Sync] ContinueFlag={}，继续拉取（第 {} 次）", resp.continue_flag, round + 1);
        }
        Ok(delivered)
    }

    async fn deliver(&self, messages: Vec<InboundMessage>) -> usize {
        let mut shutdown = self.shutdown.clone();
        let mut delivered = 0;
        for message in messages {
            tokio::select! {
                biased;
                sent = self.inbound_tx.send(message) => {
                    if sent.is_err() {
                        warn!("[Sync] 入站队列已关闭，丢弃剩余消息");
                        break;
                    }
                    delivered += 1;
                }
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }
        delivered
    }

    /// 运行同步循环，结束时发出一次关闭通知
    pub async fn run(self) {
        info!("[Sync] 🚀 同步循环启动");
        let mut shutdown = self.shutdown.clone();
        let reason = loop {
            if *shutdown.borrow() {
                break CloseReason::Stopped;
            }
            let started = Instant::now();
            let outcome = tokio::select! {
                outcome = self.tick() => outcome,
                _ = wait_for_shutdown(&mut shutdown) => break CloseReason::Stopped,
            };
            if let Err(reason) = outcome {
                break reason;
            }

            let elapsed = started.elapsed();
            debug!("[Sync] 本轮耗时: {:?}", elapsed);
            if elapsed <= self.pacing_ceiling {
                tokio::select! {
                    _ = tokio::time::sleep(elapsed) => {}
                    _ = wait_for_shutdown(&mut shutdown) => break CloseReason::Stopped,
                }
            }
        };

        info!("[Sync] 同步循环退出: {:?}", reason);
        if self.closed_tx.try_send(reason).is_err() {
            debug!("[Sync] 关闭通知未被接收");
        }
    }
}
