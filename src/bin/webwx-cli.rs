//! webwx CLI 客户端（测试版）
//!
//! 非交互式 CLI：扫码登录（或热加载）后打印收到的消息，可选自动回显回复

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use webwx_sdk_core_rust::im::login::api::qrcode_link;
use webwx_sdk_core_rust::{
    ClientConfig, InboundMessage, LogSink, LoginListener, LoginState, OutboundMessage,
    StartOutcome, WxClient,
};

/// webwx CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "webwx-cli")]
#[command(about = "webwx CLI 客户端 - 用于测试扫码登录与收发消息", long_about = None)]
struct Args {
    /// 工作目录（存放 auth.record 与二维码），默认当前目录
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// 启用热加载（退出时保存登录数据，下次启动免扫码）
    #[arg(long)]
    hot_reload: bool,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,webwx_sdk_core_rust=debug）
    #[arg(long, default_value = "info,webwx_sdk_core_rust=debug")]
    log_level: String,

    /// 日志文件
    #[arg(long, default_value = "debug.log")]
    log_file: PathBuf,

    /// 收到私聊文本消息时回显
    #[arg(long)]
    echo: bool,
}

struct CliLoginListener;

#[async_trait::async_trait]
impl LoginListener for CliLoginListener {
    async fn on_qr_code(&self, uuid: &str, path: &Path) {
        info!("[CLI/Login] 📱 请使用手机微信扫描二维码: {}", path.display());
        info!("[CLI/Login] 或在浏览器打开: {}", qrcode_link(uuid));
    }

    async fn on_state_changed(&self, state: LoginState) {
        info!("[CLI/Login] 登录状态: {:?}", state);
    }
}

fn format_time(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

fn print_message(message: &InboundMessage) {
    if message.is_group() {
        info!(
            "[CLI/Msg] 💬 {} [{}] {}: {}",
            format_time(message.created_at),
            message.resolved_group_name,
            message.resolved_sender_name,
            message.display_content
        );
    } else {
        info!(
            "[CLI/Msg] 💬 {} {} -> {}: {}",
            format_time(message.created_at),
            message.resolved_sender_name,
            message.resolved_recipient_name,
            message.display_content
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ClientConfig::new();
    if let Some(root) = &args.root {
        std::fs::create_dir_all(root)
            .with_context(|| format!("无法创建工作目录 {}", root.display()))?;
        config.root_dir = root.clone();
    }

    let mut client = WxClient::new(config).context("创建客户端失败")?;
    client
        .set_log(&args.log_level, LogSink::Both(args.log_file.clone()))
        .with_context(|| format!("无法创建日志文件 {}", args.log_file.display()))?;
    info!("[CLI] 📝 日志已同时输出到控制台和文件: {}", args.log_file.display());

    client.set_hot_reload(args.hot_reload);
    client.set_login_listener(Arc::new(CliLoginListener));

    let mut inbound = client.take_inbound().context("入站队列已被取走")?;
    let mut results = client.take_results().context("结果队列已被取走")?;
    let mut termination = client.take_termination().context("终止通知已被取走")?;
    let outbound = client.outbound_sender();
    let self_id = Arc::new(parking_lot::RwLock::new(String::new()));

    let echo = args.echo;
    let consumer_self = self_id.clone();
    let consumer = tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            print_message(&message);
            let from_self = message.from_id == *consumer_self.read();
            if echo && !from_self && !message.is_group() {
                let reply = OutboundMessage::text(&message.from_id, &message.display_content);
                if outbound.send(reply).await.is_err() {
                    warn!("[CLI] 出站队列已关闭");
                    break;
                }
            }
        }
    });
    let reporter = tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            match &result.failure {
                Some(reason) => warn!("[CLI/Send] ❌ 发送失败[{}]: {}", result.local_id, reason),
                None => info!(
                    "[CLI/Send] ✅ 发送完成[{}] msg_id={} ret={}",
                    result.local_id, result.server_msg_id, result.base_response.ret
                ),
            }
        }
    });

    let shutdown = client.shutdown_handle();
    let start = tokio::select! {
        outcome = client.start() => outcome,
        _ = tokio::signal::ctrl_c() => {
            shutdown.trigger();
            info!("[CLI] 收到 Ctrl-C，取消登录");
            return Ok(());
        }
    };
    match start {
        Ok(StartOutcome::FreshLogin) => info!("[CLI] ✅ 扫码登录成功"),
        Ok(StartOutcome::Restored { catch_up: None }) => info!("[CLI] ✅ 热加载成功"),
        Ok(StartOutcome::Restored {
            catch_up: Some(err),
        }) => warn!("[CLI] 热加载成功，但补收消息失败: {}", err),
        Err(e) => {
            error!("[CLI] ❌ 启动失败: {}", e);
            return Err(e.into());
        }
    }

    let me = client.get_self();
    *self_id.write() = me.id.clone();
    let buckets = client.get_contacts();
    info!(
        "[CLI] 👤 {} | 好友 {} | 群组 {} | 公众号 {} | 会话 {}",
        me.label(),
        buckets.member_list.len(),
        buckets.group.len(),
        buckets.public_user.len(),
        client.get_chat_list().len()
    );

    let run_for = async {
        if args.duration == 0 {
            std::future::pending::<()>().await;
        } else {
            sleep(Duration::from_secs(args.duration)).await;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("[CLI] 收到 Ctrl-C，准备退出"),
        reason = termination.recv() => warn!("[CLI] 同步循环已终止: {:?}", reason),
        _ = run_for => info!("[CLI] ⏰ 运行时长已到，准备退出"),
    }

    client.stop().await;
    consumer.abort();
    reporter.abort();
    info!("[CLI] 👋 已退出");
    Ok(())
}
