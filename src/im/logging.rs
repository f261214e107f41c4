//! 日志初始化

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 日志输出位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stdout,
    /// 追加写入文件
    File(PathBuf),
    /// 同时输出到控制台和文件
    Both(PathBuf),
}

fn open_append(path: &Path) -> io::Result<Mutex<std::fs::File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Mutex::new(file))
}

/// 安装全局 tracing subscriber
///
/// 优先使用环境变量 RUST_LOG，否则使用 `level`。
/// 已经安装过 subscriber 时不覆盖，返回 `Ok(false)`。
pub fn set_log(level: &str, sink: &LogSink) -> io::Result<bool> {
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (to_stdout, file_path) = match sink {
        LogSink::Stdout => (true, None),
        LogSink::File(path) => (false, Some(path.as_path())),
        LogSink::Both(path) => (true, Some(path.as_path())),
    };

    let stdout_layer = to_stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_ansi(true)
    });

    // 文件不需要 ANSI 颜色
    let file_layer = match file_path {
        Some(path) => Some(
            tracing_subscriber::fmt::layer()
                .with_writer(open_append(path)?)
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_ansi(false),
        ),
        None => None,
    };

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    Ok(installed)
}

#[cfg(test)]
pub(crate) fn init_test_logger() {
    use std::sync::Once;
    static INIT_LOGGER: Once = Once::new();

    INIT_LOGGER.call_once(|| {
        // 关闭底层 HTTP 客户端的 debug 噪音
        let filter_layer = EnvFilter::new("info,webwx_sdk_core_rust=debug,hyper_util=info,reqwest=info");

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}
