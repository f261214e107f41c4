//! 登录监听器回调接口

use crate::im::login::service::LoginState;
use async_trait::async_trait;
use std::path::Path;

/// 登录过程回调，宿主程序在这里渲染二维码
#[async_trait]
pub trait LoginListener: Send + Sync {
    /// 二维码已写入 `path`，登录结束后文件会被删除
    async fn on_qr_code(&self, uuid: &str, path: &Path);

    /// 登录状态变化
    async fn on_state_changed(&self, state: LoginState);
}

/// 默认空实现（无操作）
pub struct EmptyLoginListener;

#[async_trait]
impl LoginListener for EmptyLoginListener {
    async fn on_qr_code(&self, _uuid: &str, _path: &Path) {
        // 默认不做任何处理
    }

    async fn on_state_changed(&self, _state: LoginState) {
        // 默认不做任何处理
    }
}
