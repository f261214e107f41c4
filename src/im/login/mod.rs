//! 扫码登录模块

pub mod api;
pub mod listener;
pub mod service;

// 重新导出主要类型
pub use api::{LoginApi, ScanStatus};
pub use listener::{EmptyLoginListener, LoginListener};
pub use service::{LoginFlow, LoginState};
