pub mod client;
pub mod config;
pub mod contact;
pub mod error;
pub mod logging;
pub mod login;
pub mod message;
pub mod request;
pub mod serialization;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod sync;
pub mod types;

// 重新导出客户端入口
pub use client::{StartOutcome, WxClient};
