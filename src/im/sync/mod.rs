//! 长轮询同步模块
//!
//! synccheck 探测、webwxsync 增量拉取与游标管理

pub mod api;
pub mod cursor;
pub mod service;

// 重新导出主要类型
pub use api::{ProbeStatus, SyncApi};
pub use cursor::{SyncCursor, SyncKeyPair, SyncState};
pub use service::{CloseReason, SyncEngine, TickOutcome};
