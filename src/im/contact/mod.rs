//! 联系人模块
//!
//! 登录初始化、联系人分类、索引与批量查询

pub mod api;
pub mod classify;
pub mod models;
pub mod service;

// 重新导出主要类型和函数
pub use api::{ContactApi, BATCH_CONTACT_LIMIT};
pub use classify::{classify, SPECIAL_USERS};
pub use models::{Contact, ContactBuckets, ContactKind};
pub use service::SessionInitializer;
