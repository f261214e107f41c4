//! 消息模块
//!
//! 入站消息归一化与出站消息发送

pub mod api;
pub mod pipeline;
pub mod send;
pub mod types;

// 重新导出主要类型和函数
pub use api::MessageApi;
pub use pipeline::{MessagePipeline, PipelineOutput};
pub use send::SendCoordinator;
pub use types::{InboundMessage, MessageKind, MessageMeta, OutboundMessage, SendResult};
