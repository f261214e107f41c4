pub mod im;

// 重新导出常用类型，方便外部使用
pub use im::{
    client::{StartOutcome, WxClient},
    config::{ClientConfig, WxHosts},
    contact::{Contact, ContactBuckets, ContactKind},
    error::{InitStep, LoginError, MsgError, RequestError, SyncCheckError, WxError},
    logging::{set_log, LogSink},
    login::{EmptyLoginListener, LoginListener, LoginState},
    message::{InboundMessage, MessageKind, OutboundMessage, SendResult},
    request::{HttpRequester, Requester},
    session::{Session, UserSnapshot},
    sync::CloseReason,
};
