//! `rust_websocket_utils` 提供信令中继使用的 WebSocket 通信实用功能。
//!
//! 主要模块包括：
//! - `message`: 线上信封 `Envelope` 以及客户端消息的强类型视图 `ClientMessage`。
//! - `error`: 库中使用的错误类型 `WsError`。
//! - `server`: WebSocket 服务器端传输层。

pub mod error;
pub mod message;
pub mod server;
