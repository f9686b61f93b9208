// rust_websocket_utils/src/error.rs

//! 定义 WebSocket 工具库相关的错误类型。

use thiserror::Error;

/// WebSocket 工具库的统一错误类型。
#[derive(Error, Debug)]
pub enum WsError {
    /// 当 serde 序列化失败时返回。
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 当入站文本帧无法解析为信封时返回。
    /// 对连接本身不是致命错误，服务端会回复协议错误并继续读取。
    #[error("反序列化错误: {0}")]
    DeserializationError(String),

    /// WebSocket 协议相关的错误，通常意味着连接已不可用。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    /// 底层 I/O 错误（例如监听端口绑定失败）。
    #[error("I/O错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 当尝试发送消息到一个已关闭的通道时发生。
    #[error("发送错误: 通道已关闭")]
    SendErrorClosed,

    /// 出站通道已满。中继转发不排队，直接失败。
    #[error("发送错误: 出站通道已满")]
    SendErrorFull,
}

impl WsError {
    /// 该错误是否意味着连接已经失效，读循环应当退出。
    pub fn is_fatal_for_connection(&self) -> bool {
        !matches!(self, WsError::DeserializationError(_))
    }
}
