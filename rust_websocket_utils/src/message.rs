// rust_websocket_utils/src/message.rs

//! 定义信令中继 WebSocket 通信中使用的核心消息结构。
//!
//! - `Envelope` 是线上格式：每个文本帧恰好承载一个 JSON 信封。
//!   `type` 字段以字符串形式保留，以便服务端在回复错误时能够指出无法识别的类型名。
//! - `ClientMessage` 是客户端发往服务端的强类型视图，由 `ClientMessage::try_from(Envelope)` 得到，
//!   每个变体携带自己的载荷结构。结构性问题（未知类型、缺少字段等）以 `MessageRejection` 返回。

use common_models::enums::MessageType;
use common_models::ws_payloads::{ErrorResponsePayload, LoginPayload, RegisterPushPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WsError;

/// 客户端与服务端之间交换的信封。
///
/// # 字段
/// - `message_type`: 线上字段名为 `type`，取值见 `MessageType`。
/// - `payload`: 随类型变化的结构化数据；缺失时为 `Value::Null`。
/// - `target`: 中继族消息的接收方 userId。
/// - `sender`: 仅由服务端在转发时填写，客户端提供的值一律被覆盖。
/// - `original_type`: 线上字段名为 `originalType`，出现在错误回复中，指向触发错误的消息类型。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_type: Option<String>,
}

impl Envelope {
    /// 创建一个新的 `Envelope`，将 `payload_data` 序列化为 JSON 值。
    ///
    /// # Returns
    /// 序列化失败时返回 `WsError::SerializationError`。
    pub fn new<T: Serialize>(message_type: MessageType, payload_data: &T) -> Result<Envelope, WsError> {
        let payload = serde_json::to_value(payload_data)
            .map_err(|e| WsError::SerializationError(format!("创建 Envelope 时序列化载荷失败: {}", e)))?;
        Ok(Envelope {
            message_type: message_type.as_str().to_string(),
            payload,
            target: None,
            sender: None,
            original_type: None,
        })
    }

    /// 构造一条 `error` 回复。`original_type` 为触发错误的消息类型（可能是无法识别的类型名）。
    pub fn error(original_type: Option<String>, message: impl Into<String>) -> Envelope {
        let payload = ErrorResponsePayload { message: message.into() };
        Envelope {
            message_type: MessageType::Error.as_str().to_string(),
            payload: serde_json::to_value(&payload).unwrap_or_default(),
            target: None,
            sender: None,
            original_type,
        }
    }

    /// 解析 `message_type` 字段。
    pub fn kind(&self) -> Option<MessageType> {
        self.message_type.parse().ok()
    }

    /// 将信封编码为 JSON 文本，作为一个 WebSocket 文本帧发送。
    pub fn encode(&self) -> Result<String, WsError> {
        serde_json::to_string(self)
            .map_err(|e| WsError::SerializationError(format!("Envelope 序列化为 JSON 失败: {}", e)))
    }

    /// 从一个 WebSocket 文本帧解码信封。
    pub fn decode(text: &str) -> Result<Envelope, WsError> {
        serde_json::from_str(text)
            .map_err(|e| WsError::DeserializationError(format!("无法解析信封: {}", e)))
    }

    /// 将 `payload` 反序列化为指定的目标类型 `T`。
    pub fn deserialize_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, WsError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            WsError::DeserializationError(format!(
                "{} 载荷反序列化失败: {}",
                self.message_type, e
            ))
        })
    }
}

/// 中继族消息：offer / answer / candidate / message_request。
#[derive(Debug, Clone, PartialEq)]
pub struct RelayMessage {
    pub kind: MessageType,
    pub target: String,
    /// 自由格式，原样转发。
    pub payload: Value,
}

impl RelayMessage {
    /// 生成交给接收方的信封，`sender` 一律使用服务端认定的发送方。
    pub fn into_forwarded(self, sender: &str) -> Envelope {
        Envelope {
            message_type: self.kind.as_str().to_string(),
            payload: self.payload,
            target: Some(self.target),
            sender: Some(sender.to_string()),
            original_type: None,
        }
    }
}

/// 客户端可以发送的消息。
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Login(LoginPayload),
    RegisterPush(RegisterPushPayload),
    Relay(RelayMessage),
}

/// 信封在结构上不合法的原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRejection {
    /// `type` 不是已知的消息类型。
    UnknownType(String),
    /// 只能由服务端发出的类型，例如 `user_left`。
    ServerOnlyType(MessageType),
    /// 载荷无法解析为该类型要求的结构。
    InvalidPayload { message_type: MessageType, reason: String },
    /// 中继族消息缺少 `target`，或 `target` 去掉首尾空白后为空。
    MissingTarget(MessageType),
    /// 中继族消息缺少 `payload`。
    MissingPayload(MessageType),
}

impl TryFrom<Envelope> for ClientMessage {
    type Error = MessageRejection;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let kind = envelope
            .kind()
            .ok_or_else(|| MessageRejection::UnknownType(envelope.message_type.clone()))?;

        if kind.is_server_only() {
            return Err(MessageRejection::ServerOnlyType(kind));
        }

        match kind {
            MessageType::Login => envelope
                .deserialize_payload::<LoginPayload>()
                .map(ClientMessage::Login)
                .map_err(|e| MessageRejection::InvalidPayload { message_type: kind, reason: e.to_string() }),
            MessageType::RegisterPush => envelope
                .deserialize_payload::<RegisterPushPayload>()
                .map(ClientMessage::RegisterPush)
                .map_err(|e| MessageRejection::InvalidPayload { message_type: kind, reason: e.to_string() }),
            // 剩下的都是中继族
            t => {
                // 与 login 的 userId 一样去掉首尾空白，保证两边得到同一个注册表键
                let target = envelope
                    .target
                    .as_deref()
                    .map(str::trim)
                    .filter(|target| !target.is_empty())
                    .map(str::to_string)
                    .ok_or(MessageRejection::MissingTarget(t))?;
                if envelope.payload.is_null() {
                    return Err(MessageRejection::MissingPayload(t));
                }
                Ok(ClientMessage::Relay(RelayMessage {
                    kind: t,
                    target,
                    payload: envelope.payload,
                }))
            }
        }
    }
}
