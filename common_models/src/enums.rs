//! 通用枚举模块。
//!
//! 本模块定义了信令中继各组件之间共享的枚举类型。
//! 所有在此模块中定义的枚举都派生 `Serialize`, `Deserialize`, `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`，
//! 以支持数据交换、调试、比较以及作为集合键使用。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 信封 (`Envelope`) 的消息类型。
///
/// 线上格式为 snake_case 字符串，例如 `"login"`、`"message_request"`。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// 客户端声明自己的 userId。
    Login,
    /// 服务端确认登录成功。
    LoginSuccess,
    /// 客户端登记推送令牌。
    RegisterPush,
    /// 服务端确认推送令牌已保存。
    PushRegistered,
    /// 会话描述 (offer)。
    Offer,
    /// 会话描述应答 (answer)。
    Answer,
    /// 连通性候选地址。
    Candidate,
    /// 通用点对点请求。
    MessageRequest,
    /// 某个已登录用户离线的广播通知。
    UserLeft,
    /// 错误响应。
    Error,
    /// 提示性通知（例如目标离线、需要推送）。
    Info,
}

impl MessageType {
    /// 所有消息类型，按线上协议中的定义顺序排列。
    pub const ALL: [MessageType; 11] = [
        MessageType::Login,
        MessageType::LoginSuccess,
        MessageType::RegisterPush,
        MessageType::PushRegistered,
        MessageType::Offer,
        MessageType::Answer,
        MessageType::Candidate,
        MessageType::MessageRequest,
        MessageType::UserLeft,
        MessageType::Error,
        MessageType::Info,
    ];

    /// 返回线上使用的字符串形式。
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Login => "login",
            MessageType::LoginSuccess => "login_success",
            MessageType::RegisterPush => "register_push",
            MessageType::PushRegistered => "push_registered",
            MessageType::Offer => "offer",
            MessageType::Answer => "answer",
            MessageType::Candidate => "candidate",
            MessageType::MessageRequest => "message_request",
            MessageType::UserLeft => "user_left",
            MessageType::Error => "error",
            MessageType::Info => "info",
        }
    }

    /// 是否属于中继族 (offer / answer / candidate / message_request)。
    ///
    /// 中继族消息必须携带 `target` 与 `payload`，并由服务端改写 `sender` 后转发。
    pub fn is_relay(&self) -> bool {
        matches!(
            self,
            MessageType::Offer | MessageType::Answer | MessageType::Candidate | MessageType::MessageRequest
        )
    }

    /// 是否只能由服务端发出。客户端发送这些类型会被视为协议错误。
    pub fn is_server_only(&self) -> bool {
        matches!(
            self,
            MessageType::LoginSuccess
                | MessageType::PushRegistered
                | MessageType::UserLeft
                | MessageType::Error
                | MessageType::Info
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 无法识别的消息类型字符串。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMessageType(pub String);

impl fmt::Display for UnknownMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "未知的消息类型: '{}'", self.0)
    }
}

impl std::error::Error for UnknownMessageType {}

impl FromStr for MessageType {
    type Err = UnknownMessageType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownMessageType(s.to_string()))
    }
}
