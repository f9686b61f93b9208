//! `common_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了信令中继服务端与其客户端之间共享的数据契约：
//! - **通用枚举 (`enums`)**: 信封的消息类型 `MessageType`。
//! - **WebSocket 消息负载 (`ws_payloads`)**: 登录、推送登记、错误、离线通知等消息的强类型载荷。
//!
//! 本 crate 只包含纯数据，不包含任何行为；所有模型都派生 `Serialize`/`Deserialize`/`Debug`/`Clone`。

pub mod enums;
pub mod ws_payloads;
