//! WebSocket 服务端模块。
//!
//! - `client_session`: 单个连接的身份、存活标志与出站队列。
//! - `connection_manager`: 打开会话表与用户注册表，统一的关闭流程。
//! - `message_router`: 按消息类型分发入站信封。
//! - `heartbeat_monitor`: 周期性 Ping 探测并回收失联连接。
//! - `service`: 接受循环与每连接的读写任务。

pub mod client_session;
pub mod connection_manager;
pub mod heartbeat_monitor;
pub mod message_router;
pub mod service;
