//! `relay_server` 信令中继服务端核心库。
//!
//! 客户端通过 WebSocket 连接并以 userId 登录，服务端在已登录的客户端之间转发
//! offer / answer / candidate / message_request 等信令消息；目标离线时查询推送令牌并触发推送钩子。
//!
//! 主要模块包括：
//! - `config`: 配置加载与校验。
//! - `error`: 应用特定的错误类型。
//! - `push`: 推送令牌存储与推送通知钩子。
//! - `shutdown`: 信号处理与优雅停机。
//! - `ws_server`: 连接管理、消息路由、心跳与 WebSocket 服务。

pub mod config;
pub mod error;
pub mod push;
pub mod shutdown;
pub mod ws_server;
