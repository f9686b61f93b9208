// rust_websocket_utils/src/server/mod.rs

//! WebSocket 服务端模块。
//!
//! `transport` 子模块封装 `tokio-tungstenite` 的细节：绑定监听器、可停止的接受循环、
//! 握手后把连接拆分为写半部分 (`ConnectionHandler`) 与读半部分，并把入站帧解码为信封。

pub mod transport;
