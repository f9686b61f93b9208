// rust_websocket_utils/src/server/transport.rs

//! 包含服务端 WebSocket 监听、接受连接和通信逻辑。

use crate::error::WsError;
use crate::message::Envelope;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as TungsteniteError;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// `WsStream` 是一个类型别名，代表经过 WebSocket 握手后的 TCP 流。
pub type WsStream = WebSocketStream<TcpStream>;

/// 连接的读半部分。
pub type WsReceiver = SplitStream<WsStream>;

/// 连接的写半部分，外加对端地址。
///
/// 一个连接只有一个 `ConnectionHandler`，由该连接的发送任务独占。
pub struct ConnectionHandler {
    ws_sender: SplitSink<WsStream, Message>,
    peer_addr: SocketAddr,
}

impl ConnectionHandler {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// 将信封编码为一个文本帧并发送。
    pub async fn send_message(&mut self, envelope: &Envelope) -> Result<(), WsError> {
        let text = envelope.encode()?;
        self.ws_sender.send(Message::Text(text)).await?;
        Ok(())
    }

    /// 发送一个 WebSocket Ping 帧作为存活探测。对端的 Pong 由 `receive_message` 报告。
    pub async fn send_ping(&mut self) -> Result<(), WsError> {
        self.ws_sender.send(Message::Ping(Vec::new())).await?;
        Ok(())
    }

    /// 发送 Close 帧并冲刷写端。
    pub async fn close(&mut self) -> Result<(), WsError> {
        self.ws_sender.close().await?;
        Ok(())
    }
}

/// 从连接上读到的、上层关心的一帧。
#[derive(Debug)]
pub enum InboundFrame {
    Envelope(Envelope),
    /// 对存活探测的应答。
    Pong,
}

/// 读取下一个上层关心的帧。
///
/// # Returns
/// - `None`: 对端正常关闭连接（收到 Close 帧或流结束）。
/// - `Some(Err(WsError::DeserializationError))`: 文本帧不是合法信封，或收到二进制帧；连接仍可继续使用。
/// - `Some(Err(..))` 其他错误: 连接已不可用。
///
/// Ping 帧由 tungstenite 自动应答，不会返回给调用者。
pub async fn receive_message(ws_receiver: &mut WsReceiver) -> Option<Result<InboundFrame, WsError>> {
    loop {
        match ws_receiver.next().await? {
            Ok(Message::Text(text)) => return Some(Envelope::decode(&text).map(InboundFrame::Envelope)),
            Ok(Message::Pong(_)) => return Some(Ok(InboundFrame::Pong)),
            Ok(Message::Ping(_)) => {
                debug!("[传输层] 收到对端 Ping 帧，已由 tungstenite 自动应答");
                continue;
            }
            Ok(Message::Binary(data)) => {
                return Some(Err(WsError::DeserializationError(format!(
                    "不支持二进制帧 ({} 字节)，信封必须以文本帧发送",
                    data.len()
                ))));
            }
            Ok(Message::Close(frame)) => {
                debug!("[传输层] 收到对端 Close 帧: {:?}", frame);
                return None;
            }
            Ok(Message::Frame(_)) => continue,
            Err(TungsteniteError::ConnectionClosed) | Err(TungsteniteError::AlreadyClosed) => return None,
            Err(e) => return Some(Err(WsError::from(e))),
        }
    }
}

/// 绑定 TCP 监听器。绑定失败对服务是致命的，由调用方决定如何处理。
pub async fn bind_listener(addr: &str) -> Result<TcpListener, WsError> {
    let listener = TcpListener::bind(addr).await?;
    info!("[传输层] WebSocket 服务器正在监听地址: {}", listener.local_addr()?);
    Ok(listener)
}

/// 运行接受循环，直到 `shutdown` 被取消。
///
/// 对于每一个成功完成握手的连接，都会在独立的 Tokio 任务中调用 `on_connect`，
/// 传入写半部分 (`ConnectionHandler`) 与读半部分 (`WsReceiver`)。
/// 停机时监听器随本函数返回而被释放，不再接受新连接；已建立的连接由上层负责关闭。
pub async fn start_server<F, Fut>(
    listener: TcpListener,
    shutdown: CancellationToken,
    on_connect: F,
) -> Result<(), WsError>
where
    F: Fn(ConnectionHandler, WsReceiver) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((tcp_stream, peer_addr)) => {
                debug!("[传输层] 从 {} 接受了新的 TCP 连接", peer_addr);
                let on_connect_callback = on_connect.clone();

                tokio::spawn(async move {
                    match accept_async(tcp_stream).await {
                        Ok(ws_stream) => {
                            debug!("[传输层] 与 {} 的 WebSocket 握手成功", peer_addr);
                            let (ws_sender, ws_receiver) = ws_stream.split();
                            let handler = ConnectionHandler { ws_sender, peer_addr };
                            on_connect_callback(handler, ws_receiver).await;
                        }
                        Err(e) => {
                            warn!("[传输层] 与 {} 的 WebSocket 握手失败: {}", peer_addr, e);
                        }
                    }
                });
            }
            Err(e) => {
                // 单次 accept 失败（例如文件描述符耗尽）不终止服务
                error!("[传输层] 接受 TCP 连接失败: {}。服务器将继续运行。", e);
            }
        }
    }

    info!("[传输层] 接受循环已停止，监听端口即将关闭");
    Ok(())
}
