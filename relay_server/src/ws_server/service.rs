//! WebSocket 服务：接受连接，并为每个连接运行读循环与写任务。
//!
//! 每个连接拆成两个任务：
//! - 读循环在连接自己的任务中运行，按到达顺序把入站帧交给 `MessageRouter`，
//!   Pong 帧只刷新存活标志；
//! - 写任务独占写半部分，消费有界出站队列，关闭时先写完积压内容再发送 Close 帧。
//!
//! 读循环结束（对端关闭、传输错误、会话被其他路径关闭）后统一调用 `close_client`。

use crate::ws_server::client_session::{ClientSession, Outbound};
use crate::ws_server::connection_manager::{CloseReason, ConnectionManager};
use crate::ws_server::message_router::MessageRouter;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use rust_websocket_utils::server::transport::{
    receive_message, start_server, ConnectionHandler as WsConnectionHandler, InboundFrame, WsReceiver,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// WebSocket 服务结构体，持有连接管理器与消息路由。
pub struct WsService {
    connection_manager: Arc<ConnectionManager>,
    router: Arc<MessageRouter>,
    outbound_buffer: usize,
}

impl WsService {
    pub fn new(connection_manager: Arc<ConnectionManager>, router: Arc<MessageRouter>, outbound_buffer: usize) -> Self {
        info!("[WebSocket服务] 新实例已创建，出站队列容量 {}。", outbound_buffer);
        Self {
            connection_manager,
            router,
            outbound_buffer,
        }
    }

    /// 在给定监听器上运行接受循环，直到 `shutdown` 被取消。
    pub async fn run(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local_addr = listener.local_addr().context("无法获取监听地址")?;
        info!("[WebSocket服务] 开始在 {} 上接受连接", local_addr);

        let on_new_connection_cb = {
            let connection_manager = Arc::clone(&self.connection_manager);
            let router = Arc::clone(&self.router);
            let outbound_buffer = self.outbound_buffer;
            move |ws_conn_handler: WsConnectionHandler, ws_receiver: WsReceiver| {
                let connection_manager = Arc::clone(&connection_manager);
                let router = Arc::clone(&router);
                async move {
                    handle_connection(connection_manager, router, outbound_buffer, ws_conn_handler, ws_receiver)
                        .await;
                }
            }
        };

        start_server(listener, shutdown, on_new_connection_cb)
            .await
            .context("WebSocket 接受循环异常退出")?;
        info!("[WebSocket服务] {} 上的接受循环已停止。", local_addr);
        Ok(())
    }
}

async fn handle_connection(
    connection_manager: Arc<ConnectionManager>,
    router: Arc<MessageRouter>,
    outbound_buffer: usize,
    mut ws_conn_handler: WsConnectionHandler,
    ws_receiver: WsReceiver,
) {
    let peer_addr = ws_conn_handler.peer_addr();
    let (tx, rx) = mpsc::channel(outbound_buffer);

    let Some(session) = connection_manager.add_client(peer_addr, tx) else {
        if let Err(e) = ws_conn_handler.close().await {
            debug!("[WebSocket服务] 关闭被拒绝的连接 {} 时出错: {}", peer_addr, e);
        }
        return;
    };

    let writer = tokio::spawn(write_loop(ws_conn_handler, rx, session.close_token(), session.client_id));

    let reason = read_loop(&session, &router, ws_receiver).await;
    connection_manager.close_client(&session, reason);

    if let Err(e) = writer.await {
        warn!("[WebSocket服务] 客户端 {} 的写任务异常结束: {}", session.client_id, e);
    }
    debug!("[WebSocket服务] 来自 {} 的连接已完全关闭。", peer_addr);
}

/// 读循环：按到达顺序逐条分发入站帧。返回连接结束的原因。
async fn read_loop(session: &Arc<ClientSession>, router: &MessageRouter, mut ws_receiver: WsReceiver) -> CloseReason {
    loop {
        let frame = tokio::select! {
            biased;
            // 会话已被其他路径关闭，或写任务失败
            _ = session.closed() => return CloseReason::TransportError,
            frame = receive_message(&mut ws_receiver) => frame,
        };

        match frame {
            None => return CloseReason::PeerClosed,
            Some(Ok(InboundFrame::Pong)) => session.mark_alive(),
            Some(Ok(InboundFrame::Envelope(envelope))) => router.handle_message(session, envelope).await,
            Some(Err(e)) if !e.is_fatal_for_connection() => router.handle_malformed(session, &e.to_string()),
            Some(Err(e)) => {
                warn!("[WebSocket服务] 读取 {} 的消息失败: {}", session.identity(), e);
                return CloseReason::TransportError;
            }
        }
    }
}

/// 写任务：独占连接的写半部分，把出站队列中的指令写到连接上。
///
/// 会话关闭时先写完队列中已有的内容（例如登录冲突的错误回复），再发送 Close 帧。
async fn write_loop(
    mut ws_conn_handler: WsConnectionHandler,
    mut rx: mpsc::Receiver<Outbound>,
    close: CancellationToken,
    client_id: Uuid,
) {
    loop {
        tokio::select! {
            biased;
            outbound = rx.recv() => match outbound {
                Some(outbound) => {
                    if let Err(e) = write_one(&mut ws_conn_handler, outbound).await {
                        warn!("[WebSocket服务] 向客户端 {} 写入失败: {}", client_id, e);
                        close.cancel();
                        return;
                    }
                }
                None => break,
            },
            _ = close.cancelled() => {
                while let Ok(outbound) = rx.try_recv() {
                    if write_one(&mut ws_conn_handler, outbound).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    if let Err(e) = ws_conn_handler.close().await {
        debug!("[WebSocket服务] 关闭客户端 {} 的连接时出错: {}", client_id, e);
    }
}

async fn write_one(
    ws_conn_handler: &mut WsConnectionHandler,
    outbound: Outbound,
) -> Result<(), rust_websocket_utils::error::WsError> {
    match outbound {
        Outbound::Envelope(envelope) => ws_conn_handler.send_message(&envelope).await,
        Outbound::Ping => ws_conn_handler.send_ping().await,
    }
}
