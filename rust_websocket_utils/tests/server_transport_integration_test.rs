// rust_websocket_utils/tests/server_transport_integration_test.rs

use futures_util::{SinkExt, StreamExt};
use log::{info, LevelFilter};
use rust_websocket_utils::error::WsError;
use rust_websocket_utils::message::Envelope;
use rust_websocket_utils::server::transport::{
    bind_listener, receive_message, start_server, ConnectionHandler, InboundFrame, WsReceiver,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as TungsteniteMessage};
use tokio_util::sync::CancellationToken;

// 辅助函数：初始化日志，仅用于测试，避免多次初始化
fn init_test_logger() {
    let _ = env_logger::builder().filter_level(LevelFilter::Info).is_test(true).try_init();
}

/// 启动一个在随机端口上监听的服务器，返回地址、停机令牌与服务器任务句柄。
async fn spawn_server<F, Fut>(on_connect: F) -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<Result<(), WsError>>)
where
    F: Fn(ConnectionHandler, WsReceiver) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = bind_listener("127.0.0.1:0").await.expect("无法绑定到随机端口");
    let addr = listener.local_addr().expect("无法获取本地监听地址");
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(start_server(listener, shutdown.clone(), on_connect));
    (addr, shutdown, handle)
}

/// 回显处理器：收到合法信封就原样发回，收到无法解析的帧就回复一条 error 信封。
async fn echo_handler(mut handler: ConnectionHandler, mut ws_receiver: WsReceiver) {
    while let Some(frame) = receive_message(&mut ws_receiver).await {
        match frame {
            Ok(InboundFrame::Envelope(envelope)) => {
                let _ = handler.send_message(&envelope).await;
            }
            Ok(InboundFrame::Pong) => {}
            Err(WsError::DeserializationError(reason)) => {
                let _ = handler.send_message(&Envelope::error(None, reason)).await;
            }
            Err(e) => {
                info!("[测试服务器] 连接出错: {}", e);
                break;
            }
        }
    }
}

async fn next_envelope<S>(client: &mut S) -> Envelope
where
    S: futures_util::Stream<Item = Result<TungsteniteMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("等待服务器消息超时")
            .expect("连接意外关闭")
            .expect("读取消息失败");
        if let TungsteniteMessage::Text(text) = message {
            return Envelope::decode(&text).expect("服务器发送了非法信封");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_accepts_connection_and_echoes_envelope() {
    init_test_logger();
    let (addr, shutdown, server_handle) = spawn_server(echo_handler).await;

    let (mut client, _response) = connect_async(format!("ws://{}", addr)).await.expect("客户端连接失败");
    let sent = r#"{"type":"offer","target":"bob","payload":{"sdp":"v=0"}}"#;
    client.send(TungsteniteMessage::Text(sent.to_string())).await.expect("客户端发送消息失败");

    let echoed = next_envelope(&mut client).await;
    assert_eq!(echoed, Envelope::decode(sent).unwrap());

    shutdown.cancel();
    let _ = server_handle.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_frame_does_not_end_connection() {
    init_test_logger();
    let (addr, shutdown, server_handle) = spawn_server(echo_handler).await;

    let (mut client, _) = connect_async(format!("ws://{}", addr)).await.expect("客户端连接失败");
    client.send(TungsteniteMessage::Text("definitely not json".to_string())).await.unwrap();
    client.send(TungsteniteMessage::Binary(vec![1, 2, 3])).await.unwrap();
    client.send(TungsteniteMessage::Text(r#"{"type":"login","payload":{"userId":"alice"}}"#.to_string())).await.unwrap();

    assert_eq!(next_envelope(&mut client).await.message_type, "error");
    assert_eq!(next_envelope(&mut client).await.message_type, "error");
    let login = next_envelope(&mut client).await;
    assert_eq!(login.message_type, "login");
    assert_eq!(login.payload["userId"], "alice");

    shutdown.cancel();
    let _ = server_handle.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ping_is_answered_with_pong() {
    init_test_logger();
    let (pong_tx, mut pong_rx) = mpsc::channel::<()>(1);

    let (addr, shutdown, server_handle) = spawn_server(move |mut handler: ConnectionHandler, mut ws_receiver: WsReceiver| {
        let pong_tx = pong_tx.clone();
        async move {
            handler.send_ping().await.expect("发送 Ping 失败");
            while let Some(frame) = receive_message(&mut ws_receiver).await {
                if let Ok(InboundFrame::Pong) = frame {
                    let _ = pong_tx.send(()).await;
                }
            }
        }
    })
    .await;

    let (mut client, _) = connect_async(format!("ws://{}", addr)).await.expect("客户端连接失败");
    // 客户端持续读取，tungstenite 会在读取过程中自动回复 Pong
    let reader = tokio::spawn(async move { while client.next().await.is_some() {} });

    let received = tokio::time::timeout(Duration::from_secs(5), pong_rx.recv()).await;
    assert!(matches!(received, Ok(Some(()))), "服务器未收到 Pong");

    reader.abort();
    shutdown.cancel();
    let _ = server_handle.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_stops_accept_loop() {
    init_test_logger();
    let (addr, shutdown, server_handle) = spawn_server(echo_handler).await;

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), server_handle)
        .await
        .expect("接受循环未在停机后退出")
        .expect("服务器任务 panic");
    assert!(result.is_ok());

    // 监听器已释放，新的连接应当失败
    assert!(connect_async(format!("ws://{}", addr)).await.is_err());
}
