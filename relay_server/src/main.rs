use anyhow::Context;
use log::{error, info, LevelFilter};
use relay_server::config;
use relay_server::push::{self, LoggingPushNotifier};
use relay_server::shutdown::{self, ShutdownCoordinator, ShutdownTasks};
use relay_server::ws_server::connection_manager::ConnectionManager;
use relay_server::ws_server::heartbeat_monitor::HeartbeatMonitor;
use relay_server::ws_server::message_router::MessageRouter;
use relay_server::ws_server::service::WsService;
use rust_websocket_utils::server::transport::bind_listener;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
    info!("[主程序] 日志系统已初始化 (env_logger)，默认级别 Info。");

    let app_config = config::load().context("加载配置失败")?;
    info!(
        "[主程序] 配置已加载: 监听地址={}, 心跳周期={:?}, 推送存储={:?}",
        app_config.listen_addr(),
        app_config.heartbeat_interval(),
        app_config.push_store.backend
    );

    let push_store = push::open_store(&app_config.push_store)
        .await
        .context("打开推送令牌存储失败")?;

    let connection_manager = Arc::new(ConnectionManager::new());
    let router = Arc::new(MessageRouter::new(
        connection_manager.clone(),
        push_store.clone(),
        Arc::new(LoggingPushNotifier),
    ));
    let coordinator = ShutdownCoordinator::new();

    let listener = bind_listener(&app_config.listen_addr())
        .await
        .with_context(|| format!("无法绑定监听地址 {}", app_config.listen_addr()))?;

    let ws_service = WsService::new(connection_manager.clone(), router, app_config.websocket.outbound_buffer);
    let accept_token = coordinator.accept_token();
    let server = tokio::spawn(async move { ws_service.run(listener, accept_token).await });

    let heartbeat_monitor = HeartbeatMonitor::new(connection_manager.clone(), app_config.heartbeat_interval());
    let heartbeat = tokio::spawn(heartbeat_monitor.run(coordinator.heartbeat_token()));

    info!("[主程序] 中继服务器运行中，按 Ctrl-C 或发送 SIGTERM 停止。");
    shutdown::wait_for_signal().await;

    let tasks = ShutdownTasks {
        heartbeat,
        server,
        connection_manager,
        push_store,
    };
    if !coordinator.graceful_shutdown(tasks, app_config.shutdown_timeout()).await {
        error!("[主程序] 优雅停机未能按时完成，强制退出。");
        std::process::exit(1);
    }

    info!("[主程序] 中继服务器已停止。");
    Ok(())
}
