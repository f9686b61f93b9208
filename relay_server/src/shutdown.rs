//! 停机信号处理与优雅停机编排，基于 `CancellationToken`。
//!
//! 停机顺序：停止心跳 → 强制关闭所有连接（清空注册表，不广播 `user_left`）
//! → 停止接受循环 → 关闭推送令牌存储。整个过程受一个总时限约束。

use crate::push::PushTokenStore;
use crate::ws_server::connection_manager::ConnectionManager;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 停机需要等待的后台任务与需要关闭的资源。
pub struct ShutdownTasks {
    pub heartbeat: JoinHandle<()>,
    pub server: JoinHandle<anyhow::Result<()>>,
    pub connection_manager: Arc<ConnectionManager>,
    pub push_store: Arc<dyn PushTokenStore>,
}

/// 协调各后台任务的停机。
pub struct ShutdownCoordinator {
    heartbeat: CancellationToken,
    accept: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            heartbeat: CancellationToken::new(),
            accept: CancellationToken::new(),
        }
    }

    /// 交给 `HeartbeatMonitor::run` 的取消令牌。
    pub fn heartbeat_token(&self) -> CancellationToken {
        self.heartbeat.clone()
    }

    /// 交给 `WsService::run` 的取消令牌。
    pub fn accept_token(&self) -> CancellationToken {
        self.accept.clone()
    }

    /// 按固定顺序停机。在 `timeout` 内完成返回 true，否则返回 false，由调用方决定是否强制退出。
    pub async fn graceful_shutdown(&self, tasks: ShutdownTasks, timeout: Duration) -> bool {
        info!("[停机] 开始优雅停机，时限 {:?}", timeout);
        match tokio::time::timeout(timeout, self.run_sequence(tasks)).await {
            Ok(()) => {
                info!("[停机] 优雅停机完成");
                true
            }
            Err(_) => {
                warn!("[停机] 停机在 {:?} 内未完成", timeout);
                false
            }
        }
    }

    async fn run_sequence(&self, tasks: ShutdownTasks) {
        self.heartbeat.cancel();
        if let Err(e) = tasks.heartbeat.await {
            warn!("[停机] 心跳任务异常结束: {}", e);
        }

        let closed = tasks.connection_manager.shutdown_all();
        info!("[停机] 已强制关闭 {} 个连接", closed);

        self.accept.cancel();
        match tasks.server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[停机] WebSocket 服务返回错误: {:#}", e),
            Err(e) => warn!("[停机] WebSocket 服务任务异常结束: {}", e),
        }

        // 关闭失败只记录，不影响退出
        if let Err(e) = tasks.push_store.close().await {
            error!("[停机] 关闭推送令牌存储失败: {}", e);
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// 等待 SIGINT 或 SIGTERM（非 unix 平台只等待 Ctrl-C）。
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("[停机] 无法注册 SIGTERM 处理器: {}，只响应 Ctrl-C", e);
                ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c() => info!("[停机] 收到 SIGINT"),
            _ = terminate.recv() => info!("[停机] 收到 SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
        info!("[停机] 收到 Ctrl-C");
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("[停机] 监听 Ctrl-C 失败: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PushStoreError;
    use crate::push::MemoryPushStore;
    use crate::ws_server::client_session::Outbound;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct FailingCloseStore;

    #[async_trait]
    impl PushTokenStore for FailingCloseStore {
        async fn save(&self, _user_id: &str, _push_token: &str) -> Result<(), PushStoreError> {
            Ok(())
        }

        async fn lookup(&self, _user_id: &str) -> Result<Option<String>, PushStoreError> {
            Ok(None)
        }

        async fn close(&self) -> Result<(), PushStoreError> {
            Err(PushStoreError::Io(std::io::Error::other("flush failed")))
        }
    }

    fn tasks_waiting_on(
        coordinator: &ShutdownCoordinator,
        manager: Arc<ConnectionManager>,
        push_store: Arc<dyn PushTokenStore>,
    ) -> ShutdownTasks {
        let heartbeat_token = coordinator.heartbeat_token();
        let accept_token = coordinator.accept_token();
        ShutdownTasks {
            heartbeat: tokio::spawn(async move { heartbeat_token.cancelled().await }),
            server: tokio::spawn(async move {
                accept_token.cancelled().await;
                Ok(())
            }),
            connection_manager: manager,
            push_store,
        }
    }

    #[test]
    fn test_tokens_start_uncancelled() {
        let coordinator = ShutdownCoordinator::default();
        assert!(!coordinator.heartbeat_token().is_cancelled());
        assert!(!coordinator.accept_token().is_cancelled());
    }

    #[tokio::test]
    /// 停机关闭所有连接、取消两个令牌并关闭存储。
    async fn test_graceful_shutdown_runs_full_sequence() {
        let coordinator = ShutdownCoordinator::new();
        let manager = Arc::new(ConnectionManager::new());
        let (tx, _rx) = mpsc::channel::<Outbound>(4);
        let session = manager.add_client("127.0.0.1:5000".parse().unwrap(), tx).unwrap();
        manager.identify(&session, "alice").unwrap();
        let store = Arc::new(MemoryPushStore::new());

        let tasks = tasks_waiting_on(&coordinator, manager.clone(), store.clone());
        assert!(coordinator.graceful_shutdown(tasks, Duration::from_secs(5)).await);

        assert!(coordinator.heartbeat_token().is_cancelled());
        assert!(coordinator.accept_token().is_cancelled());
        assert!(!session.is_open());
        assert_eq!(manager.size(), 0);
        assert!(matches!(store.lookup("alice").await, Err(PushStoreError::Closed)));
    }

    #[tokio::test]
    async fn test_store_close_failure_is_not_fatal() {
        let coordinator = ShutdownCoordinator::new();
        let tasks = tasks_waiting_on(&coordinator, Arc::new(ConnectionManager::new()), Arc::new(FailingCloseStore));
        assert!(coordinator.graceful_shutdown(tasks, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_graceful_shutdown_times_out() {
        let coordinator = ShutdownCoordinator::new();
        let tasks = ShutdownTasks {
            // 忽略取消的任务
            heartbeat: tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(300)).await;
            }),
            server: tokio::spawn(async { Ok(()) }),
            connection_manager: Arc::new(ConnectionManager::new()),
            push_store: Arc::new(MemoryPushStore::new()),
        };

        assert!(!coordinator.graceful_shutdown(tasks, Duration::from_millis(100)).await);
    }
}
