//! 心跳监视器模块。
//!
//! 每个周期对所有打开的连接执行一次检查：清除存活标志并发送 Ping；
//! 如果某连接的标志在上一次检查之后没有被 Pong 重新置位，就回收该连接。
//! 因此一个失联的连接最迟在两个周期内被关闭，副作用与对端主动断开相同。
//!
//! 只有真正进入出站队列的 Ping 才算一次探测。队列已满时本轮跳过该连接，
//! 存活标志恢复为 true，避免把"没发出去的探测"误判为"没有应答"。
//!
//! 回收统一走 `ConnectionManager::close_client`，与读任务的关闭路径互斥，
//! 同一会话不会被清理两次。

use crate::ws_server::connection_manager::{CloseReason, ConnectionManager};
use log::{debug, info, warn};
use rust_websocket_utils::error::WsError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 一次检查的结果。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub pinged: usize,
    pub reclaimed: usize,
}

pub struct HeartbeatMonitor {
    connection_manager: Arc<ConnectionManager>,
    check_interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(connection_manager: Arc<ConnectionManager>, check_interval: Duration) -> Self {
        info!("[心跳监视器] 已创建，检查周期 {:?}", check_interval);
        Self {
            connection_manager,
            check_interval,
        }
    }

    /// 按周期运行检查，直到 `shutdown` 被取消。第一次检查在一个周期之后。
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.check_interval, self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("[心跳监视器] 已启动");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let summary = self.check_clients();
                    debug!(
                        "[心跳监视器] 本轮检查完成: 发送 Ping {} 个，回收 {} 个",
                        summary.pinged, summary.reclaimed
                    );
                }
            }
        }
        info!("[心跳监视器] 已停止");
    }

    /// 对当前所有会话执行一次存活检查。
    pub fn check_clients(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();

        for session in self.connection_manager.all_client_sessions() {
            if !session.is_open() {
                continue;
            }
            if !session.take_alive() {
                warn!(
                    "[心跳监视器] 客户端 {} ({}) 心跳超时，正在回收",
                    session.identity(),
                    session.addr
                );
                if self.connection_manager.close_client(&session, CloseReason::HeartbeatTimeout) {
                    summary.reclaimed += 1;
                }
                continue;
            }
            match session.send_ping() {
                Ok(()) => summary.pinged += 1,
                Err(WsError::SendErrorFull) => {
                    // 本轮没有发出探测，不能计为一次未应答
                    session.mark_alive();
                    debug!("[心跳监视器] 客户端 {} 出站队列已满，本轮跳过 Ping", session.identity());
                }
                Err(e) => debug!("[心跳监视器] 无法向客户端 {} 发送 Ping: {}", session.identity(), e),
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws_server::client_session::{ClientSession, Outbound};
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    fn connect(manager: &ConnectionManager, port: u16) -> (Arc<ClientSession>, mpsc::Receiver<Outbound>) {
        connect_with_buffer(manager, port, 8)
    }

    fn connect_with_buffer(
        manager: &ConnectionManager,
        port: u16,
        buffer: usize,
    ) -> (Arc<ClientSession>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer);
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        (manager.add_client(addr, tx).unwrap(), rx)
    }

    #[test]
    /// 第一次检查只发 Ping；没有 Pong 的连接在第二次检查时被回收，其他用户收到 user_left。
    fn test_silent_client_is_reclaimed_on_second_sweep() {
        let manager = Arc::new(ConnectionManager::new());
        let monitor = HeartbeatMonitor::new(manager.clone(), Duration::from_secs(30));
        let (observer, mut observer_rx) = connect(&manager, 1);
        let (carol, mut carol_rx) = connect(&manager, 2);
        manager.identify(&observer, "observer").unwrap();
        manager.identify(&carol, "carol").unwrap();

        assert_eq!(monitor.check_clients(), SweepSummary { pinged: 2, reclaimed: 0 });
        assert!(matches!(carol_rx.try_recv(), Ok(Outbound::Ping)));
        assert!(matches!(observer_rx.try_recv(), Ok(Outbound::Ping)));

        // 只有 observer 回复了 Pong
        observer.mark_alive();
        assert_eq!(monitor.check_clients(), SweepSummary { pinged: 1, reclaimed: 1 });

        assert!(!carol.is_open());
        assert!(manager.lookup("carol").is_none());
        assert!(manager.lookup("observer").is_some());

        let mut saw_user_left = false;
        while let Ok(outbound) = observer_rx.try_recv() {
            if let Outbound::Envelope(envelope) = outbound {
                assert_eq!(envelope.message_type, "user_left");
                assert_eq!(envelope.payload["userId"], "carol");
                saw_user_left = true;
            }
        }
        assert!(saw_user_left);
    }

    #[test]
    fn test_responsive_client_is_never_reclaimed() {
        let manager = Arc::new(ConnectionManager::new());
        let monitor = HeartbeatMonitor::new(manager.clone(), Duration::from_secs(30));
        let (session, mut rx) = connect(&manager, 1);

        for _ in 0..5 {
            assert_eq!(monitor.check_clients().reclaimed, 0);
            assert!(matches!(rx.try_recv(), Ok(Outbound::Ping)));
            session.mark_alive();
        }
        assert!(session.is_open());
    }

    #[test]
    /// 出站队列已满时 Ping 发不出去，这一轮不算未应答；只有连续两次真正发出的 Ping 都没有 Pong 才回收。
    fn test_full_queue_does_not_count_as_missed_heartbeat() {
        let manager = Arc::new(ConnectionManager::new());
        let monitor = HeartbeatMonitor::new(manager.clone(), Duration::from_secs(30));
        let (session, mut rx) = connect_with_buffer(&manager, 1, 1);
        manager.identify(&session, "dave").unwrap();

        // 占满唯一的队列槽位
        session.send(rust_websocket_utils::message::Envelope::error(None, "backlog")).unwrap();

        assert_eq!(monitor.check_clients(), SweepSummary { pinged: 0, reclaimed: 0 });
        assert!(session.is_open());

        // 发送任务消费掉积压的消息后，下一轮正常发出 Ping
        assert!(matches!(rx.try_recv(), Ok(Outbound::Envelope(_))));
        assert_eq!(monitor.check_clients(), SweepSummary { pinged: 1, reclaimed: 0 });
        assert!(session.is_open());
        assert!(manager.lookup("dave").is_some());
        assert!(matches!(rx.try_recv(), Ok(Outbound::Ping)));

        // 这个 Ping 没有得到 Pong，下一轮才回收
        assert_eq!(monitor.check_clients(), SweepSummary { pinged: 0, reclaimed: 1 });
        assert!(!session.is_open());
        assert!(manager.lookup("dave").is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let manager = Arc::new(ConnectionManager::new());
        let (_session, mut rx) = connect(&manager, 1);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(HeartbeatMonitor::new(manager.clone(), Duration::from_millis(100)).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(matches!(rx.try_recv(), Ok(Outbound::Ping)));

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(manager.client_count(), 1);
    }
}
