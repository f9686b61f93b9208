//! 单个 WebSocket 连接的会话状态。
//!
//! 会话在握手成功后以临时身份创建，login 成功后提升为 userId（单向，只能一次）。
//! 生命周期状态 Open → Closing → Closed 只能向前推进，`begin_close` 的 CAS 决定唯一的清理者。
//! 出站消息与心跳 Ping 共用一个有界队列，由连接的写任务消费；入队从不阻塞。

use chrono::{DateTime, Utc};
use rust_websocket_utils::error::WsError;
use rust_websocket_utils::message::Envelope;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{fence, AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 交给连接发送任务的出站指令。
#[derive(Debug)]
pub enum Outbound {
    Envelope(Envelope),
    /// 发送一个 WebSocket Ping 帧作为存活探测
    Ping,
}

/// 会话的生命周期状态：Open → Closing → Closed，单向推进。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> SessionState {
        match value {
            0 => SessionState::Open,
            1 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// 连接当前使用的身份。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionIdentity {
    /// 登录前由服务端分配的临时标识
    Provisional(Uuid),
    /// 登录成功后的 userId
    Identified(String),
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionIdentity::Provisional(id) => write!(f, "provisional:{}", id),
            SessionIdentity::Identified(user_id) => write!(f, "{}", user_id),
        }
    }
}

/// 代表一个已连接到服务器的 WebSocket 客户端的会话状态及相关句柄。
///
/// 每个成功握手的连接对应一个 `ClientSession`，由 `ConnectionManager` 以 `Arc` 形式共享给
/// 读任务、消息路由和心跳监视器。userId 只能被设置一次（临时身份 → 已登录，单向）。
#[derive(Debug)]
pub struct ClientSession {
    /// 连接建立时生成的临时标识，登录后仍保留用于日志和会话表索引。
    pub client_id: Uuid,

    user_id: OnceLock<String>,

    /// 心跳存活标志。收到 Pong 时置为 true，每次心跳检查时被清除。
    alive: AtomicBool,

    state: AtomicU8,

    /// 出站队列的发送端，由该连接的发送任务消费。
    sender: mpsc::Sender<Outbound>,

    /// 取消后读写任务会结束并关闭底层连接。
    connection_should_close: CancellationToken,

    pub addr: SocketAddr,

    pub creation_time: DateTime<Utc>,
}

impl ClientSession {
    pub fn new(addr: SocketAddr, sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            user_id: OnceLock::new(),
            alive: AtomicBool::new(true),
            state: AtomicU8::new(SessionState::Open as u8),
            sender,
            connection_should_close: CancellationToken::new(),
            addr,
            creation_time: Utc::now(),
        }
    }

    pub fn identity(&self) -> SessionIdentity {
        match self.user_id.get() {
            Some(user_id) => SessionIdentity::Identified(user_id.clone()),
            None => SessionIdentity::Provisional(self.client_id),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.get().map(String::as_str)
    }

    pub fn is_identified(&self) -> bool {
        self.user_id.get().is_some()
    }

    /// 把临时身份提升为 userId。已经登录过的会话返回 false，原 userId 保持不变。
    ///
    /// 与 `begin_close` 各自在写入后设置 SeqCst 栅栏：登录方随后读取状态、关闭方随后读取 userId，
    /// 两者至少有一方能看到对方的写入，注册表条目因此总会被其中一方撤销。
    pub(crate) fn promote(&self, user_id: &str) -> bool {
        let promoted = self.user_id.set(user_id.to_string()).is_ok();
        fence(Ordering::SeqCst);
        promoted
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Open → Closing。只有第一个调用者得到 true，由它负责后续清理。
    pub(crate) fn begin_close(&self) -> bool {
        let won = self
            .state
            .compare_exchange(
                SessionState::Open as u8,
                SessionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        fence(Ordering::SeqCst);
        won
    }

    pub(crate) fn mark_closed(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::SeqCst);
    }

    /// 非阻塞地把信封放入出站队列。队列已满或已关闭时立即返回错误，不重试。
    pub fn send(&self, envelope: Envelope) -> Result<(), WsError> {
        self.enqueue(Outbound::Envelope(envelope))
    }

    pub fn send_ping(&self) -> Result<(), WsError> {
        self.enqueue(Outbound::Ping)
    }

    fn enqueue(&self, outbound: Outbound) -> Result<(), WsError> {
        self.sender.try_send(outbound).map_err(|e| match e {
            TrySendError::Full(_) => WsError::SendErrorFull,
            TrySendError::Closed(_) => WsError::SendErrorClosed,
        })
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// 清除存活标志并返回清除前的值。
    pub(crate) fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn signal_close(&self) {
        self.connection_should_close.cancel();
    }

    /// 会话被要求关闭时完成。
    pub async fn closed(&self) {
        self.connection_should_close.cancelled().await
    }

    pub fn close_token(&self) -> CancellationToken {
        self.connection_should_close.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session(buffer: usize) -> (ClientSession, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer);
        (ClientSession::new("127.0.0.1:40000".parse().unwrap(), tx), rx)
    }

    #[test]
    /// userId 只能设置一次。
    fn test_promote_is_one_way() {
        let (session, _rx) = new_session(1);
        assert_eq!(session.identity(), SessionIdentity::Provisional(session.client_id));
        assert!(session.promote("alice"));
        assert!(!session.promote("mallory"));
        assert_eq!(session.identity(), SessionIdentity::Identified("alice".to_string()));
        assert_eq!(session.user_id(), Some("alice"));
    }

    #[test]
    fn test_begin_close_only_succeeds_once() {
        let (session, _rx) = new_session(1);
        assert!(session.begin_close());
        assert!(!session.begin_close());
        assert_eq!(session.state(), SessionState::Closing);
        session.mark_closed();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.begin_close());
    }

    #[test]
    fn test_send_reports_full_and_closed_queue() {
        let (session, mut rx) = new_session(1);
        session.send(Envelope::error(None, "first")).unwrap();
        assert!(matches!(session.send(Envelope::error(None, "second")), Err(WsError::SendErrorFull)));

        assert!(matches!(rx.try_recv(), Ok(Outbound::Envelope(_))));
        drop(rx);
        assert!(matches!(session.send_ping(), Err(WsError::SendErrorClosed)));
    }

    #[test]
    fn test_alive_flag_swap() {
        let (session, _rx) = new_session(1);
        assert!(session.take_alive());
        assert!(!session.take_alive());
        session.mark_alive();
        assert!(session.take_alive());
    }
}
