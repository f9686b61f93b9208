//! WebSocket 连接管理。
//!
//! `ConnectionManager` 同时维护两张表：
//! - `clients`: 所有打开的会话，以临时标识 `client_id` 为键；
//! - `users`: 用户注册表，userId → 已登录的会话，同一个 userId 最多对应一个连接。
//!
//! 所有关闭路径（对端断开、传输错误、心跳回收、登录冲突）都汇聚到 `close_client`，
//! 它对每个会话恰好执行一次清理，并且只有真正移除了注册表条目的调用者才广播 `user_left`。
//!
//! 登录与关闭可能在不同线程上同时发生（读任务处理 login 的同时心跳监视器回收连接）。
//! `identify` 先写注册表再提升身份，随后检查会话状态；`close_client` 先推进状态再读取身份。
//! 两边的顺序由 `ClientSession` 中的 SeqCst 栅栏保证，关闭后的会话不会残留在注册表中。

use crate::error::RelayError;
use crate::ws_server::client_session::{ClientSession, Outbound};
use chrono::Utc;
use common_models::enums::MessageType;
use common_models::ws_payloads::UserLeftPayload;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info, warn};
use rust_websocket_utils::message::Envelope;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 注册表操作的失败原因。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("userId '{0}' 已被其他连接占用")]
    AlreadyTaken(String),
}

/// 连接被关闭的原因，仅用于日志。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 对端发送 Close 帧或 TCP 连接结束
    PeerClosed,
    TransportError,
    /// 连续两次心跳探测无应答
    HeartbeatTimeout,
    /// 登录时 userId 冲突
    LoginRejected,
    ServerShutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::PeerClosed => "对端关闭",
            CloseReason::TransportError => "传输错误",
            CloseReason::HeartbeatTimeout => "心跳超时",
            CloseReason::LoginRejected => "登录被拒绝",
            CloseReason::ServerShutdown => "服务器停机",
        };
        f.write_str(text)
    }
}

/// 管理所有活动的 WebSocket 客户端会话与用户注册表
#[derive(Debug)]
pub struct ConnectionManager {
    clients: DashMap<Uuid, Arc<ClientSession>>,
    users: DashMap<String, Arc<ClientSession>>,
    /// 停机后不再接纳新连接
    accepting: AtomicBool,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        info!("[连接管理器] 新实例已创建。");
        Self {
            clients: DashMap::new(),
            users: DashMap::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// 为新握手成功的连接创建会话。停机开始后返回 `None`，调用方应直接关闭该连接。
    pub fn add_client(&self, addr: SocketAddr, sender: mpsc::Sender<Outbound>) -> Option<Arc<ClientSession>> {
        if !self.accepting.load(Ordering::Acquire) {
            warn!("[连接管理器] 停机中，拒绝来自 {} 的连接", addr);
            return None;
        }
        let session = Arc::new(ClientSession::new(addr, sender));
        self.clients.insert(session.client_id, Arc::clone(&session));
        info!(
            "[连接管理器] 客户端已连接: id={}, addr={}, 当前会话数={}",
            session.client_id,
            addr,
            self.clients.len()
        );
        Some(session)
    }

    /// 当前所有打开会话的快照。
    pub fn all_client_sessions(&self) -> Vec<Arc<ClientSession>> {
        self.clients.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// 把 userId 绑定到会话。检查与插入在同一个 entry 锁内完成。
    pub fn register(&self, user_id: &str, session: &Arc<ClientSession>) -> Result<(), RegistryError> {
        match self.users.entry(user_id.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyTaken(user_id.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(session));
                Ok(())
            }
        }
    }

    /// 移除 userId 的绑定。userId 未注册时什么也不做。
    pub fn unregister(&self, user_id: &str) -> Option<Arc<ClientSession>> {
        self.users.remove(user_id).map(|(_, session)| session)
    }

    /// 查找在线的已登录会话。正在关闭的会话不会被返回。
    pub fn lookup(&self, user_id: &str) -> Option<Arc<ClientSession>> {
        self.users
            .get(user_id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|session| session.is_open())
    }

    /// 当前已登录的用户数。
    pub fn size(&self) -> usize {
        self.users.len()
    }

    /// 处理 login：注册 userId 并把会话提升为已登录状态。
    ///
    /// # Errors
    /// - `RelayError::Validation`: 会话已经登录过。
    /// - `RelayError::Conflict`: userId 已被另一个连接占用（调用方负责关闭本连接）。
    pub fn identify(&self, session: &Arc<ClientSession>, user_id: &str) -> Result<(), RelayError> {
        if let Some(current) = session.user_id() {
            return Err(RelayError::Validation(format!("该连接已以 '{}' 登录", current)));
        }

        self.register(user_id, session)
            .map_err(|RegistryError::AlreadyTaken(taken)| RelayError::Conflict(taken))?;

        if !session.promote(user_id) {
            // 同一连接上的消息按顺序处理，正常情况下不会走到这里
            self.users.remove_if(user_id, |_, owner| Arc::ptr_eq(owner, session));
            return Err(RelayError::Validation("该连接已经登录".to_string()));
        }

        // 注册期间会话可能已经开始关闭，此时关闭流程看不到这个 userId，需要自行撤销
        if !session.is_open() {
            self.users.remove_if(user_id, |_, owner| Arc::ptr_eq(owner, session));
            debug!(
                "[连接管理器] 会话 {} 在以 '{}' 登录期间已关闭，注册已撤销",
                session.client_id, user_id
            );
            return Ok(());
        }

        info!(
            "[连接管理器] 客户端 {} 已登录为 '{}'，已注册用户数={}",
            session.client_id,
            user_id,
            self.users.len()
        );
        Ok(())
    }

    /// 关闭会话并完成清理。每个会话只有第一次调用会生效并返回 true。
    ///
    /// 已登录的会话会从注册表移除（仅当条目仍指向本会话时），
    /// 随后向其余所有已登录连接广播 `user_left`。
    pub fn close_client(&self, session: &Arc<ClientSession>, reason: CloseReason) -> bool {
        if !session.begin_close() {
            return false;
        }

        self.clients.remove(&session.client_id);
        let departed = session
            .user_id()
            .filter(|user_id| {
                self.users
                    .remove_if(*user_id, |_, owner| Arc::ptr_eq(owner, session))
                    .is_some()
            })
            .map(str::to_string);

        session.signal_close();
        session.mark_closed();

        info!(
            "[连接管理器] 客户端 {} ({}) 在 {} 秒后关闭，原因: {}。当前会话数={}，已注册用户数={}",
            session.client_id,
            session.identity(),
            (Utc::now() - session.creation_time).num_seconds(),
            reason,
            self.clients.len(),
            self.users.len()
        );

        if let Some(user_id) = departed {
            self.broadcast_user_left(&user_id);
        }
        true
    }

    fn broadcast_user_left(&self, user_id: &str) {
        let envelope = match Envelope::new(MessageType::UserLeft, &UserLeftPayload { user_id: user_id.to_string() }) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("[连接管理器] 构造 '{}' 的 user_left 消息失败: {}", user_id, e);
                return;
            }
        };

        let recipients: Vec<Arc<ClientSession>> =
            self.users.iter().map(|entry| Arc::clone(entry.value())).collect();
        for recipient in recipients {
            if !recipient.is_open() {
                continue;
            }
            if let Err(e) = recipient.send(envelope.clone()) {
                warn!(
                    "[连接管理器] 通知 {} 关于 '{}' 离开失败: {}",
                    recipient.identity(),
                    user_id,
                    e
                );
            }
        }
        debug!("[连接管理器] 已广播 '{}' 的 user_left", user_id);
    }

    /// 停机：拒绝新连接，强制关闭所有会话并清空注册表，不逐个广播 `user_left`。
    pub fn shutdown_all(&self) -> usize {
        self.accepting.store(false, Ordering::Release);
        self.users.clear();

        let mut closed = 0;
        for session in self.all_client_sessions() {
            if self.close_client(&session, CloseReason::ServerShutdown) {
                closed += 1;
            }
        }
        self.users.clear();
        info!("[连接管理器] 停机时关闭了 {} 个会话", closed);
        closed
    }
}
