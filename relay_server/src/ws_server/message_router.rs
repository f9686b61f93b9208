//! 负责处理从客户端接收到的信封，并根据消息类型进行分发处理。
//!
//! 每条消息的处理结果要么是成功（可能伴随回复或转发），要么在分发边界被转换为
//! 一条发回原发送方的 `error` 信封，`originalType` 指向触发错误的消息类型。
//!
//! 分发顺序：
//! 1. 未知类型直接返回协议错误；
//! 2. 中继族与 `register_push` 在登录前返回鉴权错误；
//! 3. 其余结构检查由 `ClientMessage::try_from` 完成，拒绝原因映射为 `RelayError`；
//! 4. 中继消息先查在线注册表，目标离线时再查推送令牌存储。
//!
//! userId 与 target 都在去掉首尾空白后使用，二者始终指向同一个注册表键。

use crate::error::RelayError;
use crate::push::{PushNotifier, PushRequest, PushTokenStore};
use crate::ws_server::client_session::ClientSession;
use crate::ws_server::connection_manager::{CloseReason, ConnectionManager};
use common_models::enums::MessageType;
use common_models::ws_payloads::{
    InfoPayload, LoginPayload, LoginSuccessPayload, PushRegisteredPayload, RegisterPushPayload,
};
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use rust_websocket_utils::message::{ClientMessage, Envelope, MessageRejection, RelayMessage};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

pub struct MessageRouter {
    connection_manager: Arc<ConnectionManager>,
    push_store: Arc<dyn PushTokenStore>,
    push_notifier: Arc<dyn PushNotifier>,
}

impl MessageRouter {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        push_store: Arc<dyn PushTokenStore>,
        push_notifier: Arc<dyn PushNotifier>,
    ) -> Self {
        Self {
            connection_manager,
            push_store,
            push_notifier,
        }
    }

    /// 处理一条入站信封。
    ///
    /// 处理失败（包括处理过程中 panic）时向发送方回复 `error`；
    /// 若错误是登录冲突，回复之后关闭该连接。本函数本身从不失败。
    pub async fn handle_message(&self, session: &Arc<ClientSession>, envelope: Envelope) {
        let original_type = envelope.message_type.clone();
        debug!(
            "[消息路由] {} -> '{}' (target={:?})",
            session.identity(),
            original_type,
            envelope.target
        );

        let outcome = AssertUnwindSafe(self.dispatch(session, envelope))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(RelayError::Internal(format!("处理 '{}' 时发生 panic", original_type)))
            });

        if let Err(err) = outcome {
            self.reply_error(session, Some(original_type), &err);
            if err.terminates_connection() {
                self.connection_manager.close_client(session, CloseReason::LoginRejected);
            }
        }
    }

    /// 无法解析为信封的帧：回复协议错误，连接保持打开。
    pub fn handle_malformed(&self, session: &Arc<ClientSession>, reason: &str) {
        self.reply_error(session, None, &RelayError::Protocol(reason.to_string()));
    }

    async fn dispatch(&self, session: &Arc<ClientSession>, envelope: Envelope) -> Result<(), RelayError> {
        let kind = envelope
            .kind()
            .ok_or_else(|| RelayError::Protocol(format!("未知的消息类型 '{}'", envelope.message_type)))?;

        if (kind.is_relay() || kind == MessageType::RegisterPush) && !session.is_identified() {
            return Err(RelayError::Auth(format!("发送 '{}' 之前需要先 login", kind)));
        }

        let message = ClientMessage::try_from(envelope).map_err(rejection_to_error)?;
        match message {
            ClientMessage::Login(payload) => self.handle_login(session, payload),
            ClientMessage::RegisterPush(payload) => self.handle_register_push(session, payload).await,
            ClientMessage::Relay(relay) => self.handle_relay(session, relay).await,
        }
    }

    fn handle_login(&self, session: &Arc<ClientSession>, payload: LoginPayload) -> Result<(), RelayError> {
        let user_id = payload.user_id.trim();
        if user_id.is_empty() {
            return Err(RelayError::Validation("login 需要非空的 userId".to_string()));
        }

        self.connection_manager.identify(session, user_id)?;
        reply(session, MessageType::LoginSuccess, &LoginSuccessPayload { user_id: user_id.to_string() })
    }

    async fn handle_register_push(
        &self,
        session: &Arc<ClientSession>,
        payload: RegisterPushPayload,
    ) -> Result<(), RelayError> {
        let user_id = require_user_id(session)?;
        let push_token = payload.push_token.trim();
        if push_token.is_empty() {
            return Err(RelayError::Validation("register_push 需要非空的 pushToken".to_string()));
        }

        self.push_store
            .save(&user_id, push_token)
            .await
            .map_err(RelayError::Dependency)?;
        info!("[消息路由] 已为 '{}' 登记推送令牌", user_id);
        reply(session, MessageType::PushRegistered, &PushRegisteredPayload { user_id })
    }

    async fn handle_relay(&self, session: &Arc<ClientSession>, relay: RelayMessage) -> Result<(), RelayError> {
        let sender_id = require_user_id(session)?;

        if let Some(target) = self.connection_manager.lookup(&relay.target) {
            let kind = relay.kind;
            let target_id = relay.target.clone();
            if let Err(e) = target.send(relay.into_forwarded(&sender_id)) {
                // 不重试，也不回复发送方
                warn!(
                    "[消息路由] 转发 {} 失败 ('{}' -> '{}'): {}",
                    kind, sender_id, target_id, e
                );
            } else {
                debug!("[消息路由] 已转发 {} ('{}' -> '{}')", kind, sender_id, target_id);
            }
            return Ok(());
        }

        let push_token = self
            .push_store
            .lookup(&relay.target)
            .await
            .map_err(RelayError::Dependency)?
            .ok_or_else(|| RelayError::UnreachableTarget(relay.target.clone()))?;

        self.push_notifier
            .notify(PushRequest {
                target_user_id: relay.target.clone(),
                push_token,
                sender_user_id: sender_id,
                message_type: relay.kind,
            })
            .await;

        reply(
            session,
            MessageType::Info,
            &InfoPayload {
                message: format!("'{}' 当前离线，已请求推送通知，消息未被投递", relay.target),
                target: Some(relay.target),
                push_required: true,
            },
        )
    }

    fn reply_error(&self, session: &ClientSession, original_type: Option<String>, err: &RelayError) {
        match err {
            RelayError::Dependency(source) => error!(
                "[消息路由] 处理 {} 的消息 ({:?}) 时外部依赖失败: {}",
                session.identity(),
                original_type,
                source
            ),
            RelayError::Internal(detail) => error!(
                "[消息路由] 处理 {} 的消息 ({:?}) 时发生内部错误: {}",
                session.identity(),
                original_type,
                detail
            ),
            other => info!(
                "[消息路由] 拒绝了来自 {} 的消息 ({:?}): {}",
                session.identity(),
                original_type,
                other
            ),
        }

        if let Err(e) = session.send(Envelope::error(original_type, err.to_string())) {
            warn!("[消息路由] 向 {} 发送错误回复失败: {}", session.identity(), e);
        }
    }
}

fn require_user_id(session: &ClientSession) -> Result<String, RelayError> {
    session
        .user_id()
        .map(str::to_string)
        .ok_or_else(|| RelayError::Auth("请先 login".to_string()))
}

fn reply<T: serde::Serialize>(session: &ClientSession, message_type: MessageType, payload: &T) -> Result<(), RelayError> {
    let envelope = Envelope::new(message_type, payload).map_err(|e| RelayError::Internal(e.to_string()))?;
    if let Err(e) = session.send(envelope) {
        warn!("[消息路由] 向 {1} 发送 {0} 失败: {2}", message_type, session.identity(), e);
    }
    Ok(())
}

fn rejection_to_error(rejection: MessageRejection) -> RelayError {
    match rejection {
        MessageRejection::UnknownType(name) => RelayError::Protocol(format!("未知的消息类型 '{}'", name)),
        MessageRejection::ServerOnlyType(t) => RelayError::Protocol(format!("'{}' 只能由服务端发送", t)),
        MessageRejection::InvalidPayload { message_type, reason } => {
            RelayError::Validation(format!("'{}' 的载荷不合法: {}", message_type, reason))
        }
        MessageRejection::MissingTarget(t) => RelayError::Validation(format!("'{}' 缺少 target", t)),
        MessageRejection::MissingPayload(t) => RelayError::Validation(format!("'{}' 缺少 payload", t)),
    }
}
