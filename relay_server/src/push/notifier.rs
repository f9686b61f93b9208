use super::mask_token;
use async_trait::async_trait;
use common_models::enums::MessageType;
use log::info;

/// 一次推送唤醒请求：目标离线，但登记过推送令牌。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    pub target_user_id: String,
    pub push_token: String,
    pub sender_user_id: String,
    pub message_type: MessageType,
}

/// 推送通知钩子。
///
/// 投递结果不会反馈给发送方，实现应自行记录失败。
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn notify(&self, request: PushRequest);
}

/// 只写日志的推送钩子。
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPushNotifier;

#[async_trait]
impl PushNotifier for LoggingPushNotifier {
    async fn notify(&self, request: PushRequest) {
        info!(
            "[推送通知] 需要推送: '{0}' 不在线，来自 '{2}' 的 {1} 未投递 (令牌 {3})",
            request.target_user_id,
            request.message_type,
            request.sender_user_id,
            mask_token(&request.push_token)
        );
    }
}
