// common_models/src/ws_payloads.rs

//! 包含信令中继 WebSocket 通信中使用的各种 Payload 结构体定义。
//!
//! 字段名在线上使用 camelCase（例如 `userId`、`pushToken`），与客户端约定一致。
//! 中继族消息 (offer/answer/candidate/message_request) 的载荷是自由格式的 JSON，
//! 服务端原样转发，因此这里没有为它们定义结构体。

use serde::{Deserialize, Serialize};

/// `login` 载荷：客户端声明的用户标识。
///
/// `user_id` 缺失时反序列化为空字符串，由路由层统一按校验错误处理。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    #[serde(default)]
    pub user_id: String,
}

/// `login_success` 载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginSuccessPayload {
    pub user_id: String,
}

/// `register_push` 载荷：需要保存的推送令牌。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPushPayload {
    #[serde(default)]
    pub push_token: String,
}

/// `push_registered` 载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushRegisteredPayload {
    pub user_id: String,
}

/// `error` 载荷。引发错误的原始消息类型放在信封的 `originalType` 字段上。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponsePayload {
    pub message: String,
}

/// `user_left` 载荷：离线用户的标识。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserLeftPayload {
    pub user_id: String,
}

/// `info` 载荷。
///
/// 目前仅用于"目标离线但已登记推送令牌"的情形：消息未被投递，需要推送唤醒。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InfoPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub push_required: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_login_payload_uses_camel_case_user_id() {
        let payload: LoginPayload = serde_json::from_value(json!({ "userId": "alice" })).unwrap();
        assert_eq!(payload.user_id, "alice");

        // 缺失字段时退化为空字符串，交给上层校验
        let payload: LoginPayload = serde_json::from_value(json!({})).unwrap();
        assert!(payload.user_id.is_empty());

        // 类型错误仍然是反序列化错误
        assert!(serde_json::from_value::<LoginPayload>(json!({ "userId": 42 })).is_err());
    }

    #[test]
    fn test_info_payload_shape() {
        let info = InfoPayload {
            message: "bob 当前离线，需要推送通知".to_string(),
            target: Some("bob".to_string()),
            push_required: true,
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["target"], "bob");
        assert_eq!(value["pushRequired"], true);

        let without_target = InfoPayload { target: None, ..info };
        let value = serde_json::to_value(&without_target).unwrap();
        assert!(value.get("target").is_none());
    }

    #[test]
    fn test_register_push_payload_field_name() {
        let payload = RegisterPushPayload { push_token: "tok-1".to_string() };
        assert_eq!(serde_json::to_value(&payload).unwrap(), json!({ "pushToken": "tok-1" }));
    }
}
