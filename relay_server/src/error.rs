//! 服务端错误类型。
//!
//! `AppError` 只出现在启动阶段；`RelayError` 描述单条消息的处理失败，
//! 在路由边界被转换为 `error` 回复；`PushStoreError` 来自推送令牌存储。

use thiserror::Error;

/// 启动阶段的错误类型，在 `main` 中通过 `anyhow` 附加上下文后终止进程。
#[derive(Error, Debug)]
pub enum AppError {
    #[error("配置错误: {0}")]
    ConfigError(String),
}

/// 推送令牌存储（外部协作方）返回的错误。
#[derive(Error, Debug)]
pub enum PushStoreError {
    #[error("存储 I/O 失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("存储内容无法解析: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("存储已关闭")]
    Closed,
}

/// 消息路由过程中产生的错误。
///
/// 每一种错误都会在单条消息的分发边界被转换为发给原发送方的 `error` 回复，
/// 只有 `Conflict` 会导致（新的）连接被终止。
#[derive(Error, Debug)]
pub enum RelayError {
    /// 信封缺少必要字段或字段不合法，客户端可以修正后重发。
    #[error("校验错误: {0}")]
    Validation(String),

    /// 操作需要先登录。
    #[error("请先登录: {0}")]
    Auth(String),

    /// userId 已被另一个连接占用。
    #[error("userId '{0}' 已被其他连接占用")]
    Conflict(String),

    /// 目标既不在线也没有登记推送令牌。
    #[error("目标 '{0}' 不可达：不在线且未登记推送令牌")]
    UnreachableTarget(String),

    /// 外部存储失败。详情只写日志，不返回给客户端。
    #[error("服务器内部错误")]
    Dependency(#[source] PushStoreError),

    /// 未知的消息类型或无法解析的帧。
    #[error("协议错误: {0}")]
    Protocol(String),

    /// 其他意外失败（例如处理过程中 panic）。
    #[error("服务器内部错误")]
    Internal(String),
}

impl RelayError {
    /// 错误发生后是否需要终止发起请求的连接。
    pub fn terminates_connection(&self) -> bool {
        matches!(self, RelayError::Conflict(_))
    }
}
