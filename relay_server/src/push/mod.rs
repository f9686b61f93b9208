//! 推送令牌存储与推送通知钩子。
//!
//! `PushTokenStore` 保存 userId → 推送令牌的映射，供目标离线时查询；
//! `PushNotifier` 在消息被延迟投递时被调用，实际的推送投递不在本服务范围内。

pub mod json_file;
pub mod memory;
pub mod notifier;

use crate::config::{PushStoreBackend, PushStoreConfig};
use crate::error::PushStoreError;
use async_trait::async_trait;
use log::info;
use std::sync::Arc;

pub use json_file::JsonFilePushStore;
pub use memory::MemoryPushStore;
pub use notifier::{LoggingPushNotifier, PushNotifier, PushRequest};

/// 推送令牌存储。
///
/// 同一个 userId 再次保存时覆盖旧令牌。`close` 之后的调用返回 `PushStoreError::Closed`。
#[async_trait]
pub trait PushTokenStore: Send + Sync {
    async fn save(&self, user_id: &str, push_token: &str) -> Result<(), PushStoreError>;

    async fn lookup(&self, user_id: &str) -> Result<Option<String>, PushStoreError>;

    async fn close(&self) -> Result<(), PushStoreError>;
}

/// 按配置打开推送令牌存储。打开失败对启动是致命的。
pub async fn open_store(config: &PushStoreConfig) -> Result<Arc<dyn PushTokenStore>, PushStoreError> {
    match config.backend {
        PushStoreBackend::Memory => {
            info!("[推送存储] 使用内存推送令牌存储");
            Ok(Arc::new(MemoryPushStore::new()))
        }
        PushStoreBackend::JsonFile => {
            let store = JsonFilePushStore::open(&config.path).await?;
            Ok(Arc::new(store))
        }
    }
}

/// 日志中只显示令牌的前 4 个字符。
pub(crate) fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    if token.chars().count() > 4 {
        format!("{}***", prefix)
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("abcdef123"), "abcd***");
        assert_eq!(mask_token("abc"), "***");
    }

    #[tokio::test]
    async fn test_open_store_json_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = PushStoreConfig {
            backend: PushStoreBackend::JsonFile,
            path: dir.path().join("tokens.json"),
        };
        let store = open_store(&config).await.unwrap();
        store.save("alice", "tok-a").await.unwrap();
        assert_eq!(store.lookup("alice").await.unwrap().as_deref(), Some("tok-a"));
        store.close().await.unwrap();
    }
}
