use super::PushTokenStore;
use crate::error::PushStoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// 进程内的推送令牌存储，重启后数据丢失。
#[derive(Debug, Default)]
pub struct MemoryPushStore {
    tokens: DashMap<String, String>,
    closed: AtomicBool,
}

impl MemoryPushStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), PushStoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PushStoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl PushTokenStore for MemoryPushStore {
    async fn save(&self, user_id: &str, push_token: &str) -> Result<(), PushStoreError> {
        self.ensure_open()?;
        self.tokens.insert(user_id.to_string(), push_token.to_string());
        Ok(())
    }

    async fn lookup(&self, user_id: &str) -> Result<Option<String>, PushStoreError> {
        self.ensure_open()?;
        Ok(self.tokens.get(user_id).map(|entry| entry.value().clone()))
    }

    async fn close(&self) -> Result<(), PushStoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
