//! 基于 JSON 文件的推送令牌存储。
//!
//! 启动时整体读入内存，每次登记后先写临时文件再原子重命名。写盘失败时回滚内存中的修改，
//! 保证内存与文件内容一致。`close` 之后的任何操作都返回 `PushStoreError::Closed`。

use super::PushTokenStore;
use crate::error::PushStoreError;
use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// 持久化到 JSON 文件的推送令牌存储。
///
/// 每次 `save` 都把完整映射写入临时文件后 rename 覆盖目标文件，
/// 写入失败时内存中的映射回滚到保存前的状态。
#[derive(Debug)]
pub struct JsonFilePushStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    tokens: HashMap<String, String>,
    closed: bool,
}

impl JsonFilePushStore {
    /// 打开存储。文件不存在时从空映射开始；文件存在但无法读取或解析时返回错误。
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PushStoreError> {
        let path = path.as_ref().to_path_buf();
        let tokens = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => HashMap::new(),
            Ok(content) => serde_json::from_str::<HashMap<String, String>>(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(
            "[推送存储] 已打开 JSON 文件存储 {:?}，共 {} 条登记",
            path,
            tokens.len()
        );
        Ok(Self {
            path,
            inner: Mutex::new(Inner { tokens, closed: false }),
        })
    }

    async fn persist(&self, tokens: &HashMap<String, String>) -> Result<(), PushStoreError> {
        let json = serde_json::to_string_pretty(tokens)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl PushTokenStore for JsonFilePushStore {
    async fn save(&self, user_id: &str, push_token: &str) -> Result<(), PushStoreError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(PushStoreError::Closed);
        }
        let previous = inner.tokens.insert(user_id.to_string(), push_token.to_string());
        if let Err(e) = self.persist(&inner.tokens).await {
            warn!("[推送存储] 持久化 '{}' 的推送令牌失败: {}", user_id, e);
            match previous {
                Some(old) => inner.tokens.insert(user_id.to_string(), old),
                None => inner.tokens.remove(user_id),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn lookup(&self, user_id: &str) -> Result<Option<String>, PushStoreError> {
        let inner = self.inner.lock().await;
        if inner.closed {
            return Err(PushStoreError::Closed);
        }
        Ok(inner.tokens.get(user_id).cloned())
    }

    async fn close(&self) -> Result<(), PushStoreError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        self.persist(&inner.tokens).await?;
        info!("[推送存储] JSON 文件存储 {:?} 已落盘并关闭", self.path);
        Ok(())
    }
}
