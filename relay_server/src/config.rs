//! 应用配置的加载与校验。
//!
//! 配置以 JSON 文件形式保存（默认 `relay_settings.json`，可通过环境变量 `RELAY_CONFIG` 指定路径），
//! 文件中缺失的字段使用默认值。监听地址还可以被环境变量 `RELAY_HOST` / `PORT` 覆盖。

use crate::error::AppError;
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// WebSocket 服务的默认主机地址
pub const DEFAULT_WS_HOST: &str = "0.0.0.0";
/// WebSocket 服务的默认端口号
pub const DEFAULT_WS_PORT: u16 = 8088;
/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "relay_settings.json";

/// WebSocket 服务端详细配置结构体
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// WebSocket 服务绑定的主机地址
    pub host: String,
    /// WebSocket 服务监听的端口号
    pub port: u16,
    /// 心跳探测的间隔时间（单位：秒）。连续两次探测无应答的连接会被回收。
    pub heartbeat_interval_seconds: u64,
    /// 每个连接出站队列的容量
    pub outbound_buffer: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_WS_HOST.to_string(),
            port: DEFAULT_WS_PORT,
            heartbeat_interval_seconds: 30,
            outbound_buffer: 64,
        }
    }
}

/// 推送令牌存储的后端类型
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PushStoreBackend {
    /// 进程内存，重启后丢失
    #[default]
    Memory,
    /// 持久化到 JSON 文件
    JsonFile,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PushStoreConfig {
    pub backend: PushStoreBackend,
    /// 仅 `json_file` 后端使用
    pub path: PathBuf,
}

impl Default for PushStoreConfig {
    fn default() -> Self {
        Self {
            backend: PushStoreBackend::Memory,
            path: PathBuf::from("push_tokens.json"),
        }
    }
}

/// 应用的主配置结构体
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub websocket: WebSocketConfig,
    pub push_store: PushStoreConfig,
    /// 优雅停机的总时限（单位：秒），超时后进程直接退出
    pub shutdown_timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            websocket: WebSocketConfig::default(),
            push_store: PushStoreConfig::default(),
            shutdown_timeout_seconds: 10,
        }
    }
}

impl AppConfig {
    /// 从指定文件加载配置。文件不存在时返回默认配置；文件存在但无法解析则返回错误。
    pub fn load_from(path: &Path) -> Result<AppConfig, AppError> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let config = serde_json::from_str::<AppConfig>(&content).map_err(|e| {
                    AppError::ConfigError(format!("配置文件 {:?} 解析失败: {}", path, e))
                })?;
                info!("[配置模块] 已从 {:?} 加载配置", path);
                Ok(config)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("[配置模块] 未找到配置文件 {:?}，使用默认配置", path);
                Ok(AppConfig::default())
            }
            Err(e) => Err(AppError::ConfigError(format!("读取配置文件 {:?} 失败: {}", path, e))),
        }
    }

    /// 用环境变量覆盖监听地址。`port` 无法解析为端口号时返回错误。
    pub fn apply_env_overrides(&mut self, host: Option<String>, port: Option<String>) -> Result<(), AppError> {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            self.websocket.host = host;
        }
        if let Some(port) = port {
            self.websocket.port = port
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("PORT '{}' 不是合法端口号: {}", port, e)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.websocket.host.trim().is_empty() {
            return Err(AppError::ConfigError("websocket.host 不能为空".to_string()));
        }
        if self.websocket.heartbeat_interval_seconds == 0 {
            return Err(AppError::ConfigError("websocket.heartbeat_interval_seconds 必须大于 0".to_string()));
        }
        if self.websocket.outbound_buffer == 0 {
            return Err(AppError::ConfigError("websocket.outbound_buffer 必须大于 0".to_string()));
        }
        if self.shutdown_timeout_seconds == 0 {
            return Err(AppError::ConfigError("shutdown_timeout_seconds 必须大于 0".to_string()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.websocket.host, self.websocket.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.websocket.heartbeat_interval_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

/// 按环境变量定位并加载配置，应用覆盖并校验。
pub fn load() -> Result<AppConfig, AppError> {
    let path = env::var_os("RELAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = AppConfig::load_from(&path)?;
    config.apply_env_overrides(env::var("RELAY_HOST").ok(), env::var("PORT").ok())?;
    config.validate()?;
    Ok(config)
}
