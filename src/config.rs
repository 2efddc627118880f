//! 配置加载
//!
//! 读取优先级（后者覆盖前者）：
//! 1. 默认值
//! 2. 配置文件 `~/.config/notification-center/config.json`
//! 3. 环境变量 `NC_API_URL` / `NC_WS_URL` / `NC_API_TOKEN` / `NC_SUBSCRIBER_ID`
//! 4. 命令行参数（由 CLI 处理）

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::notification::alert::Priority;

/// URL 模板中的订阅者占位符
pub const SUBSCRIBER_PLACEHOLDER: &str = "{subscriber_id}";

const DEFAULT_WS_URL_TEMPLATE: &str = "ws://localhost:8000/ws/professor/{subscriber_id}";
const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/professor";
const DEFAULT_HINT_MESSAGE: &str =
    "Your instructor sent you a hint. Take it step by step and think it through again!";

/// 告警中心配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CenterConfig {
    /// 推送通道 URL 模板
    pub ws_url_template: String,
    /// REST 接口基础 URL
    pub api_base_url: String,
    /// Bearer token（由外部签发）
    pub api_token: String,
    /// 订阅者身份
    pub subscriber_id: Option<String>,
    /// 断线重连间隔（秒）
    pub reconnect_delay_secs: u64,
    /// 存储容量
    pub capacity: usize,
    /// 请求超时（秒）
    pub request_timeout_secs: u64,
    /// 实时提示的默认文案
    pub hint_message: String,
    /// 已关闭告警的墓碑窗口（秒）
    pub tombstone_window_secs: u64,
    /// 是否启用桌面原生通知
    pub native_alerts: bool,
    /// 强制展开的最低优先级
    pub force_expand_threshold: Priority,
}

impl Default for CenterConfig {
    fn default() -> Self {
        Self {
            ws_url_template: DEFAULT_WS_URL_TEMPLATE.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: String::new(),
            subscriber_id: None,
            reconnect_delay_secs: 3,
            capacity: crate::notification::store::DEFAULT_CAPACITY,
            request_timeout_secs: 30,
            hint_message: DEFAULT_HINT_MESSAGE.to_string(),
            tombstone_window_secs: 600,
            native_alerts: false,
            force_expand_threshold: crate::notification::priority::DEFAULT_FORCE_EXPAND_THRESHOLD,
        }
    }
}

impl CenterConfig {
    /// 默认配置文件路径
    pub fn path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("notification-center")
            .join("config.json")
    }

    /// 从默认路径和环境变量加载
    pub fn auto_load() -> Result<Self> {
        Ok(Self::load_from(&Self::path())?.with_env_overrides())
    }

    /// 从指定文件加载，文件不存在时返回默认配置
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// 应用环境变量覆盖
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("NC_API_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = get("NC_WS_URL") {
            self.ws_url_template = url;
        }
        if let Some(token) = get("NC_API_TOKEN") {
            self.api_token = token;
        }
        if let Some(id) = get("NC_SUBSCRIBER_ID") {
            self.subscriber_id = Some(id);
        }
        self
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            bail!("capacity must be at least 1");
        }
        if !self.ws_url_template.starts_with("ws://") && !self.ws_url_template.starts_with("wss://") {
            bail!("Invalid WebSocket URL template: {}", self.ws_url_template);
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            bail!("Invalid API base URL: {}", self.api_base_url);
        }
        Ok(())
    }

    /// 订阅者 id（未配置时报错）
    pub fn require_subscriber(&self) -> Result<&str> {
        self.subscriber_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .context("No subscriber id configured (use --subscriber or NC_SUBSCRIBER_ID)")
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tombstone_window(&self) -> Duration {
        Duration::from_secs(self.tombstone_window_secs)
    }
}
