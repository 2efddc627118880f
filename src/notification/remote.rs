//! 告警历史服务客户端 - 查询与变更接口（Bearer Token 认证）
//!
//! | 操作 | 路径 | Body |
//! |---|---|---|
//! | 列表 | GET `/notifications?subscriber_id=...` | 无 |
//! | 已读 | POST `/notifications/mark-read` | `{id, subscriber_id}` |
//! | 关闭 | POST `/notifications/dismiss` | `{id, subscriber_id}` |
//! | 提示 | POST `/send-hint` | `{target_id, message, id}` |

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::alert::Alert;
use crate::config::CenterConfig;

/// 已读 / 关闭请求载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationRequest {
    pub id: String,
    pub subscriber_id: String,
}

/// 实时提示请求载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HintRequest {
    /// 接收提示的终端用户
    pub target_id: String,
    pub message: String,
    /// 触发提示的告警 id
    pub id: String,
}

/// 列表响应
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertPage {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub notifications: Vec<Alert>,
    #[serde(default)]
    pub unread_count: Option<usize>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

/// 变更接口的通用响应
#[derive(Debug, Deserialize)]
struct MutationResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default, alias = "message")]
    error: Option<String>,
}

/// 查询 / 变更契约
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list(&self, subscriber_id: &str) -> Result<AlertPage>;

    async fn mark_read(&self, id: &str, subscriber_id: &str) -> Result<()>;

    async fn dismiss(&self, id: &str, subscriber_id: &str) -> Result<()>;

    async fn send_hint(&self, request: &HintRequest) -> Result<()>;
}

/// HTTP 实现
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpRemote {
    /// 创建新的客户端
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            bail!("Invalid API base URL: {}", base_url);
        }

        let token = token.into();
        if token.is_empty() {
            warn!("No API token configured, requests will be unauthenticated");
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn from_config(config: &CenterConfig) -> Result<Self> {
        Self::new(
            config.api_base_url.clone(),
            config.api_token.clone(),
            config.request_timeout(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.token))
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let url = self.url(path);
        debug!(url = %url, "POST");

        let response = self
            .authorized(self.client.post(&url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("HTTP request failed: {}", url))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("{} returned {}: {}", url, status, text.trim());
        }

        if text.trim().is_empty() {
            return Ok(());
        }
        match serde_json::from_str::<MutationResponse>(&text) {
            Ok(parsed) if !parsed.success => Err(anyhow!(
                "{} rejected the request: {}",
                url,
                parsed.error.unwrap_or_else(|| "unknown error".to_string())
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn list(&self, subscriber_id: &str) -> Result<AlertPage> {
        let url = self.url("notifications");
        debug!(url = %url, subscriber_id = %subscriber_id, "GET");

        let response = self
            .authorized(self.client.get(&url))
            .query(&[("subscriber_id", subscriber_id)])
            .send()
            .await
            .with_context(|| format!("HTTP request failed: {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("{} returned {}: {}", url, status, text.trim());
        }

        let page: AlertPage = response
            .json()
            .await
            .context("Failed to parse notification list")?;
        if !page.success {
            bail!(
                "{} rejected the request: {}",
                url,
                page.error.clone().unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(page)
    }

    async fn mark_read(&self, id: &str, subscriber_id: &str) -> Result<()> {
        self.post(
            "notifications/mark-read",
            &MutationRequest {
                id: id.to_string(),
                subscriber_id: subscriber_id.to_string(),
            },
        )
        .await
    }

    async fn dismiss(&self, id: &str, subscriber_id: &str) -> Result<()> {
        self.post(
            "notifications/dismiss",
            &MutationRequest {
                id: id.to_string(),
                subscriber_id: subscriber_id.to_string(),
            },
        )
        .await
    }

    async fn send_hint(&self, request: &HintRequest) -> Result<()> {
        self.post("send-hint", request).await
    }
}
