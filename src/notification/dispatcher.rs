//! 动作分发器 - 把用户动作转换为本地乐观更新 + 一次远端变更
//!
//! 远端调用在独立任务中执行，完成后把 [`RemoteCompletion`] 投递回中心队列；
//! 存储永远不会跨 `.await` 持有。远端失败只记录日志，不回滚本地状态。

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::alert::{record_hint_sent, ActionKind, Alert, AlertAction, AlertStatus};
use super::lifecycle::{can_transition, ExpiryTimers};
use super::remote::{AlertPage, HintRequest, RemoteApi};
use super::store::NotificationStore;

/// 宿主侧的动作观察者，在内置处理之前看到每一个动作
pub trait ActionHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_action(&self, action: &AlertAction, alert: &Alert);
}

/// `view_detail` 返回给宿主的导航目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationTarget {
    pub alert_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub opens_modal: bool,
}

/// 分发结果
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// `changed` 为 false 表示之前已经确认过
    Acknowledged { changed: bool },
    Dismissed { removed: Option<Alert> },
    Navigate(NavigationTarget),
    /// 已发出提示请求，成功后才会标记 `hint_sent`
    HintRequested,
    /// 未知动作，只交给了宿主 hook
    Forwarded,
    Skipped(String),
}

/// 远端变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    MarkRead,
    Dismiss,
    SendHint,
}

impl RemoteOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteOp::MarkRead => "mark-read",
            RemoteOp::Dismiss => "dismiss",
            RemoteOp::SendHint => "send-hint",
        }
    }
}

/// 远端调用完成事件
#[derive(Debug, Clone)]
pub enum RemoteCompletion {
    Mutation {
        op: RemoteOp,
        alert_id: String,
        result: Result<(), String>,
    },
    Listed(Result<AlertPage, String>),
}

/// 动作分发器
pub struct ActionDispatcher {
    remote: Arc<dyn RemoteApi>,
    subscriber_id: String,
    hint_message: String,
    hooks: Vec<Arc<dyn ActionHook>>,
    completions: mpsc::UnboundedSender<RemoteCompletion>,
}

impl ActionDispatcher {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        subscriber_id: impl Into<String>,
        completions: mpsc::UnboundedSender<RemoteCompletion>,
    ) -> Self {
        Self {
            remote,
            subscriber_id: subscriber_id.into(),
            hint_message: crate::config::CenterConfig::default().hint_message,
            hooks: Vec::new(),
            completions,
        }
    }

    pub fn with_hint_message(mut self, message: impl Into<String>) -> Self {
        self.hint_message = message.into();
        self
    }

    /// 注册动作 hook
    pub fn register_hook(&mut self, hook: Arc<dyn ActionHook>) {
        info!(hook = hook.name(), "Registering action hook");
        self.hooks.push(hook);
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// 对指定告警执行动作
    pub fn dispatch(
        &self,
        action: &AlertAction,
        alert_id: &str,
        store: &mut NotificationStore,
        timers: &mut ExpiryTimers,
    ) -> Result<DispatchOutcome> {
        let alert = store
            .get(alert_id)
            .ok_or_else(|| anyhow!("alert not found: {}", alert_id))?;

        for hook in &self.hooks {
            hook.on_action(action, alert);
        }

        debug!(alert_id = %alert_id, action = %action.kind.as_str(), "Dispatching action");
        let outcome = match &action.kind {
            ActionKind::MarkAsReviewed => {
                let changed = can_transition(alert.status, AlertStatus::Acknowledged)
                    && store.update_status(alert_id, AlertStatus::Acknowledged)
                        == Some(AlertStatus::Unread);
                self.spawn_mark_read(alert_id);
                DispatchOutcome::Acknowledged { changed }
            }
            ActionKind::DismissNotification => {
                timers.cancel(alert_id);
                let removed = store.remove(alert_id).map(|mut alert| {
                    alert.status = AlertStatus::Dismissed;
                    alert
                });
                self.spawn_dismiss(alert_id);
                DispatchOutcome::Dismissed { removed }
            }
            ActionKind::ViewDetail => DispatchOutcome::Navigate(NavigationTarget {
                alert_id: alert_id.to_string(),
                url: action.url.clone(),
                opens_modal: action.opens_modal,
            }),
            ActionKind::SendRealtimeHint => match alert.target_identity() {
                Some(target_id) => {
                    let request = HintRequest {
                        target_id: target_id.to_string(),
                        message: self.hint_message.clone(),
                        id: alert_id.to_string(),
                    };
                    let remote = Arc::clone(&self.remote);
                    self.spawn_mutation(RemoteOp::SendHint, alert_id, async move {
                        remote.send_hint(&request).await
                    });
                    DispatchOutcome::HintRequested
                }
                None => {
                    warn!(alert_id = %alert_id, "Cannot send hint: alert has no target identity");
                    DispatchOutcome::Skipped("alert has no target identity".to_string())
                }
            },
            ActionKind::Other(kind) => {
                debug!(alert_id = %alert_id, action = %kind, "Unknown action forwarded to hooks");
                DispatchOutcome::Forwarded
            }
        };

        Ok(outcome)
    }

    /// 拉取已有告警列表，结果以 `RemoteCompletion::Listed` 返回
    pub fn refresh(&self) {
        let remote = Arc::clone(&self.remote);
        let subscriber_id = self.subscriber_id.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = remote
                .list(&subscriber_id)
                .await
                .map_err(|e| format!("{:#}", e));
            let _ = completions.send(RemoteCompletion::Listed(result));
        });
    }

    /// 应用远端完成结果，返回存储是否被修改
    pub fn apply_completion(&self, completion: &RemoteCompletion, store: &mut NotificationStore) -> bool {
        match completion {
            RemoteCompletion::Mutation {
                op,
                alert_id,
                result: Ok(()),
            } => {
                debug!(alert_id = %alert_id, op = op.as_str(), "Remote mutation confirmed");
                match op {
                    RemoteOp::SendHint => {
                        let now = Utc::now();
                        store.update_metadata(alert_id, |metadata| record_hint_sent(metadata, now))
                    }
                    RemoteOp::MarkRead | RemoteOp::Dismiss => false,
                }
            }
            RemoteCompletion::Mutation {
                op,
                alert_id,
                result: Err(e),
            } => {
                // 不回滚乐观更新，下一次同步前未读数可能不准
                warn!(alert_id = %alert_id, op = op.as_str(), error = %e, "Remote mutation failed");
                false
            }
            RemoteCompletion::Listed(_) => false,
        }
    }

    fn spawn_mark_read(&self, alert_id: &str) {
        let remote = Arc::clone(&self.remote);
        let subscriber_id = self.subscriber_id.clone();
        let id = alert_id.to_string();
        self.spawn_mutation(RemoteOp::MarkRead, alert_id, async move {
            remote.mark_read(&id, &subscriber_id).await
        });
    }

    fn spawn_dismiss(&self, alert_id: &str) {
        let remote = Arc::clone(&self.remote);
        let subscriber_id = self.subscriber_id.clone();
        let id = alert_id.to_string();
        self.spawn_mutation(RemoteOp::Dismiss, alert_id, async move {
            remote.dismiss(&id, &subscriber_id).await
        });
    }

    /// 过期移除同样通知远端
    pub fn notify_expired(&self, alert_id: &str) {
        self.spawn_dismiss(alert_id);
    }

    fn spawn_mutation<F>(&self, op: RemoteOp, alert_id: &str, call: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let completions = self.completions.clone();
        let alert_id = alert_id.to_string();
        tokio::spawn(async move {
            let result = call.await.map_err(|e| format!("{:#}", e));
            let _ = completions.send(RemoteCompletion::Mutation {
                op,
                alert_id,
                result,
            });
        });
    }
}
