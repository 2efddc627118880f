//! 告警中心 - 单一串行事件循环
//!
//! 通道消息、定时器触发、远端完成结果和宿主命令都是离散事件，
//! 由同一个任务依次处理，存储不会被并发修改。观察者通过 broadcast
//! 订阅 [`CenterEvent`]，连接状态通过 watch 暴露。

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::alert::{ActionKind, Alert, AlertAction, AlertStatus};
use super::channel::{DisabledNotifier, NativeNotifier, Permission, SendResult};
use super::channels::CommandNotifier;
use super::connection::{
    ChannelEvent, ChannelEventKind, ChannelManager, ConnectionState, Connector, WsConnector,
};
use super::deduplicator::DismissedIds;
use super::dispatcher::{
    ActionDispatcher, ActionHook, DispatchOutcome, NavigationTarget, RemoteCompletion,
};
use super::lifecycle::{Expired, ExpiryTimers};
use super::priority::PriorityPolicy;
use super::remote::{AlertPage, HttpRemote, RemoteApi};
use super::store::{InsertOutcome, NotificationStore, StoreStats};
use crate::config::CenterConfig;

const EVENT_BUFFER: usize = 256;

/// 告警被移除的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Dismissed,
    Expired,
    Evicted,
    Cleared,
}

/// 发给观察者的变更通知
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CenterEvent {
    AlertAdded { alert: Alert },
    AlertUpdated { alert: Alert },
    AlertRemoved { id: String, reason: RemovalReason },
    /// 列表应强制展开
    ForceExpand { id: String },
    NativeAlertEmitted { id: String },
    ExpandedChanged { expanded: bool },
    UnreadChanged { count: usize },
    ConnectionChanged { state: ConnectionState },
    Navigate { target: NavigationTarget },
    /// 非告警类型的推送，原样转交
    Foreign { kind: String, payload: serde_json::Value },
    Synced { inserted: usize, server_unread: Option<usize> },
}

enum ActionRef {
    Id(String),
    Action(AlertAction),
}

enum Command {
    Dispatch {
        alert_id: String,
        action: ActionRef,
        reply: oneshot::Sender<Result<DispatchOutcome>>,
    },
    MarkAllRead {
        reply: oneshot::Sender<usize>,
    },
    Clear {
        reply: oneshot::Sender<usize>,
    },
    Refresh,
    Snapshot {
        reply: oneshot::Sender<Vec<Alert>>,
    },
    Get {
        id: String,
        reply: oneshot::Sender<Option<Alert>>,
    },
    UnreadCount {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<StoreStats>,
    },
    Expanded {
        reply: oneshot::Sender<bool>,
    },
    SetExpanded {
        expanded: bool,
    },
    Connect,
    Disconnect,
    Shutdown,
}

/// 宿主入口（可克隆）
#[derive(Clone)]
pub struct CenterHandle {
    subscriber_id: String,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<CenterEvent>,
    state: watch::Receiver<ConnectionState>,
}

impl CenterHandle {
    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("alert center is not running"))
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx))?;
        rx.await.context("alert center stopped before replying")
    }

    /// 执行告警上携带的动作
    pub async fn dispatch(&self, alert_id: &str, action_id: &str) -> Result<DispatchOutcome> {
        self.request(|reply| Command::Dispatch {
            alert_id: alert_id.to_string(),
            action: ActionRef::Id(action_id.to_string()),
            reply,
        })
        .await?
    }

    /// 执行任意动作（不要求告警上携带）
    pub async fn dispatch_action(&self, alert_id: &str, action: AlertAction) -> Result<DispatchOutcome> {
        self.request(|reply| Command::Dispatch {
            alert_id: alert_id.to_string(),
            action: ActionRef::Action(action),
            reply,
        })
        .await?
    }

    pub async fn dismiss(&self, alert_id: &str) -> Result<DispatchOutcome> {
        self.dispatch_action(alert_id, AlertAction::bare(ActionKind::DismissNotification))
            .await
    }

    pub async fn mark_read(&self, alert_id: &str) -> Result<DispatchOutcome> {
        self.dispatch_action(alert_id, AlertAction::bare(ActionKind::MarkAsReviewed))
            .await
    }

    /// 全部标记已读，返回实际变化的数量
    pub async fn mark_all_read(&self) -> Result<usize> {
        self.request(|reply| Command::MarkAllRead { reply }).await
    }

    /// 清空本地列表，返回移除数量
    pub async fn clear(&self) -> Result<usize> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// 从远端重新拉取列表
    pub fn refresh(&self) -> Result<()> {
        self.send(Command::Refresh)
    }

    pub async fn snapshot(&self) -> Result<Vec<Alert>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Alert>> {
        self.request(|reply| Command::Get {
            id: id.to_string(),
            reply,
        })
        .await
    }

    pub async fn unread_count(&self) -> Result<usize> {
        self.request(|reply| Command::UnreadCount { reply }).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    pub async fn expanded(&self) -> Result<bool> {
        self.request(|reply| Command::Expanded { reply }).await
    }

    pub fn set_expanded(&self, expanded: bool) -> Result<()> {
        self.send(Command::SetExpanded { expanded })
    }

    pub fn connect(&self) -> Result<()> {
        self.send(Command::Connect)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// 订阅变更通知
    pub fn subscribe(&self) -> broadcast::Receiver<CenterEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

/// 告警中心构建器
pub struct CenterBuilder {
    config: CenterConfig,
    subscriber_id: String,
    connector: Option<Arc<dyn Connector>>,
    remote: Option<Arc<dyn RemoteApi>>,
    notifier: Option<Arc<dyn NativeNotifier>>,
    hooks: Vec<Arc<dyn ActionHook>>,
}

impl CenterBuilder {
    pub fn new(subscriber_id: impl Into<String>) -> Self {
        Self {
            config: CenterConfig::default(),
            subscriber_id: subscriber_id.into(),
            connector: None,
            remote: None,
            notifier: None,
            hooks: Vec::new(),
        }
    }

    pub fn config(mut self, config: CenterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteApi>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NativeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn ActionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// 构建中心，未指定的组件按配置创建
    pub fn build(self) -> Result<(AlertCenter, CenterHandle)> {
        let config = self.config;
        config.validate()?;

        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WsConnector::from_config(&config)),
        };
        let remote = match self.remote {
            Some(remote) => remote,
            None => Arc::new(HttpRemote::from_config(&config)?),
        };
        let notifier: Arc<dyn NativeNotifier> = match self.notifier {
            Some(notifier) => notifier,
            None if config.native_alerts => Arc::new(CommandNotifier::detect()),
            None => Arc::new(DisabledNotifier),
        };

        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let mut channels = ChannelManager::new(connector, config.reconnect_delay(), channel_tx);
        let state = channels.watch_state(&self.subscriber_id);

        let mut dispatcher = ActionDispatcher::new(remote, self.subscriber_id.clone(), completion_tx)
            .with_hint_message(config.hint_message.clone());
        for hook in self.hooks {
            dispatcher.register_hook(hook);
        }

        let center = AlertCenter {
            subscriber_id: self.subscriber_id.clone(),
            store: NotificationStore::with_capacity(config.capacity),
            timers: ExpiryTimers::new(expired_tx),
            dismissed: DismissedIds::new().with_window(config.tombstone_window()),
            policy: PriorityPolicy::new().with_threshold(config.force_expand_threshold),
            permission: notifier.permission(),
            notifier,
            dispatcher,
            channels,
            expanded: false,
            last_unread: 0,
            events: events.clone(),
            channel_rx,
            expired_rx,
            completion_rx,
            commands: command_rx,
            cancel: CancellationToken::new(),
        };
        let handle = CenterHandle {
            subscriber_id: self.subscriber_id,
            commands: command_tx,
            events,
            state,
        };
        Ok((center, handle))
    }
}

/// 告警中心：拥有全部可变状态
pub struct AlertCenter {
    subscriber_id: String,
    store: NotificationStore,
    timers: ExpiryTimers,
    dismissed: DismissedIds,
    policy: PriorityPolicy,
    notifier: Arc<dyn NativeNotifier>,
    permission: Permission,
    dispatcher: ActionDispatcher,
    channels: ChannelManager,
    expanded: bool,
    last_unread: usize,
    events: broadcast::Sender<CenterEvent>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    expired_rx: mpsc::UnboundedReceiver<Expired>,
    completion_rx: mpsc::UnboundedReceiver<RemoteCompletion>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
}

impl AlertCenter {
    pub fn builder(subscriber_id: impl Into<String>) -> CenterBuilder {
        CenterBuilder::new(subscriber_id)
    }

    /// 外部停止信号
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 在新任务中运行
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// 事件循环，直到 shutdown、取消或所有 handle 被释放
    pub async fn run(mut self) {
        if self.permission == Permission::Default {
            self.permission = self.notifier.request_permission();
            debug!(notifier = self.notifier.name(), permission = ?self.permission, "Native alert permission resolved");
        }
        info!(subscriber_id = %self.subscriber_id, "Alert center started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(event) = self.channel_rx.recv() => self.on_channel_event(event),
                Some(fired) = self.expired_rx.recv() => self.on_expired(fired),
                Some(done) = self.completion_rx.recv() => self.on_completion(done),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }

        self.channels.disconnect_all();
        self.timers.cancel_all();
        info!(subscriber_id = %self.subscriber_id, "Alert center stopped");
    }

    fn publish(&self, event: CenterEvent) {
        // 没有观察者时发送失败是正常的
        let _ = self.events.send(event);
    }

    fn publish_unread(&mut self) {
        let count = self.store.unread_count();
        if count != self.last_unread {
            self.last_unread = count;
            self.publish(CenterEvent::UnreadChanged { count });
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        if !self.channels.is_current(&event.subscriber_id, event.epoch) {
            debug!(subscriber_id = %event.subscriber_id, epoch = event.epoch, "Dropping event from stale channel");
            return;
        }

        match event.kind {
            ChannelEventKind::Message(alert) => self.ingest(alert),
            ChannelEventKind::Foreign { kind, payload } => {
                self.publish(CenterEvent::Foreign { kind, payload });
            }
            ChannelEventKind::Status(state) => {
                self.publish(CenterEvent::ConnectionChanged { state });
                if state == ConnectionState::Connected {
                    self.dispatcher.refresh();
                }
            }
        }
    }

    /// 推送到达的新告警：插入、评估优先级策略、挂载定时器
    fn ingest(&mut self, alert: Alert) {
        let Some(alert) = self.insert(alert) else {
            return;
        };

        let decision = self.policy.evaluate(&alert, self.permission);
        if decision.force_expand {
            info!(alert_id = %alert.id, priority = %alert.priority, "Force expanding alert list");
            self.expanded = true;
            self.publish(CenterEvent::ForceExpand {
                id: alert.id.clone(),
            });
        }
        if let Some(native) = decision.native_alert {
            match self.notifier.notify(&native) {
                Ok(SendResult::Sent) => self.publish(CenterEvent::NativeAlertEmitted {
                    id: alert.id.clone(),
                }),
                Ok(SendResult::Skipped(reason)) => {
                    debug!(alert_id = %alert.id, reason = %reason, "Native alert skipped");
                }
                Ok(SendResult::Failed(e)) => {
                    warn!(alert_id = %alert.id, error = %e, "Native alert failed");
                }
                Err(e) => {
                    warn!(alert_id = %alert.id, error = %e, "Native alert failed");
                }
            }
        }
        self.publish_unread();
    }

    /// 插入存储并挂载定时器，返回新插入的告警
    fn insert(&mut self, alert: Alert) -> Option<Alert> {
        if self.dismissed.contains(&alert.id) {
            debug!(alert_id = %alert.id, "Ignoring alert dismissed earlier");
            return None;
        }
        if alert.status == AlertStatus::Dismissed {
            debug!(alert_id = %alert.id, "Ignoring alert already dismissed upstream");
            return None;
        }

        match self.store.insert(alert.clone()) {
            InsertOutcome::Inserted { evicted } => {
                if let Some(after) = alert.timing.auto_dismiss_after() {
                    self.timers.arm(&alert.id, after);
                }
                self.publish(CenterEvent::AlertAdded {
                    alert: alert.clone(),
                });
                if let Some(old) = evicted {
                    self.timers.cancel(&old.id);
                    self.publish(CenterEvent::AlertRemoved {
                        id: old.id,
                        reason: RemovalReason::Evicted,
                    });
                }
                Some(alert)
            }
            InsertOutcome::Duplicate | InsertOutcome::Stale => None,
        }
    }

    fn on_expired(&mut self, fired: Expired) {
        if !self.timers.take_fired(&fired) {
            return;
        }
        if self.store.update_status(&fired.id, AlertStatus::Dismissed).is_none() {
            return;
        }

        info!(alert_id = %fired.id, "Alert expired");
        if let Some(alert) = self.store.get(&fired.id).cloned() {
            self.publish(CenterEvent::AlertUpdated { alert });
        }
        self.store.remove(&fired.id);
        self.dismissed.remember(&fired.id);
        self.dispatcher.notify_expired(&fired.id);
        self.publish(CenterEvent::AlertRemoved {
            id: fired.id,
            reason: RemovalReason::Expired,
        });
        self.publish_unread();
    }

    fn on_completion(&mut self, completion: RemoteCompletion) {
        match completion {
            RemoteCompletion::Listed(Ok(page)) => self.sync(page),
            RemoteCompletion::Listed(Err(e)) => {
                warn!(subscriber_id = %self.subscriber_id, error = %e, "Failed to list alerts");
            }
            mutation => {
                if self.dispatcher.apply_completion(&mutation, &mut self.store) {
                    if let RemoteCompletion::Mutation { alert_id, .. } = &mutation {
                        if let Some(alert) = self.store.get(alert_id).cloned() {
                            self.publish(CenterEvent::AlertUpdated { alert });
                        }
                    }
                }
            }
        }
    }

    /// 批量载入已有告警（不触发优先级副作用）
    ///
    /// 本地已有的告警只以服务端状态为准修正 `status`，其余字段保持不变
    fn sync(&mut self, page: AlertPage) {
        let total = page.notifications.len();
        let mut inserted = 0;
        let mut reconciled = 0;
        for alert in page.notifications {
            if self.store.contains(&alert.id) {
                if self.reconcile(&alert.id, alert.status) {
                    reconciled += 1;
                }
            } else if self.insert(alert).is_some() {
                inserted += 1;
            }
        }

        info!(
            subscriber_id = %self.subscriber_id,
            total,
            inserted,
            reconciled,
            server_unread = ?page.unread_count,
            "Alert list synced"
        );
        self.publish(CenterEvent::Synced {
            inserted,
            server_unread: page.unread_count,
        });
        self.publish_unread();
    }

    /// 用服务端状态修正本地告警，返回是否有变化
    fn reconcile(&mut self, id: &str, status: AlertStatus) -> bool {
        if status == AlertStatus::Dismissed {
            self.timers.cancel(id);
            if self.store.remove(id).is_none() {
                return false;
            }
            debug!(alert_id = %id, "Alert dismissed upstream");
            self.dismissed.remember(id);
            self.publish(CenterEvent::AlertRemoved {
                id: id.to_string(),
                reason: RemovalReason::Dismissed,
            });
            return true;
        }

        match self.store.update_status(id, status) {
            Some(previous) if previous != status => {
                debug!(alert_id = %id, from = %previous, to = %status, "Alert status corrected by sync");
                if let Some(alert) = self.store.get(id).cloned() {
                    self.publish(CenterEvent::AlertUpdated { alert });
                }
                true
            }
            _ => false,
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Dispatch {
                alert_id,
                action,
                reply,
            } => {
                let _ = reply.send(self.dispatch(&alert_id, action));
            }
            Command::MarkAllRead { reply } => {
                let _ = reply.send(self.mark_all_read());
            }
            Command::Clear { reply } => {
                let _ = reply.send(self.clear());
            }
            Command::Refresh => self.dispatcher.refresh(),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.store.snapshot());
            }
            Command::Get { id, reply } => {
                let _ = reply.send(self.store.get(&id).cloned());
            }
            Command::UnreadCount { reply } => {
                let _ = reply.send(self.store.unread_count());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.store.stats());
            }
            Command::Expanded { reply } => {
                let _ = reply.send(self.expanded);
            }
            Command::SetExpanded { expanded } => {
                if self.expanded != expanded {
                    self.expanded = expanded;
                    self.publish(CenterEvent::ExpandedChanged { expanded });
                }
            }
            Command::Connect => self.channels.connect(&self.subscriber_id),
            Command::Disconnect => {
                if self.channels.disconnect(&self.subscriber_id) {
                    self.publish(CenterEvent::ConnectionChanged {
                        state: ConnectionState::Disconnected,
                    });
                }
            }
            Command::Shutdown => self.cancel.cancel(),
        }
    }

    fn dispatch(&mut self, alert_id: &str, action: ActionRef) -> Result<DispatchOutcome> {
        let action = match action {
            ActionRef::Action(action) => action,
            ActionRef::Id(action_id) => self
                .store
                .get(alert_id)
                .ok_or_else(|| anyhow!("alert not found: {}", alert_id))?
                .action(&action_id)
                .cloned()
                .ok_or_else(|| anyhow!("action {} not found on alert {}", action_id, alert_id))?,
        };

        let outcome = self
            .dispatcher
            .dispatch(&action, alert_id, &mut self.store, &mut self.timers)?;

        match &outcome {
            DispatchOutcome::Acknowledged { changed: true } => {
                if let Some(alert) = self.store.get(alert_id).cloned() {
                    self.publish(CenterEvent::AlertUpdated { alert });
                }
            }
            DispatchOutcome::Dismissed { removed: Some(_) } => {
                self.dismissed.remember(alert_id);
                self.publish(CenterEvent::AlertRemoved {
                    id: alert_id.to_string(),
                    reason: RemovalReason::Dismissed,
                });
            }
            DispatchOutcome::Navigate(target) => {
                self.publish(CenterEvent::Navigate {
                    target: target.clone(),
                });
            }
            _ => {}
        }
        self.publish_unread();
        Ok(outcome)
    }

    fn mark_all_read(&mut self) -> usize {
        let action = AlertAction::bare(ActionKind::MarkAsReviewed);
        let mut changed = 0;
        for id in self.store.unread_ids() {
            match self.dispatch(&id, ActionRef::Action(action.clone())) {
                Ok(DispatchOutcome::Acknowledged { changed: true }) => changed += 1,
                Ok(_) => {}
                Err(e) => warn!(alert_id = %id, error = %e, "Failed to mark alert read"),
            }
        }
        changed
    }

    /// 仅清空本地列表，不通知远端，也不记录墓碑
    fn clear(&mut self) -> usize {
        self.timers.cancel_all();
        let removed = self.store.clear();
        for alert in &removed {
            self.publish(CenterEvent::AlertRemoved {
                id: alert.id.clone(),
                reason: RemovalReason::Cleared,
            });
        }
        self.publish_unread();
        removed.len()
    }
}
