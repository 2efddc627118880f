//! 推送通道管理 - 每个订阅者一条长连接，断线后固定间隔重连
//!
//! 状态机：`disconnected → connecting → connected → disconnected → ...`
//!
//! 每次 `connect` / `disconnect` 都会让该订阅者的 epoch 加一。旧 worker 的
//! 状态写入在 watch 锁内比对 epoch，不一致直接丢弃；投递给中心的事件同样带
//! epoch，中心用 [`ChannelManager::is_current`] 过滤掉过时连接的残留事件。

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::alert::{parse_envelope, Alert, Inbound};
use crate::config::{CenterConfig, SUBSCRIBER_PLACEHOLDER};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        write!(f, "{}", s)
    }
}

/// 一条连接上的文本帧流，流结束即连接关闭
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// 建立推送连接
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, subscriber_id: &str) -> Result<FrameStream>;
}

/// WebSocket 实现
#[derive(Debug, Clone)]
pub struct WsConnector {
    url_template: String,
}

impl WsConnector {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
        }
    }

    pub fn from_config(config: &CenterConfig) -> Self {
        Self::new(config.ws_url_template.clone())
    }

    fn url_for(&self, subscriber_id: &str) -> String {
        if self.url_template.contains(SUBSCRIBER_PLACEHOLDER) {
            self.url_template.replace(SUBSCRIBER_PLACEHOLDER, subscriber_id)
        } else {
            format!("{}/{}", self.url_template.trim_end_matches('/'), subscriber_id)
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, subscriber_id: &str) -> Result<FrameStream> {
        let url = self.url_for(subscriber_id);
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            bail!("Invalid WebSocket URL: {}", url);
        }

        let (ws, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .with_context(|| format!("WebSocket connect failed: {}", url))?;
        debug!(url = %url, status = %response.status(), "WebSocket handshake complete");

        let frames = ws.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket close frame received");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(anyhow::Error::new(e).context("WebSocket read failed"))),
            }
        });
        Ok(Box::pin(frames))
    }
}

/// 通道事件类型
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEventKind {
    /// 解码成功的告警
    Message(Alert),
    /// 其他类型的推送，原样转交
    Foreign {
        kind: String,
        payload: serde_json::Value,
    },
    Status(ConnectionState),
}

/// 通道投递给中心的事件
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub subscriber_id: String,
    pub epoch: u64,
    pub kind: ChannelEventKind,
}

struct Slot {
    epoch: Arc<AtomicU64>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: Option<CancellationToken>,
}

impl Slot {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            epoch: Arc::new(AtomicU64::new(0)),
            state: Arc::new(state),
            cancel: None,
        }
    }

    /// 停止当前 worker，状态置为 disconnected，返回新的 epoch
    fn retire(&mut self) -> u64 {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        let epoch = &self.epoch;
        let mut next = 0;
        self.state.send_modify(|state| {
            next = epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *state = ConnectionState::Disconnected;
        });
        next
    }
}

/// 推送通道管理器
pub struct ChannelManager {
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<ChannelEvent>,
    slots: HashMap<String, Slot>,
}

impl ChannelManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        reconnect_delay: Duration,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        Self {
            connector,
            reconnect_delay,
            events,
            slots: HashMap::new(),
        }
    }

    /// 打开（或重新打开）订阅者的通道，已有连接会先被拆除
    pub fn connect(&mut self, subscriber_id: &str) {
        let slot = self
            .slots
            .entry(subscriber_id.to_string())
            .or_insert_with(Slot::new);
        let previous = *slot.state.borrow();
        let epoch = slot.retire();
        let cancel = CancellationToken::new();
        slot.cancel = Some(cancel.clone());

        // 拆除旧连接同样是一次状态迁移
        if previous != ConnectionState::Disconnected {
            let _ = self.events.send(ChannelEvent {
                subscriber_id: subscriber_id.to_string(),
                epoch,
                kind: ChannelEventKind::Status(ConnectionState::Disconnected),
            });
        }

        info!(subscriber_id = %subscriber_id, epoch, "Opening push channel");
        let worker = ChannelWorker {
            subscriber_id: subscriber_id.to_string(),
            epoch,
            current_epoch: Arc::clone(&slot.epoch),
            state: Arc::clone(&slot.state),
            connector: Arc::clone(&self.connector),
            reconnect_delay: self.reconnect_delay,
            events: self.events.clone(),
            cancel,
        };
        tokio::spawn(worker.run());
    }

    /// 关闭通道并停止重连，返回之前是否处于打开状态
    pub fn disconnect(&mut self, subscriber_id: &str) -> bool {
        match self.slots.get_mut(subscriber_id) {
            Some(slot) => {
                let was_open = slot.cancel.is_some();
                slot.retire();
                if was_open {
                    info!(subscriber_id = %subscriber_id, "Push channel closed");
                }
                was_open
            }
            None => false,
        }
    }

    pub fn disconnect_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.retire();
        }
    }

    pub fn state(&self, subscriber_id: &str) -> ConnectionState {
        self.slots
            .get(subscriber_id)
            .map(|slot| *slot.state.borrow())
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// 订阅状态变化（订阅者尚未连接时也可调用）
    pub fn watch_state(&mut self, subscriber_id: &str) -> watch::Receiver<ConnectionState> {
        self.slots
            .entry(subscriber_id.to_string())
            .or_insert_with(Slot::new)
            .state
            .subscribe()
    }

    /// 事件是否来自订阅者当前这条连接
    pub fn is_current(&self, subscriber_id: &str, epoch: u64) -> bool {
        self.slots
            .get(subscriber_id)
            .map(|slot| slot.cancel.is_some() && slot.epoch.load(Ordering::SeqCst) == epoch)
            .unwrap_or(false)
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

struct ChannelWorker {
    subscriber_id: String,
    epoch: u64,
    current_epoch: Arc<AtomicU64>,
    state: Arc<watch::Sender<ConnectionState>>,
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
}

impl ChannelWorker {
    async fn run(self) {
        let mut attempt: u64 = 0;
        loop {
            if !self.set_state(ConnectionState::Connecting) {
                return;
            }
            attempt += 1;
            debug!(subscriber_id = %self.subscriber_id, attempt, "Connecting push channel");

            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                opened = self.connector.open(&self.subscriber_id) => opened,
            };

            match opened {
                Ok(mut frames) => {
                    if !self.set_state(ConnectionState::Connected) {
                        return;
                    }
                    info!(subscriber_id = %self.subscriber_id, attempt, "Push channel connected");
                    attempt = 0;

                    loop {
                        let next = tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => return,
                            next = frames.next() => next,
                        };
                        match next {
                            Some(Ok(text)) => self.deliver(&text),
                            Some(Err(e)) => {
                                warn!(subscriber_id = %self.subscriber_id, error = %e, "Push channel error");
                                break;
                            }
                            None => {
                                info!(subscriber_id = %self.subscriber_id, "Push channel closed by peer");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(subscriber_id = %self.subscriber_id, attempt, error = %e, "Failed to open push channel");
                }
            }

            if !self.set_state(ConnectionState::Disconnected) {
                return;
            }
            debug!(
                subscriber_id = %self.subscriber_id,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "Reconnect scheduled"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    /// 仅当仍是当前 epoch 时写入状态并通知中心
    fn set_state(&self, next: ConnectionState) -> bool {
        let epoch = self.epoch;
        let current = &self.current_epoch;
        let mut is_current = false;
        self.state.send_if_modified(|state| {
            if current.load(Ordering::SeqCst) != epoch {
                return false;
            }
            is_current = true;
            if *state == next {
                return false;
            }
            *state = next;
            true
        });

        if is_current {
            self.emit(ChannelEventKind::Status(next));
        }
        is_current
    }

    fn deliver(&self, text: &str) {
        match parse_envelope(text) {
            Ok(Inbound::Alert(alert)) => {
                debug!(subscriber_id = %self.subscriber_id, alert_id = %alert.id, "Alert received");
                self.emit(ChannelEventKind::Message(alert));
            }
            Ok(Inbound::Foreign { kind, payload }) => {
                debug!(subscriber_id = %self.subscriber_id, kind = %kind, "Foreign envelope received");
                self.emit(ChannelEventKind::Foreign { kind, payload });
            }
            Err(e) => {
                warn!(subscriber_id = %self.subscriber_id, error = %e, "Dropping malformed frame");
            }
        }
    }

    fn emit(&self, kind: ChannelEventKind) {
        let _ = self.events.send(ChannelEvent {
            subscriber_id: self.subscriber_id.clone(),
            epoch: self.epoch,
            kind,
        });
    }
}
