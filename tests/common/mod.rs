//! 集成测试共用的 mock 组件
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use notification_center::notification::alert::ENVELOPE_TYPE;
use notification_center::notification::{
    AlertCenter, AlertPage, CenterEvent, CenterHandle, Connector, FrameStream, HintRequest,
    NativeAlert, NativeNotifier, Permission, RemoteApi, SendResult,
};
use notification_center::CenterConfig;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub const SUBSCRIBER: &str = "prof-1";

/// 一条打开的 mock 连接，drop 即关闭
pub struct Session {
    pub subscriber_id: String,
    frames: mpsc::UnboundedSender<Result<String>>,
}

impl Session {
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.frames.send(Ok(text.into()));
    }

    pub fn push_alert(&self, alert: serde_json::Value) {
        self.push(envelope(alert));
    }

    /// 模拟传输错误
    pub fn fail(&self) {
        let _ = self.frames.send(Err(anyhow::anyhow!("connection reset")));
    }
}

/// 每次 open 都把新连接交给测试
pub struct MockConnector {
    sessions: mpsc::UnboundedSender<Session>,
    fail_next: AtomicUsize,
    opens: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Session>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            sessions: tx,
            fail_next: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    /// 接下来 n 次 open 失败
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, subscriber_id: &str) -> Result<FrameStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            bail!("connection refused");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.sessions.send(Session {
            subscriber_id: subscriber_id.to_string(),
            frames: tx,
        });
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}

/// 记录所有调用的 mock 远端
#[derive(Default)]
pub struct MockRemote {
    calls: Mutex<Vec<String>>,
    page: Mutex<AlertPage>,
    fail: AtomicBool,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_page(page: AlertPage) -> Arc<Self> {
        let remote = Self::default();
        *remote.page.lock().unwrap() = page;
        Arc::new(remote)
    }

    /// 替换后续 list 返回的页面
    pub fn set_page(&self, page: AlertPage) {
        *self.page.lock().unwrap() = page;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            bail!("503 Service Unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn list(&self, subscriber_id: &str) -> Result<AlertPage> {
        self.record(format!("list {}", subscriber_id))?;
        Ok(self.page.lock().unwrap().clone())
    }

    async fn mark_read(&self, id: &str, subscriber_id: &str) -> Result<()> {
        self.record(format!("mark-read {} {}", id, subscriber_id))
    }

    async fn dismiss(&self, id: &str, subscriber_id: &str) -> Result<()> {
        self.record(format!("dismiss {} {}", id, subscriber_id))
    }

    async fn send_hint(&self, request: &HintRequest) -> Result<()> {
        self.record(format!(
            "send-hint {} {} {}",
            request.id, request.target_id, request.message
        ))
    }
}

/// 已授权、记录发送内容的原生通知
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<NativeAlert>>,
}

impl NativeNotifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    fn permission(&self) -> Permission {
        Permission::Granted
    }

    fn notify(&self, alert: &NativeAlert) -> Result<SendResult> {
        self.sent.lock().unwrap().push(alert.clone());
        Ok(SendResult::Sent)
    }
}

pub fn envelope(alert: serde_json::Value) -> String {
    serde_json::json!({ "type": ENVELOPE_TYPE, "data": alert }).to_string()
}

pub async fn next_event(events: &mut broadcast::Receiver<CenterEvent>) -> CenterEvent {
    tokio::time::timeout(Duration::from_secs(120), events.recv())
        .await
        .expect("timed out waiting for center event")
        .expect("center event stream closed")
}

/// 跳过无关事件，直到满足条件
pub async fn wait_for<F>(events: &mut broadcast::Receiver<CenterEvent>, predicate: F) -> CenterEvent
where
    F: Fn(&CenterEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if predicate(&event) {
            return event;
        }
    }
}

/// 取出当前已排队的全部事件
pub fn drain(events: &mut broadcast::Receiver<CenterEvent>) -> Vec<CenterEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub struct Harness {
    pub handle: CenterHandle,
    pub events: broadcast::Receiver<CenterEvent>,
    pub sessions: mpsc::UnboundedReceiver<Session>,
    pub connector: Arc<MockConnector>,
    pub remote: Arc<MockRemote>,
    pub notifier: Arc<RecordingNotifier>,
    pub task: JoinHandle<()>,
}

impl Harness {
    /// 等待下一条连接打开
    pub async fn next_session(&mut self) -> Session {
        tokio::time::timeout(Duration::from_secs(120), self.sessions.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }
}

/// 启动中心并等待首次连接和同步完成
pub async fn start(remote: Arc<MockRemote>) -> (Harness, Session) {
    start_with_config(remote, CenterConfig::default()).await
}

pub async fn start_with_config(remote: Arc<MockRemote>, config: CenterConfig) -> (Harness, Session) {
    let (connector, sessions) = MockConnector::new();
    let notifier = Arc::new(RecordingNotifier::default());

    let (center, handle) = AlertCenter::builder(SUBSCRIBER)
        .config(config)
        .connector(connector.clone())
        .remote(remote.clone())
        .notifier(notifier.clone())
        .build()
        .unwrap();
    let events = handle.subscribe();
    let task = center.spawn();
    handle.connect().unwrap();

    let mut harness = Harness {
        handle,
        events,
        sessions,
        connector,
        remote,
        notifier,
        task,
    };
    let session = harness.next_session().await;
    wait_for(&mut harness.events, |e| matches!(e, CenterEvent::Synced { .. })).await;
    (harness, session)
}
