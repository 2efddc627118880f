//! 实时告警中心
//!
//! # 组件
//! 1. `connection`：每个订阅者一条推送通道，断线固定间隔重连
//! 2. `store`：有序、有上限、按 id 去重的告警集合
//! 3. `lifecycle`：自动过期定时器与状态迁移
//! 4. `dispatcher`：用户动作 → 乐观本地更新 + 远端变更
//! 5. `priority`：按优先级触发强制展开 / 原生通知
//!
//! `center` 把以上组件串在一个事件循环里，宿主只通过 `CenterHandle` 交互。
//!
//! # 使用示例
//! ```ignore
//! use notification_center::notification::AlertCenter;
//!
//! let (center, handle) = AlertCenter::builder("prof-1").config(config).build()?;
//! center.spawn();
//! handle.connect()?;
//! let mut events = handle.subscribe();
//! ```

pub mod alert;
pub mod center;
pub mod channel;
pub mod channels;
pub mod connection;
pub mod deduplicator;
pub mod dispatcher;
pub mod lifecycle;
pub mod priority;
pub mod remote;
pub mod store;

pub use alert::{
    parse_envelope, ActionKind, Alert, AlertAction, AlertKind, AlertStatus, Inbound, Priority,
    TargetRef, Timing,
};
pub use center::{AlertCenter, CenterBuilder, CenterEvent, CenterHandle, RemovalReason};
pub use channel::{DisabledNotifier, NativeAlert, NativeNotifier, Permission, SendResult};
pub use channels::{CommandNotifier, DesktopBackend};
pub use connection::{
    ChannelEvent, ChannelEventKind, ChannelManager, ConnectionState, Connector, FrameStream,
    WsConnector,
};
pub use deduplicator::DismissedIds;
pub use dispatcher::{
    ActionDispatcher, ActionHook, DispatchOutcome, NavigationTarget, RemoteCompletion, RemoteOp,
};
pub use lifecycle::{can_transition, Expired, ExpiryTimers};
pub use priority::{PolicyDecision, PriorityPolicy};
pub use remote::{AlertPage, HintRequest, HttpRemote, MutationRequest, RemoteApi};
pub use store::{InsertOutcome, NotificationStore, StoreStats};
