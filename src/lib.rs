//! Notification Center - 实时告警推送与生命周期管理

pub mod cli;
pub mod config;
pub mod notification;

pub use config::CenterConfig;
pub use notification::{
    Alert, AlertCenter, AlertStatus, CenterEvent, CenterHandle, ConnectionState, DispatchOutcome,
    NotificationStore, Priority,
};
