//! 原生通知能力的具体实现

pub mod desktop;

pub use desktop::{CommandNotifier, DesktopBackend};
