//! 原生通知能力 trait 定义
//!
//! 宿主环境可能授予也可能拒绝原生通知权限，核心逻辑不能假设它存在。

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// 宿主授予的通知权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Granted,
    Denied,
    /// 尚未询问用户
    Default,
}

/// 原生通知内容（只有标题和正文，按告警 id 打标签以便宿主去重）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeAlert {
    pub tag: String,
    pub title: String,
    pub body: String,
}

/// 发送结果
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    /// 发送成功
    Sent,
    /// 跳过（无权限等）
    Skipped(String),
    /// 发送失败
    Failed(String),
}

/// 原生通知能力
pub trait NativeNotifier: Send + Sync {
    /// 名称（用于日志）
    fn name(&self) -> &str;

    /// 当前权限状态
    fn permission(&self) -> Permission;

    /// 请求权限，返回请求后的状态
    fn request_permission(&self) -> Permission {
        self.permission()
    }

    /// 发送原生通知
    fn notify(&self, alert: &NativeAlert) -> Result<SendResult>;
}

/// 未授予任何原生通知能力的宿主
#[derive(Debug, Clone, Default)]
pub struct DisabledNotifier;

impl NativeNotifier for DisabledNotifier {
    fn name(&self) -> &str {
        "disabled"
    }

    fn permission(&self) -> Permission {
        Permission::Denied
    }

    fn notify(&self, _alert: &NativeAlert) -> Result<SendResult> {
        Ok(SendResult::Skipped("native alerts disabled".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_notifier_never_sends() {
        let notifier = DisabledNotifier;
        assert_eq!(notifier.permission(), Permission::Denied);
        assert_eq!(notifier.request_permission(), Permission::Denied);

        let alert = NativeAlert {
            tag: "n-1".to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
        };
        assert!(matches!(notifier.notify(&alert).unwrap(), SendResult::Skipped(_)));
    }
}
