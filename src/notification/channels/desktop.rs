//! 桌面通知（Linux `notify-send` / macOS `osascript`）

use crate::notification::channel::{NativeAlert, NativeNotifier, Permission, SendResult};
use anyhow::{Context, Result};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tracing::{debug, info};

const APP_NAME: &str = "notification-center";

/// 桌面通知后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopBackend {
    NotifySend,
    AppleScript,
}

impl DesktopBackend {
    /// 按当前平台选择
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            DesktopBackend::AppleScript
        } else {
            DesktopBackend::NotifySend
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            DesktopBackend::NotifySend => "notify-send",
            DesktopBackend::AppleScript => "osascript",
        }
    }
}

/// 通过外部命令弹出桌面通知
///
/// 权限在第一次 `request_permission` 时确定：命令存在于 PATH 即视为授予。
pub struct CommandNotifier {
    backend: DesktopBackend,
    program: String,
    permission: OnceLock<Permission>,
}

impl CommandNotifier {
    pub fn new(backend: DesktopBackend) -> Self {
        Self {
            backend,
            program: backend.program().to_string(),
            permission: OnceLock::new(),
        }
    }

    pub fn detect() -> Self {
        Self::new(DesktopBackend::detect())
    }

    /// 覆盖命令路径
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self, alert: &NativeAlert) -> Vec<String> {
        match self.backend {
            DesktopBackend::NotifySend => vec![
                "--app-name".to_string(),
                APP_NAME.to_string(),
                "--hint".to_string(),
                format!("string:x-dunst-stack-tag:{}", alert.tag),
                alert.title.clone(),
                alert.body.clone(),
            ],
            DesktopBackend::AppleScript => vec![
                "-e".to_string(),
                format!(
                    "display notification \"{}\" with title \"{}\"",
                    escape_applescript(&alert.body),
                    escape_applescript(&alert.title)
                ),
            ],
        }
    }
}

impl NativeNotifier for CommandNotifier {
    fn name(&self) -> &str {
        self.backend.program()
    }

    fn permission(&self) -> Permission {
        self.permission.get().copied().unwrap_or(Permission::Default)
    }

    fn request_permission(&self) -> Permission {
        *self.permission.get_or_init(|| match which::which(&self.program) {
            Ok(path) => {
                info!(program = %path.display(), "Desktop notifications available");
                Permission::Granted
            }
            Err(_) => {
                info!(program = %self.program, "Desktop notifier not found, native alerts disabled");
                Permission::Denied
            }
        })
    }

    fn notify(&self, alert: &NativeAlert) -> Result<SendResult> {
        if self.permission() != Permission::Granted {
            return Ok(SendResult::Skipped("permission not granted".to_string()));
        }

        // spawn 后立即返回，不阻塞事件循环
        Command::new(&self.program)
            .args(self.args(alert))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        debug!(tag = %alert.tag, program = %self.program, "Desktop notification sent");
        Ok(SendResult::Sent)
    }
}

fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> NativeAlert {
        NativeAlert {
            tag: "n-1".to_string(),
            title: "Student \"A\" stuck".to_string(),
            body: "Q7 retried".to_string(),
        }
    }

    #[test]
    fn test_notify_send_args() {
        let notifier = CommandNotifier::new(DesktopBackend::NotifySend);
        let args = notifier.args(&alert());
        assert_eq!(args[0], "--app-name");
        assert_eq!(args[3], "string:x-dunst-stack-tag:n-1");
        assert_eq!(args[4], "Student \"A\" stuck");
        assert_eq!(args[5], "Q7 retried");
    }

    #[test]
    fn test_applescript_args_are_escaped() {
        let notifier = CommandNotifier::new(DesktopBackend::AppleScript);
        let args = notifier.args(&alert());
        assert_eq!(args[0], "-e");
        assert_eq!(
            args[1],
            "display notification \"Q7 retried\" with title \"Student \\\"A\\\" stuck\""
        );
    }

    #[test]
    fn test_missing_program_is_denied() {
        let notifier = CommandNotifier::new(DesktopBackend::NotifySend)
            .with_program("definitely-not-a-real-notifier-binary");
        assert_eq!(notifier.permission(), Permission::Default);
        assert_eq!(notifier.request_permission(), Permission::Denied);
        // 结果被缓存
        assert_eq!(notifier.permission(), Permission::Denied);

        let result = notifier.notify(&alert()).unwrap();
        assert!(matches!(result, SendResult::Skipped(_)));
    }

    #[test]
    fn test_undecided_permission_skips() {
        let notifier = CommandNotifier::new(DesktopBackend::NotifySend);
        assert!(matches!(notifier.notify(&alert()).unwrap(), SendResult::Skipped(_)));
    }
}
