//! 已移除告警的墓碑窗口 - 防止重连后重新同步或迟到的推送让已关闭的告警复活
//!
//! ## 策略
//! 1. 告警被关闭 / 过期移除时记录其 id
//! 2. 默认 600 秒窗口内，同 id 的再次投递直接丢弃
//! 3. 记录数量有上限，超出时丢弃最旧的记录

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// 默认窗口
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(600);

/// 默认最多记录数
const DEFAULT_MAX_ENTRIES: usize = 1000;

/// 已移除 id 的墓碑集合
#[derive(Debug)]
pub struct DismissedIds {
    /// id -> 移除时间
    recent: HashMap<String, Instant>,
    window: Duration,
    max_entries: usize,
}

impl DismissedIds {
    /// 创建新的墓碑集合，使用默认 600 秒窗口
    pub fn new() -> Self {
        Self {
            recent: HashMap::new(),
            window: DEFAULT_WINDOW,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    /// 设置窗口时长
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// 设置最多记录数
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// 记录一个已移除的 id
    pub fn remember(&mut self, id: &str) {
        let now = Instant::now();
        self.cleanup_expired(now);

        if self.recent.len() >= self.max_entries && !self.recent.contains_key(id) {
            if let Some(oldest) = self
                .recent
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(id, _)| id.clone())
            {
                self.recent.remove(&oldest);
            }
        }
        self.recent.insert(id.to_string(), now);
    }

    /// 窗口内是否移除过
    pub fn contains(&self, id: &str) -> bool {
        match self.recent.get(id) {
            Some(at) if at.elapsed() < self.window => {
                debug!(alert_id = %id, "Alert was dismissed recently");
                true
            }
            _ => false,
        }
    }

    /// 主动撤销（例如宿主清空后希望重新同步）
    pub fn forget(&mut self, id: &str) -> bool {
        self.recent.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    /// 清理过期记录
    fn cleanup_expired(&mut self, now: Instant) {
        let window = self.window;
        self.recent
            .retain(|_, at| now.saturating_duration_since(*at) < window);
    }
}

impl Default for DismissedIds {
    fn default() -> Self {
        Self::new()
    }
}
