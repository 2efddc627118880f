//! 告警生命周期 - 自动过期定时器与状态迁移规则
//!
//! 状态机：
//! - `unread → acknowledged`（确认审阅）
//! - `unread / acknowledged → dismissed`（手动关闭或定时过期）
//!
//! 每个告警同一时刻至多一个定时器。定时器触发后把 [`Expired`] 投递到中心的
//! 事件队列；只有代数（generation）与当前已挂载的定时器一致时才生效，
//! 因此取消之后才到达的触发事件是空操作。

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::alert::AlertStatus;

/// 是否允许从 `from` 迁移到 `to`
pub fn can_transition(from: AlertStatus, to: AlertStatus) -> bool {
    matches!(
        (from, to),
        (AlertStatus::Unread, AlertStatus::Acknowledged)
            | (AlertStatus::Unread, AlertStatus::Dismissed)
            | (AlertStatus::Acknowledged, AlertStatus::Dismissed)
    )
}

/// 定时器触发事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub id: String,
    pub generation: u64,
}

struct ArmedTimer {
    generation: u64,
    deadline: Instant,
    handle: AbortHandle,
}

/// 每个告警的一次性过期定时器
pub struct ExpiryTimers {
    armed: HashMap<String, ArmedTimer>,
    next_generation: u64,
    fired: mpsc::UnboundedSender<Expired>,
}

impl ExpiryTimers {
    pub fn new(fired: mpsc::UnboundedSender<Expired>) -> Self {
        Self {
            armed: HashMap::new(),
            next_generation: 0,
            fired,
        }
    }

    /// 挂载定时器（已有的先取消），返回代数
    ///
    /// 截止时间超出时钟范围时不挂载，告警只能手动关闭
    pub fn arm(&mut self, id: &str, after: Duration) -> Option<u64> {
        self.cancel(id);

        let Some(deadline) = Instant::now().checked_add(after) else {
            warn!(alert_id = %id, after_secs = after.as_secs(), "Auto-dismiss delay out of range, timer not armed");
            return None;
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        let fired = self.fired.clone();
        let timer_id = id.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            trace!(alert_id = %timer_id, generation, "Expiry timer fired");
            let _ = fired.send(Expired {
                id: timer_id,
                generation,
            });
        });

        debug!(alert_id = %id, after_ms = after.as_millis() as u64, generation, "Expiry timer armed");
        self.armed.insert(
            id.to_string(),
            ArmedTimer {
                generation,
                deadline,
                handle: task.abort_handle(),
            },
        );
        Some(generation)
    }

    /// 取消定时器（幂等），返回是否确实取消了一个
    pub fn cancel(&mut self, id: &str) -> bool {
        match self.armed.remove(id) {
            Some(timer) => {
                timer.handle.abort();
                debug!(alert_id = %id, generation = timer.generation, "Expiry timer cancelled");
                true
            }
            None => false,
        }
    }

    /// 处理触发事件：仅当仍是当前定时器时返回 true 并将其移除
    pub fn take_fired(&mut self, fired: &Expired) -> bool {
        match self.armed.get(&fired.id) {
            Some(timer) if timer.generation == fired.generation => {
                self.armed.remove(&fired.id);
                true
            }
            _ => {
                debug!(alert_id = %fired.id, generation = fired.generation, "Stale expiry ignored");
                false
            }
        }
    }

    pub fn is_armed(&self, id: &str) -> bool {
        self.armed.contains_key(id)
    }

    /// 剩余时间
    pub fn remaining(&self, id: &str) -> Option<Duration> {
        self.armed
            .get(id)
            .map(|t| t.deadline.saturating_duration_since(Instant::now()))
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.armed.drain() {
            timer.handle.abort();
        }
    }
}

impl Drop for ExpiryTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
