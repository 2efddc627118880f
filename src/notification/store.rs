//! 告警存储 - 有序、有容量上限、按 id 去重的内存集合
//!
//! 排序规则：按 `(created_at, id)` 从新到旧。超出容量时淘汰最旧的一条。
//! 已存在的 id 再次插入是空操作（不覆盖），后到的不完整 payload 不能丢掉已知字段。

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use super::alert::{Alert, AlertStatus, Priority};

/// 默认容量
pub const DEFAULT_CAPACITY: usize = 50;

/// 插入结果
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// 已插入，可能淘汰了最旧的一条
    Inserted { evicted: Option<Alert> },
    /// id 已存在，未做任何修改
    Duplicate,
    /// 存储已满且该告警比所有条目都旧
    Stale,
}

/// 统计信息（按优先级 / 类型）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub unread: usize,
    pub by_priority: BTreeMap<Priority, usize>,
    pub by_kind: BTreeMap<String, usize>,
}

/// 告警存储
#[derive(Debug, Clone)]
pub struct NotificationStore {
    /// 从新到旧
    alerts: Vec<Alert>,
    capacity: usize,
    /// 未读数量（增量维护）
    unread: usize,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            alerts: Vec::with_capacity(capacity + 1),
            capacity,
            unread: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 插入告警
    pub fn insert(&mut self, alert: Alert) -> InsertOutcome {
        if self.contains(&alert.id) {
            debug!(alert_id = %alert.id, "Duplicate alert ignored");
            return InsertOutcome::Duplicate;
        }

        let pos = self
            .alerts
            .partition_point(|existing| Alert::newest_first(existing, &alert).is_lt());
        if pos >= self.capacity {
            debug!(alert_id = %alert.id, "Alert older than a full store, dropped");
            return InsertOutcome::Stale;
        }

        if alert.is_unread() {
            self.unread += 1;
        }
        self.alerts.insert(pos, alert);

        let mut evicted = None;
        if self.alerts.len() > self.capacity {
            if let Some(old) = self.alerts.pop() {
                if old.is_unread() {
                    self.unread -= 1;
                }
                debug!(alert_id = %old.id, "Evicted oldest alert");
                evicted = Some(old);
            }
        }

        InsertOutcome::Inserted { evicted }
    }

    pub fn get(&self, id: &str) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.alerts.iter().any(|a| a.id == id)
    }

    /// 从新到旧
    pub fn list(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn snapshot(&self) -> Vec<Alert> {
        self.alerts.clone()
    }

    pub fn remove(&mut self, id: &str) -> Option<Alert> {
        let pos = self.alerts.iter().position(|a| a.id == id)?;
        let removed = self.alerts.remove(pos);
        if removed.is_unread() {
            self.unread -= 1;
        }
        Some(removed)
    }

    /// 更新状态，返回旧状态（不存在时返回 None）
    pub fn update_status(&mut self, id: &str, status: AlertStatus) -> Option<AlertStatus> {
        let alert = self.alerts.iter_mut().find(|a| a.id == id)?;
        let previous = alert.status;
        alert.status = status;

        match (previous == AlertStatus::Unread, status == AlertStatus::Unread) {
            (true, false) => self.unread -= 1,
            (false, true) => self.unread += 1,
            _ => {}
        }
        Some(previous)
    }

    /// 修改告警元数据（不允许改状态）
    pub fn update_metadata<F>(&mut self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut serde_json::Map<String, serde_json::Value>),
    {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                f(&mut alert.metadata);
                true
            }
            None => false,
        }
    }

    /// 批量设置状态，返回实际变化的 id
    pub fn mark_all(&mut self, status: AlertStatus) -> Vec<String> {
        let changed: Vec<String> = self
            .alerts
            .iter()
            .filter(|a| a.status != status)
            .map(|a| a.id.clone())
            .collect();
        for id in &changed {
            self.update_status(id, status);
        }
        changed
    }

    /// 清空，返回被移除的告警
    pub fn clear(&mut self) -> Vec<Alert> {
        self.unread = 0;
        std::mem::take(&mut self.alerts)
    }

    pub fn unread_ids(&self) -> Vec<String> {
        self.alerts
            .iter()
            .filter(|a| a.is_unread())
            .map(|a| a.id.clone())
            .collect()
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            total: self.alerts.len(),
            unread: self.unread,
            ..Default::default()
        };
        for alert in &self.alerts {
            *stats.by_priority.entry(alert.priority).or_insert(0) += 1;
            *stats
                .by_kind
                .entry(alert.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
        stats
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::alert::AlertKind;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn alert_at(id: &str, secs: i64) -> Alert {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + ChronoDuration::seconds(secs);
        Alert::new(id, Priority::Normal, format!("title {}", id)).with_created_at(at)
    }

    fn assert_sorted(store: &NotificationStore) {
        for pair in store.list().windows(2) {
            assert!(
                Alert::newest_first(&pair[0], &pair[1]).is_lt(),
                "{} should come before {}",
                pair[0].id,
                pair[1].id
            );
        }
    }

    fn assert_unread_matches(store: &NotificationStore) {
        let counted = store.list().iter().filter(|a| a.is_unread()).count();
        assert_eq!(store.unread_count(), counted);
    }

    #[test]
    fn test_insert_orders_newest_first() {
        let mut store = NotificationStore::new();
        store.insert(alert_at("b", 20));
        store.insert(alert_at("a", 10));
        store.insert(alert_at("c", 30));

        let ids: Vec<&str> = store.list().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_same_timestamp_breaks_tie_on_id() {
        let mut store = NotificationStore::new();
        store.insert(alert_at("a", 0));
        store.insert(alert_at("c", 0));
        store.insert(alert_at("b", 0));

        let ids: Vec<&str> = store.list().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_duplicate_keeps_original_fields() {
        let mut store = NotificationStore::new();
        store.insert(alert_at("a1", 0).with_message("original"));

        let outcome = store.insert(alert_at("a1", 99).with_message("changed"));

        assert_eq!(outcome, InsertOutcome::Duplicate);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a1").unwrap().message, "original");
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut store = NotificationStore::with_capacity(3);
        for i in 0..3 {
            store.insert(alert_at(&format!("n{}", i), i));
        }

        let outcome = store.insert(alert_at("n3", 3));
        match outcome {
            InsertOutcome::Inserted { evicted: Some(old) } => assert_eq!(old.id, "n0"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.unread_count(), 3);
        assert!(!store.contains("n0"));
    }

    #[test]
    fn test_older_than_full_store_is_stale() {
        let mut store = NotificationStore::with_capacity(2);
        store.insert(alert_at("n1", 10));
        store.insert(alert_at("n2", 20));

        assert_eq!(store.insert(alert_at("old", 0)), InsertOutcome::Stale);
        assert_eq!(store.len(), 2);
        assert!(!store.contains("old"));
    }

    #[test]
    fn test_status_updates_track_unread() {
        let mut store = NotificationStore::new();
        store.insert(alert_at("a", 0));
        store.insert(alert_at("b", 1));
        assert_eq!(store.unread_count(), 2);

        assert_eq!(store.update_status("a", AlertStatus::Acknowledged), Some(AlertStatus::Unread));
        assert_eq!(store.unread_count(), 1);

        // 重复确认不会再减
        store.update_status("a", AlertStatus::Acknowledged);
        assert_eq!(store.unread_count(), 1);

        assert_eq!(store.update_status("missing", AlertStatus::Acknowledged), None);
        assert_unread_matches(&store);
    }

    #[test]
    fn test_remove() {
        let mut store = NotificationStore::new();
        store.insert(alert_at("a", 0));
        store.insert(alert_at("b", 1));
        store.update_status("b", AlertStatus::Acknowledged);

        assert_eq!(store.remove("a").map(|a| a.id), Some("a".to_string()));
        assert_eq!(store.unread_count(), 0);
        assert!(store.remove("a").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_mark_all_and_clear() {
        let mut store = NotificationStore::new();
        store.insert(alert_at("a", 0));
        store.insert(alert_at("b", 1));
        store.update_status("a", AlertStatus::Acknowledged);

        let changed = store.mark_all(AlertStatus::Acknowledged);
        assert_eq!(changed, vec!["b".to_string()]);
        assert_eq!(store.unread_count(), 0);

        let removed = store.clear();
        assert_eq!(removed.len(), 2);
        assert!(store.is_empty());
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_update_metadata_leaves_status() {
        let mut store = NotificationStore::new();
        store.insert(alert_at("a", 0));
        assert!(store.update_metadata("a", |m| {
            m.insert("hint_sent".to_string(), serde_json::Value::Bool(true));
        }));
        assert!(!store.update_metadata("missing", |_| {}));

        let alert = store.get("a").unwrap();
        assert!(alert.hint_sent());
        assert_eq!(alert.status, AlertStatus::Unread);
    }

    #[test]
    fn test_stats() {
        let mut store = NotificationStore::new();
        let mut critical = alert_at("a", 0).with_kind(AlertKind::ConfusionDetected);
        critical.priority = Priority::Critical;
        store.insert(critical);
        store.insert(alert_at("b", 1));
        store.insert(alert_at("c", 2).with_kind(AlertKind::ConfusionDetected));
        store.update_status("b", AlertStatus::Acknowledged);

        let stats = store.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.unread, 2);
        assert_eq!(stats.by_priority.get(&Priority::Critical), Some(&1));
        assert_eq!(stats.by_priority.get(&Priority::Normal), Some(&2));
        assert_eq!(stats.by_kind.get("confusion_detected"), Some(&2));
        assert_eq!(stats.by_kind.get("system"), Some(&1));
    }

    #[test]
    fn test_arbitrary_sequences_keep_invariants() {
        // 简单 LCG，保证可复现
        let mut seed: u64 = 0x5eed;
        let mut next = move |bound: u64| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) % bound
        };

        let mut store = NotificationStore::new();
        for step in 0..2_000 {
            let id = format!("n{}", next(120));
            match next(5) {
                0 | 1 => {
                    let before = store.get(&id).cloned();
                    let len = store.len();
                    let outcome = store.insert(alert_at(&id, next(10_000) as i64));
                    if let Some(before) = before {
                        assert_eq!(outcome, InsertOutcome::Duplicate);
                        assert_eq!(store.len(), len);
                        assert_eq!(store.get(&id), Some(&before));
                    }
                }
                2 => {
                    store.remove(&id);
                }
                3 => {
                    store.update_status(&id, AlertStatus::Acknowledged);
                }
                _ => {
                    store.update_status(&id, AlertStatus::Unread);
                }
            }

            assert!(store.len() <= DEFAULT_CAPACITY, "step {}", step);
            assert_sorted(&store);
            assert_unread_matches(&store);
        }
    }
}
