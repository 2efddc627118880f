//! Priority policy for incoming alerts
//!
//! Decides the side effects an alert triggers when it first arrives:
//! - URGENT / CRITICAL: force the alert list open, and raise a native alert if
//!   the host has granted permission
//! - everything below: silent insert
//!
//! The decision is a pure function of the alert; it never touches status or
//! store contents.

use super::alert::{Alert, AlertKind, Priority};
use super::channel::{NativeAlert, Permission};

/// Lowest priority that forces expansion by default
pub const DEFAULT_FORCE_EXPAND_THRESHOLD: Priority = Priority::Urgent;

/// Side effects requested for one alert
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyDecision {
    pub force_expand: bool,
    pub native_alert: Option<NativeAlert>,
}

impl PolicyDecision {
    pub fn is_silent(&self) -> bool {
        !self.force_expand && self.native_alert.is_none()
    }
}

/// Check whether a priority meets the minimum
pub fn priority_meets_threshold(priority: Priority, min_priority: Priority) -> bool {
    priority >= min_priority
}

#[derive(Debug, Clone)]
pub struct PriorityPolicy {
    threshold: Priority,
}

impl PriorityPolicy {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_FORCE_EXPAND_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: Priority) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> Priority {
        self.threshold
    }

    /// Kind is accepted so producers can later carve out exceptions; today only
    /// priority matters.
    pub fn should_force_expand(&self, priority: Priority, _kind: &AlertKind) -> bool {
        priority_meets_threshold(priority, self.threshold)
    }

    /// Evaluate an alert at insertion time
    pub fn evaluate(&self, alert: &Alert, permission: Permission) -> PolicyDecision {
        if !self.should_force_expand(alert.priority, &alert.kind) {
            return PolicyDecision::default();
        }

        let native_alert = (permission == Permission::Granted).then(|| NativeAlert {
            tag: alert.id.clone(),
            title: alert.title.clone(),
            body: alert.message.clone(),
        });

        PolicyDecision {
            force_expand: true,
            native_alert,
        }
    }
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self::new()
    }
}
