//! Output formatting for CLI commands

use crate::notification::{Alert, CenterEvent, RemovalReason};
use serde::Serialize;

/// Format output as JSON or a plain listing based on --json flag
pub fn format_output<T: Serialize>(data: &T, json: bool) -> String {
    if json {
        serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
    } else {
        serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string())
    }
}

/// One line per alert
pub fn format_alert_line(alert: &Alert) -> String {
    let mut line = format!(
        "[{:<8}] {}  {}",
        alert.priority.as_str().to_uppercase(),
        alert.id,
        alert.title
    );
    if let Some(subject) = alert.display_subject() {
        line.push_str(&format!("  ({})", subject));
    }
    line.push_str(&format!(
        "  {} {}",
        alert.status,
        alert.created_at.format("%Y-%m-%d %H:%M:%S")
    ));
    if alert.hint_sent() {
        line.push_str("  hint sent");
    }
    line
}

pub fn format_alert_list(alerts: &[Alert]) -> String {
    if alerts.is_empty() {
        return "No alerts".to_string();
    }
    alerts
        .iter()
        .map(format_alert_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Human-readable observer event
pub fn format_event(event: &CenterEvent) -> String {
    match event {
        CenterEvent::AlertAdded { alert } => format!("+ {}", format_alert_line(alert)),
        CenterEvent::AlertUpdated { alert } => format!("~ {}", format_alert_line(alert)),
        CenterEvent::AlertRemoved { id, reason } => {
            let reason = match reason {
                RemovalReason::Dismissed => "dismissed",
                RemovalReason::Expired => "expired",
                RemovalReason::Evicted => "evicted",
                RemovalReason::Cleared => "cleared",
            };
            format!("- {} ({})", id, reason)
        }
        CenterEvent::ForceExpand { id } => format!("! {} requires attention", id),
        CenterEvent::NativeAlertEmitted { id } => format!("  desktop alert sent for {}", id),
        CenterEvent::ExpandedChanged { expanded } => {
            format!("  list {}", if *expanded { "expanded" } else { "collapsed" })
        }
        CenterEvent::UnreadChanged { count } => format!("  unread: {}", count),
        CenterEvent::ConnectionChanged { state } => format!("  connection: {}", state),
        CenterEvent::Navigate { target } => match &target.url {
            Some(url) => format!("  open {} -> {}", target.alert_id, url),
            None => format!("  open {}", target.alert_id),
        },
        CenterEvent::Foreign { kind, .. } => format!("  ignored push of type {}", kind),
        CenterEvent::Synced {
            inserted,
            server_unread,
        } => match server_unread {
            Some(unread) => format!("  synced {} alerts (server unread: {})", inserted, unread),
            None => format!("  synced {} alerts", inserted),
        },
    }
}
