//! Alert data model and push envelope decoding
//!
//! Producers in the field emit both snake_case English enum values and the
//! localized Korean labels the backend was originally written against, so every
//! enum here accepts both spellings on input and writes the English one.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::time::Duration;

/// Envelope `type` carrying an alert payload
pub const ENVELOPE_TYPE: &str = "liquid_glass_notification";

/// Alert priority, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[serde(alias = "낮음")]
    Low,
    #[serde(alias = "보통")]
    Normal,
    #[serde(alias = "높음")]
    High,
    #[serde(alias = "긴급")]
    Urgent,
    #[serde(alias = "치명적")]
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Urgent,
        Priority::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_lowercase()))
            .map_err(|_| anyhow!("unknown priority: {}", s))
    }
}

/// What produced the alert. Unknown wire values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlertKind {
    DiagnosisComplete,
    ConfusionDetected,
    InstructorIntervention,
    System,
    Other(String),
}

impl Default for AlertKind {
    fn default() -> Self {
        AlertKind::System
    }
}

impl AlertKind {
    pub fn as_str(&self) -> &str {
        match self {
            AlertKind::DiagnosisComplete => "diagnosis_complete",
            AlertKind::ConfusionDetected => "confusion_detected",
            AlertKind::InstructorIntervention => "instructor_intervention",
            AlertKind::System => "system",
            AlertKind::Other(kind) => kind,
        }
    }
}

impl From<String> for AlertKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "diagnosis_complete" | "진단완료" => AlertKind::DiagnosisComplete,
            "confusion_detected" | "혼란감지" => AlertKind::ConfusionDetected,
            "instructor_intervention" | "교수개입" => AlertKind::InstructorIntervention,
            "system" | "시스템알림" => AlertKind::System,
            _ => AlertKind::Other(value),
        }
    }
}

impl From<AlertKind> for String {
    fn from(kind: AlertKind) -> Self {
        kind.as_str().to_string()
    }
}

/// The only alert field the core mutates locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    #[serde(alias = "읽지않음")]
    Unread,
    #[serde(alias = "읽음", alias = "read")]
    Acknowledged,
    #[serde(alias = "해제됨")]
    Dismissed,
}

impl Default for AlertStatus {
    fn default() -> Self {
        AlertStatus::Unread
    }
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Unread => "unread",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Dismissed => "dismissed",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Built-in action kinds; anything else goes to the host hooks
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    MarkAsReviewed,
    DismissNotification,
    ViewDetail,
    SendRealtimeHint,
    Other(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::MarkAsReviewed => "mark_as_reviewed",
            ActionKind::DismissNotification => "dismiss_notification",
            ActionKind::ViewDetail => "view_detail",
            ActionKind::SendRealtimeHint => "send_realtime_hint",
            ActionKind::Other(kind) => kind,
        }
    }
}

impl From<String> for ActionKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "mark_as_reviewed" => ActionKind::MarkAsReviewed,
            "dismiss_notification" => ActionKind::DismissNotification,
            "view_detail" => ActionKind::ViewDetail,
            "send_realtime_hint" => ActionKind::SendRealtimeHint,
            _ => ActionKind::Other(value),
        }
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Producer-defined action attached to an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertAction {
    pub id: String,
    #[serde(default)]
    pub label: String,
    /// Wire name is `action` on older producers
    #[serde(alias = "action")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default)]
    pub urgent: bool,
    /// Navigation target for `view_detail`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub opens_modal: bool,
}

impl AlertAction {
    /// Action with no display data, used for host-initiated commands
    pub fn bare(kind: ActionKind) -> Self {
        Self {
            id: kind.as_str().to_string(),
            label: String::new(),
            kind,
            style: None,
            urgent: false,
            url: None,
            opens_modal: false,
        }
    }
}

/// Expiry and interaction hints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    /// Seconds until auto-dismiss; absent or zero means no timer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_dismiss_seconds: Option<f64>,
    #[serde(default)]
    pub requires_interaction: bool,
    /// Some producers only stamp the creation time here
    #[serde(
        default,
        deserialize_with = "de_opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

impl Timing {
    pub fn auto_dismiss_after(&self) -> Option<Duration> {
        self.auto_dismiss_seconds
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// End user an alert is about (the student, in the original deployment)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetRef {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

/// A priority-classified event pushed to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "AlertWire")]
pub struct Alert {
    pub id: String,
    pub priority: Priority,
    pub kind: AlertKind,
    /// Display grouping only, never identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub timing: Timing,
    pub actions: Vec<AlertAction>,
    pub status: AlertStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRef>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Alert as producers send it, before fallbacks are resolved
#[derive(Deserialize)]
struct AlertWire {
    #[serde(deserialize_with = "de_id")]
    id: String,
    #[serde(default)]
    priority: Priority,
    #[serde(default, alias = "type")]
    kind: AlertKind,
    #[serde(default, alias = "department")]
    subject: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    subtitle: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    timing: Timing,
    #[serde(default)]
    actions: Vec<AlertAction>,
    #[serde(default)]
    status: Option<AlertStatus>,
    #[serde(default, alias = "student_id", deserialize_with = "de_opt_id")]
    target_id: Option<String>,
    #[serde(default, alias = "student")]
    target: Option<TargetRef>,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl From<AlertWire> for Alert {
    fn from(wire: AlertWire) -> Self {
        let created_at = wire
            .created_at
            .or(wire.timing.created_at)
            .unwrap_or_else(Utc::now);
        // 读状态可能只记录在 metadata.status（如 "읽음"）
        let status = wire
            .status
            .or_else(|| {
                wire.metadata
                    .get("status")
                    .and_then(|v| AlertStatus::deserialize(v).ok())
            })
            .unwrap_or_default();

        Self {
            id: wire.id,
            priority: wire.priority,
            kind: wire.kind,
            subject: wire.subject,
            title: wire.title,
            subtitle: wire.subtitle,
            message: wire.message,
            created_at,
            timing: wire.timing,
            actions: wire.actions,
            status,
            target_id: wire.target_id,
            target: wire.target,
            metadata: wire.metadata,
        }
    }
}

impl Alert {
    pub fn new(id: impl Into<String>, priority: Priority, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority,
            kind: AlertKind::default(),
            subject: None,
            title: title.into(),
            subtitle: None,
            message: String::new(),
            created_at: Utc::now(),
            timing: Timing::default(),
            actions: Vec::new(),
            status: AlertStatus::Unread,
            target_id: None,
            target: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_kind(mut self, kind: AlertKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_auto_dismiss(mut self, after: Duration) -> Self {
        self.timing.auto_dismiss_seconds = Some(after.as_secs_f64());
        self
    }

    pub fn with_action(mut self, action: AlertAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_target_id(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// End-user identity, from `target_id` or the nested target record
    pub fn target_identity(&self) -> Option<&str> {
        self.target_id
            .as_deref()
            .or_else(|| self.target.as_ref().and_then(|t| t.id.as_deref()))
            .filter(|id| !id.is_empty())
    }

    /// Grouping tag, falling back to the target's department
    pub fn display_subject(&self) -> Option<&str> {
        self.subject
            .as_deref()
            .or_else(|| self.target.as_ref().and_then(|t| t.department.as_deref()))
    }

    pub fn action(&self, action_id: &str) -> Option<&AlertAction> {
        self.actions.iter().find(|a| a.id == action_id)
    }

    pub fn is_unread(&self) -> bool {
        self.status == AlertStatus::Unread
    }

    pub fn hint_sent(&self) -> bool {
        self.metadata
            .get("hint_sent")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn mark_hint_sent(&mut self, at: DateTime<Utc>) {
        record_hint_sent(&mut self.metadata, at);
    }

    /// Newest-first ordering on `(created_at, id)`
    pub fn newest_first(a: &Alert, b: &Alert) -> Ordering {
        (b.created_at, b.id.as_str()).cmp(&(a.created_at, a.id.as_str()))
    }
}

/// Write the `hint_sent` markers into an alert's metadata map
pub fn record_hint_sent(metadata: &mut serde_json::Map<String, serde_json::Value>, at: DateTime<Utc>) {
    metadata.insert("hint_sent".to_string(), serde_json::Value::Bool(true));
    metadata.insert(
        "hint_sent_at".to_string(),
        serde_json::Value::String(at.to_rfc3339()),
    );
}

/// A decoded push envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Alert(Alert),
    /// Any other envelope type, left for other collaborators
    Foreign {
        kind: String,
        payload: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    notification: Option<serde_json::Value>,
}

/// Decode one text frame from the push channel
pub fn parse_envelope(text: &str) -> Result<Inbound> {
    let raw: RawEnvelope = serde_json::from_str(text).context("invalid envelope")?;
    let payload = raw.data.or(raw.notification);

    if raw.kind != ENVELOPE_TYPE {
        return Ok(Inbound::Foreign {
            kind: raw.kind,
            payload: payload.unwrap_or(serde_json::Value::Null),
        });
    }

    let payload = payload.ok_or_else(|| anyhow!("{} envelope has no payload", ENVELOPE_TYPE))?;
    let alert: Alert = serde_json::from_value(payload).context("invalid alert payload")?;
    if alert.id.trim().is_empty() {
        bail!("alert payload has an empty id");
    }
    Ok(Inbound::Alert(alert))
}

/// Ids arrive as strings or integers depending on the producer
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    RawId::deserialize(deserializer).map(String::from)
}

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` read as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn de_opt_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw))),
        None => Ok(None),
    }
}

fn de_opt_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Option::<RawId>::deserialize(deserializer).map(|id| id.map(String::from))
}
