//! Shared types for the intake pipeline.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Format a timestamp the way every stored timestamp is written.
///
/// Fixed-width UTC with millisecond precision, so lexical order in the
/// store matches chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Epoch values at or above this are milliseconds, below it seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Rewrite a client-supplied timestamp into the `format_timestamp` form.
///
/// Accepts RFC 3339 with any offset, `YYYY-MM-DD HH:MM:SS[.f]` (taken as
/// UTC) and integer epoch seconds or milliseconds. Anything else is kept
/// as sent.
pub fn normalize_timestamp(raw: &str) -> String {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return format_timestamp(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return format_timestamp(ndt.and_utc());
    }
    if let Ok(epoch) = s.parse::<i64>() {
        let parsed = if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
            DateTime::from_timestamp_millis(epoch)
        } else {
            DateTime::from_timestamp(epoch, 0)
        };
        if let Some(dt) = parsed {
            return format_timestamp(dt);
        }
    }
    raw.to_string()
}

/// Accept any JSON scalar where text is expected; `null` is absent.
///
/// Arrays and objects are kept as their JSON text.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// ── Webhook payload ─────────────────────────────────────────────────

/// The recognized fields of an inbound webhook body.
///
/// Every field is optional on the wire and scalar values of any JSON type
/// are read as text. Unrecognized fields are ignored here but survive in the
/// raw JSON that is forwarded downstream. `history` stays raw so that one
/// bad item cannot reject the whole event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEvent {
    #[serde(default, deserialize_with = "lenient_string")]
    pub message_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub chat_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub chat_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub current_message: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source: Option<String>,
    #[serde(default)]
    pub history: Option<serde_json::Value>,
}

/// History items that could be read, plus a description of each one skipped.
#[derive(Debug, Default)]
pub struct HistoryItems {
    pub items: Vec<WebhookHistoryItem>,
    pub skipped: Vec<String>,
}

impl WebhookEvent {
    /// Read the embedded history item by item.
    pub fn history_items(&self) -> HistoryItems {
        let mut out = HistoryItems::default();
        match &self.history {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::Array(values)) => {
                for (i, value) in values.iter().enumerate() {
                    match WebhookHistoryItem::deserialize(value) {
                        Ok(item) => out.items.push(item),
                        Err(e) => out.skipped.push(format!("item {i}: {e}")),
                    }
                }
            }
            Some(other) => out
                .skipped
                .push(format!("history is not a list: {other}")),
        }
        out
    }
}

/// One prior conversation turn embedded in a webhook body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookHistoryItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub sender: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient_string")]
    pub message_type: Option<String>,
}

// ── Stored records ──────────────────────────────────────────────────

/// A customer message received through the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub chat_time: String,
    pub chat_name: String,
    pub phone_number: String,
    pub current_message: String,
    pub source: String,
    #[serde(default)]
    pub processed: bool,
}

impl InboundMessage {
    /// Build a message from a webhook event, filling the documented defaults.
    pub fn from_event(message_id: String, event: &WebhookEvent, now: DateTime<Utc>) -> Self {
        Self {
            message_id,
            chat_time: event
                .chat_time
                .clone()
                .unwrap_or_else(|| format_timestamp(now)),
            chat_name: event.chat_name.clone().unwrap_or_default(),
            phone_number: event.phone_number.clone().unwrap_or_default(),
            current_message: event.current_message.clone().unwrap_or_default(),
            source: event.source.clone().unwrap_or_else(|| "webhook".into()),
            processed: false,
        }
    }
}

/// A prior conversation turn tied to one stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub message_id: String,
    pub sender: String,
    pub content: String,
    pub timestamp: String,
    pub message_type: String,
}

impl HistoryEntry {
    pub fn from_item(message_id: &str, item: &WebhookHistoryItem, now: DateTime<Utc>) -> Self {
        Self {
            message_id: message_id.to_string(),
            sender: item.sender.clone().unwrap_or_default(),
            content: item.content.clone().unwrap_or_default(),
            timestamp: item
                .timestamp
                .as_deref()
                .map(normalize_timestamp)
                .unwrap_or_else(|| format_timestamp(now)),
            message_type: item.message_type.clone().unwrap_or_else(|| "text".into()),
        }
    }
}

// ── Analysis ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Sales,
    Support,
    Complaint,
    Inquiry,
    Technical,
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Support => "support",
            Self::Complaint => "complaint",
            Self::Inquiry => "inquiry",
            Self::Technical => "technical",
            Self::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Urgent,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    Critical,
    High,
    Normal,
    Low,
}

impl PriorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

/// Lowest and highest urgency score.
pub const MIN_URGENCY: u8 = 1;
pub const MAX_URGENCY: u8 = 10;

/// Structured business analysis of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub urgency_score: u8,
    pub category: Category,
    pub sentiment: Sentiment,
    /// Ordered as produced; duplicates are kept.
    pub keywords: Vec<String>,
    pub priority_level: PriorityLevel,
    pub action_required: bool,
    pub recommended_response_time: String,
    pub business_context: String,
    pub suggested_next_action: String,
    /// Set once the critical-contact escalation has been applied.
    #[serde(default)]
    pub escalated: bool,
}

impl AnalysisResult {
    /// The fixed analysis used whenever the model call or its parsing fails.
    pub fn fallback() -> Self {
        Self {
            urgency_score: 5,
            category: Category::General,
            sentiment: Sentiment::Neutral,
            keywords: vec!["message".into(), "analysis".into()],
            priority_level: PriorityLevel::Normal,
            action_required: true,
            recommended_response_time: "4hours".into(),
            business_context: "Standard customer message requiring review".into(),
            suggested_next_action: "Manual review required".into(),
            escalated: false,
        }
    }

    /// Force critical priority and raise urgency by 3, capped at 10.
    ///
    /// Applying this more than once has no further effect.
    pub fn escalate(&mut self) {
        if self.escalated {
            return;
        }
        self.priority_level = PriorityLevel::Critical;
        self.urgency_score = self.urgency_score.saturating_add(3).min(MAX_URGENCY);
        self.escalated = true;
    }
}

/// What the analysis engine produced, and whether it had to degrade.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Success(AnalysisResult),
    Degraded {
        analysis: AnalysisResult,
        reason: String,
    },
}

impl AnalysisOutcome {
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::Degraded {
            analysis: AnalysisResult::fallback(),
            reason: reason.into(),
        }
    }

    pub fn analysis(&self) -> &AnalysisResult {
        match self {
            Self::Success(analysis) | Self::Degraded { analysis, .. } => analysis,
        }
    }

    pub fn into_analysis(self) -> AnalysisResult {
        match self {
            Self::Success(analysis) | Self::Degraded { analysis, .. } => analysis,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn degradation_reason(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Degraded { reason, .. } => Some(reason),
        }
    }
}

// ── Routing ─────────────────────────────────────────────────────────

/// Outcome of forwarding a message to a downstream agent. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RoutingDecision {
    pub fn delivered(agent: &str, response: serde_json::Value) -> Self {
        Self {
            success: true,
            agent: Some(agent.to_string()),
            response: Some(response),
            error: None,
        }
    }

    pub fn failed(agent: Option<&str>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            agent: agent.map(str::to_string),
            response: None,
            error: Some(error.into()),
        }
    }
}

// ── Pipeline result ─────────────────────────────────────────────────

/// Response payload for one webhook run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Row id assigned by the store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    /// Present when the fallback analysis was used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_degraded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineResult {
    pub fn completed(
        message_id: String,
        database_id: i64,
        outcome: AnalysisOutcome,
        routing: RoutingDecision,
    ) -> Self {
        let analysis_degraded = outcome.degradation_reason().map(str::to_string);
        Self {
            success: true,
            message_id: Some(message_id),
            database_id: Some(database_id),
            analysis: Some(outcome.into_analysis()),
            analysis_degraded,
            routing: Some(routing),
            processed_at: Some(Utc::now()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            database_id: None,
            analysis: None,
            analysis_degraded: None,
            routing: None,
            processed_at: None,
            error: Some(error.into()),
        }
    }
}

/// Message counts over a time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStats {
    pub total_messages: i64,
    pub processed_messages: i64,
    pub pending_messages: i64,
}
