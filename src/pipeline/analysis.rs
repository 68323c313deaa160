//! Analysis engine: derives business metadata for a message with an LLM.
//!
//! Flow:
//! 1. Fetch recent history for the contact
//! 2. Build the prompt (current message + last five turns)
//! 3. LLM completion → structured JSON
//! 4. Critical-contact escalation
//!
//! Any failure in steps 1–3 degrades to the fixed fallback analysis; the
//! engine never returns an error.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::llm::{COMPLETION_TIMEOUT, ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::rules::EscalationRules;
use crate::pipeline::types::{
    AnalysisOutcome, AnalysisResult, Category, HistoryEntry, InboundMessage, MAX_URGENCY,
    MIN_URGENCY, PriorityLevel, Sentiment,
};
use crate::store::traits::{DEFAULT_HISTORY_LIMIT, Database};

/// History turns included in the prompt.
const CONTEXT_TURNS: usize = 5;

const ANALYSIS_MAX_TOKENS: u32 = 1000;

const ANALYSIS_TEMPERATURE: f32 = 0.3;

const NO_HISTORY: &str = "No previous conversation history available.";

/// Analysis engine.
pub struct AnalysisEngine {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn Database>,
    escalation: EscalationRules,
    timeout: Duration,
}

impl AnalysisEngine {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn Database>,
        escalation: EscalationRules,
    ) -> Self {
        Self {
            llm,
            store,
            escalation,
            timeout: COMPLETION_TIMEOUT,
        }
    }

    /// Override the completion deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Analyze one message. Always produces an analysis.
    pub async fn analyze(&self, message: &InboundMessage) -> AnalysisOutcome {
        match self.try_analyze(message).await {
            Ok(mut analysis) => {
                if self.escalation.apply(message, &mut analysis) {
                    info!(
                        message_id = %message.message_id,
                        urgency = analysis.urgency_score,
                        "Critical contact, priority escalated"
                    );
                }
                AnalysisOutcome::Success(analysis)
            }
            Err(reason) => {
                warn!(
                    message_id = %message.message_id,
                    reason = %reason,
                    "Analysis degraded to fallback"
                );
                AnalysisOutcome::degraded(reason)
            }
        }
    }

    async fn try_analyze(&self, message: &InboundMessage) -> Result<AnalysisResult, String> {
        let history = self
            .store
            .recent_history(
                &message.phone_number,
                &message.chat_name,
                DEFAULT_HISTORY_LIMIT,
            )
            .await
            .map_err(|e| format!("history lookup failed: {e}"))?;

        let context = build_history_context(&history);
        debug!(
            message_id = %message.message_id,
            history = history.len(),
            "Built analysis context"
        );

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_analysis_system_prompt()),
            ChatMessage::user(build_analysis_user_prompt(message, &context)),
        ])
        .with_temperature(ANALYSIS_TEMPERATURE)
        .with_max_tokens(ANALYSIS_MAX_TOKENS);

        let response = tokio::time::timeout(self.timeout, self.llm.complete(request))
            .await
            .map_err(|_| format!("LLM call timed out after {:?}", self.timeout))?
            .map_err(|e| format!("LLM call failed: {e}"))?;
        debug!(
            message_id = %message.message_id,
            model = self.llm.model_name(),
            total_tokens = ?response.total_tokens,
            "Analysis completion received"
        );

        parse_analysis_response(&response.content).map_err(|e| {
            warn!(
                raw_response = %response.content,
                error = %e,
                "Failed to parse analysis response"
            );
            format!("parse failed: {e}")
        })
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Format history for the prompt.
///
/// `history` is newest first, as returned by the store. The newest five
/// entries are rendered oldest first as `[timestamp] sender: content`.
pub fn build_history_context(history: &[HistoryEntry]) -> String {
    if history.is_empty() {
        return NO_HISTORY.to_string();
    }

    history
        .iter()
        .take(CONTEXT_TURNS)
        .rev()
        .map(|h| format!("[{}] {}: {}", h.timestamp, h.sender, h.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_analysis_system_prompt() -> String {
    "You are an AI assistant analyzing customer messages for İzer bicycle business. \
     Provide accurate business intelligence."
        .to_string()
}

fn build_analysis_user_prompt(message: &InboundMessage, context: &str) -> String {
    format!(
        "Analyze this message with its conversation history for İzer's bicycle business:\n\n\
         Current Message: \"{}\"\n\
         From: {} ({})\n\n\
         Conversation History:\n{}\n\n\
         Please provide analysis in this exact JSON format:\n\
         {{\n\
         \x20   \"urgency_score\": 1-10,\n\
         \x20   \"category\": \"sales|support|complaint|inquiry|technical|general\",\n\
         \x20   \"sentiment\": \"positive|negative|neutral|urgent\",\n\
         \x20   \"keywords\": [\"key\", \"words\", \"from\", \"message\"],\n\
         \x20   \"priority_level\": \"critical|high|normal|low\",\n\
         \x20   \"action_required\": true/false,\n\
         \x20   \"recommended_response_time\": \"immediate|1hour|4hours|24hours\",\n\
         \x20   \"business_context\": \"brief context about customer/situation\",\n\
         \x20   \"suggested_next_action\": \"what should be done next\"\n\
         }}",
        message.current_message, message.chat_name, message.phone_number, context
    )
}

// ── Response parsing ────────────────────────────────────────────────

/// LLM analysis response structure.
#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    urgency_score: f64,
    category: Category,
    sentiment: Sentiment,
    keywords: Vec<String>,
    priority_level: PriorityLevel,
    action_required: bool,
    #[serde(default)]
    recommended_response_time: String,
    #[serde(default)]
    business_context: String,
    #[serde(default)]
    suggested_next_action: String,
}

/// Parse the model's reply into an `AnalysisResult`.
fn parse_analysis_response(raw: &str) -> Result<AnalysisResult, String> {
    let json_str = extract_json_object(raw);
    let response: AnalysisResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    if !response.urgency_score.is_finite() {
        return Err("urgency_score is not a number".into());
    }
    let urgency = response
        .urgency_score
        .round()
        .clamp(f64::from(MIN_URGENCY), f64::from(MAX_URGENCY)) as u8;

    Ok(AnalysisResult {
        urgency_score: urgency,
        category: response.category,
        sentiment: response.sentiment,
        keywords: response.keywords,
        priority_level: response.priority_level,
        action_required: response.action_required,
        recommended_response_time: response.recommended_response_time,
        business_context: response.business_context,
        suggested_next_action: response.suggested_next_action,
        escalated: false,
    })
}

/// Pull a JSON object out of a reply that may be wrapped in markdown.
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
