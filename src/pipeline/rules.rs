//! Static rule tables for the pipeline.
//!
//! - `EscalationRules`: contacts and group names whose messages are forced to
//!   critical priority after analysis.
//! - `AgentRegistry`: the downstream agents and where they listen.
//! - `select_agent()`: the first-match routing rule.
//!
//! All tables are immutable once built and are handed to the components that
//! use them, so tests can substitute their own.

use tracing::debug;

use crate::pipeline::types::{AnalysisResult, Category, InboundMessage};

/// Agent names.
pub const GENERAL_PURPOSE: &str = "general_purpose";
pub const BUSINESS_WORKFLOW: &str = "business_workflow";
pub const CODE_DEBUGGER: &str = "code_debugger";
/// Registered but never selected by `select_agent()`.
pub const AGENT_HUB: &str = "agent_hub";

/// Urgency at or above which a message goes to the business-workflow agent.
const HIGH_URGENCY: u8 = 8;

// ── Escalation ──────────────────────────────────────────────────────

/// Important contacts and critical group names.
#[derive(Debug, Clone, Default)]
pub struct EscalationRules {
    important_contacts: Vec<String>,
    critical_groups: Vec<String>,
}

impl EscalationRules {
    /// The reference contact and group lists.
    pub fn default_rules() -> Self {
        Self {
            important_contacts: vec![
                "+905551234567".into(),
                "+905551234568".into(),
                "+905551234569".into(),
            ],
            critical_groups: vec![
                "VIP Customers".into(),
                "Technical Support".into(),
                "Sales Team".into(),
                "Management".into(),
                "Important Partners".into(),
                "İzer Management".into(),
            ],
        }
    }

    /// No escalation at all (for testing).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_contact(mut self, phone: &str) -> Self {
        self.important_contacts.push(phone.to_string());
        self
    }

    pub fn with_group(mut self, name: &str) -> Self {
        self.critical_groups.push(name.to_string());
        self
    }

    /// Exact phone match, or a critical group name contained in the chat name.
    /// Both comparisons are case-sensitive.
    pub fn is_critical(&self, message: &InboundMessage) -> bool {
        let by_phone = self
            .important_contacts
            .iter()
            .any(|p| p == &message.phone_number);
        let by_group = self
            .critical_groups
            .iter()
            .any(|g| message.chat_name.contains(g.as_str()));

        if by_phone || by_group {
            debug!(
                phone = %message.phone_number,
                chat = %message.chat_name,
                by_phone,
                by_group,
                "Critical contact matched"
            );
        }
        by_phone || by_group
    }

    /// Escalate the analysis when the message comes from a critical contact.
    /// Returns whether escalation applied.
    pub fn apply(&self, message: &InboundMessage, analysis: &mut AnalysisResult) -> bool {
        if self.is_critical(message) {
            analysis.escalate();
            true
        } else {
            false
        }
    }
}

// ── Agent registry ──────────────────────────────────────────────────

/// One downstream processing agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEndpoint {
    pub name: String,
    /// Base address; messages are POSTed to `{url}/process`.
    pub url: String,
    pub capabilities: Vec<String>,
}

impl AgentEndpoint {
    pub fn process_url(&self) -> String {
        format!("{}/process", self.url.trim_end_matches('/'))
    }
}

/// Fixed mapping from agent name to endpoint.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<AgentEndpoint>,
}

impl AgentRegistry {
    /// The four reference agents on localhost.
    pub fn default_agents() -> Self {
        Self::empty()
            .with_agent(
                GENERAL_PURPOSE,
                "http://localhost:8095",
                &["research", "analysis", "general"],
            )
            .with_agent(
                BUSINESS_WORKFLOW,
                "http://localhost:8093",
                &["workflow", "monitoring", "business"],
            )
            .with_agent(CODE_DEBUGGER, "http://localhost:8094", &["debug", "code", "technical"])
            .with_agent(AGENT_HUB, "http://localhost:8092", &["routing", "coordination"])
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Register an agent, replacing any existing entry with the same name.
    pub fn with_agent(mut self, name: &str, url: &str, capabilities: &[&str]) -> Self {
        self.agents.retain(|a| a.name != name);
        self.agents.push(AgentEndpoint {
            name: name.to_string(),
            url: url.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&AgentEndpoint> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

// ── Routing rule ────────────────────────────────────────────────────

/// Pick the downstream agent for an analysis. First match wins:
///
/// 1. technical or support category, or urgency >= 8 → business workflow
/// 2. the exact keyword `code` → code debugger
/// 3. everything else → general purpose
pub fn select_agent(analysis: &AnalysisResult) -> &'static str {
    if matches!(analysis.category, Category::Technical | Category::Support)
        || analysis.urgency_score >= HIGH_URGENCY
    {
        BUSINESS_WORKFLOW
    } else if analysis.keywords.iter().any(|k| k == "code") {
        CODE_DEBUGGER
    } else {
        GENERAL_PURPOSE
    }
}
