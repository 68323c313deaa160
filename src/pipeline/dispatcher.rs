//! Routing dispatcher: forwards a message and its analysis to a downstream agent.
//!
//! Failures are reported in the returned `RoutingDecision` and never retried.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use crate::error::RoutingError;
use crate::pipeline::rules::{AgentRegistry, select_agent};
use crate::pipeline::types::{AnalysisResult, RoutingDecision};

/// Upper bound on a single agent call.
pub const AGENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Name this service reports as the routing actor.
pub const ROUTED_BY: &str = "enhanced_webhook_processor";

/// Body POSTed to `{agent}/process`.
#[derive(Debug, Serialize)]
pub struct DispatchEnvelope<'a> {
    pub message: &'a serde_json::Value,
    pub analysis: &'a AnalysisResult,
    pub routing_info: RoutingInfo,
}

#[derive(Debug, Serialize)]
pub struct RoutingInfo {
    pub routed_by: String,
    pub timestamp: String,
    pub reason: String,
}

/// Routing dispatcher.
pub struct RoutingDispatcher {
    client: reqwest::Client,
    registry: AgentRegistry,
    timeout: Duration,
}

impl RoutingDispatcher {
    pub fn new(registry: AgentRegistry) -> Self {
        Self {
            client: reqwest::Client::new(),
            registry,
            timeout: AGENT_TIMEOUT,
        }
    }

    /// Override the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Select an agent for `analysis` and forward `message` to it.
    pub async fn route(
        &self,
        message: &serde_json::Value,
        analysis: &AnalysisResult,
    ) -> RoutingDecision {
        let agent = select_agent(analysis);
        match self.dispatch(agent, message, analysis).await {
            Ok(response) => {
                info!(agent, "Message routed");
                RoutingDecision::delivered(agent, response)
            }
            Err(e) => {
                error!(agent, error = %e, "Routing to agent failed");
                RoutingDecision::failed(Some(agent), e.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        agent: &str,
        message: &serde_json::Value,
        analysis: &AnalysisResult,
    ) -> Result<serde_json::Value, RoutingError> {
        let endpoint = self
            .registry
            .get(agent)
            .ok_or_else(|| RoutingError::UnknownAgent(agent.to_string()))?;

        let envelope = DispatchEnvelope {
            message,
            analysis,
            routing_info: RoutingInfo {
                routed_by: ROUTED_BY.to_string(),
                timestamp: Utc::now().to_rfc3339(),
                reason: routing_reason(analysis),
            },
        };

        let resp = self
            .client
            .post(endpoint.process_url())
            .timeout(self.timeout)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| RoutingError::Request(e.to_string()))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(RoutingError::Status(status.as_u16()));
        }

        resp.json()
            .await
            .map_err(|e| RoutingError::Request(format!("invalid response body: {e}")))
    }
}

/// Human-readable routing reason.
pub fn routing_reason(analysis: &AnalysisResult) -> String {
    format!(
        "Category: {}, Urgency: {}",
        analysis.category, analysis.urgency_score
    )
}
