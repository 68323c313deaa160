//! Webhook processor: runs one inbound event through the whole pipeline.
//!
//! Flow:
//! 1. Resolve the message id (generate one if absent)
//! 2. Persist the message (the only fatal step)
//! 3. Persist embedded history, if any
//! 4. Analyze
//! 5. Persist the analysis
//! 6. Route to a downstream agent
//! 7. Assemble the result
//!
//! Steps run sequentially; failures after step 2 are logged and the run continues.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::pipeline::analysis::AnalysisEngine;
use crate::pipeline::dispatcher::RoutingDispatcher;
use crate::pipeline::ids::IdGenerator;
use crate::pipeline::types::{HistoryEntry, InboundMessage, PipelineResult, WebhookEvent};
use crate::store::traits::Database;

/// Webhook processor.
pub struct WebhookProcessor {
    store: Arc<dyn Database>,
    analyzer: AnalysisEngine,
    dispatcher: RoutingDispatcher,
    ids: Arc<dyn IdGenerator>,
}

impl WebhookProcessor {
    pub fn new(
        store: Arc<dyn Database>,
        analyzer: AnalysisEngine,
        dispatcher: RoutingDispatcher,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            analyzer,
            dispatcher,
            ids,
        }
    }

    /// Process one webhook body. Never fails; errors become a failure result.
    pub async fn process_webhook(&self, raw: serde_json::Value) -> PipelineResult {
        match self.run(raw).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Error processing webhook");
                PipelineResult::failed(e.to_string())
            }
        }
    }

    async fn run(&self, mut raw: serde_json::Value) -> Result<PipelineResult, PipelineError> {
        debug!(payload = %raw, "Processing webhook");

        let event: WebhookEvent = serde_json::from_value(raw.clone())
            .map_err(|e| PipelineError::InvalidPayload(e.to_string()))?;

        let message_id = match event.message_id.as_deref() {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => self.ids.next_id(),
        };

        // The forwarded copy always carries the id the message was stored under.
        if let Some(obj) = raw.as_object_mut() {
            obj.insert(
                "message_id".into(),
                serde_json::Value::String(message_id.clone()),
            );
        }

        let now = Utc::now();
        let message = InboundMessage::from_event(message_id.clone(), &event, now);

        let database_id = match self.store.insert_message(&message).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    message_id = %message_id,
                    payload = %raw,
                    error = %e,
                    "Failed to save webhook message to database"
                );
                return Err(PipelineError::MessageSave(e));
            }
        };

        let history = event.history_items();
        for reason in &history.skipped {
            warn!(message_id = %message_id, reason = %reason, "Skipping unreadable history item");
        }
        if !history.items.is_empty() {
            let entries: Vec<HistoryEntry> = history
                .items
                .iter()
                .map(|item| HistoryEntry::from_item(&message_id, item, now))
                .collect();
            match self.store.insert_history(&message_id, &entries).await {
                Ok(written) => debug!(message_id = %message_id, written, "History saved"),
                Err(e) => error!(
                    message_id = %message_id,
                    entries = entries.len(),
                    error = %e,
                    "Error saving message history"
                ),
            }
        }

        let outcome = self.analyzer.analyze(&message).await;

        if let Err(e) = self
            .store
            .insert_analysis(&message_id, outcome.analysis(), outcome.is_degraded())
            .await
        {
            error!(message_id = %message_id, error = %e, "Error saving analysis result");
        }

        let routing = self.dispatcher.route(&raw, outcome.analysis()).await;
        if !routing.success {
            warn!(
                message_id = %message_id,
                error = routing.error.as_deref().unwrap_or("unknown"),
                "Message stored but not delivered to an agent"
            );
        }

        info!(
            message_id = %message_id,
            database_id,
            degraded = outcome.is_degraded(),
            routed = routing.success,
            "Successfully processed message"
        );
        Ok(PipelineResult::completed(
            message_id,
            database_id,
            outcome,
            routing,
        ))
    }
}
