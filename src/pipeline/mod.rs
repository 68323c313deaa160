//! Webhook intake pipeline.
//!
//! Every inbound event flows through:
//! 1. `WebhookProcessor::process_webhook()`: id resolution and persistence
//! 2. `AnalysisEngine::analyze()`: LLM analysis with history context
//! 3. `EscalationRules::apply()`: critical contacts and groups
//! 4. `RoutingDispatcher::route()`: forward to one downstream agent
//!
//! Only the message save is fatal. Every later step degrades and continues.

pub mod analysis;
pub mod dispatcher;
pub mod ids;
pub mod processor;
pub mod rules;
pub mod types;
