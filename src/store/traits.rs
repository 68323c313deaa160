//! `Database` trait: the persistence gateway for the intake pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::pipeline::types::{AnalysisResult, HistoryEntry, InboundMessage, MessageStats};

/// Number of history entries fetched for analysis context by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// A stored analysis row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAnalysis {
    pub message_id: String,
    pub analysis: AnalysisResult,
    pub degraded: bool,
}

/// Backend-agnostic persistence for the intake pipeline.
///
/// Every method is a discrete write or read; nothing spans calls.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert one inbound message. Returns the storage row id.
    ///
    /// Fails with `DatabaseError::Constraint` if the message id already exists.
    async fn insert_message(&self, message: &InboundMessage) -> Result<i64, DatabaseError>;

    /// Look up a message by its message id.
    async fn get_message(&self, message_id: &str) -> Result<Option<InboundMessage>, DatabaseError>;

    /// Count messages created at or after `since`.
    async fn message_stats(&self, since: DateTime<Utc>) -> Result<MessageStats, DatabaseError>;

    // ── History ─────────────────────────────────────────────────────

    /// Insert history entries for an existing message.
    ///
    /// All-or-nothing: either every entry is stored or none is.
    /// Returns the number of rows written.
    async fn insert_history(
        &self,
        message_id: &str,
        entries: &[HistoryEntry],
    ) -> Result<usize, DatabaseError>;

    /// Most recent history entries for messages matching either the phone
    /// number or the contact name, newest first, at most `limit`.
    async fn recent_history(
        &self,
        phone_number: &str,
        chat_name: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, DatabaseError>;

    // ── Analyses ────────────────────────────────────────────────────

    /// Insert the analysis for a message. At most one per message.
    async fn insert_analysis(
        &self,
        message_id: &str,
        analysis: &AnalysisResult,
        degraded: bool,
    ) -> Result<(), DatabaseError>;

    /// Get the analysis stored for a message.
    async fn get_analysis(&self, message_id: &str)
    -> Result<Option<StoredAnalysis>, DatabaseError>;
}
