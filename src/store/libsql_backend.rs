//! libSQL backend: async `Database` trait implementation.
//!
//! Supports a local file, an in-memory database, or a remote libSQL server.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params::Params;
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::DatabaseError;
use crate::pipeline::types::{
    AnalysisResult, HistoryEntry, InboundMessage, MessageStats, format_timestamp,
    normalize_timestamp,
};
use crate::store::migrations;
use crate::store::traits::{Database, StoredAnalysis};

/// Most history entries accepted in one batch (5 bound parameters each).
pub const MAX_HISTORY_BATCH: usize = 5000;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open the database described by `config` and run migrations.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        match config {
            DatabaseConfig::Local { path } => Self::new_local(path).await,
            DatabaseConfig::Remote { url, auth_token } => {
                Self::new_remote(url, auth_token.expose_secret()).await
            }
        }
    }

    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path).build().await.map_err(|e| {
            DatabaseError::Connection(format!("Failed to open libSQL database: {e}"))
        })?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Connect to a remote libSQL server and run migrations.
    pub async fn new_remote(url: &str, auth_token: &str) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to connect to {url}: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(url = %url, "Remote database connected");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Map a failed write, separating constraint violations from other failures.
fn write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let text = e.to_string();
    if text.contains("constraint failed") {
        DatabaseError::Constraint(format!("{op}: {text}"))
    } else {
        DatabaseError::Query(format!("{op}: {text}"))
    }
}

/// Decode a lowercase enum name stored as text.
fn parse_enum<T: DeserializeOwned>(column: &str, raw: String) -> Result<T, DatabaseError> {
    serde_json::from_value(serde_json::Value::String(raw))
        .map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

/// Map a libsql Row to an InboundMessage.
///
/// Column order matches MESSAGE_COLUMNS:
/// 0:message_id, 1:chat_time, 2:chat_name, 3:phone_number, 4:current_message,
/// 5:source, 6:processed
fn row_to_message(row: &libsql::Row) -> Result<InboundMessage, libsql::Error> {
    let processed: i64 = row.get(6)?;
    Ok(InboundMessage {
        message_id: row.get(0)?,
        chat_time: row.get(1)?,
        chat_name: row.get(2)?,
        phone_number: row.get(3)?,
        current_message: row.get(4)?,
        source: row.get(5)?,
        processed: processed != 0,
    })
}

fn row_to_history(row: &libsql::Row) -> Result<HistoryEntry, libsql::Error> {
    Ok(HistoryEntry {
        message_id: row.get(0)?,
        sender: row.get(1)?,
        content: row.get(2)?,
        timestamp: row.get(3)?,
        message_type: row.get(4)?,
    })
}

fn row_to_analysis(row: &libsql::Row) -> Result<StoredAnalysis, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("analysis row parse: {e}"));

    let urgency: i64 = row.get(1).map_err(get_err)?;
    let keywords_json: String = row.get(4).map_err(get_err)?;
    let keywords: Vec<String> = serde_json::from_str(&keywords_json)
        .map_err(|e| DatabaseError::Serialization(format!("keywords: {e}")))?;
    let action_required: i64 = row.get(6).map_err(get_err)?;
    let escalated: i64 = row.get(10).map_err(get_err)?;
    let degraded: i64 = row.get(11).map_err(get_err)?;

    Ok(StoredAnalysis {
        message_id: row.get(0).map_err(get_err)?,
        analysis: AnalysisResult {
            urgency_score: u8::try_from(urgency).unwrap_or(0),
            category: parse_enum("category", row.get(2).map_err(get_err)?)?,
            sentiment: parse_enum("sentiment", row.get(3).map_err(get_err)?)?,
            keywords,
            priority_level: parse_enum("priority_level", row.get(5).map_err(get_err)?)?,
            action_required: action_required != 0,
            recommended_response_time: row.get(7).map_err(get_err)?,
            business_context: row.get(8).map_err(get_err)?,
            suggested_next_action: row.get(9).map_err(get_err)?,
            escalated: escalated != 0,
        },
        degraded: degraded != 0,
    })
}

// ── Trait implementation ────────────────────────────────────────────

const MESSAGE_COLUMNS: &str =
    "message_id, chat_time, chat_name, phone_number, current_message, source, processed";

const ANALYSIS_COLUMNS: &str = "message_id, urgency_score, category, sentiment, keywords, priority_level, action_required, recommended_response_time, business_context, suggested_next_action, escalated, degraded, created_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::init_schema(self.conn()).await
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &InboundMessage) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "INSERT INTO webhook_messages (message_id, chat_time, chat_name, phone_number,
                    current_message, source, processed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 RETURNING id",
                params![
                    message.message_id.as_str(),
                    message.chat_time.as_str(),
                    message.chat_name.as_str(),
                    message.phone_number.as_str(),
                    message.current_message.as_str(),
                    message.source.as_str(),
                    i64::from(message.processed),
                    format_timestamp(Utc::now()),
                ],
            )
            .await
            .map_err(|e| write_error("insert_message", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| write_error("insert_message", e))?
            .ok_or_else(|| DatabaseError::Query("insert_message: no row id returned".into()))?;
        let id: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("insert_message: {e}")))?;

        debug!(id, message_id = %message.message_id, "Message inserted into DB");
        Ok(id)
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<InboundMessage>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM webhook_messages WHERE message_id = ?1"),
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let msg = row_to_message(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(msg))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message: {e}"))),
        }
    }

    async fn message_stats(&self, since: DateTime<Utc>) -> Result<MessageStats, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN processed = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN processed = 0 THEN 1 ELSE 0 END), 0)
                 FROM webhook_messages
                 WHERE created_at >= ?1",
                params![format_timestamp(since)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("message_stats: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let get_err = |e: libsql::Error| DatabaseError::Query(format!("message_stats: {e}"));
                Ok(MessageStats {
                    total_messages: row.get(0).map_err(get_err)?,
                    processed_messages: row.get(1).map_err(get_err)?,
                    pending_messages: row.get(2).map_err(get_err)?,
                })
            }
            Ok(None) => Ok(MessageStats::default()),
            Err(e) => Err(DatabaseError::Query(format!("message_stats: {e}"))),
        }
    }

    // ── History ─────────────────────────────────────────────────────

    async fn insert_history(
        &self,
        message_id: &str,
        entries: &[HistoryEntry],
    ) -> Result<usize, DatabaseError> {
        if entries.is_empty() {
            return Ok(0);
        }
        if entries.len() > MAX_HISTORY_BATCH {
            return Err(DatabaseError::Query(format!(
                "insert_history: {} entries exceeds batch limit of {MAX_HISTORY_BATCH}",
                entries.len()
            )));
        }

        // One multi-row statement, so the batch commits or fails as a unit.
        let mut sql = String::from(
            "INSERT INTO message_history (message_id, sender, content, timestamp, message_type) VALUES ",
        );
        let mut values = Vec::with_capacity(entries.len() * 5);
        for (i, entry) in entries.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            let base = i * 5;
            sql.push_str(&format!(
                "(?{}, ?{}, ?{}, ?{}, ?{})",
                base + 1,
                base + 2,
                base + 3,
                base + 4,
                base + 5
            ));
            values.push(Value::Text(message_id.to_string()));
            values.push(Value::Text(entry.sender.clone()));
            values.push(Value::Text(entry.content.clone()));
            values.push(Value::Text(normalize_timestamp(&entry.timestamp)));
            values.push(Value::Text(entry.message_type.clone()));
        }

        let written = self
            .conn()
            .execute(&sql, Params::Positional(values))
            .await
            .map_err(|e| write_error("insert_history", e))?;

        debug!(message_id, written, "History inserted into DB");
        Ok(written as usize)
    }

    async fn recent_history(
        &self,
        phone_number: &str,
        chat_name: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT mh.message_id, mh.sender, mh.content, mh.timestamp, mh.message_type
                 FROM message_history mh
                 JOIN webhook_messages wm ON mh.message_id = wm.message_id
                 WHERE (?1 <> '' AND wm.phone_number = ?1)
                    OR (?2 <> '' AND wm.chat_name = ?2)
                 ORDER BY mh.timestamp DESC, mh.id DESC
                 LIMIT ?3",
                params![phone_number, chat_name, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_history: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_history: {e}")))?
        {
            entries.push(
                row_to_history(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            );
        }
        Ok(entries)
    }

    // ── Analyses ────────────────────────────────────────────────────

    async fn insert_analysis(
        &self,
        message_id: &str,
        analysis: &AnalysisResult,
        degraded: bool,
    ) -> Result<(), DatabaseError> {
        let keywords = serde_json::to_string(&analysis.keywords)
            .map_err(|e| DatabaseError::Serialization(format!("keywords: {e}")))?;
        let id = Uuid::new_v4().to_string();

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO analytics_results (id, {ANALYSIS_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    id.clone(),
                    message_id,
                    i64::from(analysis.urgency_score),
                    analysis.category.as_str(),
                    analysis.sentiment.as_str(),
                    keywords,
                    analysis.priority_level.as_str(),
                    i64::from(analysis.action_required),
                    analysis.recommended_response_time.as_str(),
                    analysis.business_context.as_str(),
                    analysis.suggested_next_action.as_str(),
                    i64::from(analysis.escalated),
                    i64::from(degraded),
                    format_timestamp(Utc::now()),
                ],
            )
            .await
            .map_err(|e| write_error("insert_analysis", e))?;

        debug!(id = %id, message_id, degraded, "Analysis inserted into DB");
        Ok(())
    }

    async fn get_analysis(
        &self,
        message_id: &str,
    ) -> Result<Option<StoredAnalysis>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {ANALYSIS_COLUMNS} FROM analytics_results WHERE message_id = ?1"),
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_analysis: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_analysis(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_analysis: {e}"))),
        }
    }
}
