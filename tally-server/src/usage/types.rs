use super::stats::StatisticsSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Schema version written into every persisted envelope.
pub const SUPPORTED_VERSION: u32 = 1;

/// Persistence error types
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{action} {path:?}: {source}")]
    FileOp {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Usage file {path:?} is corrupted: {reason}")]
    Corrupted {
        path: PathBuf,
        quarantined: Option<PathBuf>,
        reason: String,
    },

    #[error("Unsupported version: {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

impl PersistenceError {
    pub(crate) fn file_op(
        action: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| PersistenceError::FileOp {
            action,
            path,
            source,
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::SerializationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Versioned wrapper written to disk around a statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEnvelope {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub data: StatisticsSnapshot,
}

impl PersistedEnvelope {
    /// Wrap a snapshot, stamping it with the current UTC time
    pub fn new(data: StatisticsSnapshot) -> Self {
        Self {
            version: SUPPORTED_VERSION,
            saved_at: Utc::now(),
            data,
        }
    }
}

/// Token counters attached to a single upstream request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
}

impl TokenStats {
    /// Fill in `total_tokens` when the upstream did not report it
    pub fn normalized(mut self) -> Self {
        if self.total_tokens == 0 {
            self.total_tokens = self
                .input_tokens
                .saturating_add(self.output_tokens)
                .saturating_add(self.reasoning_tokens);
        }
        self
    }
}

/// One usage event emitted by the request path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageRecord {
    /// API key or provider the request was served through
    pub api: String,
    pub model: String,
    pub requested_at: Option<DateTime<Utc>>,
    pub source: String,
    pub auth_index: String,
    pub failed: bool,
    pub tokens: TokenStats,
}

/// Receiver of usage records.
///
/// Every registered plugin sees every record; what it does with it is up to
/// the plugin (aggregate, forward, or nothing at all).
pub trait UsagePlugin: Send + Sync {
    fn handle_usage(&self, record: &UsageRecord);
}
