//! In-memory usage aggregation
//!
//! Accumulates per-request usage records into totals, per-API/per-model
//! breakdowns and day/hour buckets. Snapshots are plain values that can be
//! serialized and later merged back without double counting.

use super::types::{TokenStats, UsagePlugin, UsageRecord};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

const UNKNOWN: &str = "unknown";

/// Point-in-time copy of all aggregate counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsSnapshot {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_tokens: u64,
    pub apis: BTreeMap<String, ApiSnapshot>,
    pub requests_by_day: BTreeMap<String, u64>,
    pub requests_by_hour: BTreeMap<String, u64>,
    pub tokens_by_day: BTreeMap<String, u64>,
    pub tokens_by_hour: BTreeMap<String, u64>,
}

/// Usage of a single API key or provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSnapshot {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub models: BTreeMap<String, ModelSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSnapshot {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub details: Vec<RequestDetail>,
}

/// A single recorded request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDetail {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub auth_index: String,
    #[serde(default)]
    pub tokens: TokenStats,
    #[serde(default)]
    pub failed: bool,
}

/// Result of merging a restored snapshot into the live store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub added: u64,
    pub skipped: u64,
}

/// Identity of a request detail across restarts
#[derive(Debug, PartialEq, Eq, Hash)]
struct DedupKey {
    api: String,
    model: String,
    timestamp: DateTime<Utc>,
    source: String,
    auth_index: String,
    failed: bool,
    tokens: TokenStats,
}

impl DedupKey {
    fn new(api: &str, model: &str, detail: &RequestDetail) -> Self {
        Self {
            api: api.to_string(),
            model: model.to_string(),
            timestamp: detail.timestamp,
            source: detail.source.clone(),
            auth_index: detail.auth_index.clone(),
            failed: detail.failed,
            tokens: detail.tokens,
        }
    }
}

impl StatisticsSnapshot {
    fn apply(&mut self, api: &str, model: &str, detail: RequestDetail) {
        let tokens = detail.tokens.total_tokens;
        let day = detail.timestamp.format("%Y-%m-%d").to_string();
        let hour = detail.timestamp.format("%H").to_string();

        self.total_requests += 1;
        if detail.failed {
            self.failure_count += 1;
        } else {
            self.success_count += 1;
        }
        self.total_tokens = self.total_tokens.saturating_add(tokens);

        *self.requests_by_day.entry(day.clone()).or_default() += 1;
        *self.requests_by_hour.entry(hour.clone()).or_default() += 1;
        let day_tokens = self.tokens_by_day.entry(day).or_default();
        *day_tokens = day_tokens.saturating_add(tokens);
        let hour_tokens = self.tokens_by_hour.entry(hour).or_default();
        *hour_tokens = hour_tokens.saturating_add(tokens);

        let api_entry = self.apis.entry(api.to_string()).or_default();
        api_entry.total_requests += 1;
        api_entry.total_tokens = api_entry.total_tokens.saturating_add(tokens);

        let model_entry = api_entry.models.entry(model.to_string()).or_default();
        model_entry.total_requests += 1;
        model_entry.total_tokens = model_entry.total_tokens.saturating_add(tokens);
        model_entry.details.push(detail);
    }

    fn dedup_keys(&self) -> HashSet<DedupKey> {
        let mut keys = HashSet::new();
        for (api, api_entry) in &self.apis {
            for (model, model_entry) in &api_entry.models {
                for detail in &model_entry.details {
                    keys.insert(DedupKey::new(api, model, detail));
                }
            }
        }
        keys
    }
}

fn normalize_label(value: &str) -> &str {
    let trimmed = value.trim();
    if trimmed.is_empty() { UNKNOWN } else { trimmed }
}

/// Thread-safe usage statistics store shared by the request path and the
/// persistence plugin
#[derive(Debug, Default)]
pub struct RequestStatistics {
    state: RwLock<StatisticsSnapshot>,
}

impl RequestStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a single usage event
    pub fn record(&self, record: &UsageRecord) {
        let detail = RequestDetail {
            timestamp: record.requested_at.unwrap_or_else(Utc::now),
            source: record.source.clone(),
            auth_index: record.auth_index.clone(),
            tokens: record.tokens.normalized(),
            failed: record.failed,
        };

        let api = normalize_label(&record.api);
        let model = normalize_label(&record.model);

        self.state.write().apply(api, model, detail);
    }

    /// Consistent point-in-time copy of the counters
    pub fn snapshot(&self) -> StatisticsSnapshot {
        self.state.read().clone()
    }

    /// Fold a previously persisted snapshot into the live counters.
    ///
    /// Details already present (same API, model, timestamp, source, auth
    /// index, outcome and tokens) are skipped, so restoring the same file
    /// twice does not double count.
    pub fn merge_snapshot(&self, snapshot: StatisticsSnapshot) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut state = self.state.write();
        let mut seen = state.dedup_keys();

        for (api, api_entry) in snapshot.apis {
            let api = normalize_label(&api).to_string();
            for (model, model_entry) in api_entry.models {
                let model = normalize_label(&model).to_string();
                for mut detail in model_entry.details {
                    detail.tokens = detail.tokens.normalized();
                    if !seen.insert(DedupKey::new(&api, &model, &detail)) {
                        outcome.skipped += 1;
                        continue;
                    }
                    state.apply(&api, &model, detail);
                    outcome.added += 1;
                }
            }
        }

        debug!(
            "usage: merged snapshot (added={}, skipped={})",
            outcome.added, outcome.skipped
        );
        outcome
    }
}

impl UsagePlugin for RequestStatistics {
    fn handle_usage(&self, record: &UsageRecord) {
        self.record(record);
    }
}
