//! Usage statistics aggregation and file persistence
//!
//! Keeps request usage counters in memory and makes them survive restarts:
//! - `RequestStatistics` aggregates usage records and hands out snapshots
//! - `codec` writes versioned snapshots atomically and validates them on load
//! - `FileUsagePlugin` restores on start, saves periodically and on stop

pub mod codec;
pub mod path;
pub mod plugin;
pub mod stats;
pub mod types;

pub use path::resolve_path;
pub use plugin::{FileUsagePlugin, PluginPhase};
pub use stats::{
    ApiSnapshot, MergeOutcome, ModelSnapshot, RequestDetail, RequestStatistics,
    StatisticsSnapshot,
};
pub use types::{
    PersistedEnvelope, PersistenceError, Result, SUPPORTED_VERSION, TokenStats, UsagePlugin,
    UsageRecord,
};
