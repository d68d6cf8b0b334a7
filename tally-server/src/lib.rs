pub mod config;
pub mod lifecycle;
pub mod server;
pub mod service;
pub mod usage;

// Re-export commonly used types
pub use config::{ConfigError, ServerConfig, UsageStatisticsConfig};
pub use lifecycle::{KEEP_ALIVE_TIMEOUT, LifecycleCoordinator};
pub use server::{AppState, create_router};
pub use service::{Hooks, ServiceBuilder, ServiceContext, ServiceError, UsageService};
pub use usage::{
    FileUsagePlugin, MergeOutcome, PersistedEnvelope, PersistenceError, RequestStatistics,
    StatisticsSnapshot, UsagePlugin, UsageRecord,
};
