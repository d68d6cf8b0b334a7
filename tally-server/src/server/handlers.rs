use super::error::ApiError;
use super::keepalive::KeepAlive;
use crate::usage::{RequestStatistics, StatisticsSnapshot, UsagePlugin, UsageRecord};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub statistics: Arc<RequestStatistics>,
    /// Every plugin receives every usage record, the statistics store included
    pub plugins: Arc<[Arc<dyn UsagePlugin>]>,
    pub keep_alive: Option<Arc<KeepAlive>>,
}

impl AppState {
    pub fn new(statistics: Arc<RequestStatistics>) -> Self {
        Self::with_plugins(statistics, Vec::new())
    }

    /// State whose records reach `statistics` first, then `extra` in order
    pub fn with_plugins(
        statistics: Arc<RequestStatistics>,
        extra: Vec<Arc<dyn UsagePlugin>>,
    ) -> Self {
        let mut plugins: Vec<Arc<dyn UsagePlugin>> =
            vec![statistics.clone() as Arc<dyn UsagePlugin>];
        plugins.extend(extra);
        Self {
            statistics,
            plugins: plugins.into(),
            keep_alive: None,
        }
    }

    pub fn dispatch(&self, record: &UsageRecord) {
        for plugin in self.plugins.iter() {
            plugin.handle_usage(record);
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "tally",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Current usage statistics
pub async fn usage_snapshot(State(state): State<AppState>) -> Json<StatisticsSnapshot> {
    debug!("REST USAGE snapshot");
    Json(state.statistics.snapshot())
}

/// Record a single usage event
pub async fn record_usage(
    State(state): State<AppState>,
    Json(record): Json<UsageRecord>,
) -> StatusCode {
    debug!("REST USAGE record api={} model={}", record.api, record.model);
    state.dispatch(&record);
    StatusCode::ACCEPTED
}

/// Keep-alive ping from a local management client
pub async fn keep_alive(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(keep_alive) = state.keep_alive.as_ref() else {
        return Err(ApiError::NotFound("keep-alive is not enabled".to_string()));
    };

    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if !keep_alive.authorize(header) {
        return Err(ApiError::Unauthorized);
    }

    keep_alive.touch();
    Ok(Json(json!({
        "status": "ok",
        "timeout_secs": keep_alive.timeout().as_secs_f64(),
    })))
}
