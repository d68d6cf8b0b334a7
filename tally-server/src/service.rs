//! HTTP usage service
//!
//! Built with [`ServiceBuilder`], run until a [`CancellationToken`] fires.
//! After-start hooks run once the listener is bound and before the first
//! request is served.

use crate::config::ServerConfig;
use crate::server::{AppState, KeepAlive, create_router};
use crate::usage::{RequestStatistics, UsagePlugin};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Service errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Missing configuration")]
    MissingConfig,

    #[error("Invalid listen address {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("Keep-alive requires a local management password")]
    KeepAliveWithoutPassword,

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),

    /// The run ended because its cancellation token fired
    #[error("Service cancelled")]
    Cancelled,
}

impl ServiceError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// What an after-start hook gets to see of the running service
#[derive(Clone)]
pub struct ServiceContext {
    pub local_addr: SocketAddr,
    pub statistics: Arc<RequestStatistics>,
}

pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type AfterStartHook = Box<dyn FnOnce(ServiceContext) -> HookFuture + Send>;
type IdleCallback = Box<dyn FnOnce() + Send>;

/// Lifecycle hooks
#[derive(Default)]
pub struct Hooks {
    pub on_after_start: Option<AfterStartHook>,
}

impl Hooks {
    pub fn on_after_start<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(ServiceContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_after_start = Some(Box::new(move |ctx| Box::pin(hook(ctx))));
        self
    }
}

/// Builder for [`UsageService`]
#[derive(Default)]
pub struct ServiceBuilder {
    config: Option<ServerConfig>,
    local_password: Option<String>,
    statistics: Option<Arc<RequestStatistics>>,
    plugins: Vec<Arc<dyn UsagePlugin>>,
    hooks: Hooks,
    keep_alive: Option<(Duration, IdleCallback)>,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_local_management_password(mut self, password: impl Into<String>) -> Self {
        self.local_password = Some(password.into());
        self
    }

    pub fn with_statistics(mut self, statistics: Arc<RequestStatistics>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// Register an extra receiver for usage records
    pub fn with_usage_plugin(mut self, plugin: Arc<dyn UsagePlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Enable the keep-alive endpoint; `on_idle` runs once when no ping
    /// arrives within `timeout`.
    pub fn with_keep_alive<F>(mut self, timeout: Duration, on_idle: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.keep_alive = Some((timeout, Box::new(on_idle)));
        self
    }

    pub fn build(self) -> Result<UsageService, ServiceError> {
        let config = self.config.ok_or(ServiceError::MissingConfig)?;

        if config.server.host.trim().is_empty() {
            return Err(ServiceError::InvalidAddress {
                addr: config.server_addr(),
                reason: "empty host".to_string(),
            });
        }
        let addr = config.server_addr();

        let password = self.local_password.filter(|p| !p.is_empty());
        let keep_alive = match (self.keep_alive, password) {
            (Some((timeout, on_idle)), Some(password)) => {
                Some((Arc::new(KeepAlive::new(timeout, password)), on_idle))
            }
            (Some(_), None) => return Err(ServiceError::KeepAliveWithoutPassword),
            (None, _) => None,
        };

        Ok(UsageService {
            addr,
            statistics: self.statistics.unwrap_or_default(),
            plugins: self.plugins,
            hooks: self.hooks,
            keep_alive,
        })
    }
}

/// The running HTTP service
pub struct UsageService {
    addr: String,
    statistics: Arc<RequestStatistics>,
    plugins: Vec<Arc<dyn UsagePlugin>>,
    hooks: Hooks,
    keep_alive: Option<(Arc<KeepAlive>, IdleCallback)>,
}

impl UsageService {
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::new()
    }

    pub fn statistics(&self) -> Arc<RequestStatistics> {
        self.statistics.clone()
    }

    /// Serve until `shutdown` is cancelled.
    ///
    /// Returns [`ServiceError::Cancelled`] when the token ended the run, so
    /// callers can tell a requested shutdown from a failure.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServiceError> {
        let listener = tokio::net::TcpListener::bind(self.addr.as_str())
            .await
            .map_err(|source| ServiceError::Bind {
                addr: self.addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(ServiceError::Serve)?;

        let mut state = AppState::with_plugins(self.statistics.clone(), self.plugins);
        if let Some((keep_alive, on_idle)) = self.keep_alive {
            keep_alive.spawn_watchdog(on_idle, shutdown.clone());
            info!(
                "Keep-alive endpoint enabled (idle timeout {:?})",
                keep_alive.timeout()
            );
            state.keep_alive = Some(keep_alive);
        }

        if let Some(hook) = self.hooks.on_after_start {
            hook(ServiceContext {
                local_addr,
                statistics: self.statistics.clone(),
            })
            .await;
        }

        info!("Listening on http://{}", local_addr);

        let app = create_router(state);
        let signal = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
            .map_err(ServiceError::Serve)?;

        if shutdown.is_cancelled() {
            Err(ServiceError::Cancelled)
        } else {
            Ok(())
        }
    }
}
