//! Service lifecycle coordination
//!
//! Ties the usage service to process shutdown: SIGINT/SIGTERM (and the
//! optional keep-alive idle timeout) cancel one token, the service returns,
//! and only then does the persistence plugin take its final snapshot.

use crate::config::ServerConfig;
use crate::service::{Hooks, ServiceContext, ServiceError, UsageService};
use crate::usage::{FileUsagePlugin, RequestStatistics};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Idle timeout applied to the keep-alive endpoint
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(10);

type ReadyHook = Box<dyn FnOnce(ServiceContext) + Send>;

/// Builds the service, runs it until shutdown, and brackets the run with
/// the persistence plugin's start and stop.
pub struct LifecycleCoordinator {
    config: ServerConfig,
    local_password: Option<String>,
    keep_alive_timeout: Duration,
    statistics: Arc<RequestStatistics>,
    on_ready: Option<ReadyHook>,
}

impl LifecycleCoordinator {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            local_password: None,
            keep_alive_timeout: KEEP_ALIVE_TIMEOUT,
            statistics: Arc::new(RequestStatistics::new()),
            on_ready: None,
        }
    }

    /// Password for local management requests; enables the idle keep-alive
    /// policy when non-empty.
    pub fn with_local_password(mut self, password: impl Into<String>) -> Self {
        self.local_password = Some(password.into());
        self
    }

    pub fn with_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    pub fn with_statistics(mut self, statistics: Arc<RequestStatistics>) -> Self {
        self.statistics = statistics;
        self
    }

    /// Called once the service is bound and persistence has been restored
    pub fn on_ready<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(ServiceContext) + Send + 'static,
    {
        self.on_ready = Some(Box::new(hook));
        self
    }

    pub fn statistics(&self) -> Arc<RequestStatistics> {
        self.statistics.clone()
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run_until_signal(self) -> Result<(), ServiceError> {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        let listener = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => trigger.cancel(),
                _ = trigger.cancelled() => {}
            }
        });

        let result = self.run(shutdown.clone()).await;
        shutdown.cancel();
        let _ = listener.await;
        result
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Build failures are logged and returned without ever starting
    /// persistence. Failures of the run itself are logged; persistence is
    /// stopped (with its final save) either way.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServiceError> {
        let usage = &self.config.usage_statistics;
        let file_plugin = usage.persist_enabled().then(|| {
            Arc::new(FileUsagePlugin::new(
                &usage.persist_file,
                usage.save_interval(),
                usage.restore_on_start,
                Some(self.statistics.clone()),
            ))
        });

        let mut builder = UsageService::builder()
            .with_config(self.config.clone())
            .with_statistics(self.statistics.clone());

        let plugin = file_plugin.clone();
        let on_ready = self.on_ready;
        builder = builder.with_hooks(Hooks::default().on_after_start(move |ctx| async move {
            if let Some(plugin) = plugin {
                plugin.start().await;
                info!(
                    "Usage statistics persistence enabled: {}",
                    plugin.file_path().display()
                );
            }
            if let Some(on_ready) = on_ready {
                on_ready(ctx);
            }
        }));
        if let Some(plugin) = &file_plugin {
            builder = builder.with_usage_plugin(plugin.clone());
        }

        // Idle expiry cancels only this run; the caller's token stays as is
        let run_token = shutdown.child_token();
        if let Some(password) = self.local_password.filter(|p| !p.is_empty()) {
            let idle_token = run_token.clone();
            let timeout = self.keep_alive_timeout;
            builder = builder
                .with_local_management_password(password)
                .with_keep_alive(timeout, move || {
                    warn!("keep-alive endpoint idle for {:?}, shutting down", timeout);
                    idle_token.cancel();
                });
        }

        let service = match builder.build() {
            Ok(service) => service,
            Err(e) => {
                error!("failed to build usage service: {}", e);
                return Err(e);
            }
        };

        match service.run(run_token).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => info!("Usage service shut down"),
            Err(e) => error!("usage service exited with error: {}", e),
        }

        if let Some(plugin) = file_plugin {
            plugin.stop().await;
        }

        Ok(())
    }
}

/// Resolves on the first SIGINT (Ctrl+C) or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("unable to install Ctrl+C signal handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("unable to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Idle until a shutdown signal arrives.
///
/// Used when no configuration file exists yet: the process stays up for an
/// orchestrator to provide one but does not serve anything.
pub async fn wait_for_cloud_deploy() {
    info!(
        "Cloud deploy mode: no config found; standing by for configuration. \
         API server is not started. Press Ctrl+C to exit."
    );
    shutdown_signal().await;
    info!("Cloud deploy mode: shutdown signal received; exiting");
}
