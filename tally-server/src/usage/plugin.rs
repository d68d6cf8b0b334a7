use super::codec;
use super::path::resolve_path;
use super::stats::{MergeOutcome, RequestStatistics};
use super::types::{PersistedEnvelope, Result, UsagePlugin, UsageRecord};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`FileUsagePlugin`]. A stopped plugin cannot be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginPhase {
    Idle,
    Running,
    Stopping,
    Stopped,
}

struct PluginState {
    file_path: PathBuf,
    phase: PluginPhase,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Persists usage statistics to a JSON file.
///
/// Restores the file on start (optionally), saves on a fixed interval in a
/// background task, and performs one last save on stop.
pub struct FileUsagePlugin {
    interval: Duration,
    restore_on_start: bool,
    stats: Option<Arc<RequestStatistics>>,
    state: Mutex<PluginState>,
    /// Serializes restore and save so they never interleave on the file
    io_lock: tokio::sync::Mutex<()>,
}

impl FileUsagePlugin {
    /// Create a plugin for `file_path` (a leading `~` is expanded).
    ///
    /// A zero `interval` disables periodic saving; the file is then only
    /// written on [`stop`](Self::stop).
    pub fn new(
        file_path: &str,
        interval: Duration,
        restore_on_start: bool,
        stats: Option<Arc<RequestStatistics>>,
    ) -> Self {
        Self {
            interval,
            restore_on_start,
            stats,
            state: Mutex::new(PluginState {
                file_path: resolve_path(file_path),
                phase: PluginPhase::Idle,
                stop_tx: None,
                task: None,
            }),
            io_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn file_path(&self) -> PathBuf {
        self.state.lock().file_path.clone()
    }

    pub fn phase(&self) -> PluginPhase {
        self.state.lock().phase
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the periodic save task is currently alive
    pub fn has_periodic_task(&self) -> bool {
        self.state
            .lock()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Restore (if configured) and launch the periodic save task.
    ///
    /// Restore failures are logged and never abort startup.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.phase != PluginPhase::Idle {
                warn!(
                    "usage: persistence plugin already {:?}, ignoring start",
                    state.phase
                );
                return;
            }
            state.phase = PluginPhase::Running;
        }

        if self.restore_on_start {
            if let Err(e) = self.load().await {
                warn!(
                    "usage: failed to restore from {}: {}",
                    self.file_path().display(),
                    e
                );
            }
        }

        if self.interval.is_zero() {
            debug!("usage: periodic save disabled, saving on shutdown only");
            return;
        }

        let mut state = self.state.lock();
        // stop() may have run while we were restoring
        if state.phase != PluginPhase::Running {
            return;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        state.stop_tx = Some(stop_tx);
        state.task = Some(tokio::spawn(Arc::clone(self).run(stop_rx)));
    }

    /// Stop the periodic task and flush the current statistics.
    ///
    /// Only the first call does anything; it waits for the background task
    /// to exit before the final save. Save failures are logged, not
    /// returned, so shutdown is never blocked by persistence.
    pub async fn stop(&self) {
        let (stop_tx, task) = {
            let mut state = self.state.lock();
            match state.phase {
                PluginPhase::Stopping | PluginPhase::Stopped => return,
                PluginPhase::Idle => {
                    // Never started means never restored; saving now would
                    // clobber the file with an incomplete view.
                    state.phase = PluginPhase::Stopped;
                    return;
                }
                PluginPhase::Running => {}
            }
            state.phase = PluginPhase::Stopping;
            (state.stop_tx.take(), state.task.take())
        };

        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("usage: periodic save task ended abnormally: {}", e);
            }
        }

        if let Err(e) = self.save().await {
            error!("usage: final save failed: {}", e);
        }

        self.state.lock().phase = PluginPhase::Stopped;
    }

    async fn run(self: Arc<Self>, mut stop_rx: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.save().await {
                        error!("usage: periodic save failed: {}", e);
                    }
                }
                _ = &mut stop_rx => return,
            }
        }
    }

    /// Write the current statistics snapshot to disk atomically
    pub async fn save(&self) -> Result<()> {
        let Some(stats) = self.stats.as_ref() else {
            return Ok(());
        };

        let path = self.file_path();
        let _guard = self.io_lock.lock().await;

        let envelope = PersistedEnvelope::new(stats.snapshot());
        codec::save(&path, &envelope).await?;

        debug!(
            "usage: saved statistics to {} (requests={}, tokens={})",
            path.display(),
            envelope.data.total_requests,
            envelope.data.total_tokens
        );
        Ok(())
    }

    /// Restore statistics from disk and merge them into the store.
    ///
    /// Returns `None` when there was nothing to restore.
    pub async fn load(&self) -> Result<Option<MergeOutcome>> {
        let Some(stats) = self.stats.as_ref() else {
            return Ok(None);
        };

        let path = self.file_path();
        let _guard = self.io_lock.lock().await;

        let Some(envelope) = codec::load(&path).await? else {
            debug!("usage: no statistics file at {}, starting fresh", path.display());
            return Ok(None);
        };

        let outcome = stats.merge_snapshot(envelope.data);
        info!(
            "usage: restored from {} (added={}, skipped={})",
            path.display(),
            outcome.added,
            outcome.skipped
        );
        Ok(Some(outcome))
    }
}

impl UsagePlugin for FileUsagePlugin {
    fn handle_usage(&self, _record: &UsageRecord) {
        // Aggregation happens in RequestStatistics; this plugin only
        // persists what it has collected.
    }
}
