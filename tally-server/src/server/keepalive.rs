//! Idle keep-alive watchdog
//!
//! A local management client pings the keep-alive endpoint while it wants
//! the service up. When no ping arrives within the timeout the watchdog
//! fires its callback once and exits.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct KeepAlive {
    timeout: Duration,
    password: String,
    last_seen: Mutex<Instant>,
}

impl KeepAlive {
    pub fn new(timeout: Duration, password: impl Into<String>) -> Self {
        Self {
            timeout,
            password: password.into(),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record activity, pushing the idle deadline back
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Check an `Authorization: Bearer <password>` header value
    pub fn authorize(&self, header: Option<&str>) -> bool {
        header
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| !self.password.is_empty() && token.trim() == self.password)
    }

    /// Spawn the watchdog. `on_idle` runs at most once; the task also exits
    /// quietly when `shutdown` is cancelled first.
    pub fn spawn_watchdog<F>(
        self: &Arc<Self>,
        on_idle: F,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let keep_alive = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let deadline = *keep_alive.last_seen.lock() + keep_alive.timeout;
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("keep-alive watchdog stopped");
                        return;
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        if keep_alive.idle_for() >= keep_alive.timeout {
                            on_idle();
                            return;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_authorize_requires_bearer_password() {
        let keep_alive = KeepAlive::new(Duration::from_secs(10), "s3cret");
        assert!(keep_alive.authorize(Some("Bearer s3cret")));
        assert!(!keep_alive.authorize(Some("Bearer wrong")));
        assert!(!keep_alive.authorize(Some("s3cret")));
        assert!(!keep_alive.authorize(None));
    }

    #[test]
    fn test_empty_password_never_authorizes() {
        let keep_alive = KeepAlive::new(Duration::from_secs(10), "");
        assert!(!keep_alive.authorize(Some("Bearer ")));
    }

    #[tokio::test]
    async fn test_watchdog_fires_once_when_idle() {
        let keep_alive = Arc::new(KeepAlive::new(Duration::from_millis(50), "pw"));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let handle = keep_alive.spawn_watchdog(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            CancellationToken::new(),
        );

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("watchdog should exit after firing")
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_touch_postpones_idle() {
        let keep_alive = Arc::new(KeepAlive::new(Duration::from_millis(150), "pw"));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let handle = keep_alive.spawn_watchdog(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            CancellationToken::new(),
        );

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            keep_alive.touch();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        handle.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_watchdog_without_firing() {
        let keep_alive = Arc::new(KeepAlive::new(Duration::from_secs(60), "pw"));
        let fired = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = fired.clone();
        let handle = keep_alive.spawn_watchdog(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            shutdown.clone(),
        );

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
