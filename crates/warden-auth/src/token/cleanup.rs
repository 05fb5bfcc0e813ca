//! Periodic removal of expired tokens.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::TokenServiceConfig;
use crate::token::service::TokenLifecycleService;

/// Background task that calls [`TokenLifecycleService::cleanup_expired_tokens`]
/// on a fixed interval.
pub struct TokenCleanupTask {
    service: Arc<TokenLifecycleService>,
    interval: Duration,
    retention_hours: u32,
}

/// Handle to a running cleanup task.
pub struct TokenCleanupHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TokenCleanupTask {
    /// Creates a cleanup task.
    #[must_use]
    pub fn new(
        service: Arc<TokenLifecycleService>,
        interval: Duration,
        retention_hours: u32,
    ) -> Self {
        Self {
            service,
            interval,
            retention_hours,
        }
    }

    /// Creates a cleanup task using `cleanup_interval` and
    /// `expired_token_retention_hours` from the configuration.
    #[must_use]
    pub fn from_config(service: Arc<TokenLifecycleService>, config: &TokenServiceConfig) -> Self {
        Self::new(
            service,
            config.cleanup_interval,
            config.expired_token_retention_hours,
        )
    }

    /// Runs a single cleanup pass, logging instead of returning failures.
    pub async fn run_once(&self) -> u64 {
        match self.service.cleanup_expired_tokens(self.retention_hours).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(deleted, "Cleaned up expired tokens");
                }
                deleted
            }
            Err(e) => {
                warn!(error = %e, "Expired token cleanup failed");
                0
            }
        }
    }

    /// Starts the task on the current Tokio runtime.
    ///
    /// The first pass runs immediately. A zero interval is raised to one second.
    pub fn start(self) -> TokenCleanupHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.interval.max(Duration::from_secs(1));

        let task = tokio::spawn(async move {
            info!(
                interval_secs = period.as_secs(),
                retention_hours = self.retention_hours,
                "Token cleanup task started"
            );

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let deleted = self.run_once().await;
                        debug!(deleted, "Token cleanup pass completed");
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Token cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        TokenCleanupHandle { shutdown_tx, task }
    }
}

impl TokenCleanupHandle {
    /// Signals the task to stop and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Token cleanup task ended abnormally");
        }
    }

    /// Returns `true` once the task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
