//! Graceful shutdown coordination
//!
//! A cloneable flag + notifier pair shared by the worker loop, the reaper,
//! and the binary's signal handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Shutdown coordinator for graceful termination
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with shutdown not yet requested
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown; idempotent
    pub fn request(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            info!("Shutdown requested");
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested
    pub async fn wait(&self) {
        if self.is_requested() {
            return;
        }
        self.notify.notified().await;
    }

    /// Spawn a task that requests shutdown on SIGINT/SIGTERM
    pub fn install_signal_handlers(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};

                let sigint = signal(SignalKind::interrupt());
                let sigterm = signal(SignalKind::terminate());
                let (Ok(mut sigint), Ok(mut sigterm)) = (sigint, sigterm) else {
                    warn!("Failed to install signal handlers");
                    return;
                };

                tokio::select! {
                    _ = sigint.recv() => warn!("Received SIGINT, shutting down"),
                    _ = sigterm.recv() => warn!("Received SIGTERM, shutting down"),
                }
                coordinator.request();
            }

            #[cfg(not(unix))]
            {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Received Ctrl+C, shutting down");
                    coordinator.request();
                }
            }
        })
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("requested", &self.is_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_requested());

        coordinator.request();
        coordinator.request();
        assert!(coordinator.is_requested());
    }

    #[tokio::test]
    async fn test_wait_returns_after_request() {
        let coordinator = ShutdownCoordinator::new();
        let waiter = coordinator.clone();

        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });

        coordinator.request();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_requested() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.request();
        coordinator.wait().await;
    }
}
