//! Shutdown signaling and coordinated teardown of managed services

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::process::{ManagedService, ProcessManager, ServiceState};

/// Cloneable token observed by every polling loop
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    receiver: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check without waiting whether shutdown was requested
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until shutdown is requested
    pub async fn cancelled(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Handle that can request shutdown from anywhere
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Request shutdown; safe to call any number of times
    pub fn request(&self) {
        let _ = self.sender.send(true);
    }
}

/// Drives graceful-then-forced termination of all managed services
pub struct ShutdownCoordinator {
    sender: Arc<watch::Sender<bool>>,
    signals_installed: AtomicBool,
    completed: AtomicBool,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator with the given grace period
    pub fn new(grace: Duration) -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            signals_installed: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            grace,
        }
    }

    /// Token for background loops to observe
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.sender.subscribe(),
        }
    }

    /// Handle for requesting shutdown
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: self.sender.clone(),
        }
    }

    /// Request shutdown; safe to call any number of times
    pub fn request(&self) {
        let _ = self.sender.send(true);
    }

    /// Check whether shutdown has been requested
    pub fn is_requested(&self) -> bool {
        *self.sender.borrow()
    }

    /// Install SIGINT/SIGTERM handlers. Installs at most once; repeated
    /// calls are no-ops.
    pub fn install_signal_handlers(&self) -> anyhow::Result<()> {
        if self.signals_installed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sender = self.sender.clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
                let _ = sender.send(true);
            });
        }

        #[cfg(not(unix))]
        {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl+C");
                }
                let _ = sender.send(true);
            });
        }

        Ok(())
    }

    /// Terminate every service that still has a live process.
    ///
    /// Idempotent and reentrant: a second invocation returns without
    /// signaling anything.
    pub async fn shutdown_all(
        &self,
        manager: &mut ProcessManager,
        services: &mut [ManagedService],
    ) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.request();

        info!("Shutting down system components...");

        for name in manager.running_services() {
            info!("Stopping {}...", name);
            match manager.terminate(&name, self.grace).await {
                Ok(forced) => {
                    if forced {
                        warn!("Force killed {}", name);
                    }
                }
                Err(e) => warn!("Failed to stop {}: {}", name, e),
            }
        }

        for service in services.iter_mut() {
            if service.state.is_active() {
                service.mark_ended(ServiceState::Stopped);
            }
        }

        info!("System shutdown complete");
    }
}
