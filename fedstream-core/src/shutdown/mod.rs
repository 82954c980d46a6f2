//! Graceful shutdown coordinator
//!
//! Long-running tasks (the federation sync loop) hold a
//! [`ShutdownListener`] and stop at the next iteration boundary once the
//! coordinator fires.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

/// Shutdown signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Graceful,
    Immediate,
}

/// Shutdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Shutdown,
}

/// Graceful shutdown coordinator
pub struct ShutdownCoordinator {
    state: Arc<RwLock<ShutdownState>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// `grace` is how long a graceful shutdown waits for listeners to wind down
    pub fn new(grace: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            state: Arc::new(RwLock::new(ShutdownState::Running)),
            shutdown_tx,
            grace,
        }
    }

    /// Listener that also observes a shutdown fired before it subscribed
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            state: self.state.clone(),
            rx: self.shutdown_tx.subscribe(),
        }
    }

    /// Initiate graceful shutdown
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown");

        let mut state = self.state.write().await;
        if *state != ShutdownState::Running {
            warn!("Shutdown already in progress");
            return;
        }
        *state = ShutdownState::ShuttingDown;
        drop(state);

        if self.shutdown_tx.send(ShutdownSignal::Graceful).is_err() {
            info!("No running component to notify");
        }

        tokio::time::sleep(self.grace).await;

        *self.state.write().await = ShutdownState::Shutdown;
        info!("Shutdown complete");
    }

    /// Initiate immediate shutdown
    pub async fn shutdown_immediately(&self) {
        warn!("Initiating immediate shutdown");

        *self.state.write().await = ShutdownState::Shutdown;

        if self.shutdown_tx.send(ShutdownSignal::Immediate).is_err() {
            info!("No running component to notify");
        }
    }

    pub async fn is_shutting_down(&self) -> bool {
        *self.state.read().await != ShutdownState::Running
    }

    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }
}

/// Per-task handle on the coordinator's signal
pub struct ShutdownListener {
    state: Arc<RwLock<ShutdownState>>,
    rx: broadcast::Receiver<ShutdownSignal>,
}

impl ShutdownListener {
    /// Resolve once shutdown has been requested
    pub async fn recv(&mut self) -> ShutdownSignal {
        if let Ok(signal) = self.rx.try_recv() {
            return signal;
        }

        match *self.state.read().await {
            ShutdownState::Running => {}
            ShutdownState::ShuttingDown => return ShutdownSignal::Graceful,
            ShutdownState::Shutdown => return ShutdownSignal::Immediate,
        }

        match self.rx.recv().await {
            Ok(signal) => signal,
            Err(e) => {
                error!("Shutdown channel error: {}", e);
                ShutdownSignal::Immediate
            }
        }
    }
}

/// Trigger a graceful shutdown on SIGINT / SIGTERM (Ctrl+C elsewhere)
#[cfg(unix)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        coordinator.shutdown().await;
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> std::io::Result<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => error!("Ctrl+C handler failed: {}", e),
        }
        coordinator.shutdown().await;
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_coordinator() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(10));
        assert_eq!(coordinator.state().await, ShutdownState::Running);

        coordinator.shutdown().await;

        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
        assert!(coordinator.is_shutting_down().await);
    }

    #[tokio::test]
    async fn test_listener_wakes_on_shutdown() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_millis(10)));
        let mut listener = coordinator.listener();

        let waiter = tokio::spawn(async move { listener.recv().await });
        coordinator.shutdown().await;

        assert_eq!(waiter.await.unwrap(), ShutdownSignal::Graceful);
    }

    #[tokio::test]
    async fn test_late_listener_sees_shutdown() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(1));
        coordinator.shutdown_immediately().await;

        let mut listener = coordinator.listener();
        assert_eq!(listener.recv().await, ShutdownSignal::Immediate);
    }
}
