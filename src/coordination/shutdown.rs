//! Graceful Shutdown Handler
//!
//! The scheduler never starts a new cycle after shutdown was requested, and a
//! running cycle checks its token between phases. Every store write is its
//! own unit of work, so abandoning a cycle between phases leaves persisted
//! state consistent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM / SIGINT: finish the current phase, then stop
    Graceful,
    /// SIGQUIT: stop at the next check
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    shutdown_requested: AtomicBool,
    signal_tx: watch::Sender<Option<ShutdownSignal>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (signal_tx, _) = watch::channel(None);
        Self {
            shutdown_requested: AtomicBool::new(false),
            signal_tx,
        }
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        self.signal_tx.send_replace(Some(signal));
    }

    /// Create a token that observes this coordinator
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            signal_rx: Some(self.signal_tx.subscribe()),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable view of the shutdown state for cycle code
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    signal_rx: Option<watch::Receiver<Option<ShutdownSignal>>>,
}

impl ShutdownToken {
    /// A token that is never cancelled (one-shot commands, tests)
    pub fn never() -> Self {
        Self { signal_rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal().is_some()
    }

    pub fn signal(&self) -> Option<ShutdownSignal> {
        self.signal_rx.as_ref().and_then(|rx| *rx.borrow())
    }

    /// Resolves once shutdown is requested. Pending forever for `never()`.
    pub async fn cancelled(&self) -> ShutdownSignal {
        let Some(rx) = &self.signal_rx else {
            return std::future::pending().await;
        };

        let mut rx = rx.clone();
        loop {
            let current = *rx.borrow_and_update();
            if let Some(signal) = current {
                return signal;
            }
            if rx.changed().await.is_err() {
                // Coordinator dropped without a signal
                return std::future::pending().await;
            }
        }
    }
}

/// Helper to install OS signal handlers
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let handlers = [
            (SignalKind::terminate(), "SIGTERM", ShutdownSignal::Graceful),
            (SignalKind::interrupt(), "SIGINT", ShutdownSignal::Graceful),
            (SignalKind::quit(), "SIGQUIT", ShutdownSignal::Urgent),
        ];

        for (kind, name, mapped) in handlers {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut stream = match signal(kind) {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("Failed to install {} handler: {}", name, e);
                        return;
                    }
                };
                stream.recv().await;
                info!("Received {}", name);
                shutdown.request_shutdown(mapped);
            });
        }
    }

    #[cfg(windows)]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C");
                    shutdown.request_shutdown(ShutdownSignal::Graceful);
                }
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        });
    }
}
