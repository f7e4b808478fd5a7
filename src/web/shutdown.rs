//! Shutdown signalling.
//!
//! A [`ShutdownSignal`] is a cloneable one-way latch: once triggered, every
//! clone observes it and every pending or future [`ShutdownSignal::recv`]
//! completes. The serve run uses one instance fed by OS signals to end the
//! foreground wait, and another to stop the listener.

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Trigger the signal. Calling this more than once is harmless.
    pub fn trigger(&self) {
        self.sender.send_if_modified(|triggered| !std::mem::replace(triggered, true));
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Completes once the signal is triggered, immediately if it already was.
    pub async fn recv(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }

    /// A signal triggered by SIGINT or SIGTERM (Ctrl+C where those do not exist).
    ///
    /// The handlers are registered before this returns, so a signal sent
    /// right after startup is not lost. Must be called from within a Tokio
    /// runtime.
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();
        let os = OsSignals::register();
        tokio::spawn(async move {
            os.recv().await;
            trigger.trigger();
        });
        signal
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Registered termination signal streams.
struct OsSignals {
    #[cfg(unix)]
    unix: Option<(tokio::signal::unix::Signal, tokio::signal::unix::Signal)>,
}

impl OsSignals {
    #[cfg(unix)]
    fn register() -> Self {
        use tokio::signal::unix::{SignalKind, signal};

        let unix = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => Some((sigint, sigterm)),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Cannot install signal handlers, falling back to Ctrl+C: {}", e);
                None
            }
        };
        Self { unix }
    }

    #[cfg(not(unix))]
    fn register() -> Self {
        Self {}
    }

    async fn recv(self) {
        #[cfg(unix)]
        {
            if let Some((mut sigint, mut sigterm)) = self.unix {
                tokio::select! {
                    _ = sigint.recv() => tracing::debug!("Received SIGINT"),
                    _ = sigterm.recv() => tracing::debug!("Received SIGTERM"),
                }
                return;
            }
        }

        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::debug!("Received Ctrl+C"),
            Err(e) => {
                tracing::error!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
}
