//! A serve run from start to finish.
//!
//! A run moves through [`Phase`]s in order. The listener runs on its own
//! task and reports its bound address, or the error that stopped it, over
//! single-use channels. The controller waits for either an interrupt or a
//! listener error, then stops the listener within the configured timeout.
//! The archive is closed on every path out of a run.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::archive::Archive;
use crate::browser::Browser;
use crate::config::ServeConfig;
use crate::error::ServeError;
use crate::resolve::{resolve_prefix, resolve_root};
use crate::web::{Mount, Server, ShutdownSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::ShuttingDown => "shutting down",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

struct Tracker {
    phase: Phase,
}

impl Tracker {
    fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    fn enter(&mut self, next: Phase) {
        tracing::debug!("Server {} -> {}", self.phase, next);
        self.phase = next;
    }
}

/// Open the archive named by `config` and serve it until `interrupt` fires.
pub async fn run(
    config: &ServeConfig,
    browser: &dyn Browser,
    interrupt: ShutdownSignal,
) -> Result<(), ServeError> {
    let archive = Archive::open(&config.location).await?;
    serve(archive, config, browser, interrupt).await
}

/// Serve an already opened archive until `interrupt` fires or the listener fails.
///
/// Takes ownership of the archive and closes it before returning.
pub async fn serve(
    mut archive: Archive,
    config: &ServeConfig,
    browser: &dyn Browser,
    interrupt: ShutdownSignal,
) -> Result<(), ServeError> {
    let mut tracker = Tracker::new();
    let result = serve_archive(&archive, config, browser, interrupt, &mut tracker).await;

    tracker.enter(Phase::Stopped);
    tracing::debug!("Closing archive {}", archive.location());
    archive.close();
    result
}

async fn serve_archive(
    archive: &Archive,
    config: &ServeConfig,
    browser: &dyn Browser,
    interrupt: ShutdownSignal,
    tracker: &mut Tracker,
) -> Result<(), ServeError> {
    let fs = archive.fs();
    let directory = resolve_root(&fs, &config.directory).map_err(ServeError::Traversal)?;
    tracing::debug!("Using directory: {}", directory);
    let prefix = resolve_prefix(&fs, &directory, &config.prefix).await;
    tracing::debug!("Using prefix: {}", prefix);

    let mount = Mount::for_directory(&fs, &directory, prefix.clone())?;

    tracker.enter(Phase::Starting);
    let listen_addr = config.listen_addr();
    let stop = ShutdownSignal::new();
    let (ready_tx, ready_rx) = oneshot::channel();
    let (error_tx, mut error_rx) = oneshot::channel();
    let mut listener = tokio::spawn(listen(
        listen_addr.clone(),
        mount,
        stop.clone(),
        ready_tx,
        error_tx,
    ));

    let addr = match ready_rx.await {
        Ok(addr) => addr,
        Err(_) => {
            tracker.enter(Phase::ShuttingDown);
            return Err(error_rx.await.unwrap_or_else(|_| ServeError::ListenerBind {
                addr: listen_addr,
                source: io::Error::other("listener task ended before binding"),
            }));
        }
    };

    tracker.enter(Phase::Running);
    let url = format!("http://localhost:{}{}", addr.port(), prefix.encoded());
    tracing::info!("Serving {} from {} at {}", archive.location(), directory, addr);
    println!("\n✓ Server running at {url}");
    println!("  Press Ctrl+C to stop the server.");

    if !config.skip_browser {
        if let Err(e) = browser.open(&url) {
            tracing::warn!("Failed to open browser: {}", e);
        }
    }

    let outcome = tokio::select! {
        _ = interrupt.recv() => {
            tracing::info!("Shutting down server...");
            Ok(())
        }
        failed = &mut error_rx => Err(failed.unwrap_or_else(|_| ServeError::Listener {
            addr,
            source: io::Error::other("listener stopped unexpectedly"),
        })),
    };
    if let Err(e) = &outcome {
        tracing::error!("Server error: {}", e);
    }

    tracker.enter(Phase::ShuttingDown);
    stop.trigger();
    drain(&mut listener, config).await;
    outcome
}

/// Listener task body: bind, report the address, serve until stopped.
async fn listen(
    addr: String,
    mount: Mount,
    stop: ShutdownSignal,
    ready: oneshot::Sender<SocketAddr>,
    errors: oneshot::Sender<ServeError>,
) {
    tracing::debug!("Starting HTTP server on {}", addr);
    let server = match Server::bind(&addr, mount).await {
        Ok(server) => server,
        Err(e) => {
            let _ = errors.send(e);
            return;
        }
    };
    let _ = ready.send(server.local_addr());
    if let Err(e) = server.serve(stop).await {
        let _ = errors.send(e);
    }
}

/// Wait for the listener task to finish its connections, aborting it once
/// the shutdown timeout passes.
async fn drain(listener: &mut JoinHandle<()>, config: &ServeConfig) {
    match tokio::time::timeout(config.shutdown_timeout, &mut *listener).await {
        Ok(Ok(())) => tracing::info!("Server stopped gracefully"),
        Ok(Err(e)) => tracing::warn!("Listener task failed: {}", e),
        Err(_) => {
            tracing::warn!(
                "Server forced to shutdown: connections still open after {:?}",
                config.shutdown_timeout
            );
            listener.abort();
        }
    }
}
