//! HTTP/1 listener serving a [`Mount`].
//!
//! The server owns its connections in a [`JoinSet`]: dropping or aborting
//! the task running [`Server::serve`] drops every connection with it. When
//! the shutdown signal fires the listener stops accepting and each open
//! connection finishes its in-flight request before closing.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;

use http::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::error::ServeError;

use super::mount::Mount;
use super::shutdown::ShutdownSignal;

pub struct Server {
    listener: TcpListener,
    addr: SocketAddr,
    mount: Arc<Mount>,
}

impl Server {
    /// Bind `addr` (`host:port`). Port 0 picks a free port.
    pub async fn bind(addr: &str, mount: Mount) -> Result<Self, ServeError> {
        let bind_error = |source| ServeError::ListenerBind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;
        tracing::debug!("Listening on {}", local);

        Ok(Self {
            listener,
            addr: local,
            mount: Arc::new(mount),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accept connections until `shutdown` fires, then wait for open
    /// connections to finish.
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<(), ServeError> {
        let Self {
            listener,
            addr,
            mount,
        } = self;
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        connections.spawn(serve_connection(
                            stream,
                            remote,
                            Arc::clone(&mount),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) if is_connection_error(&e) => {
                        tracing::debug!("Failed to accept connection: {}", e);
                    }
                    Err(source) => return Err(ServeError::Listener { addr, source }),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = shutdown.recv() => break,
            }
        }

        drop(listener);
        if !connections.is_empty() {
            tracing::debug!("Waiting for {} open connections", connections.len());
        }
        while connections.join_next().await.is_some() {}
        tracing::debug!("Listener on {} stopped", addr);
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    mount: Arc<Mount>,
    shutdown: ShutdownSignal,
) {
    let service = service_fn(move |request: Request<Incoming>| {
        let mount = Arc::clone(&mount);
        async move {
            // Request bodies are never read
            let (parts, _body) = request.into_parts();
            let request = Request::from_parts(parts, ());
            let response = mount.handle(&request).await;
            tracing::debug!(
                "{} {} {}",
                request.method(),
                request.uri(),
                response.status().as_u16()
            );
            Ok::<_, Infallible>(response)
        }
    });

    let mut connection = pin!(http1::Builder::new().serve_connection(TokioIo::new(stream), service));
    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.recv() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };
    if let Err(e) = result {
        tracing::debug!("Connection from {} ended with error: {}", remote, e);
    }
}

/// Errors that concern a single incoming connection, not the listener.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
