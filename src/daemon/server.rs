//! Listener and accept loop for the remote API
//!
//! Every listen address gets its own accept loop; every accepted connection
//! is handled on its own task. A shutdown signal stops the loops, after which
//! in-flight requests are drained for at most [`DRAIN_TIMEOUT`]. Connections
//! that have not delivered a request yet are closed right away.

use super::api::ApiHandler;
use crate::error::{Result, RuneError};
use crate::transport::http::{self, Response};
use crate::transport::{BoxedStream, HostAddr, Proto};
use std::fs;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Deadline for a TLS handshake, reading a request or writing a response
pub const IO_TIMEOUT: Duration = Duration::from_secs(30);
/// How long shutdown waits for in-flight requests before aborting them
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// A bound API listener
pub enum Listener {
    Unix { listener: UnixListener, path: PathBuf },
    Tcp { listener: TcpListener, addr: SocketAddr },
}

impl Listener {
    /// Bind an address, replacing a stale unix socket
    pub async fn bind(addr: &HostAddr) -> Result<Self> {
        match addr.proto {
            Proto::Unix => {
                let path = PathBuf::from(&addr.addr);
                if path.exists() {
                    fs::remove_file(&path)?;
                }
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let listener = UnixListener::bind(&path).map_err(|e| {
                    RuneError::Daemon(format!("couldn't listen on {}: {}", addr, e))
                })?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(&path, fs::Permissions::from_mode(0o660))?;
                }

                Ok(Listener::Unix { listener, path })
            }
            Proto::Tcp => {
                let listener = TcpListener::bind(addr.addr.as_str()).await.map_err(|e| {
                    RuneError::Daemon(format!("couldn't listen on {}: {}", addr, e))
                })?;
                let addr = listener.local_addr()?;
                Ok(Listener::Tcp { listener, addr })
            }
        }
    }

    pub fn proto(&self) -> Proto {
        match self {
            Listener::Unix { .. } => Proto::Unix,
            Listener::Tcp { .. } => Proto::Tcp,
        }
    }

    /// Address actually bound, with the real port for `:0`
    pub fn local_addr(&self) -> HostAddr {
        match self {
            Listener::Unix { path, .. } => HostAddr::unix(path.display().to_string()),
            Listener::Tcp { addr, .. } => HostAddr::tcp(addr.to_string()),
        }
    }

    async fn accept(&self) -> std::io::Result<(BoxedStream, String)> {
        match self {
            Listener::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), path.display().to_string()))
            }
            Listener::Tcp { listener, .. } => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), peer.to_string()))
            }
        }
    }

    fn socket_path(&self) -> Option<&Path> {
        match self {
            Listener::Unix { path, .. } => Some(path),
            Listener::Tcp { .. } => None,
        }
    }

    /// Stop listening and remove the socket file, if any
    pub fn close(self) {
        if let Some(path) = self.socket_path() {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), "couldn't remove socket: {}", e);
            }
        }
    }
}

/// Serves the API on a set of listeners until shutdown
pub struct ApiServer {
    listeners: Vec<Listener>,
    acceptor: Option<TlsAcceptor>,
    api: ApiHandler,
}

impl ApiServer {
    pub fn new(listeners: Vec<Listener>, acceptor: Option<TlsAcceptor>, api: ApiHandler) -> Self {
        Self {
            listeners,
            acceptor,
            api,
        }
    }

    /// Run every accept loop until `shutdown` turns true
    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut loops = JoinSet::new();
        for listener in self.listeners {
            // TLS only wraps TCP; unix sockets are protected by file permissions.
            let acceptor = match listener.proto() {
                Proto::Tcp => self.acceptor.clone(),
                Proto::Unix => None,
            };
            info!(
                addr = %listener.local_addr(),
                tls = acceptor.is_some(),
                "API listening"
            );
            loops.spawn(accept_loop(
                listener,
                acceptor,
                self.api.clone(),
                shutdown.clone(),
            ));
        }

        let mut result = Ok(());
        while let Some(joined) = loops.join_next().await {
            let outcome = joined.map_err(|e| RuneError::Internal(format!("accept loop: {}", e)));
            if let Err(err) = outcome {
                error!("{}", err);
                result = Err(err);
            }
        }
        result
    }
}

async fn accept_loop(
    listener: Listener,
    acceptor: Option<TlsAcceptor>,
    api: ApiHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "accepted connection");
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        acceptor.clone(),
                        api.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => error!("Error accepting connection: {}", e),
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    error!("connection task failed: {}", e);
                }
            }
        }
    }

    if !connections.is_empty() {
        info!(
            addr = %listener.local_addr(),
            in_flight = connections.len(),
            "draining connections"
        );
    }
    let drain = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        warn!(
            addr = %listener.local_addr(),
            aborted = connections.len(),
            "connections still busy after drain deadline"
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }

    let addr = listener.local_addr();
    listener.close();
    info!(addr = %addr, "API listener stopped");
}

async fn handle_connection(
    stream: BoxedStream,
    peer: String,
    acceptor: Option<TlsAcceptor>,
    api: ApiHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    let stream: BoxedStream = match acceptor {
        Some(acceptor) => match until_idle_limit(acceptor.accept(stream), &mut shutdown).await {
            Some(Ok(tls)) => Box::new(tls),
            Some(Err(e)) => {
                warn!(peer = %peer, "TLS handshake failed: {}", e);
                return;
            }
            None => {
                debug!(peer = %peer, "closing connection before TLS handshake completed");
                return;
            }
        },
        None => stream,
    };

    let mut reader = BufReader::new(stream);
    let response = match until_idle_limit(http::read_request(&mut reader), &mut shutdown).await {
        Some(Ok(Some(request))) => api.handle(&request).await,
        Some(Ok(None)) => return,
        Some(Err(e)) => Response::error(400, &e.to_string(), crate::error::GENERIC_EXIT_CODE),
        None => {
            debug!(peer = %peer, "closing connection without a request");
            return;
        }
    };

    let written = tokio::time::timeout(
        IO_TIMEOUT,
        http::write_response(reader.get_mut(), &response),
    )
    .await;
    match written {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(peer = %peer, "Error handling connection: {}", e),
        Err(_) => debug!(peer = %peer, "timed out writing response"),
    }
}

/// Run `fut` unless it outlives [`IO_TIMEOUT`] or shutdown starts first
async fn until_idle_limit<F: Future>(
    fut: F,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<F::Output> {
    tokio::select! {
        finished = tokio::time::timeout(IO_TIMEOUT, fut) => finished.ok(),
        () = stopping(shutdown) => None,
    }
}

async fn stopping(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
