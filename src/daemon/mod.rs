//! Rune daemon
//!
//! The daemon side of the binary is a set of job handlers. `initapi` prepares
//! the daemon's state from its [`DaemonConfig`]; `serveapi` then binds every
//! requested listen address and serves the remote API until shutdown.
//! `version` and `info` back the matching API routes.

mod api;
mod config;
mod info;
mod server;

pub use api::ApiHandler;
pub use config::{
    keys, DaemonConfig, ServeApiParams, DEFAULT_IP, DEFAULT_NETWORK_MTU, DEFAULT_PIDFILE,
    DEFAULT_ROOT, DEFAULT_SOCKET_PATH,
};
pub use info::{InfoResponse, VersionResponse, DEFAULT_GRAPH_DRIVER};
pub use server::{ApiServer, Listener};

use crate::build_info::BuildInfo;
use crate::engine::{Engine, EngineBuilder, JobContext, Operation};
use crate::error::{Result, RuneError};
use crate::transport::{HostAddr, Proto, TransportConfig};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Sub-directories of the daemon root
const STATE_DIRS: [&str; 4] = ["containers", "images", "volumes", "networks"];

/// State established by `initapi`
#[derive(Debug)]
pub struct Daemon {
    pub id: String,
    pub config: DaemonConfig,
    pub transport: Option<Arc<TransportConfig>>,
    pub started_at: DateTime<Utc>,
}

impl Daemon {
    fn remove_pidfile(&self) {
        if let Err(e) = fs::remove_file(&self.config.pidfile) {
            warn!(path = %self.config.pidfile.display(), "couldn't remove pid file: {}", e);
        }
    }
}

/// Owns the daemon's lifecycle and provides its job handlers
pub struct DaemonRuntime {
    build: BuildInfo,
    daemon: OnceLock<Arc<Daemon>>,
    shutdown: watch::Sender<bool>,
}

impl DaemonRuntime {
    pub fn new(build: BuildInfo) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            build,
            daemon: OnceLock::new(),
            shutdown,
        })
    }

    /// Bind `initapi`, `serveapi`, `version` and `info` to this runtime
    pub fn register(self: &Arc<Self>, builder: EngineBuilder) -> EngineBuilder {
        let init = Arc::clone(self);
        let serve = Arc::clone(self);
        let version = Arc::clone(self);
        let info = Arc::clone(self);

        builder
            .register(Operation::InitApi, move |config: DaemonConfig, _ctx| {
                let runtime = Arc::clone(&init);
                async move {
                    runtime.init_api(config)?;
                    Ok(None)
                }
            })
            .register(
                Operation::ServeApi,
                move |params: ServeApiParams, ctx: JobContext| {
                    let runtime = Arc::clone(&serve);
                    async move {
                        runtime.serve_api(params, ctx.engine).await?;
                        Ok(None)
                    }
                },
            )
            .register(Operation::Version, move |_: (), _ctx| {
                let response = VersionResponse::new(&version.build);
                async move { Ok(Some(serde_json::to_value(response)?)) }
            })
            .register(Operation::Info, move |_: (), _ctx| {
                let response = info
                    .daemon()
                    .map(|daemon| InfoResponse::new(daemon, &info.build));
                async move {
                    let response = response.ok_or_else(not_initialized)?;
                    Ok(Some(serde_json::to_value(response)?))
                }
            })
    }

    /// The initialized daemon, if `initapi` has run
    pub fn daemon(&self) -> Option<&Arc<Daemon>> {
        self.daemon.get()
    }

    pub fn build_info(&self) -> &BuildInfo {
        &self.build
    }

    /// Ask a running `serveapi` to stop accepting and drain
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    fn init_api(&self, config: DaemonConfig) -> Result<()> {
        if self.daemon.get().is_some() {
            return Err(RuneError::Daemon("daemon is already initialized".into()));
        }

        config.validate()?;
        let transport = TransportConfig::load(&config.tls)?.map(Arc::new);

        for dir in STATE_DIRS {
            fs::create_dir_all(config.root.join(dir))?;
        }
        check_pidfile(&config.pidfile)?;
        write_pidfile(&config.pidfile)?;

        let daemon = Arc::new(Daemon {
            id: Uuid::new_v4().to_string(),
            config,
            transport,
            started_at: Utc::now(),
        });
        info!(
            id = %daemon.id,
            root = %daemon.config.root.display(),
            tls = daemon.transport.is_some(),
            "daemon initialized"
        );

        self.daemon.set(daemon).map_err(|daemon| {
            daemon.remove_pidfile();
            RuneError::Daemon("daemon is already initialized".into())
        })
    }

    async fn serve_api(self: Arc<Self>, params: ServeApiParams, engine: Engine) -> Result<()> {
        let daemon = self.daemon.get().cloned().ok_or_else(not_initialized)?;

        let (acceptor, listeners) = match bind_listeners(&daemon, &params.hosts).await {
            Ok(bound) => bound,
            Err(e) => {
                daemon.remove_pidfile();
                return Err(e);
            }
        };

        let signals = {
            let runtime = Arc::clone(&self);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Received interrupt, shutting down");
                        runtime.shutdown();
                    }
                    Err(e) => error!("couldn't listen for interrupt: {}", e),
                }
            })
        };

        let api = ApiHandler::new(engine, Arc::clone(&daemon), params.logging);
        let served = ApiServer::new(listeners, acceptor, api)
            .serve(self.shutdown.subscribe())
            .await;

        signals.abort();
        daemon.remove_pidfile();
        info!("daemon stopped");
        served
    }
}

/// Build the TLS acceptor and bind every host, or release whatever was bound
async fn bind_listeners(
    daemon: &Daemon,
    hosts: &[String],
) -> Result<(Option<TlsAcceptor>, Vec<Listener>)> {
    let acceptor = match &daemon.transport {
        Some(transport) => Some(TlsAcceptor::from(transport.server_config()?)),
        None => None,
    };

    let mut listeners = Vec::with_capacity(hosts.len());
    for host in hosts {
        match bind_one(host, acceptor.is_some()).await {
            Ok(listener) => listeners.push(listener),
            Err(e) => {
                listeners.into_iter().for_each(Listener::close);
                return Err(e);
            }
        }
    }
    Ok((acceptor, listeners))
}

async fn bind_one(host: &str, tls: bool) -> Result<Listener> {
    let addr: HostAddr = host.parse()?;
    if addr.proto == Proto::Tcp && !tls {
        warn!(addr = %addr, "API is listening on TCP without TLS, anyone on the network can control the daemon");
    }
    Listener::bind(&addr).await
}

fn not_initialized() -> RuneError {
    RuneError::Daemon("daemon is not initialized, run initapi first".into())
}

/// Refuse to start while the pid file names a live process
fn check_pidfile(path: &Path) -> Result<()> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return Ok(()),
    };
    if let Ok(pid) = contents.trim().parse::<u32>() {
        if Path::new("/proc").join(pid.to_string()).exists() {
            return Err(RuneError::Daemon(format!(
                "pid file found, ensure rune is not running or delete {}",
                path.display()
            )));
        }
    }
    warn!(path = %path.display(), "removing stale pid file");
    Ok(())
}

fn write_pidfile(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", std::process::id()))?;
    Ok(())
}
