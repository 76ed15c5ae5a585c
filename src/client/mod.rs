//! Remote API client
//!
//! Used by the front end in client mode: one connection per request, over a
//! unix socket or TCP, with TLS on TCP when a transport configuration is given.

use crate::build_info::{BuildInfo, API_VERSION};
use crate::daemon::{InfoResponse, VersionResponse};
use crate::error::{Result, RuneError, StatusError, GENERIC_EXIT_CODE};
use crate::transport::http::{self, Request, Response};
use crate::transport::{BoxedStream, HostAddr, Proto, TransportConfig};
use rustls::pki_types::ServerName;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Write;
use tokio::io::BufReader;
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Commands understood in client mode
pub const COMMANDS: [(&str, &str); 3] = [
    ("info", "Display system-wide information"),
    ("ping", "Check that the daemon is reachable"),
    ("version", "Show the rune version information"),
];

/// Error body written by the daemon
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(default = "generic_exit_code")]
    exit_code: i32,
}

fn generic_exit_code() -> i32 {
    GENERIC_EXIT_CODE
}

/// Client for a daemon's remote API
pub struct RemoteClient {
    addr: HostAddr,
    connector: Option<TlsConnector>,
    build: BuildInfo,
}

impl RemoteClient {
    /// TLS is used on TCP addresses when `transport` is given.
    pub fn new(addr: HostAddr, transport: Option<&TransportConfig>, build: BuildInfo) -> Result<Self> {
        let connector = match (transport, addr.proto) {
            (Some(transport), Proto::Tcp) => {
                Some(TlsConnector::from(transport.client_config()?))
            }
            _ => None,
        };
        Ok(Self {
            addr,
            connector,
            build,
        })
    }

    pub fn addr(&self) -> &HostAddr {
        &self.addr
    }

    async fn connect(&self) -> Result<BoxedStream> {
        let unreachable = |e: std::io::Error| {
            RuneError::Api(format!(
                "Cannot connect to the rune daemon at {}. Is 'rune -d' running on this host? ({})",
                self.addr, e
            ))
        };

        match self.addr.proto {
            Proto::Unix => {
                let stream = UnixStream::connect(&self.addr.addr).await.map_err(unreachable)?;
                Ok(Box::new(stream))
            }
            Proto::Tcp => {
                let stream = TcpStream::connect(self.addr.addr.as_str())
                    .await
                    .map_err(unreachable)?;
                stream.set_nodelay(true)?;
                match &self.connector {
                    Some(connector) => {
                        let server_name = ServerName::try_from(self.addr.host().to_string())
                            .map_err(|e| {
                                RuneError::Tls(format!("invalid server name {}: {}", self.addr.host(), e))
                            })?;
                        let tls = connector
                            .connect(server_name, stream)
                            .await
                            .map_err(|e| RuneError::Tls(format!("handshake with {}: {}", self.addr, e)))?;
                        Ok(Box::new(tls))
                    }
                    None => Ok(Box::new(stream)),
                }
            }
        }
    }

    /// Send one request; non-2xx answers become [`StatusError`]s
    pub async fn request(&self, request: Request) -> Result<Response> {
        debug!(addr = %self.addr, method = %request.method, path = %request.path, "API call");
        let request = request
            .with_header("Host", self.host_header())
            .with_header("User-Agent", format!("Rune-Client/{}", self.build.version));

        let stream = self.connect().await?;
        let mut reader = BufReader::new(stream);
        http::write_request(reader.get_mut(), &request).await?;
        let response = http::read_response(&mut reader).await?;

        if response.is_success() {
            return Ok(response);
        }
        let status = match serde_json::from_slice::<ApiErrorBody>(&response.body) {
            Ok(body) => StatusError::new(body.message, body.exit_code),
            Err(_) => StatusError::generic(format!(
                "Error: request returned {} {} for API route {}",
                response.status,
                http::reason_phrase(response.status),
                request.route()
            )),
        };
        Err(status.into())
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request(Request::new("GET", path)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.get(path).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    fn host_header(&self) -> String {
        match self.addr.proto {
            Proto::Tcp => self.addr.addr.clone(),
            Proto::Unix => "localhost".to_string(),
        }
    }

    /// Run a client-mode command, writing its output to `out`
    pub async fn run_command<W: Write + Send>(&self, args: &[String], out: &mut W) -> Result<()> {
        let Some((command, rest)) = args.split_first() else {
            return write_usage(out);
        };
        if !rest.is_empty() {
            return Err(RuneError::Usage(format!(
                "\"rune {}\" accepts no arguments",
                command
            )));
        }

        match command.as_str() {
            "version" => self.version(out).await,
            "info" => self.info(out).await,
            "ping" => {
                let response = self.get("/_ping").await?;
                writeln!(out, "{}", response.body_text())?;
                Ok(())
            }
            other => Err(RuneError::Usage(format!(
                "rune: '{}' is not a rune command. See 'rune --help'.",
                other
            ))),
        }
    }

    async fn version<W: Write + Send>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "Client version: {}", self.build.version)?;
        writeln!(out, "Client API version: {}", API_VERSION)?;
        writeln!(out, "Git commit (client): {}", self.build.git_commit)?;

        let server: VersionResponse = self.get_json("/version").await?;
        writeln!(out, "Server version: {}", server.version)?;
        writeln!(out, "Server API version: {}", server.api_version)?;
        writeln!(out, "Git commit (server): {}", server.git_commit)?;
        writeln!(out, "OS/Arch (server): {}/{}", server.os, server.arch)?;
        Ok(())
    }

    async fn info<W: Write + Send>(&self, out: &mut W) -> Result<()> {
        let info: InfoResponse = self.get_json("/info").await?;
        writeln!(out, "Containers: {}", info.containers)?;
        writeln!(out, "Images: {}", info.images)?;
        writeln!(out, "Storage Driver: {}", info.driver)?;
        writeln!(out, "Root Dir: {}", info.root_dir)?;
        writeln!(out, "Server Version: {}", info.server_version)?;
        writeln!(out, "OS/Arch: {}/{}", info.os_type, info.architecture)?;
        writeln!(out, "CPUs: {}", info.ncpu)?;
        writeln!(out, "Name: {}", info.name)?;
        writeln!(out, "ID: {}", info.id)?;
        if !info.bridge.is_empty() {
            writeln!(out, "Bridge: {}", info.bridge)?;
        }
        writeln!(out, "MTU: {}", info.mtu)?;
        if !info.dns.is_empty() {
            writeln!(out, "DNS: {}", info.dns.join(", "))?;
        }
        writeln!(out, "IPTables: {}", info.iptables)?;
        writeln!(out, "TLS: {}", info.tls)?;
        writeln!(out, "Started: {}", info.started_at.to_rfc3339())?;
        Ok(())
    }
}

fn write_usage<W: Write>(out: &mut W) -> Result<()> {
    writeln!(out, "Usage: rune [OPTIONS] COMMAND [arg...]")?;
    writeln!(out, " -H=[unix:///var/run/rune.sock]: tcp://host:port to bind/connect to or unix://path/to/socket to use")?;
    writeln!(out)?;
    writeln!(out, "A self-sufficient runtime for linux containers.")?;
    writeln!(out)?;
    writeln!(out, "Commands:")?;
    for (name, description) in COMMANDS {
        writeln!(out, "    {:<10}{}", name, description)?;
    }
    Ok(())
}
