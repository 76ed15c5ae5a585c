//! Command-line front end
//!
//! Parses the flag set once and decides the mode: with `-d` the process
//! becomes the daemon by running `initapi` then `serveapi` on a fresh engine,
//! otherwise it is a client of the single daemon named by `-H`.

mod opts;

pub use opts::{
    parse_host, validate_host, validate_ipv4_address, ListOpts, Validator, DEFAULT_HTTP_HOST,
    DEFAULT_HTTP_PORT,
};

use crate::build_info::BuildInfo;
use crate::client::RemoteClient;
use crate::daemon::{
    DaemonConfig, ServeApiParams, DEFAULT_IP, DEFAULT_NETWORK_MTU, DEFAULT_PIDFILE, DEFAULT_ROOT,
    DEFAULT_SOCKET_PATH,
};
use crate::engine::{EngineBuilder, JobParams, Operation};
use crate::error::{Result, RuneError};
use crate::transport::{HostAddr, TlsOptions, TransportConfig};
use clap::{ArgAction, Parser};
use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::info;

/// Environment variable naming the daemon a client talks to
pub const HOST_ENV: &str = "RUNE_HOST";

/// Rune - container daemon and client
#[derive(Parser, Debug, Clone)]
#[command(name = "rune")]
#[command(author = "Evoker Industries")]
#[command(about = "A self-sufficient runtime for linux containers", long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// Print version information and quit
    #[arg(short = 'v')]
    pub version: bool,

    /// Enable daemon mode
    #[arg(short = 'd')]
    pub daemon: bool,

    /// Enable debug mode
    #[arg(short = 'D')]
    pub debug: bool,

    /// Restart previously running containers
    #[arg(short = 'r', action = ArgAction::Set, num_args = 0..=1, default_value_t = true,
          default_missing_value = "true", require_equals = true)]
    pub auto_restart: bool,

    /// Attach containers to a pre-existing network bridge; use 'none' to disable container networking
    #[arg(short = 'b', default_value = "")]
    pub bridge: String,

    /// Use this CIDR notation address for the network bridge's IP, not compatible with -b
    #[arg(long = "bip", default_value = "")]
    pub bridge_ip: String,

    /// Path to use for daemon PID file
    #[arg(short = 'p', default_value = DEFAULT_PIDFILE)]
    pub pidfile: PathBuf,

    /// Path to use as the root of the rune runtime
    #[arg(short = 'g', default_value = DEFAULT_ROOT)]
    pub root: PathBuf,

    /// Enable CORS headers in the remote API
    #[arg(long = "api-enable-cors")]
    pub enable_cors: bool,

    /// Force rune to use specific DNS servers
    #[arg(long = "dns", action = ArgAction::Append)]
    pub dns: Vec<String>,

    /// Let rune add iptables rules
    #[arg(long = "iptables", action = ArgAction::Set, num_args = 0..=1, default_value_t = true,
          default_missing_value = "true", require_equals = true)]
    pub enable_iptables: bool,

    /// Default IP address to use when binding container ports
    #[arg(long = "ip", default_value = DEFAULT_IP)]
    pub default_ip: String,

    /// Enable inter-container communication
    #[arg(long = "icc", action = ArgAction::Set, num_args = 0..=1, default_value_t = true,
          default_missing_value = "true", require_equals = true)]
    pub icc: bool,

    /// Force the rune runtime to use a specific storage driver
    #[arg(short = 's', default_value = "")]
    pub graph_driver: String,

    /// Multiple tcp://host:port or unix://path/to/socket to bind in daemon mode, single connection otherwise
    #[arg(short = 'H', action = ArgAction::Append)]
    pub hosts: Vec<String>,

    /// Set the containers network MTU
    #[arg(long = "mtu", default_value_t = DEFAULT_NETWORK_MTU)]
    pub mtu: i64,

    /// Use TLS; implied by all other tls* flags
    #[arg(long = "tls")]
    pub tls: bool,

    /// Use TLS and verify the remote (daemon: verify client, client: verify daemon)
    #[arg(long = "tlsverify")]
    pub tls_verify: bool,

    /// Trust only remotes providing a certificate signed by the CA given here
    #[arg(long = "tlscacert")]
    pub tls_ca: Option<PathBuf>,

    /// Path to TLS certificate file
    #[arg(long = "tlscert")]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS key file
    #[arg(long = "tlskey")]
    pub tls_key: Option<PathBuf>,

    /// Client command and its arguments
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,
}

impl Cli {
    pub fn tls_options(&self) -> TlsOptions {
        TlsOptions {
            tls: self.tls,
            verify: self.tls_verify,
            ca: self.tls_ca.clone(),
            cert: self.tls_cert.clone(),
            key: self.tls_key.clone(),
        }
    }

    /// `initapi` parameters carried by the flags
    pub fn daemon_config(&self, dns: Vec<String>) -> Result<DaemonConfig> {
        let default_ip = self.default_ip.parse::<IpAddr>().map_err(|_| {
            RuneError::Usage(format!("{} is not a valid IP address", self.default_ip))
        })?;
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        Ok(DaemonConfig {
            pidfile: self.pidfile.clone(),
            root: self.root.clone(),
            auto_restart: self.auto_restart,
            enable_cors: self.enable_cors,
            dns,
            enable_iptables: self.enable_iptables,
            bridge_iface: non_empty(&self.bridge),
            bridge_ip: non_empty(&self.bridge_ip),
            default_ip,
            inter_container_communication: self.icc,
            graph_driver: non_empty(&self.graph_driver),
            mtu: self.mtu,
            tls: self.tls_options(),
        })
    }
}

/// Decides between daemon and client mode and drives the selected one
pub struct Frontend {
    build: BuildInfo,
    default_host: Option<String>,
}

impl Frontend {
    /// Reads the client's default daemon address from `RUNE_HOST`
    pub fn new(build: BuildInfo) -> Self {
        Self {
            build,
            default_host: std::env::var(HOST_ENV).ok(),
        }
    }

    /// Override the client's default daemon address
    pub fn with_default_host(mut self, host: Option<String>) -> Self {
        self.default_host = host;
        self
    }

    /// Run the invocation described by `cli`.
    ///
    /// Every check that can fail on the flags alone happens before the first
    /// job is created.
    pub async fn dispatch<W: Write + Send>(
        &self,
        cli: Cli,
        builder: EngineBuilder,
        out: &mut W,
    ) -> Result<()> {
        if cli.version {
            writeln!(out, "{}", self.build)?;
            return Ok(());
        }

        let mut dns = ListOpts::new(Some(validate_ipv4_address));
        dns.set_all(&cli.dns)?;

        let mut hosts = ListOpts::new(Some(validate_host));
        hosts.set_all(&cli.hosts)?;
        if hosts.is_empty() {
            let default_host = match &self.default_host {
                Some(host) if !host.is_empty() && !cli.daemon => host.clone(),
                _ => format!("unix://{}", DEFAULT_SOCKET_PATH),
            };
            hosts.set(&default_host)?;
        }

        if !cli.bridge.is_empty() && !cli.bridge_ip.is_empty() {
            return Err(RuneError::Usage(
                "You specified -b & --bip, mutually exclusive options. Please specify only one."
                    .into(),
            ));
        }

        let tls = cli.tls_options();
        if cli.daemon {
            tls.validate_server()?;
        } else {
            tls.validate()?;
        }

        if cli.daemon {
            self.run_daemon(&cli, hosts.into_vec(), dns.into_vec(), builder)
                .await
        } else {
            self.run_client(&cli, hosts, &tls, out).await
        }
    }

    async fn run_daemon(
        &self,
        cli: &Cli,
        hosts: Vec<String>,
        dns: Vec<String>,
        builder: EngineBuilder,
    ) -> Result<()> {
        if !cli.args.is_empty() {
            return Err(RuneError::Usage(format!(
                "rune -d accepts no command, got \"{}\"",
                cli.args.join(" ")
            )));
        }
        let config = cli.daemon_config(dns)?;

        info!(version = %self.build.version, commit = %self.build.git_commit, "starting daemon");
        let engine = builder.build(&cli.root)?;

        let mut init = engine.job(Operation::InitApi, Vec::new());
        config.apply(&mut init);
        init.run().await?;

        let mut serve = engine.job(Operation::ServeApi, hosts.clone());
        ServeApiParams {
            hosts,
            logging: true,
        }
        .apply(&mut serve);
        serve.run().await
    }

    async fn run_client<W: Write + Send>(
        &self,
        cli: &Cli,
        hosts: ListOpts,
        tls: &TlsOptions,
        out: &mut W,
    ) -> Result<()> {
        if hosts.len() > 1 {
            return Err(RuneError::Usage("Please specify only one -H".into()));
        }
        let addr: HostAddr = match hosts.get_all().first() {
            Some(host) => host.parse()?,
            None => HostAddr::unix(DEFAULT_SOCKET_PATH),
        };

        let transport = TransportConfig::load(tls)?;
        let client = RemoteClient::new(addr, transport.as_ref(), self.build)?;
        client.run_command(&cli.args, out).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("rune").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert!(!cli.daemon);
        assert!(cli.auto_restart);
        assert!(cli.enable_iptables);
        assert!(cli.icc);
        assert_eq!(cli.pidfile, PathBuf::from(DEFAULT_PIDFILE));
        assert_eq!(cli.root, PathBuf::from(DEFAULT_ROOT));
        assert_eq!(cli.mtu, 1500);
        assert!(cli.hosts.is_empty());
        assert!(!cli.tls_options().requested());
    }

    #[test]
    fn test_default_true_flags_can_be_disabled() {
        let cli = parse(&["-d", "-r=false", "--iptables=false", "--icc=false"]);
        assert!(!cli.auto_restart);
        assert!(!cli.enable_iptables);
        assert!(!cli.icc);

        let cli = parse(&["--icc"]);
        assert!(cli.icc);
    }

    #[test]
    fn test_repeated_options_and_command() {
        let cli = parse(&[
            "-H",
            "tcp://:4243",
            "-H",
            "unix:///tmp/rune.sock",
            "--dns",
            "8.8.8.8",
            "info",
        ]);
        assert_eq!(cli.hosts.len(), 2);
        assert_eq!(cli.dns, vec!["8.8.8.8"]);
        assert_eq!(cli.args, vec!["info"]);
    }

    #[test]
    fn test_daemon_config_from_flags() {
        let cli = parse(&[
            "-d",
            "-g",
            "/srv/rune",
            "-b",
            "none",
            "--mtu",
            "9000",
            "--ip",
            "10.1.2.3",
            "-s",
            "vfs",
        ]);
        let config = cli.daemon_config(vec!["1.1.1.1".into()]).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/rune"));
        assert_eq!(config.bridge_iface.as_deref(), Some("none"));
        assert_eq!(config.bridge_ip, None);
        assert_eq!(config.mtu, 9000);
        assert_eq!(config.default_ip.to_string(), "10.1.2.3");
        assert_eq!(config.graph_driver.as_deref(), Some("vfs"));
        assert_eq!(config.dns, vec!["1.1.1.1"]);
    }

    #[test]
    fn test_bad_default_ip() {
        let cli = parse(&["-d", "--ip", "nowhere"]);
        assert!(matches!(cli.daemon_config(Vec::new()), Err(RuneError::Usage(_))));
    }

    #[tokio::test]
    async fn test_version_flag() {
        let build = BuildInfo {
            version: "0.9.0",
            git_commit: "cafe123",
        };
        let frontend = Frontend::new(build).with_default_host(None);
        let mut out = Vec::new();
        frontend
            .dispatch(parse(&["-v"]), EngineBuilder::new(), &mut out)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Rune version 0.9.0, build cafe123\n"
        );
    }

    #[tokio::test]
    async fn test_daemon_rejects_positional_args() {
        let frontend = Frontend::new(BuildInfo::current()).with_default_host(None);
        let mut out = Vec::new();
        let err = frontend
            .dispatch(parse(&["-d", "ps"]), EngineBuilder::new(), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, RuneError::Usage(_)));
    }
}
