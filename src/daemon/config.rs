//! Startup parameters of the daemon's built-in jobs

use crate::engine::{Env, Job, JobParams};
use crate::error::{Result, RuneError};
use crate::transport::TlsOptions;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// Default socket path for the Rune daemon
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/rune.sock";
/// Default root of the daemon's state
pub const DEFAULT_ROOT: &str = "/var/lib/rune";
/// Default PID file path
pub const DEFAULT_PIDFILE: &str = "/var/run/rune.pid";
/// Default container network MTU
pub const DEFAULT_NETWORK_MTU: i64 = 1500;
/// Default address container ports are published on
pub const DEFAULT_IP: &str = "0.0.0.0";

/// Parameter names understood by `initapi` and `serveapi`
pub mod keys {
    pub const PIDFILE: &str = "Pidfile";
    pub const ROOT: &str = "Root";
    pub const AUTO_RESTART: &str = "AutoRestart";
    pub const ENABLE_CORS: &str = "EnableCors";
    pub const DNS: &str = "Dns";
    pub const ENABLE_IPTABLES: &str = "EnableIptables";
    pub const BRIDGE_IFACE: &str = "BridgeIface";
    pub const BRIDGE_IP: &str = "BridgeIp";
    pub const DEFAULT_IP: &str = "DefaultIp";
    pub const INTER_CONTAINER_COMMUNICATION: &str = "InterContainerCommunication";
    pub const GRAPH_DRIVER: &str = "GraphDriver";
    pub const MTU: &str = "Mtu";
    pub const TLS: &str = "Tls";
    pub const TLS_VERIFY: &str = "TlsVerify";
    pub const TLS_CA: &str = "TlsCa";
    pub const TLS_CERT: &str = "TlsCert";
    pub const TLS_KEY: &str = "TlsKey";
    pub const LOGGING: &str = "Logging";
}

/// Rune daemon configuration, the parameters of `initapi`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// PID file path
    pub pidfile: PathBuf,
    /// Data directory for containers, images, etc.
    pub root: PathBuf,
    /// Restart previously running containers
    pub auto_restart: bool,
    /// Send CORS headers from the remote API
    pub enable_cors: bool,
    /// DNS servers handed to containers
    pub dns: Vec<String>,
    /// Let the daemon add iptables rules
    pub enable_iptables: bool,
    /// Pre-existing bridge to attach containers to ("none" disables networking)
    pub bridge_iface: Option<String>,
    /// CIDR address for the bridge, exclusive with `bridge_iface`
    pub bridge_ip: Option<String>,
    /// Default address for published container ports
    pub default_ip: IpAddr,
    /// Inter-container communication
    pub inter_container_communication: bool,
    /// Forced storage driver
    pub graph_driver: Option<String>,
    /// Container network MTU
    pub mtu: i64,
    /// TLS material for the remote API
    pub tls: TlsOptions,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pidfile: PathBuf::from(DEFAULT_PIDFILE),
            root: PathBuf::from(DEFAULT_ROOT),
            auto_restart: true,
            enable_cors: false,
            dns: Vec::new(),
            enable_iptables: true,
            bridge_iface: None,
            bridge_ip: None,
            default_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            inter_container_communication: true,
            graph_driver: None,
            mtu: DEFAULT_NETWORK_MTU,
            tls: TlsOptions::default(),
        }
    }
}

impl DaemonConfig {
    /// Check the network and TLS parameters before anything is created
    pub fn validate(&self) -> Result<()> {
        self.tls.validate_server()?;
        if self.bridge_iface.is_some() && self.bridge_ip.is_some() {
            return Err(RuneError::InvalidConfig(
                "You specified -b & --bip, mutually exclusive options. Please specify only one."
                    .into(),
            ));
        }
        if let Some(cidr) = &self.bridge_ip {
            validate_cidr(cidr)?;
        }
        if self.mtu <= 0 {
            return Err(RuneError::InvalidConfig(format!(
                "invalid MTU {}: must be positive",
                self.mtu
            )));
        }
        Ok(())
    }
}

/// `a.b.c.d/n` with n in 0..=32
fn validate_cidr(cidr: &str) -> Result<()> {
    let invalid = || RuneError::InvalidConfig(format!("invalid bridge CIDR: {}", cidr));
    let (ip, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    ip.parse::<Ipv4Addr>().map_err(|_| invalid())?;
    match prefix.parse::<u8>() {
        Ok(bits) if bits <= 32 => Ok(()),
        _ => Err(invalid()),
    }
}

fn path_or(env: &Env, key: &str, default: &str) -> PathBuf {
    PathBuf::from(env.get_non_empty(key).unwrap_or(default))
}

fn optional(env: &Env, key: &str) -> Option<String> {
    env.get_non_empty(key).map(String::from)
}

impl JobParams for DaemonConfig {
    fn from_job(_args: &[String], env: &Env) -> Result<Self> {
        let root = env
            .get_non_empty(keys::ROOT)
            .map(PathBuf::from)
            .ok_or_else(|| RuneError::invalid_parameter(keys::ROOT, "root path is required"))?;

        let default_ip = env
            .get_non_empty(keys::DEFAULT_IP)
            .unwrap_or(DEFAULT_IP)
            .parse::<IpAddr>()
            .map_err(|_| {
                RuneError::invalid_parameter(
                    keys::DEFAULT_IP,
                    format!("{} is not an IP address", env.get_or_empty(keys::DEFAULT_IP)),
                )
            })?;

        Ok(Self {
            pidfile: path_or(env, keys::PIDFILE, DEFAULT_PIDFILE),
            root,
            auto_restart: env.get_bool_or(keys::AUTO_RESTART, true),
            enable_cors: env.get_bool(keys::ENABLE_CORS),
            dns: env.get_list(keys::DNS),
            enable_iptables: env.get_bool_or(keys::ENABLE_IPTABLES, true),
            bridge_iface: optional(env, keys::BRIDGE_IFACE),
            bridge_ip: optional(env, keys::BRIDGE_IP),
            default_ip,
            inter_container_communication: env
                .get_bool_or(keys::INTER_CONTAINER_COMMUNICATION, true),
            graph_driver: optional(env, keys::GRAPH_DRIVER),
            mtu: env.get_int(keys::MTU)?.unwrap_or(DEFAULT_NETWORK_MTU),
            tls: TlsOptions {
                tls: env.get_bool(keys::TLS),
                verify: env.get_bool(keys::TLS_VERIFY),
                ca: env.get_non_empty(keys::TLS_CA).map(PathBuf::from),
                cert: env.get_non_empty(keys::TLS_CERT).map(PathBuf::from),
                key: env.get_non_empty(keys::TLS_KEY).map(PathBuf::from),
            },
        })
    }

    fn apply(&self, job: &mut Job) {
        let path = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };
        job.setenv(keys::PIDFILE, self.pidfile.display().to_string())
            .setenv(keys::ROOT, self.root.display().to_string())
            .setenv_bool(keys::AUTO_RESTART, self.auto_restart)
            .setenv_bool(keys::ENABLE_CORS, self.enable_cors)
            .setenv_list(keys::DNS, &self.dns)
            .setenv_bool(keys::ENABLE_IPTABLES, self.enable_iptables)
            .setenv(keys::BRIDGE_IFACE, self.bridge_iface.clone().unwrap_or_default())
            .setenv(keys::BRIDGE_IP, self.bridge_ip.clone().unwrap_or_default())
            .setenv(keys::DEFAULT_IP, self.default_ip.to_string())
            .setenv_bool(
                keys::INTER_CONTAINER_COMMUNICATION,
                self.inter_container_communication,
            )
            .setenv(keys::GRAPH_DRIVER, self.graph_driver.clone().unwrap_or_default())
            .setenv_int(keys::MTU, self.mtu)
            .setenv_bool(keys::TLS, self.tls.tls)
            .setenv_bool(keys::TLS_VERIFY, self.tls.verify)
            .setenv(keys::TLS_CA, path(&self.tls.ca))
            .setenv(keys::TLS_CERT, path(&self.tls.cert))
            .setenv(keys::TLS_KEY, path(&self.tls.key));
    }
}

/// Parameters of `serveapi`: the listen addresses come from the job's arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeApiParams {
    pub hosts: Vec<String>,
    /// Log every API request
    pub logging: bool,
}

impl JobParams for ServeApiParams {
    fn from_job(args: &[String], env: &Env) -> Result<Self> {
        if args.is_empty() {
            return Err(RuneError::invalid_parameter(
                "args",
                "serveapi needs at least one listen address",
            ));
        }
        Ok(Self {
            hosts: args.to_vec(),
            logging: env.get_bool(keys::LOGGING),
        })
    }

    fn apply(&self, job: &mut Job) {
        job.setenv_bool(keys::LOGGING, self.logging);
    }
}
