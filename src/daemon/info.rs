//! Payloads of the `version` and `info` jobs

use super::Daemon;
use crate::build_info::{BuildInfo, API_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Storage driver reported when none was forced
pub const DEFAULT_GRAPH_DRIVER: &str = "overlay2";

/// Version info response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionResponse {
    pub version: String,
    pub git_commit: String,
    pub api_version: String,
    pub os: String,
    pub arch: String,
}

impl VersionResponse {
    pub fn new(build: &BuildInfo) -> Self {
        Self {
            version: build.version.to_string(),
            git_commit: build.git_commit.to_string(),
            api_version: API_VERSION.to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// System info response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InfoResponse {
    #[serde(rename = "ID")]
    pub id: String,
    pub containers: usize,
    pub images: usize,
    pub driver: String,
    #[serde(rename = "NCPU")]
    pub ncpu: usize,
    pub name: String,
    pub root_dir: String,
    pub server_version: String,
    #[serde(rename = "OSType")]
    pub os_type: String,
    pub architecture: String,
    #[serde(rename = "DNS")]
    pub dns: Vec<String>,
    pub bridge: String,
    pub mtu: i64,
    #[serde(rename = "IPTables")]
    pub iptables: bool,
    pub inter_container_communication: bool,
    pub auto_restart: bool,
    pub tls: bool,
    pub started_at: DateTime<Utc>,
}

impl InfoResponse {
    pub fn new(daemon: &Daemon, build: &BuildInfo) -> Self {
        let config = &daemon.config;
        Self {
            id: daemon.id.clone(),
            containers: count_entries(&config.root.join("containers")),
            images: count_entries(&config.root.join("images")),
            driver: config
                .graph_driver
                .clone()
                .unwrap_or_else(|| DEFAULT_GRAPH_DRIVER.to_string()),
            ncpu: num_cpus::get(),
            name: gethostname::gethostname().to_string_lossy().to_string(),
            root_dir: config.root.display().to_string(),
            server_version: build.version.to_string(),
            os_type: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            dns: config.dns.clone(),
            bridge: config
                .bridge_iface
                .clone()
                .or_else(|| config.bridge_ip.clone())
                .unwrap_or_default(),
            mtu: config.mtu,
            iptables: config.enable_iptables,
            inter_container_communication: config.inter_container_communication,
            auto_restart: config.auto_restart,
            tls: daemon.transport.is_some(),
            started_at: daemon.started_at,
        }
    }
}

fn count_entries(dir: &Path) -> usize {
    fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}
