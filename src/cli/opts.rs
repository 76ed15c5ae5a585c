//! Multi-value command-line options

use crate::daemon::DEFAULT_SOCKET_PATH;
use crate::error::{Result, RuneError};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Host used for `tcp://:port` and bare `:port` addresses
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
/// Port used when a TCP address names none
pub const DEFAULT_HTTP_PORT: u16 = 4243;

/// Checks and normalizes one value before it is stored
pub type Validator = fn(&str) -> Result<String>;

/// Ordered list of option values, each validated on insertion
#[derive(Clone)]
pub struct ListOpts {
    values: Vec<String>,
    validator: Option<Validator>,
}

impl ListOpts {
    pub fn new(validator: Option<Validator>) -> Self {
        Self {
            values: Vec::new(),
            validator,
        }
    }

    /// Validate and append; an invalid value leaves the list untouched
    pub fn set(&mut self, value: &str) -> Result<()> {
        let value = match self.validator {
            Some(validate) => validate(value)?,
            None => value.to_string(),
        };
        self.values.push(value);
        Ok(())
    }

    /// Set every value in order, stopping at the first invalid one
    pub fn set_all<I, S>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        values.into_iter().try_for_each(|v| self.set(v.as_ref()))
    }

    pub fn get_all(&self) -> &[String] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<String> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for ListOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.values).finish()
    }
}

impl std::fmt::Display for ListOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.values.join(" "))
    }
}

/// Accepts dotted-quad IPv4 addresses only
pub fn validate_ipv4_address(value: &str) -> Result<String> {
    let trimmed = value.trim();
    trimmed
        .parse::<Ipv4Addr>()
        .map(|ip| ip.to_string())
        .map_err(|_| RuneError::Usage(format!("{} is not an ip4 address", value)))
}

/// Normalizes a listen or connect address with the default host, port and socket
pub fn validate_host(value: &str) -> Result<String> {
    parse_host(DEFAULT_HTTP_HOST, DEFAULT_HTTP_PORT, DEFAULT_SOCKET_PATH, value)
}

/// Parse `unix://path`, `tcp://host:port`, `host:port` or `:port` into
/// `proto://address`; empty parts take the given defaults. IPv6 hosts are
/// written in brackets, `tcp://[::1]:4243`.
pub fn parse_host(
    default_host: &str,
    default_port: u16,
    default_unix: &str,
    addr: &str,
) -> Result<String> {
    let invalid = || RuneError::Usage(format!("Invalid bind address format: {}", addr));
    let addr = addr.trim();

    if addr.is_empty() {
        return Ok(format!("unix://{}", default_unix));
    }
    if let Some(path) = addr.strip_prefix("unix://") {
        let path = if path.is_empty() { default_unix } else { path };
        return Ok(format!("unix://{}", path));
    }

    let rest = match addr.strip_prefix("tcp://") {
        Some("") => return Err(invalid()),
        Some(rest) => rest,
        None if addr.contains("://") => {
            return Err(RuneError::Usage(format!(
                "Invalid bind address protocol: {}",
                addr
            )))
        }
        None => addr,
    };

    let (host, port) = match rest.strip_prefix('[') {
        Some(bracketed) => {
            let (ip, port) = bracketed.split_once("]:").ok_or_else(invalid)?;
            ip.parse::<Ipv6Addr>().map_err(|_| invalid())?;
            (&rest[..ip.len() + 2], port)
        }
        None => rest.split_once(':').ok_or_else(invalid)?,
    };
    if port.contains(':') {
        return Err(invalid());
    }
    let host = if host.is_empty() { default_host } else { host };
    let port = if port.is_empty() {
        default_port
    } else {
        match port.parse::<u16>() {
            Ok(0) | Err(_) => return Err(invalid()),
            Ok(port) => port,
        }
    };
    Ok(format!("tcp://{}:{}", host, port))
}
