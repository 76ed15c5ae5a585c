//! Remote API transport
//!
//! Address parsing, the TLS bootstrap shared by daemon and client, and the
//! small HTTP/1.1 framing both sides speak over unix sockets or TCP.

pub mod http;
pub mod tls;

pub use tls::{TlsOptions, TransportConfig};

use crate::error::{Result, RuneError};
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite};

/// Any byte stream the API can run over (plain or TLS, unix or TCP)
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// Transport protocol of a listen/connect address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Unix,
    Tcp,
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proto::Unix => write!(f, "unix"),
            Proto::Tcp => write!(f, "tcp"),
        }
    }
}

/// A `scheme://address` pair such as `unix:///var/run/rune.sock`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddr {
    pub proto: Proto,
    pub addr: String,
}

impl HostAddr {
    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            proto: Proto::Unix,
            addr: path.into(),
        }
    }

    pub fn tcp(addr: impl Into<String>) -> Self {
        Self {
            proto: Proto::Tcp,
            addr: addr.into(),
        }
    }

    /// Host part of a TCP address, without the port or IPv6 brackets
    pub fn host(&self) -> &str {
        let host = match self.addr.rsplit_once(':') {
            Some((host, _port)) if self.proto == Proto::Tcp => host,
            _ => &self.addr,
        };
        host.trim_start_matches('[').trim_end_matches(']')
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.proto, self.addr)
    }
}

impl FromStr for HostAddr {
    type Err = RuneError;

    fn from_str(s: &str) -> Result<Self> {
        let (proto, addr) = s
            .split_once("://")
            .ok_or_else(|| RuneError::InvalidConfig(format!("Invalid address (missing scheme): {}", s)))?;
        if addr.is_empty() {
            return Err(RuneError::InvalidConfig(format!("Invalid address (empty): {}", s)));
        }
        match proto {
            "unix" => Ok(HostAddr::unix(addr)),
            "tcp" => Ok(HostAddr::tcp(addr)),
            other => Err(RuneError::InvalidConfig(format!(
                "Invalid protocol {} in address {}",
                other, s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix() {
        let addr: HostAddr = "unix:///var/run/rune.sock".parse().unwrap();
        assert_eq!(addr, HostAddr::unix("/var/run/rune.sock"));
        assert_eq!(addr.to_string(), "unix:///var/run/rune.sock");
    }

    #[test]
    fn test_parse_tcp_and_host() {
        let addr: HostAddr = "tcp://localhost:4243".parse().unwrap();
        assert_eq!(addr.proto, Proto::Tcp);
        assert_eq!(addr.host(), "localhost");

        let v6: HostAddr = "tcp://[::1]:4243".parse().unwrap();
        assert_eq!(v6.host(), "::1");
    }

    #[test]
    fn test_parse_rejects_bad_addresses() {
        assert!("localhost:4243".parse::<HostAddr>().is_err());
        assert!("udp://localhost:53".parse::<HostAddr>().is_err());
        assert!("tcp://".parse::<HostAddr>().is_err());
    }
}
