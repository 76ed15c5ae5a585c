//! Rune - control plane of a Docker-like container daemon
//!
//! A single binary that is either the daemon (`rune -d`) or a client of it.
//! Both sides are built from the same pieces:
//!
//! - a job [`engine`] that dispatches named operations to registered handlers
//! - per-operation [`metrics`] recorded around every job run
//! - the remote API [`transport`], plaintext or mutually authenticated TLS
//! - the [`daemon`] handlers and API server, and the [`client`] for it
//! - the [`cli`] front end, which picks the mode and runs it

pub mod build_info;
pub mod cli;
pub mod client;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod transport;

pub use build_info::BuildInfo;
pub use error::{ExitStatus, Result, RuneError, StatusError};
