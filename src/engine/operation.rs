//! Operation identifiers and typed job parameters

use super::env::Env;
use super::job::Job;
use crate::error::{Result, RuneError};
use std::fmt;
use std::str::FromStr;

/// The closed set of operations a Rune engine can dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    /// Initialize daemon subsystems and state
    InitApi,
    /// Bind the remote API listeners and serve requests
    ServeApi,
    /// Report build and platform versions
    Version,
    /// Report daemon-wide information
    Info,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::InitApi,
        Operation::ServeApi,
        Operation::Version,
        Operation::Info,
    ];

    /// Stable name used for dispatch and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::InitApi => "initapi",
            Operation::ServeApi => "serveapi",
            Operation::Version => "version",
            Operation::Info => "info",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Operation {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for Operation {
    type Err = RuneError;

    fn from_str(s: &str) -> Result<Self> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| RuneError::UnknownOperation(s.to_string()))
    }
}

/// Typed parameters bound to an operation at registration time.
///
/// `from_job` decodes what a handler receives; `apply` writes the same values
/// into a job before it runs.
pub trait JobParams: Sized + Send + 'static {
    fn from_job(args: &[String], env: &Env) -> Result<Self>;

    fn apply(&self, _job: &mut Job) {}
}

impl JobParams for () {
    fn from_job(_args: &[String], _env: &Env) -> Result<Self> {
        Ok(())
    }
}
