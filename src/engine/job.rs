//! A single invocation of a named operation

use super::env::Env;
use super::Engine;
use crate::error::{Result, RuneError};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

/// Job lifecycle: `Created -> Running -> {Succeeded, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Created,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Created => write!(f, "created"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What a handler receives when its job runs.
///
/// The parameters are a snapshot taken when the run starts, so nothing the
/// caller does afterwards can change them.
#[derive(Clone)]
pub struct JobContext {
    pub name: String,
    pub args: Vec<String>,
    pub env: Env,
    /// Engine the job belongs to, for handlers that issue further jobs
    pub engine: Engine,
}

/// One invocation of an operation against an [`Engine`]
pub struct Job {
    engine: Engine,
    name: String,
    args: Vec<String>,
    env: Env,
    status: JobStatus,
    output: Option<Value>,
}

impl Job {
    pub(crate) fn new(engine: Engine, name: String, args: Vec<String>) -> Self {
        Self {
            engine,
            name,
            args,
            env: Env::new(),
            status: JobStatus::Created,
            output: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Value produced by the handler, once the job succeeded
    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn setenv(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        if self.writable(key) {
            self.env.set(key, value);
        }
        self
    }

    pub fn setenv_bool(&mut self, key: &str, value: bool) -> &mut Self {
        if self.writable(key) {
            self.env.set_bool(key, value);
        }
        self
    }

    pub fn setenv_int(&mut self, key: &str, value: i64) -> &mut Self {
        if self.writable(key) {
            self.env.set_int(key, value);
        }
        self
    }

    pub fn setenv_list<S: AsRef<str>>(&mut self, key: &str, values: &[S]) -> &mut Self {
        if self.writable(key) {
            self.env.set_list(key, values);
        }
        self
    }

    fn writable(&self, key: &str) -> bool {
        if self.status == JobStatus::Created {
            return true;
        }
        warn!(job = %self.name, key, status = %self.status, "ignoring parameter set after run");
        false
    }

    /// Run the job to completion.
    ///
    /// The handler is resolved here, not at creation, so an unknown operation
    /// name surfaces as [`RuneError::UnknownOperation`] without touching the
    /// ran/failed counters. The handler's error is returned unchanged.
    pub async fn run(&mut self) -> Result<()> {
        if self.status != JobStatus::Created {
            return Err(RuneError::JobState(format!(
                "job {} already {}",
                self.name, self.status
            )));
        }

        let handler = match self.engine.handler(&self.name) {
            Some(handler) => handler,
            None => {
                self.status = JobStatus::Failed;
                return Err(RuneError::UnknownOperation(self.name.clone()));
            }
        };

        self.status = JobStatus::Running;
        debug!(job = %self.name, args = ?self.args, env = %self.env, "running job");

        let observation = self.engine.metrics().start_run(&self.name);
        let context = JobContext {
            name: self.name.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            engine: self.engine.clone(),
        };

        match handler.call(context).await {
            Ok(output) => {
                observation.succeeded();
                self.output = output;
                self.status = JobStatus::Succeeded;
                Ok(())
            }
            Err(err) => {
                observation.failed();
                debug!(job = %self.name, error = %err, "job failed");
                self.status = JobStatus::Failed;
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("status", &self.status)
            .finish()
    }
}
