//! REST API handler for the Rune daemon
//!
//! Routes are thin: anything with daemon semantics runs as a job on the
//! shared engine so it is counted like every other invocation.

use super::Daemon;
use crate::engine::{Engine, Operation};
use crate::error::{Result, GENERIC_EXIT_CODE};
use crate::transport::http::{Request, Response};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Routes API requests for one serving daemon
#[derive(Clone)]
pub struct ApiHandler {
    engine: Engine,
    daemon: Arc<Daemon>,
    logging: bool,
}

impl ApiHandler {
    pub fn new(engine: Engine, daemon: Arc<Daemon>, logging: bool) -> Self {
        Self {
            engine,
            daemon,
            logging,
        }
    }

    /// Answer one request; failures become JSON error bodies
    pub async fn handle(&self, request: &Request) -> Response {
        if self.logging {
            info!(method = %request.method, path = %request.path, "API request");
        } else {
            debug!(method = %request.method, path = %request.path, "API request");
        }

        let response = self.route(request).await.unwrap_or_else(|err| {
            error!(path = %request.path, "API error: {}", err);
            let status = err.exit_status();
            Response::error(500, &err.to_string(), status.code)
        });

        if self.daemon.config.enable_cors {
            with_cors(response)
        } else {
            response
        }
    }

    async fn route(&self, request: &Request) -> Result<Response> {
        let method = request.method.as_str();
        match (method, request.route()) {
            ("GET", "/_ping") => Ok(Response::text(200, "OK")),
            ("GET", "/version") => self.run_job(Operation::Version).await,
            ("GET", "/info") => self.run_job(Operation::Info).await,
            ("GET", "/metrics") => {
                let text = self.engine.metrics().gather_text()?;
                Ok(Response::new(200)
                    .with_header("Content-Type", PROMETHEUS_CONTENT_TYPE)
                    .with_body(text.into_bytes()))
            }
            ("OPTIONS", _) if self.daemon.config.enable_cors => Ok(Response::new(200)),
            (_, "/_ping" | "/version" | "/info" | "/metrics") => Ok(Response::error(
                405,
                &format!("method {} not allowed", method),
                GENERIC_EXIT_CODE,
            )),
            _ => Ok(Response::error(404, "page not found", GENERIC_EXIT_CODE)),
        }
    }

    async fn run_job(&self, op: Operation) -> Result<Response> {
        let mut job = self.engine.job(op, Vec::new());
        job.run().await?;
        let body = job.output().cloned().unwrap_or(Value::Null);
        Response::json(200, &body)
    }
}

fn with_cors(response: Response) -> Response {
    response
        .with_header("Access-Control-Allow-Origin", "*")
        .with_header(
            "Access-Control-Allow-Headers",
            "Origin, X-Requested-With, Content-Type, Accept",
        )
        .with_header("Access-Control-Allow-Methods", "GET, POST, DELETE, PUT, OPTIONS")
}
