//! Rune job engine
//!
//! The engine is the dispatch seam between the command-line front end and
//! the daemon's subsystems. Handlers are registered once, under an
//! [`Operation`], through an [`EngineBuilder`]; the built [`Engine`] is frozen
//! and can be cloned into any task that needs to run jobs.
//!
//! ```no_run
//! # async fn demo() -> runed::Result<()> {
//! use runed::engine::{Engine, Operation};
//!
//! let engine = Engine::builder()
//!     .register(Operation::Version, |_: (), _ctx| async { Ok(None) })
//!     .build("/var/lib/rune")?;
//!
//! let mut job = engine.job(Operation::Version, Vec::new());
//! job.run().await?;
//! # Ok(())
//! # }
//! ```

mod env;
mod job;
mod operation;

pub use env::{Env, LIST_SEPARATOR};
pub use job::{Job, JobContext, JobStatus};
pub use operation::{JobParams, Operation};

use crate::error::Result;
use crate::metrics::JobMetrics;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a handler hands back: an optional output value or an error
pub type HandlerResult = Result<Option<Value>>;

/// Boxed future returned by type-erased handlers
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Type-erased operation handler
pub trait Handler: Send + Sync {
    fn call(&self, ctx: JobContext) -> BoxFuture<HandlerResult>;
}

/// Adapter that decodes the handler's parameter struct before calling it
struct TypedHandler<P, F> {
    handler: F,
    _params: PhantomData<fn() -> P>,
}

impl<P, F, Fut> Handler for TypedHandler<P, F>
where
    P: JobParams,
    F: Fn(P, JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: JobContext) -> BoxFuture<HandlerResult> {
        match P::from_job(&ctx.args, &ctx.env) {
            Ok(params) => Box::pin((self.handler)(params, ctx)),
            Err(err) => Box::pin(async move { Err(err) }),
        }
    }
}

/// Collects handlers before the engine is frozen
#[derive(Default)]
pub struct EngineBuilder {
    handlers: HashMap<Operation, Arc<dyn Handler>>,
    metrics: Option<Arc<JobMetrics>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for an operation, bound to its parameter type
    pub fn register<P, F, Fut>(mut self, op: Operation, handler: F) -> Self
    where
        P: JobParams,
        F: Fn(P, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let typed = TypedHandler {
            handler,
            _params: PhantomData,
        };
        if self.handlers.insert(op, Arc::new(typed)).is_some() {
            warn!(operation = %op, "replacing previously registered handler");
        }
        self
    }

    /// Use an existing metrics recorder instead of a fresh one
    pub fn metrics(mut self, metrics: Arc<JobMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_registered(&self, op: Operation) -> bool {
        self.handlers.contains_key(&op)
    }

    /// Create the engine root directory and freeze the registry
    pub fn build(self, root: impl AsRef<Path>) -> Result<Engine> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(JobMetrics::new()?),
        };

        let engine = Engine {
            inner: Arc::new(EngineInner {
                id: Uuid::new_v4().simple().to_string(),
                root,
                handlers: self.handlers,
                metrics,
            }),
        };

        info!(
            id = %engine.id(),
            root = %engine.root().display(),
            operations = ?engine.operations(),
            "engine ready"
        );
        Ok(engine)
    }
}

struct EngineInner {
    id: String,
    root: PathBuf,
    handlers: HashMap<Operation, Arc<dyn Handler>>,
    metrics: Arc<JobMetrics>,
}

/// Frozen operation registry and job factory
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Create a job for the named operation.
    ///
    /// Never fails: whether the name is runnable is decided by [`Job::run`].
    pub fn job(&self, name: impl AsRef<str>, args: Vec<String>) -> Job {
        let name = name.as_ref().to_string();
        self.inner.metrics.job_created(&name);
        debug!(job = %name, "job created");
        Job::new(self.clone(), name, args)
    }

    pub(crate) fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        let op = name.parse::<Operation>().ok()?;
        self.inner.handlers.get(&op).cloned()
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn metrics(&self) -> &Arc<JobMetrics> {
        &self.inner.metrics
    }

    /// Registered operations, sorted
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops: Vec<_> = self.inner.handlers.keys().copied().collect();
        ops.sort();
        ops
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.inner.id)
            .field("root", &self.inner.root)
            .field("operations", &self.operations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RuneError, StatusError};
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct Greeting {
        who: String,
        loud: bool,
    }

    impl JobParams for Greeting {
        fn from_job(args: &[String], env: &Env) -> Result<Self> {
            let who = args
                .first()
                .cloned()
                .ok_or_else(|| RuneError::invalid_parameter("args", "missing name"))?;
            Ok(Self {
                who,
                loud: env.get_bool("Loud"),
            })
        }

        fn apply(&self, job: &mut Job) {
            job.setenv_bool("Loud", self.loud);
        }
    }

    fn engine_with(builder: EngineBuilder) -> (Engine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let engine = builder.build(temp_dir.path().join("root")).unwrap();
        (engine, temp_dir)
    }

    #[test]
    fn test_build_creates_root() {
        let (engine, _dir) = engine_with(Engine::builder());
        assert!(engine.root().is_dir());
        assert!(engine.operations().is_empty());
    }

    #[tokio::test]
    async fn test_run_dispatches_typed_params() {
        let builder = Engine::builder().register(Operation::Version, |p: Greeting, ctx| async move {
            assert_eq!(ctx.name, "version");
            let text = if p.loud {
                format!("HELLO {}", p.who.to_uppercase())
            } else {
                format!("hello {}", p.who)
            };
            Ok(Some(json!(text)))
        });
        let (engine, _dir) = engine_with(builder);

        let mut job = engine.job(Operation::Version, vec!["rune".to_string()]);
        Greeting {
            who: String::new(),
            loud: true,
        }
        .apply(&mut job);
        job.run().await.unwrap();

        assert_eq!(job.status(), JobStatus::Succeeded);
        assert_eq!(job.output(), Some(&json!("HELLO RUNE")));
        let metrics = engine.metrics();
        assert_eq!(metrics.created_count("version"), 1);
        assert_eq!(metrics.ran_count("version"), 1);
        assert_eq!(metrics.failed_count("version"), 0);
        assert_eq!(metrics.latency_samples("version"), 1);
    }

    #[tokio::test]
    async fn test_unknown_operation_fails_at_run() {
        let (engine, _dir) = engine_with(Engine::builder());

        let mut job = engine.job("bogus", Vec::new());
        assert_eq!(job.status(), JobStatus::Created);
        assert_eq!(engine.metrics().created_count("bogus"), 1);

        let err = job.run().await.unwrap_err();
        assert!(matches!(err, RuneError::UnknownOperation(ref name) if name == "bogus"));
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(engine.metrics().ran_count("bogus"), 0);
        assert_eq!(engine.metrics().failed_count("bogus"), 0);
    }

    #[tokio::test]
    async fn test_known_but_unregistered_operation() {
        let (engine, _dir) = engine_with(Engine::builder());
        let err = engine.job(Operation::Info, Vec::new()).run().await.unwrap_err();
        assert!(matches!(err, RuneError::UnknownOperation(_)));
        assert_eq!(engine.metrics().ran_count("info"), 0);
    }

    #[tokio::test]
    async fn test_handler_error_is_returned_unchanged() {
        let builder = Engine::builder().register(Operation::Info, |_: (), _ctx| async {
            Err(StatusError::new("No such container: db", 2).into())
        });
        let (engine, _dir) = engine_with(builder);

        let mut job = engine.job(Operation::Info, Vec::new());
        let err = job.run().await.unwrap_err();
        assert_eq!(err.exit_status().code, 2);
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(engine.metrics().ran_count("info"), 1);
        assert_eq!(engine.metrics().failed_count("info"), 1);
        assert_eq!(engine.metrics().latency_samples("info"), 1);
    }

    #[tokio::test]
    async fn test_param_decode_failure_counts_as_failed_run() {
        let builder = Engine::builder()
            .register(Operation::Version, |_: Greeting, _ctx| async { Ok(None) });
        let (engine, _dir) = engine_with(builder);

        let err = engine
            .job(Operation::Version, Vec::new())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, RuneError::InvalidParameter { .. }));
        assert_eq!(engine.metrics().ran_count("version"), 1);
        assert_eq!(engine.metrics().failed_count("version"), 1);
    }

    #[tokio::test]
    async fn test_job_runs_once_and_freezes_params() {
        let builder = Engine::builder().register(Operation::Info, |_: (), _ctx| async { Ok(None) });
        let (engine, _dir) = engine_with(builder);

        let mut job = engine.job(Operation::Info, Vec::new());
        job.setenv("Key", "before");
        job.run().await.unwrap();
        job.setenv("Key", "after");
        assert_eq!(job.env().get("Key"), Some("before"));

        assert!(matches!(job.run().await, Err(RuneError::JobState(_))));
        assert_eq!(engine.metrics().ran_count("info"), 1);
    }

    #[tokio::test]
    async fn test_handler_can_issue_nested_jobs() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let outer = Arc::clone(&order);
        let inner = Arc::clone(&order);
        let builder = Engine::builder()
            .register(Operation::Info, move |_: (), _ctx| {
                let order = Arc::clone(&inner);
                async move {
                    order.lock().unwrap().push("info");
                    Ok(None)
                }
            })
            .register(Operation::Version, move |_: (), ctx| {
                let order = Arc::clone(&outer);
                async move {
                    order.lock().unwrap().push("version");
                    ctx.engine.job(Operation::Info, Vec::new()).run().await?;
                    Ok(None)
                }
            });
        let (engine, _dir) = engine_with(builder);

        engine.job(Operation::Version, Vec::new()).run().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["version", "info"]);
    }

    #[tokio::test]
    async fn test_concurrent_runs_share_metrics() {
        let builder = Engine::builder().register(Operation::Info, |_: (), _ctx| async { Ok(None) });
        let (engine, _dir) = engine_with(builder);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine.job(Operation::Info, Vec::new()).run().await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(engine.metrics().created_count("info"), 16);
        assert_eq!(engine.metrics().ran_count("info"), 16);
    }
}
