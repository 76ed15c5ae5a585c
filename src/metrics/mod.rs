//! Job metrics
//!
//! Every job invocation is counted by operation name:
//! - jobs created (`Engine::job`)
//! - jobs ran (handler resolved and invoked)
//! - jobs failed during run
//! - run latency (histogram, seconds)
//!
//! The series live in a registry owned by the recorder so several engines can
//! coexist in one process (tests do this). `gather_text` renders them for
//! scraping.

use crate::error::Result;
use prometheus::core::Collector;
use prometheus::proto::Metric;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const NAMESPACE: &str = "rune";
pub const SUBSYSTEM: &str = "jobs";
pub const JOB_LABEL: &str = "name";

/// Prometheus-backed recorder for job lifecycle events
#[derive(Clone)]
pub struct JobMetrics {
    registry: Registry,
    created: IntCounterVec,
    ran: IntCounterVec,
    run_failed: IntCounterVec,
    latency: HistogramVec,
}

impl JobMetrics {
    /// Create the four job series in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let created = IntCounterVec::new(
            counter_opts("created_total", "Number of jobs created."),
            &[JOB_LABEL],
        )?;
        let ran = IntCounterVec::new(counter_opts("ran_total", "Number of jobs ran."), &[JOB_LABEL])?;
        let run_failed = IntCounterVec::new(
            counter_opts("run_failed_total", "Number of jobs failed during run."),
            &[JOB_LABEL],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new("latency_seconds", "Latency of job runs.")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
            &[JOB_LABEL],
        )?;

        registry.register(Box::new(created.clone()))?;
        registry.register(Box::new(ran.clone()))?;
        registry.register(Box::new(run_failed.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            registry,
            created,
            ran,
            run_failed,
            latency,
        })
    }

    pub fn job_created(&self, name: &str) {
        self.created.with_label_values(&[name]).inc();
    }

    pub fn job_ran(&self, name: &str) {
        self.ran.with_label_values(&[name]).inc();
    }

    pub fn job_run_failed(&self, name: &str) {
        self.run_failed.with_label_values(&[name]).inc();
    }

    pub fn observe_latency(&self, name: &str, elapsed: Duration) {
        self.latency
            .with_label_values(&[name])
            .observe(elapsed.as_secs_f64());
    }

    /// Count the run and start timing it.
    ///
    /// The returned guard records latency when dropped and counts the run as
    /// failed unless [`RunObservation::succeeded`] was called first.
    pub fn start_run(self: &Arc<Self>, name: &str) -> RunObservation {
        self.job_ran(name);
        RunObservation {
            metrics: Arc::clone(self),
            name: name.to_string(),
            started: Instant::now(),
            succeeded: false,
        }
    }

    // The readers below go through `collect` so that asking about an
    // operation never creates its series.

    pub fn created_count(&self, name: &str) -> u64 {
        counter_value(&self.created, name)
    }

    pub fn ran_count(&self, name: &str) -> u64 {
        counter_value(&self.ran, name)
    }

    pub fn failed_count(&self, name: &str) -> u64 {
        counter_value(&self.run_failed, name)
    }

    /// Number of latency samples recorded for an operation
    pub fn latency_samples(&self, name: &str) -> u64 {
        find_series(&self.latency, name)
            .map(|m| m.get_histogram().get_sample_count())
            .unwrap_or(0)
    }

    /// Render every series in the Prometheus text format
    pub fn gather_text(&self) -> Result<String> {
        let mut buffer = String::new();
        TextEncoder::new().encode_utf8(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

fn counter_opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE).subsystem(SUBSYSTEM)
}

fn find_series(collector: &impl Collector, name: &str) -> Option<Metric> {
    collector
        .collect()
        .into_iter()
        .flat_map(|family| family.get_metric().to_vec())
        .find(|metric| {
            metric
                .get_label()
                .iter()
                .any(|label| label.get_name() == JOB_LABEL && label.get_value() == name)
        })
}

fn counter_value(counter: &IntCounterVec, name: &str) -> u64 {
    find_series(counter, name)
        .map(|m| m.get_counter().get_value() as u64)
        .unwrap_or(0)
}

/// In-flight run of a job, finished on drop
pub struct RunObservation {
    metrics: Arc<JobMetrics>,
    name: String,
    started: Instant,
    succeeded: bool,
}

impl RunObservation {
    /// Mark the run as successful
    pub fn succeeded(mut self) {
        self.succeeded = true;
    }

    /// Mark the run as failed
    pub fn failed(self) {}
}

impl Drop for RunObservation {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        if !self.succeeded {
            self.metrics.job_run_failed(&self.name);
        }
        self.metrics.observe_latency(&self.name, elapsed);
        debug!(
            job = %self.name,
            succeeded = self.succeeded,
            elapsed_ms = elapsed.as_millis() as u64,
            "job finished"
        );
    }
}
