//! Operator Metrics
//!
//! Prometheus counters for reconciliation passes, remote mutations, remote
//! jobs and teardown steps. Collectors are created unregistered so tests
//! can use private instances; the binary registers them on the default
//! registry served at `/metrics`.

use crate::error::{Error, Result};
use crate::remote::resources::Verb;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Operator metric collectors
#[derive(Clone)]
pub struct Metrics {
    reconciliations: IntCounterVec,
    reconcile_duration: Histogram,
    remote_mutations: IntCounterVec,
    remote_jobs: IntCounterVec,
    teardown_steps: IntCounterVec,
}

impl Metrics {
    /// Create unregistered collectors
    pub fn new() -> Result<Self> {
        Ok(Self {
            reconciliations: IntCounterVec::new(
                Opts::new("svm_operator_reconciliations_total", "Reconciliation passes by outcome"),
                &["outcome"],
            )
            .map_err(metrics_error)?,
            reconcile_duration: Histogram::with_opts(HistogramOpts::new(
                "svm_operator_reconcile_duration_seconds",
                "Duration of reconciliation passes",
            ))
            .map_err(metrics_error)?,
            remote_mutations: IntCounterVec::new(
                Opts::new("svm_operator_remote_mutations_total", "Mutating remote API calls by verb"),
                &["verb"],
            )
            .map_err(metrics_error)?,
            remote_jobs: IntCounterVec::new(
                Opts::new("svm_operator_remote_jobs_total", "Remote jobs by outcome"),
                &["outcome"],
            )
            .map_err(metrics_error)?,
            teardown_steps: IntCounterVec::new(
                Opts::new("svm_operator_teardown_steps_total", "Teardown steps by step and outcome"),
                &["step", "outcome"],
            )
            .map_err(metrics_error)?,
        })
    }

    /// Register every collector on `registry`
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry
            .register(Box::new(self.reconciliations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(self.reconcile_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(self.remote_mutations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(self.remote_jobs.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(self.teardown_steps.clone()))
            .map_err(metrics_error)?;
        Ok(())
    }

    pub fn record_reconcile(&self, outcome: &str, elapsed: Duration) {
        self.reconciliations.with_label_values(&[outcome]).inc();
        self.reconcile_duration.observe(elapsed.as_secs_f64());
    }

    pub fn record_mutation(&self, verb: Verb) {
        self.remote_mutations.with_label_values(&[verb.as_str()]).inc();
    }

    pub fn record_job(&self, outcome: &str) {
        self.remote_jobs.with_label_values(&[outcome]).inc();
    }

    pub fn record_teardown_step(&self, step: &str, outcome: &str) {
        self.teardown_steps.with_label_values(&[step, outcome]).inc();
    }

    pub fn reconciliations(&self, outcome: &str) -> u64 {
        self.reconciliations.with_label_values(&[outcome]).get()
    }

    pub fn mutations(&self, verb: &str) -> u64 {
        self.remote_mutations.with_label_values(&[verb]).get()
    }

    pub fn jobs(&self, outcome: &str) -> u64 {
        self.remote_jobs.with_label_values(&[outcome]).get()
    }

    pub fn teardown_steps(&self, step: &str, outcome: &str) -> u64 {
        self.teardown_steps.with_label_values(&[step, outcome]).get()
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_mutation(Verb::Patch);
        metrics.record_mutation(Verb::Patch);
        metrics.record_reconcile("done", Duration::from_millis(5));
        metrics.record_teardown_step("svm-peers", "removed");

        assert_eq!(metrics.mutations("PATCH"), 2);
        assert_eq!(metrics.mutations("POST"), 0);
        assert_eq!(metrics.reconciliations("done"), 1);
        assert_eq!(metrics.teardown_steps("svm-peers", "removed"), 1);
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = Registry::new();
        let metrics = Metrics::new().unwrap();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
