//! Controller Metrics
//!
//! Prometheus collectors for the orchestrator, dock dispatch and the
//! workflow queue, exposed in text format on the operator HTTP surface.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metric collectors owned by one controller instance
pub struct ControllerMetrics {
    registry: Registry,
    requests: IntCounterVec,
    dock_rpc_failures: IntCounterVec,
    dock_rpc_duration: HistogramVec,
    workflow_outcomes: IntCounterVec,
    docks_total: IntGauge,
    docks_available: IntGauge,
}

fn metric_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

impl ControllerMetrics {
    pub fn new() -> Result<Arc<Self>> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("sds_controller_requests_total", "Orchestrator calls by outcome"),
            &["operation", "outcome"],
        )
        .map_err(metric_err)?;
        let dock_rpc_failures = IntCounterVec::new(
            Opts::new(
                "sds_controller_dock_rpc_failures_total",
                "Dock RPCs that failed in transport or backend",
            ),
            &["operation", "kind"],
        )
        .map_err(metric_err)?;
        let dock_rpc_duration = HistogramVec::new(
            HistogramOpts::new(
                "sds_controller_dock_rpc_duration_seconds",
                "Latency of dock RPCs",
            ),
            &["operation"],
        )
        .map_err(metric_err)?;
        let workflow_outcomes = IntCounterVec::new(
            Opts::new(
                "sds_controller_workflow_outcomes_total",
                "Finished asynchronous workflows by outcome",
            ),
            &["outcome"],
        )
        .map_err(metric_err)?;
        let docks_total =
            IntGauge::new("sds_controller_docks_total", "Registered docks").map_err(metric_err)?;
        let docks_available = IntGauge::new(
            "sds_controller_docks_available",
            "Registered docks currently available",
        )
        .map_err(metric_err)?;

        registry.register(Box::new(requests.clone())).map_err(metric_err)?;
        registry
            .register(Box::new(dock_rpc_failures.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(dock_rpc_duration.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(workflow_outcomes.clone()))
            .map_err(metric_err)?;
        registry.register(Box::new(docks_total.clone())).map_err(metric_err)?;
        registry
            .register(Box::new(docks_available.clone()))
            .map_err(metric_err)?;

        Ok(Arc::new(Self {
            registry,
            requests,
            dock_rpc_failures,
            dock_rpc_duration,
            workflow_outcomes,
            docks_total,
            docks_available,
        }))
    }

    pub fn record_request(&self, operation: &str, ok: bool) {
        let outcome = if ok { "success" } else { "failure" };
        self.requests.with_label_values(&[operation, outcome]).inc();
    }

    pub fn record_dock_rpc(&self, operation: &str, elapsed_secs: f64) {
        self.dock_rpc_duration
            .with_label_values(&[operation])
            .observe(elapsed_secs);
    }

    pub fn record_dock_failure(&self, operation: &str, kind: &str) {
        self.dock_rpc_failures
            .with_label_values(&[operation, kind])
            .inc();
    }

    pub fn record_workflow(&self, outcome: &str) {
        self.workflow_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn set_docks(&self, total: u64, available: u64) {
        self.docks_total.set(total as i64);
        self.docks_available.set(available as i64);
    }

    pub fn workflow_count(&self, outcome: &str) -> u64 {
        self.workflow_outcomes.with_label_values(&[outcome]).get()
    }

    pub fn request_count(&self, operation: &str, ok: bool) -> u64 {
        let outcome = if ok { "success" } else { "failure" };
        self.requests.with_label_values(&[operation, outcome]).get()
    }

    /// Encode all collectors in Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metric_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_series() {
        let metrics = ControllerMetrics::new().unwrap();
        metrics.record_request("CreateVolume", true);
        metrics.record_request("CreateVolume", false);
        metrics.record_workflow("succeeded");
        metrics.set_docks(3, 2);

        assert_eq!(metrics.request_count("CreateVolume", true), 1);
        let text = metrics.render().unwrap();
        assert!(text.contains("sds_controller_requests_total"));
        assert!(text.contains("operation=\"CreateVolume\""));
        assert!(text.contains("sds_controller_docks_available 2"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = ControllerMetrics::new().unwrap();
        let b = ControllerMetrics::new().unwrap();
        a.record_workflow("failed");
        assert_eq!(a.workflow_count("failed"), 1);
        assert_eq!(b.workflow_count("failed"), 0);
    }
}
