//! ---
//! fwu_section: "02-upgrade-orchestration"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Upgrade orchestration state machine and batch coordination."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use fwu_persistence::OperationStatus;
use prometheus::{self, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Metrics published by the upgrade executor.
#[derive(Clone)]
pub struct UpgradeMetrics {
    registry: SharedRegistry,
    operations_total: IntCounterVec,
    upload_attempts_total: IntCounter,
    reconnect_attempts_total: IntCounterVec,
    operation_duration_seconds: Histogram,
}

impl std::fmt::Debug for UpgradeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeMetrics").finish_non_exhaustive()
    }
}

impl UpgradeMetrics {
    /// Register the upgrade metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self, prometheus::Error> {
        let operations_total = IntCounterVec::new(
            Opts::new(
                "fwu_operations_total",
                "Upgrade operations that reached a terminal status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let upload_attempts_total = IntCounter::with_opts(Opts::new(
            "fwu_upload_attempts_total",
            "Image uploads started, retries included",
        ))?;
        registry.register(Box::new(upload_attempts_total.clone()))?;

        let reconnect_attempts_total = IntCounterVec::new(
            Opts::new(
                "fwu_reconnect_attempts_total",
                "Post-flash reconnect attempts by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(reconnect_attempts_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "fwu_operation_duration_seconds",
            "Wall time from executor start to terminal status",
        )
        .buckets(prometheus::exponential_buckets(0.5, 2.0, 12)?);
        let operation_duration_seconds = Histogram::with_opts(histogram_opts)?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            operations_total,
            upload_attempts_total,
            reconnect_attempts_total,
            operation_duration_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_operation(&self, status: OperationStatus, elapsed: Duration) {
        let label = status.to_string();
        self.operations_total
            .with_label_values(&[label.as_str()])
            .inc();
        self.operation_duration_seconds
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_upload_attempt(&self) {
        self.upload_attempts_total.inc();
    }

    pub fn record_reconnect_attempt(&self, outcome: &str) {
        self.reconnect_attempts_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn operations(&self, status: OperationStatus) -> u64 {
        let label = status.to_string();
        self.operations_total
            .with_label_values(&[label.as_str()])
            .get()
    }

    pub fn upload_attempts(&self) -> u64 {
        self.upload_attempts_total.get()
    }

    pub fn reconnect_attempts(&self, outcome: &str) -> u64 {
        self.reconnect_attempts_total
            .with_label_values(&[outcome])
            .get()
    }

    /// Text exposition of every metric in the registry.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_exposes_families() {
        let metrics = UpgradeMetrics::new(new_registry()).unwrap();
        metrics.record_operation(OperationStatus::Success, Duration::from_secs(3));
        metrics.record_upload_attempt();
        metrics.record_reconnect_attempt("connected");
        assert_eq!(metrics.operations(OperationStatus::Success), 1);
        assert_eq!(metrics.upload_attempts(), 1);
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("fwu_operations_total{status=\"success\"} 1"));
        assert!(text.contains("fwu_reconnect_attempts_total{outcome=\"connected\"} 1"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = new_registry();
        UpgradeMetrics::new(registry.clone()).unwrap();
        assert!(UpgradeMetrics::new(registry).is_err());
    }
}
