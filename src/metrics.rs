//! Prometheus metrics registry, covering the full series list the chaos controller
//! emits; threaded through `Dependencies` (see `reconciler::context`) rather than kept
//! as process-global statics, so tests can construct an isolated registry per case.

use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry, CounterVec, GaugeVec, HistogramVec, Registry,
};

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub executions_total: CounterVec,
    pub duration_seconds: HistogramVec,
    pub resources_affected: GaugeVec,
    pub errors_total: CounterVec,
    pub active: GaugeVec,
    pub history_records_total: CounterVec,
    pub history_cleanup_total: CounterVec,
    pub safety_dryrun_total: CounterVec,
    pub safety_excluded_resources_total: CounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        Self::with_registry(registry)
    }

    pub fn with_registry(registry: Registry) -> Self {
        let executions_total = register_counter_vec_with_registry!(
            "chaosexperiment_executions_total",
            "Total number of experiment executions",
            &["action", "namespace", "status"],
            registry
        )
        .expect("register chaosexperiment_executions_total");

        let duration_seconds = register_histogram_vec_with_registry!(
            "chaosexperiment_duration_seconds",
            "Duration of experiment executions in seconds",
            &["action", "namespace"],
            vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0],
            registry
        )
        .expect("register chaosexperiment_duration_seconds");

        let resources_affected = register_gauge_vec_with_registry!(
            "chaosexperiment_resources_affected",
            "Number of resources affected by the most recent execution",
            &["action", "namespace", "experiment"],
            registry
        )
        .expect("register chaosexperiment_resources_affected");

        let errors_total = register_counter_vec_with_registry!(
            "chaosexperiment_errors_total",
            "Total number of execution errors",
            &["action", "namespace", "error_type"],
            registry
        )
        .expect("register chaosexperiment_errors_total");

        let active = register_gauge_vec_with_registry!(
            "chaosexperiment_active",
            "Number of currently active (Running) experiments",
            &["action"],
            registry
        )
        .expect("register chaosexperiment_active");

        let history_records_total = register_counter_vec_with_registry!(
            "chaosexperiment_history_records_total",
            "Total number of history records created",
            &["action", "status"],
            registry
        )
        .expect("register chaosexperiment_history_records_total");

        let history_cleanup_total = register_counter_vec_with_registry!(
            "chaosexperiment_history_cleanup_total",
            "Total number of history records removed by cleanup",
            &["reason"],
            registry
        )
        .expect("register chaosexperiment_history_cleanup_total");

        let safety_dryrun_total = register_counter_vec_with_registry!(
            "chaosexperiment_safety_dryrun_total",
            "Total number of dry-run executions",
            &["action", "namespace"],
            registry
        )
        .expect("register chaosexperiment_safety_dryrun_total");

        let safety_excluded_resources_total = register_counter_vec_with_registry!(
            "chaosexperiment_safety_excluded_resources_total",
            "Total number of resources excluded by the safety gate",
            &["action", "namespace", "resource_type"],
            registry
        )
        .expect("register chaosexperiment_safety_excluded_resources_total");

        Metrics {
            registry,
            executions_total,
            duration_seconds,
            resources_affected,
            errors_total,
            active,
            history_records_total,
            history_cleanup_total,
            safety_dryrun_total,
            safety_excluded_resources_total,
        }
    }

    pub fn record_execution(&self, action: &str, namespace: &str, status: &str, duration_secs: f64) {
        self.executions_total.with_label_values(&[action, namespace, status]).inc();
        self.duration_seconds.with_label_values(&[action, namespace]).observe(duration_secs);
    }

    pub fn record_error(&self, action: &str, namespace: &str, error_type: &str) {
        self.errors_total.with_label_values(&[action, namespace, error_type]).inc();
    }

    pub fn record_excluded(&self, action: &str, namespace: &str, resource_type: &str) {
        self.safety_excluded_resources_total
            .with_label_values(&[action, namespace, resource_type])
            .inc();
    }

    pub fn record_history_cleanup(&self, reason: &str, count: usize) {
        self.history_cleanup_total.with_label_values(&[reason]).inc_by(count as f64);
    }

    /// Adjusts `chaosexperiment_active` when a reconcile's phase transition crosses the
    /// Running boundary in either direction; a no-op for transitions that don't (e.g.
    /// Pending -> Pending while waiting on a retry delay).
    pub fn sync_active(&self, action: &str, old_phase: crate::types::Phase, new_phase: crate::types::Phase) {
        use crate::types::Phase;
        let was_running = old_phase == Phase::Running;
        let is_running = new_phase == Phase::Running;
        if is_running && !was_running {
            self.active.with_label_values(&[action]).inc();
        } else if was_running && !is_running {
            self.active.with_label_values(&[action]).dec();
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
