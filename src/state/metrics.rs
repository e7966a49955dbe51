use prometheus::{Encoder, Histogram, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;

pub struct Metrics {
    registry: Registry,

    // Request metrics
    pub total_requests: IntCounter,
    pub failed_requests: IntCounter,
    pub identity_mismatches: IntCounter,
    pub request_duration: Histogram,

    // Queue metrics
    pub pending_entries: IntGauge,
    pub swept_entries: IntCounter,

    // Plugin metrics
    pub plugin_executions_total: IntCounter,
    pub plugin_errors_total: IntCounter,
    pub plugin_timeouts_total: IntCounter,
    pub plugin_execution_duration: Histogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let total_requests = IntCounter::new(
            "plugin_relay_requests_total",
            "Total number of plugin invocation requests",
        )
        .expect("metric creation failed");
        let failed_requests = IntCounter::new(
            "plugin_relay_requests_failed",
            "Total number of requests answered with success=false",
        )
        .expect("metric creation failed");
        let identity_mismatches = IntCounter::new(
            "plugin_relay_identity_mismatches_total",
            "Total number of requests rejected for a stale identifier hash",
        )
        .expect("metric creation failed");
        let request_duration = Histogram::with_opts(prometheus::HistogramOpts::new(
            "plugin_relay_request_duration_seconds",
            "Request duration in seconds",
        ))
        .expect("metric creation failed");

        let pending_entries = IntGauge::new(
            "plugin_relay_pending_entries",
            "Queue entries waiting for a worker or a response",
        )
        .expect("metric creation failed");
        let swept_entries = IntCounter::new(
            "plugin_relay_swept_entries_total",
            "Total number of expired queue entries evicted by the sweeper",
        )
        .expect("metric creation failed");

        let plugin_executions_total = IntCounter::new(
            "plugin_relay_plugin_executions_total",
            "Total number of plugin executions",
        )
        .expect("metric creation failed");
        let plugin_errors_total = IntCounter::new(
            "plugin_relay_plugin_errors_total",
            "Total number of plugin errors",
        )
        .expect("metric creation failed");
        let plugin_timeouts_total = IntCounter::new(
            "plugin_relay_plugin_timeouts_total",
            "Total number of plugin timeouts",
        )
        .expect("metric creation failed");
        let plugin_execution_duration = Histogram::with_opts(prometheus::HistogramOpts::new(
            "plugin_relay_plugin_execution_duration_seconds",
            "Plugin execution duration in seconds",
        ))
        .expect("metric creation failed");

        // Register all metrics
        registry.register(Box::new(total_requests.clone())).unwrap();
        registry
            .register(Box::new(failed_requests.clone()))
            .unwrap();
        registry
            .register(Box::new(identity_mismatches.clone()))
            .unwrap();
        registry
            .register(Box::new(request_duration.clone()))
            .unwrap();
        registry
            .register(Box::new(pending_entries.clone()))
            .unwrap();
        registry.register(Box::new(swept_entries.clone())).unwrap();
        registry
            .register(Box::new(plugin_executions_total.clone()))
            .unwrap();
        registry
            .register(Box::new(plugin_errors_total.clone()))
            .unwrap();
        registry
            .register(Box::new(plugin_timeouts_total.clone()))
            .unwrap();
        registry
            .register(Box::new(plugin_execution_duration.clone()))
            .unwrap();

        Self {
            registry,
            total_requests,
            failed_requests,
            identity_mismatches,
            request_duration,
            pending_entries,
            swept_entries,
            plugin_executions_total,
            plugin_errors_total,
            plugin_timeouts_total,
            plugin_execution_duration,
        }
    }

    pub fn record_request(&self) {
        self.total_requests.inc();
    }

    pub fn record_failed_request(&self) {
        self.failed_requests.inc();
    }

    pub fn record_identity_mismatch(&self) {
        self.identity_mismatches.inc();
    }

    pub fn record_request_duration(&self, duration: std::time::Duration) {
        self.request_duration.observe(duration.as_secs_f64());
    }

    pub fn set_pending_entries(&self, pending: usize) {
        self.pending_entries.set(pending as i64);
    }

    pub fn record_swept(&self, count: usize) {
        self.swept_entries.inc_by(count as u64);
    }

    pub fn record_plugin_execution(&self, duration: std::time::Duration) {
        self.plugin_executions_total.inc();
        self.plugin_execution_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_plugin_error(&self) {
        self.plugin_errors_total.inc();
    }

    pub fn record_plugin_timeout(&self) {
        self.plugin_timeouts_total.inc();
    }

    pub fn gather_metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Prometheus text exposition of every registered metric
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.gather_metrics(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub struct RequestTimer {
    start: Instant,
    metrics: Arc<Metrics>,
}

impl RequestTimer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        metrics.record_request();
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        self.metrics.record_request_duration(duration);
    }

    pub fn fail(self) {
        let duration = self.start.elapsed();
        self.metrics.record_request_duration(duration);
        self.metrics.record_failed_request();
    }
}
