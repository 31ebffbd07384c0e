//! Prometheus metrics for the engine and its HTTP surface

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    pub http_requests_total: IntCounter,
    pub http_request_duration_seconds: Histogram,
    pub http_requests_in_flight: IntGauge,

    pub sessions_started_total: IntCounter,
    pub sessions_terminal_total: IntCounterVec,
    pub sessions_active: IntGauge,

    pub analysis_units_total: IntCounter,
    pub analysis_units_failed_total: IntCounter,
    pub analysis_units_in_flight: IntGauge,

    pub checkpoint_writes_total: IntCounter,
    pub checkpoint_failures_total: IntCounter,

    pub alerts_delivered_total: IntCounter,
    pub alerts_failed_total: IntCounter,

    pub store_connected: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total =
            IntCounter::with_opts(Opts::new("http_requests_total", "Total HTTP requests"))?;
        let http_request_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ))?;
        let http_requests_in_flight = IntGauge::with_opts(Opts::new(
            "http_requests_in_flight",
            "HTTP requests currently being served",
        ))?;

        let sessions_started_total = IntCounter::with_opts(Opts::new(
            "sessions_started_total",
            "Scan sessions started",
        ))?;
        let sessions_terminal_total = IntCounterVec::new(
            Opts::new("sessions_terminal_total", "Sessions reaching a terminal state"),
            &["state"],
        )?;
        let sessions_active =
            IntGauge::with_opts(Opts::new("sessions_active", "Sessions not yet terminal"))?;

        let analysis_units_total = IntCounter::with_opts(Opts::new(
            "analysis_units_total",
            "Analysis units dispatched",
        ))?;
        let analysis_units_failed_total = IntCounter::with_opts(Opts::new(
            "analysis_units_failed_total",
            "Analysis units that returned an error",
        ))?;
        let analysis_units_in_flight = IntGauge::with_opts(Opts::new(
            "analysis_units_in_flight",
            "Analysis units currently running",
        ))?;

        let checkpoint_writes_total = IntCounter::with_opts(Opts::new(
            "checkpoint_writes_total",
            "Checkpoints written",
        ))?;
        let checkpoint_failures_total = IntCounter::with_opts(Opts::new(
            "checkpoint_failures_total",
            "Checkpoint writes that failed",
        ))?;

        let alerts_delivered_total =
            IntCounter::with_opts(Opts::new("alerts_delivered_total", "Alerts delivered"))?;
        let alerts_failed_total = IntCounter::with_opts(Opts::new(
            "alerts_failed_total",
            "Alerts that exhausted delivery attempts",
        ))?;

        let store_connected = Gauge::with_opts(Opts::new(
            "checkpoint_store_connected",
            "1 when the durable checkpoint store is connected",
        ))?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;
        registry.register(Box::new(sessions_started_total.clone()))?;
        registry.register(Box::new(sessions_terminal_total.clone()))?;
        registry.register(Box::new(sessions_active.clone()))?;
        registry.register(Box::new(analysis_units_total.clone()))?;
        registry.register(Box::new(analysis_units_failed_total.clone()))?;
        registry.register(Box::new(analysis_units_in_flight.clone()))?;
        registry.register(Box::new(checkpoint_writes_total.clone()))?;
        registry.register(Box::new(checkpoint_failures_total.clone()))?;
        registry.register(Box::new(alerts_delivered_total.clone()))?;
        registry.register(Box::new(alerts_failed_total.clone()))?;
        registry.register(Box::new(store_connected.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_requests_in_flight,
            sessions_started_total,
            sessions_terminal_total,
            sessions_active,
            analysis_units_total,
            analysis_units_failed_total,
            analysis_units_in_flight,
            checkpoint_writes_total,
            checkpoint_failures_total,
            alerts_delivered_total,
            alerts_failed_total,
            store_connected,
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn export(&self) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
