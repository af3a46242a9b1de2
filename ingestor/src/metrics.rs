use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref REPORTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_reports_total",
        "Total device reports received"
    ))
    .unwrap();
    pub static ref REJECTED_REPORTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_rejected_reports_total",
        "Total reports rejected for missing or invalid fields"
    ))
    .unwrap();
    pub static ref PERSISTED_READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_persisted_readings_total",
        "Total readings appended to the telemetry log"
    ))
    .unwrap();
    pub static ref ALERTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("ingestor_alerts_total", "Threshold breaches by kind"),
        &["kind"]
    )
    .unwrap();
    pub static ref UPSTREAM_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_upstream_failures_total",
        "Report generations that failed upstream or returned an invalid payload"
    ))
    .unwrap();
    pub static ref NOTIFY_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_notify_failures_total",
        "Alert notifications that could not be delivered"
    ))
    .unwrap();
    pub static ref EXPORT_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_export_failures_total",
        "Spreadsheet exports that could not be delivered"
    ))
    .unwrap();
    pub static ref CORRUPT_RECORDS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_corrupt_records_total",
        "Persisted records skipped because they could not be parsed"
    ))
    .unwrap();
    pub static ref PIPELINE_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_pipeline_latency_seconds",
            "Time taken to process one device report end to end"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY.register(Box::new(REPORTS_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(REJECTED_REPORTS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(PERSISTED_READINGS_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(ALERTS_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(UPSTREAM_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(NOTIFY_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(EXPORT_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CORRUPT_RECORDS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(PIPELINE_LATENCY_SECONDS.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
