//! Prometheus metrics registration and export.
//!
//! All metrics live in process-wide statics so any subsystem can record
//! without threading a handle around. [`init_metrics`] must be called once at
//! startup; recording before that is a silent no-op.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all reviewd metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Webhook deliveries, labeled by outcome (accepted, ignored, rejected, error).
pub static WEBHOOKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Finished review jobs, labeled by outcome (completed, failed, dead_letter).
pub static REVIEWS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall-clock time to process one review, in seconds.
pub static REVIEW_DURATION: OnceLock<Histogram> = OnceLock::new();

/// LLM chat requests, labeled by provider type and status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total tokens reported by providers, labeled by type (prompt/completion).
pub static LLM_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Responses that needed the free-text fallback parser.
pub static PARSER_FALLBACKS: OnceLock<Counter> = OnceLock::new();

/// Jobs waiting per queue lane.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Jobs parked in the dead letter list.
pub static DEAD_LETTER_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Workers currently processing a job.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Idempotent: a second call registers nothing and returns Ok.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due
/// to duplicate metric names.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let webhooks_total = CounterVec::new(
        Opts::new("reviewd_webhooks_total", "Total webhook deliveries"),
        &["outcome"],
    )?;

    let reviews_total = CounterVec::new(
        Opts::new("reviewd_reviews_total", "Total finished review jobs"),
        &["outcome"],
    )?;

    let review_duration = Histogram::with_opts(
        HistogramOpts::new(
            "reviewd_review_duration_seconds",
            "Review processing duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
    )?;

    let llm_requests_total = CounterVec::new(
        Opts::new("reviewd_llm_requests_total", "Total LLM API requests"),
        &["provider", "status"],
    )?;

    let llm_tokens_total = CounterVec::new(
        Opts::new("reviewd_llm_tokens_total", "Total tokens used"),
        &["type"],
    )?;

    let parser_fallbacks = Counter::new(
        "reviewd_parser_fallbacks_total",
        "Responses parsed with the free-text fallback",
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("reviewd_queue_depth", "Number of jobs waiting per lane"),
        &["lane"],
    )?;

    let dead_letter_depth = Gauge::new(
        "reviewd_dead_letter_depth",
        "Number of jobs in the dead letter list",
    )?;

    let active_workers = Gauge::new("reviewd_active_workers", "Number of busy workers")?;

    registry.register(Box::new(webhooks_total.clone()))?;
    registry.register(Box::new(reviews_total.clone()))?;
    registry.register(Box::new(review_duration.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;
    registry.register(Box::new(llm_tokens_total.clone()))?;
    registry.register(Box::new(parser_fallbacks.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(dead_letter_depth.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent).
    let _ = REGISTRY.set(registry);
    let _ = WEBHOOKS_TOTAL.set(webhooks_total);
    let _ = REVIEWS_TOTAL.set(reviews_total);
    let _ = REVIEW_DURATION.set(review_duration);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);
    let _ = LLM_TOKENS_TOTAL.set(llm_tokens_total);
    let _ = PARSER_FALLBACKS.set(parser_fallbacks);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = DEAD_LETTER_DEPTH.set(dead_letter_depth);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// # Returns
///
/// A string containing all metrics in the text exposition format, or a
/// comment line if the registry is not initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// Records the outcome of one webhook delivery.
pub fn record_webhook(outcome: &str) {
    if let Some(counter) = WEBHOOKS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Records a finished review job and its wall-clock duration.
pub fn record_review(outcome: &str, duration_secs: f64) {
    if let Some(counter) = REVIEWS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
    if let Some(histogram) = REVIEW_DURATION.get() {
        histogram.observe(duration_secs);
    }
}

/// Records one LLM request and its reported token usage.
pub fn record_llm_request(provider: &str, status: &str, prompt_tokens: u64, completion_tokens: u64) {
    if let Some(counter) = LLM_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[provider, status]).inc();
    }
    if let Some(counter) = LLM_TOKENS_TOTAL.get() {
        if prompt_tokens > 0 {
            counter
                .with_label_values(&["prompt"])
                .inc_by(prompt_tokens as f64);
        }
        if completion_tokens > 0 {
            counter
                .with_label_values(&["completion"])
                .inc_by(completion_tokens as f64);
        }
    }
}

/// Records that a response needed the free-text fallback parser.
pub fn record_parser_fallback() {
    if let Some(counter) = PARSER_FALLBACKS.get() {
        counter.inc();
    }
}

/// Updates the queue depth gauge for one lane.
pub fn set_lane_depth(lane: &str, depth: i64) {
    if let Some(gauge) = QUEUE_DEPTH.get() {
        gauge.with_label_values(&[lane]).set(depth as f64);
    }
}

/// Updates the dead letter depth gauge.
pub fn set_dead_letter_depth(depth: i64) {
    if let Some(gauge) = DEAD_LETTER_DEPTH.get() {
        gauge.set(depth as f64);
    }
}

/// Marks one worker as busy.
pub fn worker_busy() {
    if let Some(gauge) = ACTIVE_WORKERS.get() {
        gauge.inc();
    }
}

/// Marks one worker as idle again.
pub fn worker_idle() {
    if let Some(gauge) = ACTIVE_WORKERS.get() {
        gauge.dec();
    }
}
