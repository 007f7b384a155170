//! Prometheus metrics for the herald dispatcher
//!
//! This module provides metrics tracking for:
//! - Dispatch: sends, failures, fallbacks, retries, queue health
//! - Sessions: health scores, reconnects, mobile-conflict pauses
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all dispatch metrics
struct DispatchMetrics {
    messages_sent: CounterVec,
    messages_failed: CounterVec,
    send_duration: HistogramVec,
    fallback_attempts: Counter,
    retries_scheduled: Counter,
    logs_reclaimed: Counter,
    campaigns_completed: Counter,
    campaigns_failed: Counter,
    jobs_processed: CounterVec,
    queue_depth: GaugeVec,
    webhook_events: CounterVec,
}

/// Container for all session metrics
struct SessionMetrics {
    account_health: GaugeVec,
    connected_accounts: Gauge,
    reconnect_attempts: Counter,
    reconnect_failures: Counter,
    conflict_pauses: Counter,
    conflict_resumes: Counter,
    forced_resumes: Counter,
    mobile_activity_events: Counter,
}

/// Global storage for dispatch metrics
static DISPATCH_METRICS: OnceLock<DispatchMetrics> = OnceLock::new();

/// Global storage for session metrics
static SESSION_METRICS: OnceLock<SessionMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, errors are logged and subsequent
/// metric operations become no-ops.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let dispatch = DispatchMetrics {
        messages_sent: register_counter_vec!(
            "herald_messages_sent_total",
            "Total messages accepted by a worker instance",
            &["provider"]
        )?,
        messages_failed: register_counter_vec!(
            "herald_messages_failed_total",
            "Total send attempts that failed, by failure class",
            &["provider", "kind"]
        )?,
        send_duration: register_histogram_vec!(
            "herald_send_duration_seconds",
            "Send round trip duration in seconds",
            &["provider"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
        fallback_attempts: register_counter!(
            "herald_fallback_attempts_total",
            "Total sends retried on a fallback account"
        )?,
        retries_scheduled: register_counter!(
            "herald_retries_scheduled_total",
            "Total log-level retries scheduled"
        )?,
        logs_reclaimed: register_counter!(
            "herald_logs_reclaimed_total",
            "Total stuck ongoing logs reset to pending"
        )?,
        campaigns_completed: register_counter!(
            "herald_campaigns_completed_total",
            "Total campaigns that reached completed"
        )?,
        campaigns_failed: register_counter!(
            "herald_campaigns_failed_total",
            "Total campaigns that failed as a whole"
        )?,
        jobs_processed: register_counter_vec!(
            "herald_jobs_processed_total",
            "Total queue jobs processed, by queue and result",
            &["queue", "result"]
        )?,
        queue_depth: register_gauge_vec!(
            "herald_queue_depth",
            "Jobs currently in each queue structure",
            &["queue", "state"]
        )?,
        webhook_events: register_counter_vec!(
            "herald_webhook_events_total",
            "Total webhook events received, by event kind and result",
            &["event", "result"]
        )?,
    };

    let session = SessionMetrics {
        account_health: register_gauge_vec!(
            "herald_account_health_score",
            "Last computed health score per session",
            &["session"]
        )?,
        connected_accounts: register_gauge!(
            "herald_connected_accounts",
            "Number of accounts currently connected"
        )?,
        reconnect_attempts: register_counter!(
            "herald_reconnect_attempts_total",
            "Total automatic reconnect attempts"
        )?,
        reconnect_failures: register_counter!(
            "herald_reconnect_failures_total",
            "Total automatic reconnect attempts that failed"
        )?,
        conflict_pauses: register_counter!(
            "herald_conflict_pauses_total",
            "Total campaigns paused for mobile activity"
        )?,
        conflict_resumes: register_counter!(
            "herald_conflict_resumes_total",
            "Total campaigns resumed after a mobile conflict"
        )?,
        forced_resumes: register_counter!(
            "herald_forced_resumes_total",
            "Total resumes forced after exhausting conflict checks"
        )?,
        mobile_activity_events: register_counter!(
            "herald_mobile_activity_events_total",
            "Total mobile activity signals received"
        )?,
    };

    DISPATCH_METRICS
        .set(dispatch)
        .map_err(|_| "Dispatch metrics already initialized")?;
    SESSION_METRICS
        .set(session)
        .map_err(|_| "Session metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    DISPATCH_METRICS.get().is_some() && SESSION_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a message accepted by an instance
pub fn record_message_sent(provider: &str) {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.messages_sent.with_label_values(&[provider]).inc();
    }
}

/// Record a failed send attempt
pub fn record_message_failed(provider: &str, kind: &str) {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.messages_failed.with_label_values(&[provider, kind]).inc();
    }
}

/// Record a send retried on a fallback account
pub fn record_fallback_attempt() {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.fallback_attempts.inc();
    }
}

/// Record a scheduled log-level retry
pub fn record_retry_scheduled() {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.retries_scheduled.inc();
    }
}

/// Record stuck logs reset to pending
pub fn record_logs_reclaimed(count: u64) {
    if count > 0 {
        if let Some(m) = DISPATCH_METRICS.get() {
            m.logs_reclaimed.inc_by(count as f64);
        }
    }
}

/// Record a campaign reaching a terminal state
pub fn record_campaign_finished(completed: bool) {
    let Some(m) = DISPATCH_METRICS.get() else {
        return;
    };

    if completed {
        m.campaigns_completed.inc();
    } else {
        m.campaigns_failed.inc();
    }
}

/// Record a processed queue job
pub fn record_job_processed(queue: &str, result: &str) {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.jobs_processed.with_label_values(&[queue, result]).inc();
    }
}

/// Record a received webhook event
pub fn record_webhook_event(event: &str, result: &str) {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.webhook_events.with_label_values(&[event, result]).inc();
    }
}

/// Update the depth gauges for one queue
pub fn update_queue_depth(queue: &str, ready: u64, scheduled: u64, leased: u64, dead: u64) {
    let Some(m) = DISPATCH_METRICS.get() else {
        return;
    };

    m.queue_depth
        .with_label_values(&[queue, "ready"])
        .set(ready as f64);
    m.queue_depth
        .with_label_values(&[queue, "scheduled"])
        .set(scheduled as f64);
    m.queue_depth
        .with_label_values(&[queue, "leased"])
        .set(leased as f64);
    m.queue_depth
        .with_label_values(&[queue, "dead"])
        .set(dead as f64);
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a send round-trip timer (returns a timer handle)
pub fn start_send_timer(provider: &str) -> MetricsTimer {
    match DISPATCH_METRICS.get() {
        Some(m) => MetricsTimer::new(
            m.send_duration
                .with_label_values(&[provider])
                .start_timer(),
        ),
        None => MetricsTimer::noop(),
    }
}

/// Update per-session health score
pub fn update_account_health(session: &str, score: i32) {
    if let Some(m) = SESSION_METRICS.get() {
        m.account_health
            .with_label_values(&[session])
            .set(score as f64);
    }
}

/// Update the connected-accounts gauge
pub fn update_connected_accounts(count: usize) {
    if let Some(m) = SESSION_METRICS.get() {
        m.connected_accounts.set(count as f64);
    }
}

/// Record an automatic reconnect attempt
pub fn record_reconnect_attempt(success: bool) {
    let Some(m) = SESSION_METRICS.get() else {
        return;
    };

    m.reconnect_attempts.inc();
    if !success {
        m.reconnect_failures.inc();
    }
}

/// Record a campaign paused for mobile activity
pub fn record_conflict_pause() {
    if let Some(m) = SESSION_METRICS.get() {
        m.conflict_pauses.inc();
    }
}

/// Record a campaign resumed after a conflict; `forced` marks resumes
/// that went ahead at the attempt cap
pub fn record_conflict_resume(forced: bool) {
    let Some(m) = SESSION_METRICS.get() else {
        return;
    };

    m.conflict_resumes.inc();
    if forced {
        m.forced_resumes.inc();
    }
}

/// Record an inbound mobile activity signal
pub fn record_mobile_activity_event() {
    if let Some(m) = SESSION_METRICS.get() {
        m.mobile_activity_events.inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
