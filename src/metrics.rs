//! Prometheus metrics for the server.
//!
//! Metrics are registered once at startup via [`init`] and updated through
//! the helper functions in this module. The HTTP surface exposes them in
//! text format through [`gather_metrics`].

use std::sync::OnceLock;

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::warn;

/// Global metrics registry.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Number of live websocket connections across all hubs.
static WS_CONNECTIONS: OnceLock<IntGauge> = OnceLock::new();

/// Websocket events broadcast, labelled by event type.
static WS_EVENTS: OnceLock<IntCounterVec> = OnceLock::new();

/// Websocket client actions processed, labelled by action name.
static WS_ACTIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Events dropped because a connection's send queue was full.
static WS_BROADCASTS_DROPPED: OnceLock<IntCounter> = OnceLock::new();

/// Recipients reached per hub broadcast.
static EVENT_FANOUT: OnceLock<Histogram> = OnceLock::new();

/// Status transitions applied, labelled by the new status.
static STATUS_TRANSITIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Application errors surfaced to clients, labelled by error kind.
static APP_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Files uploaded through the ingest pipeline.
static FILE_UPLOADS: OnceLock<IntCounter> = OnceLock::new();

/// Bytes written by the file ingest pipeline.
static FILE_UPLOAD_BYTES: OnceLock<IntCounter> = OnceLock::new();

/// Wall time of a complete file upload, seconds.
static FILE_UPLOAD_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Scheduled job runs, labelled by job name and outcome.
static JOB_RUNS: OnceLock<IntCounterVec> = OnceLock::new();

/// Whether this node currently holds cluster leadership (0 or 1).
static CLUSTER_LEADER: OnceLock<IntGauge> = OnceLock::new();

/// Cluster events sent to other nodes, labelled by event type.
static CLUSTER_EVENTS: OnceLock<IntCounterVec> = OnceLock::new();

/// Time spent in database-backed request handling, seconds, by operation.
static STORE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Returns the global registry, creating it on first use.
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Registers all metrics. Call once at startup, before any helper is used.
pub fn init() {
    let reg = registry();

    macro_rules! register {
        ($cell:ident, $build:expr) => {
            let metric = $build;
            if let Err(err) = reg.register(Box::new(metric.clone())) {
                warn!(error = %err, metric = stringify!($cell), "metric registration failed");
            }
            let _ = $cell.set(metric);
        };
    }

    register!(
        WS_CONNECTIONS,
        IntGauge::new(
            "parleyd_websocket_connections",
            "Live websocket connections across all hubs",
        )
        .expect("gauge opts")
    );
    register!(
        WS_EVENTS,
        IntCounterVec::new(
            Opts::new(
                "parleyd_websocket_events_total",
                "Websocket events broadcast, by event type",
            ),
            &["event"],
        )
        .expect("counter vec opts")
    );
    register!(
        WS_ACTIONS,
        IntCounterVec::new(
            Opts::new(
                "parleyd_websocket_actions_total",
                "Websocket client actions processed, by action",
            ),
            &["action"],
        )
        .expect("counter vec opts")
    );
    register!(
        WS_BROADCASTS_DROPPED,
        IntCounter::new(
            "parleyd_websocket_broadcasts_dropped_total",
            "Events dropped because a connection send queue was full",
        )
        .expect("counter opts")
    );
    register!(
        EVENT_FANOUT,
        Histogram::with_opts(
            HistogramOpts::new(
                "parleyd_event_fanout_recipients",
                "Recipients reached per hub broadcast",
            )
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]),
        )
        .expect("histogram opts")
    );
    register!(
        STATUS_TRANSITIONS,
        IntCounterVec::new(
            Opts::new(
                "parleyd_status_transitions_total",
                "Status transitions applied, by new status",
            ),
            &["status"],
        )
        .expect("counter vec opts")
    );
    register!(
        APP_ERRORS,
        IntCounterVec::new(
            Opts::new(
                "parleyd_app_errors_total",
                "Application errors surfaced to clients, by kind",
            ),
            &["kind"],
        )
        .expect("counter vec opts")
    );
    register!(
        FILE_UPLOADS,
        IntCounter::new(
            "parleyd_file_uploads_total",
            "Files accepted by the ingest pipeline",
        )
        .expect("counter opts")
    );
    register!(
        FILE_UPLOAD_BYTES,
        IntCounter::new(
            "parleyd_file_upload_bytes_total",
            "Bytes written by the file ingest pipeline",
        )
        .expect("counter opts")
    );
    register!(
        FILE_UPLOAD_DURATION,
        Histogram::with_opts(
            HistogramOpts::new(
                "parleyd_file_upload_duration_seconds",
                "Wall time of a complete file upload",
            )
            .buckets(vec![0.005, 0.025, 0.1, 0.5, 1.0, 2.5, 10.0, 30.0]),
        )
        .expect("histogram opts")
    );
    register!(
        JOB_RUNS,
        IntCounterVec::new(
            Opts::new(
                "parleyd_job_runs_total",
                "Scheduled job runs, by job name and outcome",
            ),
            &["job", "outcome"],
        )
        .expect("counter vec opts")
    );
    register!(
        CLUSTER_LEADER,
        IntGauge::new(
            "parleyd_cluster_leader",
            "Whether this node currently holds cluster leadership",
        )
        .expect("gauge opts")
    );
    register!(
        CLUSTER_EVENTS,
        IntCounterVec::new(
            Opts::new(
                "parleyd_cluster_events_total",
                "Cluster events sent to other nodes, by event type",
            ),
            &["event"],
        )
        .expect("counter vec opts")
    );
    register!(
        STORE_DURATION,
        HistogramVec::new(
            HistogramOpts::new(
                "parleyd_store_duration_seconds",
                "Time spent in store operations",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.025, 0.1, 0.5, 1.0]),
            &["operation"],
        )
        .expect("histogram vec opts")
    );
}

/// Renders all registered metrics in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = registry().gather();
    match encoder.encode_to_string(&families) {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "failed to encode metrics");
            String::new()
        }
    }
}

#[inline]
pub fn ws_connection_opened() {
    if let Some(g) = WS_CONNECTIONS.get() {
        g.inc();
    }
}

#[inline]
pub fn ws_connection_closed() {
    if let Some(g) = WS_CONNECTIONS.get() {
        g.dec();
    }
}

/// Current live websocket connection count, as tracked by the hubs.
pub fn ws_connection_count() -> i64 {
    WS_CONNECTIONS.get().map(|g| g.get()).unwrap_or(0)
}

#[inline]
pub fn record_ws_event(event: &str) {
    if let Some(c) = WS_EVENTS.get() {
        c.with_label_values(&[event]).inc();
    }
}

#[inline]
pub fn record_ws_action(action: &str) {
    if let Some(c) = WS_ACTIONS.get() {
        c.with_label_values(&[action]).inc();
    }
}

#[inline]
pub fn record_broadcast_dropped() {
    if let Some(c) = WS_BROADCASTS_DROPPED.get() {
        c.inc();
    }
}

#[inline]
pub fn record_event_fanout(recipients: usize) {
    if let Some(h) = EVENT_FANOUT.get() {
        h.observe(recipients as f64);
    }
}

#[inline]
pub fn record_status_transition(status: &str) {
    if let Some(c) = STATUS_TRANSITIONS.get() {
        c.with_label_values(&[status]).inc();
    }
}

#[inline]
pub fn record_app_error(kind: &str) {
    if let Some(c) = APP_ERRORS.get() {
        c.with_label_values(&[kind]).inc();
    }
}

#[inline]
pub fn record_file_upload(bytes: u64, seconds: f64) {
    if let Some(c) = FILE_UPLOADS.get() {
        c.inc();
    }
    if let Some(c) = FILE_UPLOAD_BYTES.get() {
        c.inc_by(bytes);
    }
    if let Some(h) = FILE_UPLOAD_DURATION.get() {
        h.observe(seconds);
    }
}

#[inline]
pub fn record_job_run(job: &str, ok: bool) {
    if let Some(c) = JOB_RUNS.get() {
        let outcome = if ok { "ok" } else { "error" };
        c.with_label_values(&[job, outcome]).inc();
    }
}

#[inline]
pub fn set_cluster_leader(leader: bool) {
    if let Some(g) = CLUSTER_LEADER.get() {
        g.set(if leader { 1 } else { 0 });
    }
}

#[inline]
pub fn record_cluster_event(event: &str) {
    if let Some(c) = CLUSTER_EVENTS.get() {
        c.with_label_values(&[event]).inc();
    }
}

#[inline]
pub fn observe_store_duration(operation: &str, seconds: f64) {
    if let Some(h) = STORE_DURATION.get() {
        h.with_label_values(&[operation]).observe(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_registers_and_gathers() {
        init();
        ws_connection_opened();
        record_ws_event("posted");
        record_app_error("not_found");
        let text = gather_metrics();
        assert!(text.contains("parleyd_websocket_connections"));
        assert!(text.contains("parleyd_websocket_events_total"));
        assert!(text.contains("parleyd_app_errors_total"));
    }
}
