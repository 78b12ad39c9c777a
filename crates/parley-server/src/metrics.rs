//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::{ChatRoom, EventKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Metric names.
pub mod names {
    pub const EVENTS_TOTAL: &str = "parley_events_total";
    pub const LAST_SEQUENCE: &str = "parley_last_sequence";
    pub const PRESENT_USERS: &str = "parley_present_users";
    pub const REQUESTS_TOTAL: &str = "parley_requests_total";
    pub const POLLS_IN_FLIGHT: &str = "parley_polls_in_flight";
    pub const POLL_WAIT_SECONDS: &str = "parley_poll_wait_seconds";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total number of appended events by type");
    metrics::describe_gauge!(names::LAST_SEQUENCE, "Highest assigned event sequence");
    metrics::describe_gauge!(names::PRESENT_USERS, "Current number of present identities");
    metrics::describe_counter!(names::REQUESTS_TOTAL, "Total number of requests by route");
    metrics::describe_gauge!(
        names::POLLS_IN_FLIGHT,
        "Current number of poll requests being served"
    );
    metrics::describe_histogram!(
        names::POLL_WAIT_SECONDS,
        "Time from poll request to response in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an appended event.
pub fn record_event(kind: EventKind, sequence: u64) {
    counter!(names::EVENTS_TOTAL, "type" => kind.as_str()).increment(1);
    gauge!(names::LAST_SEQUENCE).set(sequence as f64);
}

/// Update the present identity count.
pub fn set_present_users(count: usize) {
    gauge!(names::PRESENT_USERS).set(count as f64);
}

/// Record a request.
pub fn record_request(route: &'static str) {
    counter!(names::REQUESTS_TOTAL, "route" => route).increment(1);
}

/// Record how long a poll took to answer.
pub fn record_poll_wait(seconds: f64) {
    histogram!(names::POLL_WAIT_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Follow the room's event stream and keep the event metrics current.
///
/// Holds only a weak reference to the room; ends when the room is dropped.
pub fn spawn_event_recorder(room: &Arc<ChatRoom>) -> JoinHandle<()> {
    let mut events = room.subscribe();
    let room = Arc::downgrade(room);

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    record_event(event.kind, event.sequence);
                    if matches!(event.kind, EventKind::Join | EventKind::Part) {
                        let Some(room) = room.upgrade() else {
                            break;
                        };
                        set_present_users(room.stats().present);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event recorder lagged");
                    record_error("recorder_lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Event recorder stopped");
    })
}

/// Metrics guard that tracks a poll request for as long as it is alive.
///
/// Dropped on response and when the client disconnects mid-wait.
pub struct PollMetricsGuard;

impl PollMetricsGuard {
    /// Create a new metrics guard, recording a poll in flight.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::POLLS_IN_FLIGHT).increment(1.0);
        Self
    }
}

impl Default for PollMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PollMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::POLLS_IN_FLIGHT).decrement(1.0);
    }
}
