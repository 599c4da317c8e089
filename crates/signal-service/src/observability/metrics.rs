//! Prometheus metric definitions for the signal service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sig_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `endpoint`: static route templates, unknown paths collapse to `/other`
//! - `kind`: the closed set of relay message kinds plus `other`
//! - `route`: `direct`, `broadcast`, `reply`
//! - `outcome`, `reason`: fixed by code
//!
//! Room tokens and participant ids never appear in labels.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `sig_http_requests_total`, `sig_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status` / `status_code`
pub fn record_http_request(method: &str, path: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(path);
    let status = categorize_status_code(status_code);

    histogram!("sig_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("sig_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        100..=399 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Map a request path onto its route template.
pub fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/session" => "/session",
        "/connect" => "/connect",
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        _ => normalize_dynamic_endpoint(path),
    }
}

fn normalize_dynamic_endpoint(path: &str) -> &'static str {
    let mut segments = path.trim_start_matches('/').split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some("connect"), Some(handle), None) if !handle.is_empty() => "/connect/{handle}",
        (Some("ws"), Some(target), None) if !target.is_empty() => "/ws/{target}",
        _ => "/other",
    }
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Metric: `sig_sessions_created_total`
pub fn record_session_created() {
    counter!("sig_sessions_created_total").increment(1);
}

/// Record a join attempt.
///
/// Metric: `sig_join_attempts_total`
/// Labels: `outcome` (`success`, `invalid_password`, `not_found`)
pub fn record_join_attempt(outcome: &'static str) {
    counter!("sig_join_attempts_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Relay Metrics
// ============================================================================

/// Record a relayed message.
///
/// Metric: `sig_relay_messages_total`
/// Labels: `kind`, `route`
pub fn record_relay_message(kind: &'static str, route: &'static str) {
    counter!("sig_relay_messages_total", "kind" => kind, "route" => route).increment(1);
}

/// Record a delivery that did not reach its recipient.
///
/// Metric: `sig_relay_dropped_total`
/// Labels: `reason` (`queue_full`, `peer_gone`, `unknown_recipient`, `self_target`)
pub fn record_relay_drop(reason: &'static str) {
    counter!("sig_relay_dropped_total", "reason" => reason).increment(1);
}

/// Record a peer removed for sustained backpressure.
///
/// Metric: `sig_slow_peer_evictions_total`
pub fn record_slow_peer_eviction() {
    counter!("sig_slow_peer_evictions_total").increment(1);
}

/// Record a connection closed for a protocol violation.
///
/// Metric: `sig_protocol_violations_total`
pub fn record_protocol_violation() {
    counter!("sig_protocol_violations_total").increment(1);
}

/// Metric: `sig_active_rooms`
pub fn set_active_rooms(count: usize) {
    gauge!("sig_active_rooms").set(count as f64);
}

/// Metric: `sig_active_participants`
pub fn participant_joined() {
    gauge!("sig_active_participants").increment(1.0);
}

/// Metric: `sig_active_participants`
pub fn participant_left() {
    gauge!("sig_active_participants").decrement(1.0);
}

/// Metric: `sig_active_connections`
pub fn connection_opened() {
    gauge!("sig_active_connections").increment(1.0);
}

/// Metric: `sig_active_connections`
pub fn connection_closed() {
    gauge!("sig_active_connections").decrement(1.0);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_normalize_static_endpoints() {
        assert_eq!(normalize_endpoint("/session"), "/session");
        assert_eq!(normalize_endpoint("/connect"), "/connect");
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/ready"), "/ready");
        assert_eq!(normalize_endpoint("/metrics"), "/metrics");
    }

    #[test]
    fn test_normalize_dynamic_endpoints() {
        assert_eq!(normalize_endpoint("/connect/abc123"), "/connect/{handle}");
        assert_eq!(normalize_endpoint("/ws/xyz"), "/ws/{target}");
        assert_eq!(normalize_endpoint("/ws/"), "/other");
        assert_eq!(normalize_endpoint("/ws/a/b"), "/other");
        assert_eq!(normalize_endpoint("/admin"), "/other");
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(101), "success");
        assert_eq!(categorize_status_code(400), "error");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(500), "error");
    }

    #[test]
    fn test_join_attempts_are_counted_by_outcome() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_join_attempt("success");
            record_join_attempt("success");
            record_join_attempt("invalid_password");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let success = snapshot
            .iter()
            .find(|(key, _, _, _)| {
                key.key().name() == "sig_join_attempts_total"
                    && key.key().labels().any(|l| l.value() == "success")
            })
            .map(|(_, _, _, value)| value.clone());

        assert_eq!(success, Some(&DebugValue::Counter(2)));
    }

    #[test]
    fn test_participant_gauge_moves_both_ways() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            participant_joined();
            participant_joined();
            participant_left();
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let value = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "sig_active_participants")
            .map(|(_, _, _, value)| value.clone());

        assert!(matches!(value, Some(DebugValue::Gauge(v)) if v.into_inner() == 1.0));
    }
}
