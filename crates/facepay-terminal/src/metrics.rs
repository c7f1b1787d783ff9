use facepay::{AttemptId, ErrorKind, PaymentState, RecognitionVerdict, SessionObserver};
use prometheus::{
    register_histogram, register_int_counter_vec, Encoder, Histogram, IntCounterVec, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

pub static ATTEMPTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "facepay_attempts_total",
        "Finished payment attempts",
        &["outcome", "error_kind"]
    )
    .unwrap()
});

pub static RECOGNITIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "facepay_recognitions_total",
        "Recognition results at the start of an attempt",
        &["result"]
    )
    .unwrap()
});

pub static TRANSFER_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "facepay_transfer_duration_seconds",
        "Time from claiming a transfer to the sponsor's answer",
        vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap()
});

pub static ENROLLMENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "facepay_enrollments_total",
        "Enrollment requests",
        &["result"]
    )
    .unwrap()
});

pub static AUTH_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "facepay_auth_failures_total",
        "Rejected bearer tokens on protected endpoints",
        &["endpoint"]
    )
    .unwrap()
});

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Counts session activity as it happens.
pub struct PrometheusObserver;

impl SessionObserver for PrometheusObserver {
    fn recognition_finished(&self, _attempt_id: AttemptId, verdict: RecognitionVerdict) {
        RECOGNITIONS.with_label_values(&[verdict.as_str()]).inc();
    }

    fn attempt_finished(&self, _attempt_id: AttemptId, state: PaymentState, error: Option<ErrorKind>) {
        let outcome = if state == PaymentState::Settled {
            "settled"
        } else {
            "failed"
        };
        let kind = error.map(|k| k.as_str()).unwrap_or("");
        ATTEMPTS.with_label_values(&[outcome, kind]).inc();
    }

    fn transfer_finished(&self, _attempt_id: AttemptId, elapsed: Duration, _settled: bool) {
        TRANSFER_LATENCY.observe(elapsed.as_secs_f64());
    }
}
