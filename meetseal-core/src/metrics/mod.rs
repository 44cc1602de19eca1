//! Metrics collection for observability

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

/// Initialize metrics with descriptions
pub fn init_metrics() {
    // Key metrics
    describe_counter!("keys.generated", "Number of key pairs generated");
    describe_counter!("keys.published", "Number of public keys published");

    // Rotation metrics
    describe_counter!("chat.rotations.total", "Total key rotations started");
    describe_counter!("chat.rotations.failed", "Key rotations that failed");
    describe_histogram!("chat.rotation.duration_ms", "Key rotation duration in milliseconds");
    describe_counter!("chat.envelopes.installed", "Inbound key envelopes installed");

    // Message metrics
    describe_counter!("chat.messages.encrypted", "Messages encrypted and broadcast");
    describe_counter!("chat.messages.decrypted", "Inbound messages decrypted");
    describe_counter!("chat.messages.undecryptable", "Inbound messages that failed decryption");
    describe_counter!("chat.messages.buffered", "Sends buffered while not ready");

    // Session metrics
    describe_gauge!("chat.sessions.active", "Number of active chat sessions");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a gauge metric
pub fn record_gauge(name: &'static str, value: f64) {
    gauge!(name).set(value);
}

/// Record a histogram metric
pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Timer for measuring operation duration
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    /// Create a new timer
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), start: Instant::now() }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) {
        let duration = self.start.elapsed();
        histogram!(self.name).record(duration.as_secs_f64() * 1000.0);
    }
}
