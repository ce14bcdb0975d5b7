//! Router metrics
//!
//! Emitted through the `metrics` facade; without an installed recorder every
//! call is a no-op. Names:
//!
//! - `quota_router_attempts_total` (counter): labels `model`, `outcome`
//! - `quota_router_exhausted_marks_total` (counter): label `reason`
//! - `quota_router_all_exhausted_total` (counter)

/// Record one unit-of-work attempt and how it ended
/// (`success` or a classification label).
pub fn record_attempt(model: &str, outcome: &'static str) {
    metrics::counter!(
        "quota_router_attempts_total",
        "model" => model.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a pair newly marked exhausted for the day.
pub fn record_exhausted_mark(reason: &'static str) {
    metrics::counter!("quota_router_exhausted_marks_total", "reason" => reason).increment(1);
}

/// Record an `execute` call that ended with every pair exhausted.
pub fn record_all_exhausted() {
    metrics::counter!("quota_router_all_exhausted_total").increment(1);
}
