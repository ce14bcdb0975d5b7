//! Failure classification for upstream errors
//!
//! The upstream API reports quota problems only through error text, so telling
//! a retired model from a spent daily allowance from a per-minute throttle
//! comes down to matching its vocabulary. This is best effort and tied to the
//! Gemini error format; it lives behind `Classifier` so another vocabulary can
//! be plugged in without touching the router.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

/// What the router should do about a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// The model id does not exist or was retired. Never retried today.
    Dead,
    /// This key's allowance for this model is used up until the UTC reset.
    DailyExhausted,
    /// Transient throttle. Retry the same pair after the suggested delay.
    RateLimited { retry_after: Option<Duration> },
    /// Not quota related; surface to the caller immediately.
    Fatal,
}

impl Classification {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Dead => "dead",
            Classification::DailyExhausted => "daily_exhausted",
            Classification::RateLimited { .. } => "rate_limited",
            Classification::Fatal => "fatal",
        }
    }
}

/// Maps raw error text to a `Classification`.
pub trait Classifier: Send + Sync {
    fn classify(&self, raw: &str) -> Classification;
}

/// Classifier for the Gemini `generateContent` error vocabulary.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiClassifier;

impl Classifier for GeminiClassifier {
    fn classify(&self, raw: &str) -> Classification {
        classify(raw)
    }
}

/// A quota limit reported as zero, e.g. `"limit": 0` in a quota violation.
static ZERO_LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"limit['": ]+0\b"#).expect("valid regex"));

/// Server-suggested wait, e.g. `"retryDelay": "37s"`.
static RETRY_DELAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"retryDelay['": ]+(\d+(?:\.\d+)?)"#).expect("valid regex")
});

/// Classify raw upstream error text.
///
/// Rules, first match wins:
/// 1. `404` / `NOT_FOUND` → `Dead`, even if the text also mentions throttling
/// 2. `429`, `RESOURCE_EXHAUSTED`, or "quota" together with "limit":
///    - a zero limit or "quota ... exceeded" → `DailyExhausted`
///    - otherwise `RateLimited`, with `retryDelay` if the text carries one
/// 3. anything else → `Fatal`
pub fn classify(raw: &str) -> Classification {
    if raw.contains("404") || raw.contains("NOT_FOUND") {
        return Classification::Dead;
    }

    let lower = raw.to_lowercase();
    let mentions_quota = lower.contains("quota");
    let is_quota = raw.contains("429")
        || raw.contains("RESOURCE_EXHAUSTED")
        || (mentions_quota && lower.contains("limit"));
    if !is_quota {
        return Classification::Fatal;
    }

    if ZERO_LIMIT_RE.is_match(raw) || (mentions_quota && lower.contains("exceeded")) {
        return Classification::DailyExhausted;
    }

    Classification::RateLimited {
        retry_after: retry_delay(raw),
    }
}

/// Parse the server-suggested retry delay, if present.
pub fn retry_delay(raw: &str) -> Option<Duration> {
    let caps = RETRY_DELAY_RE.captures(raw)?;
    let secs: f64 = caps.get(1)?.as_str().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}
