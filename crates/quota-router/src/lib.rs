//! Multi-credential, multi-model request router for quota-metered generation APIs
//!
//! Spreads requests across an ordered pool of API keys and an ordered chain of
//! fallback models, remembering which (key, model) pairs are exhausted for the
//! current UTC day so later calls skip them without spending a request.
//!
//! Request lifecycle:
//! 1. Keys are loaded from `<PREFIX>`, `<PREFIX>_2`, ... (`CredentialPool::from_env`)
//! 2. `Router::execute` walks pairs in (key, model) priority order, skipping exhausted ones
//! 3. Failures go through the `Classifier`: dead model, daily quota, per-minute limit, or fatal
//! 4. Quota failures mark the pair in the `QuotaStore` (flushed to disk immediately)
//!    and fall through to the next pair; fatal failures surface to the caller unchanged
//! 5. The store discards all marks when the UTC date changes

pub mod binding;
pub mod classify;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod models;
pub mod report;
pub mod router;
pub mod state;
pub mod storage;

pub use binding::{BoundCredential, SharedCredential};
pub use classify::{Classification, Classifier, GeminiClassifier};
pub use credentials::{Credential, CredentialPool, DEFAULT_ENV_PREFIX};
pub use error::{Error, Result};
pub use models::{DEFAULT_MODEL_CHAIN, ModelChain};
pub use report::{AvailabilityReport, PairStatus};
pub use router::{Attempt, RetryPolicy, Router};
pub use state::{Clock, QuotaSnapshot, QuotaStore, QuotaSummary, SystemClock};
pub use storage::{FileStorage, MemoryStorage, QuotaStorage};
