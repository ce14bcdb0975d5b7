//! Date-scoped record of exhausted (key, model) pairs
//!
//! Marks only ever apply to the UTC day they were recorded on. When the date
//! changes, every mark is discarded at once; nothing carries over.
//!
//! The state is loaded lazily on first access, mutated in place, and flushed
//! to storage after every new mark, so a crash loses at most the attempt that
//! was in flight. A missing, unreadable, or corrupt backing file is treated as
//! "nothing known yet" rather than an error.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::QuotaStorage;

/// Persisted form: `{"date": "YYYY-MM-DD", "exhausted": [[0, "model"], ...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub date: NaiveDate,
    #[serde(default)]
    pub exhausted: Vec<(usize, String)>,
}

impl QuotaSnapshot {
    pub fn fresh(date: NaiveDate) -> Self {
        Self {
            date,
            exhausted: Vec::new(),
        }
    }

    pub fn contains(&self, credential: usize, model: &str) -> bool {
        self.exhausted
            .iter()
            .any(|(idx, m)| *idx == credential && m == model)
    }

    /// Drop repeated pairs, keeping first-seen order.
    fn dedup(&mut self) {
        let mut seen = HashSet::new();
        self.exhausted
            .retain(|(idx, m)| seen.insert((*idx, m.clone())));
    }
}

/// Source of "today" (UTC). Swappable so tests can cross midnight.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall-clock UTC date.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Availability counts for one pool/chain combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaSummary {
    pub date: NaiveDate,
    pub available: usize,
    pub exhausted: usize,
    pub total: usize,
}

impl fmt::Display for QuotaSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Quota state ({}): {}/{} combinations available, {} exhausted.",
            self.date, self.available, self.total, self.exhausted
        )
    }
}

struct Inner {
    loaded: bool,
    snapshot: QuotaSnapshot,
}

/// Quota state for the current process.
///
/// Construct once and share (`Arc<QuotaStore>`) with every router that uses
/// the same backing storage.
pub struct QuotaStore {
    storage: Arc<dyn QuotaStorage>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl QuotaStore {
    /// Store backed by `storage`, dated by the system clock.
    pub fn new(storage: Arc<dyn QuotaStorage>) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: Arc<dyn QuotaStorage>, clock: Arc<dyn Clock>) -> Self {
        let today = clock.today();
        Self {
            storage,
            clock,
            inner: Mutex::new(Inner {
                loaded: false,
                snapshot: QuotaSnapshot::fresh(today),
            }),
        }
    }

    /// Whether the pair is known exhausted today.
    pub async fn is_exhausted(&self, credential: usize, model: &str) -> bool {
        self.current().await.snapshot.contains(credential, model)
    }

    /// Record the pair as exhausted for today and flush to storage.
    ///
    /// Idempotent: returns `Ok(false)` without touching storage if the pair was
    /// already marked. On a flush failure the mark still holds in memory for
    /// this process and the error is returned.
    pub async fn mark_exhausted(&self, credential: usize, model: &str) -> Result<bool> {
        let mut inner = self.current().await;
        if inner.snapshot.contains(credential, model) {
            return Ok(false);
        }
        inner
            .snapshot
            .exhausted
            .push((credential, model.to_owned()));

        self.merge_external(&mut inner.snapshot).await;
        self.storage.save(&inner.snapshot).await?;

        info!(
            key = credential + 1,
            model,
            date = %inner.snapshot.date,
            "marked exhausted"
        );
        Ok(true)
    }

    /// Counts over the `credentials` x `models` grid for today.
    ///
    /// Marks for models outside `models` (left over from a per-call override
    /// chain) are not counted.
    pub async fn summary(&self, credentials: usize, models: &[String]) -> QuotaSummary {
        let inner = self.current().await;
        let total = credentials * models.len();
        let exhausted = (0..credentials)
            .flat_map(|idx| models.iter().map(move |m| (idx, m)))
            .filter(|(idx, m)| inner.snapshot.contains(*idx, m))
            .count();
        QuotaSummary {
            date: inner.snapshot.date,
            available: total - exhausted,
            exhausted,
            total,
        }
    }

    /// Copy of today's state.
    pub async fn snapshot(&self) -> QuotaSnapshot {
        self.current().await.snapshot.clone()
    }

    /// Forget every mark and delete the stored state.
    pub async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.snapshot = QuotaSnapshot::fresh(self.clock.today());
        inner.loaded = true;
        self.storage.clear().await?;
        info!(storage = %self.storage.describe(), "quota state reset");
        Ok(())
    }

    /// Lock the state, loading it on first use and applying the date rollover.
    async fn current(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock().await;
        let today = self.clock.today();

        if !inner.loaded {
            inner.snapshot = self.load_for(today).await;
            inner.loaded = true;
        } else if inner.snapshot.date != today {
            info!(previous = %inner.snapshot.date, %today, "new UTC day, resetting quota state");
            inner.snapshot = QuotaSnapshot::fresh(today);
        }

        inner
    }

    async fn load_for(&self, today: NaiveDate) -> QuotaSnapshot {
        match self.storage.load().await {
            Ok(Some(mut snapshot)) if snapshot.date == today => {
                snapshot.dedup();
                debug!(
                    storage = %self.storage.describe(),
                    exhausted = snapshot.exhausted.len(),
                    "loaded quota state"
                );
                snapshot
            }
            Ok(Some(snapshot)) => {
                info!(previous = %snapshot.date, %today, "stored quota state is from another day, resetting");
                QuotaSnapshot::fresh(today)
            }
            Ok(None) => QuotaSnapshot::fresh(today),
            Err(e) => {
                warn!(storage = %self.storage.describe(), error = %e, "unusable quota state, starting fresh");
                QuotaSnapshot::fresh(today)
            }
        }
    }

    /// Fold in same-day marks another process flushed since we loaded, so our
    /// next write does not drop them.
    async fn merge_external(&self, snapshot: &mut QuotaSnapshot) {
        let Ok(Some(stored)) = self.storage.load().await else {
            return;
        };
        if stored.date != snapshot.date {
            return;
        }
        for (idx, model) in stored.exhausted {
            if !snapshot.contains(idx, &model) {
                debug!(key = idx + 1, model = %model, "merged mark written by another process");
                snapshot.exhausted.push((idx, model));
            }
        }
    }
}
