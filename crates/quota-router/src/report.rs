//! Availability report for operators
//!
//! A read-only view over the quota state: one line per (key, model) pair plus
//! the aggregate count. Building a report never writes to storage.

use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::credentials::CredentialPool;
use crate::models::ModelChain;
use crate::state::QuotaStore;

/// Status of one (key, model) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairStatus {
    /// Zero-based key position.
    pub credential: usize,
    /// Operator-facing key label (`Key 1`, ...).
    pub key: String,
    pub model: String,
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityReport {
    pub date: NaiveDate,
    pub available: usize,
    pub total: usize,
    pub pairs: Vec<PairStatus>,
}

impl AvailabilityReport {
    /// Collect pair statuses in router priority order.
    pub async fn collect(store: &QuotaStore, pool: &CredentialPool, chain: &ModelChain) -> Self {
        let mut pairs = Vec::with_capacity(pool.len() * chain.len());
        for credential in pool.iter() {
            for model in chain.iter() {
                pairs.push(PairStatus {
                    credential: credential.index(),
                    key: credential.label(),
                    model: model.clone(),
                    exhausted: store.is_exhausted(credential.index(), model).await,
                });
            }
        }
        let available = pairs.iter().filter(|p| !p.exhausted).count();
        let date = store.snapshot().await.date;

        Self {
            date,
            available,
            total: pairs.len(),
            pairs,
        }
    }

    pub fn exhausted(&self) -> usize {
        self.total - self.available
    }
}

impl fmt::Display for AvailabilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Quota state ({}): {}/{} combinations available, {} exhausted.",
            self.date,
            self.available,
            self.total,
            self.exhausted()
        )?;
        for pair in &self.pairs {
            let status = if pair.exhausted {
                "EXHAUSTED"
            } else {
                "available"
            };
            writeln!(
                f,
                "  {} / {:<28} {status}",
                pair.key, pair.model
            )?;
        }
        Ok(())
    }
}
