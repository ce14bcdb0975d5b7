//! Credential pool loading
//!
//! Keys are read from a primary env slot (`GEMINI_API_KEY`) plus any number of
//! numbered extension slots (`GEMINI_API_KEY_2`, `GEMINI_API_KEY_3`, ...). Slot
//! order defines priority: the first distinct key is tried first.
//!
//! Keys issued by the same upstream account share one quota pool, so listing
//! the same key twice (or two keys from one account) does not add capacity.
//! Exact duplicates collapse to their first slot.

use std::collections::HashSet;

use common::Secret;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Env slot prefix used when none is configured.
pub const DEFAULT_ENV_PREFIX: &str = "GEMINI_API_KEY";

/// A single API key and its priority position in the pool.
#[derive(Debug, Clone)]
pub struct Credential {
    index: usize,
    key: Secret<String>,
}

impl Credential {
    pub fn new(index: usize, key: impl Into<String>) -> Self {
        Self {
            index,
            key: Secret::new(key.into()),
        }
    }

    /// Zero-based priority position (lower is tried first).
    pub fn index(&self) -> usize {
        self.index
    }

    /// The raw key, for building the outgoing request only.
    pub fn key(&self) -> &str {
        self.key.expose()
    }

    /// Operator-facing label, 1-based (`Key 1`, `Key 2`, ...).
    pub fn label(&self) -> String {
        format!("Key {}", self.index + 1)
    }
}

/// Ordered, deduplicated set of API keys. Never empty.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    prefix: String,
}

impl CredentialPool {
    /// Build a pool from raw slot values in priority order.
    ///
    /// Values are trimmed; empty and unset slots are skipped; repeated keys keep
    /// their first position. Returns `Error::Configuration` when nothing usable
    /// remains.
    pub fn from_slots<I, S>(slots: I) -> Result<Self>
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        Self::build(slots, DEFAULT_ENV_PREFIX)
    }

    /// Load the pool from `<prefix>` and `<prefix>_<n>` environment variables.
    pub fn from_env(prefix: &str) -> Result<Self> {
        let slots = env_slots(
            prefix,
            std::env::vars_os().filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        );
        let pool = Self::build(slots, prefix)?;
        info!(prefix, keys = pool.len(), "loaded API keys");
        Ok(pool)
    }

    fn build<I, S>(slots: I, prefix: &str) -> Result<Self>
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut credentials = Vec::new();

        for slot in slots.into_iter().flatten() {
            let key = slot.as_ref().trim();
            if key.is_empty() {
                continue;
            }
            if !seen.insert(key.to_owned()) {
                debug!(position = credentials.len(), "duplicate API key ignored");
                continue;
            }
            credentials.push(Credential::new(credentials.len(), key));
        }

        if credentials.is_empty() {
            return Err(Error::Configuration(format!(
                "no API keys found (set {prefix}, {prefix}_2, ...)"
            )));
        }

        Ok(Self {
            credentials,
            prefix: prefix.to_owned(),
        })
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Credential> {
        self.credentials.iter()
    }

    /// Env prefix the pool was loaded from (used in remediation hints).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Collect slot values for `prefix` from an env-like iterator.
///
/// The primary slot comes first, followed by numbered slots in ascending
/// numeric order. Gaps in the numbering are allowed.
fn env_slots<I>(prefix: &str, vars: I) -> Vec<Option<String>>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut primary = None;
    let mut numbered: Vec<(u32, String)> = Vec::new();

    for (name, value) in vars {
        if name == prefix {
            primary = Some(value);
            continue;
        }
        let slot = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(n) = slot {
            numbered.push((n, value));
        }
    }

    numbered.sort_by_key(|(n, _)| *n);

    std::iter::once(primary)
        .chain(numbered.into_iter().map(|(_, v)| Some(v)))
        .collect()
}
